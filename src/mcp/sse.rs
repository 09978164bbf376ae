//! SSE transport: the event stream carries server → client messages, a
//! separate POST endpoint accepts client → server messages addressed by
//! session id.

use actix_web::http::header;
use actix_web::web::{self, Bytes};
use actix_web::HttpResponse;
use futures::Stream;
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};

use crate::configuration::Settings;

use super::codec::{self, Inbound, SSE_KEEP_ALIVE};
use super::error::TransportError;
use super::protocol::JsonRpcResponse;
use super::session::{SessionId, SessionManager};

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    session_id: Option<String>,
}

impl SessionQuery {
    fn session_id(&self) -> Result<SessionId, TransportError> {
        match self.session_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(SessionId::from(id.to_string())),
            _ => Err(TransportError::MissingSessionId),
        }
    }
}

/// Closes its session when the event stream is dropped, which is how a
/// client disconnect surfaces.
struct SessionGuard {
    manager: Arc<SessionManager>,
    id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.manager.close(&self.id) {
            tracing::info!(session_id = %self.id, "Event stream dropped, closing session");
        }
    }
}

/// Outbound half of a session as an SSE body: the `endpoint` event, then one
/// `message` event per response, with keep-alive comments while idle.
pub struct SessionStream {
    endpoint: Option<String>,
    outbound: ReceiverStream<JsonRpcResponse>,
    keep_alive: IntervalStream,
    guard: SessionGuard,
}

impl SessionStream {
    fn new(
        endpoint: String,
        outbound: mpsc::Receiver<JsonRpcResponse>,
        keep_alive: Duration,
        guard: SessionGuard,
    ) -> Self {
        let mut interval = interval_at(Instant::now() + keep_alive, keep_alive);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            endpoint: Some(endpoint),
            outbound: ReceiverStream::new(outbound),
            keep_alive: IntervalStream::new(interval),
            guard,
        }
    }
}

impl Stream for SessionStream {
    type Item = Result<Bytes, actix_web::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(endpoint) = this.endpoint.take() {
            return Poll::Ready(Some(Ok(Bytes::from(codec::sse_event("endpoint", &endpoint)))));
        }

        loop {
            match Pin::new(&mut this.outbound).poll_next(cx) {
                Poll::Ready(Some(response)) => match codec::encode(&response) {
                    Ok(data) => {
                        tracing::debug!(
                            session_id = %this.guard.id,
                            id = ?response.id,
                            "Sending JSON-RPC response"
                        );
                        return Poll::Ready(Some(Ok(Bytes::from(codec::sse_event(
                            "message", &data,
                        )))));
                    }
                    Err(err) => {
                        tracing::error!(session_id = %this.guard.id, "Failed to encode response: {}", err);
                    }
                },
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => break,
            }
        }

        match Pin::new(&mut this.keep_alive).poll_next(cx) {
            Poll::Ready(Some(_)) => Poll::Ready(Some(Ok(Bytes::from_static(
                SSE_KEEP_ALIVE.as_bytes(),
            )))),
            _ => Poll::Pending,
        }
    }
}

/// `GET /sse`: opens a session and streams its outbound messages.
#[tracing::instrument(name = "MCP SSE connection", skip(manager, settings))]
pub async fn sse_connect(
    manager: web::Data<SessionManager>,
    settings: web::Data<Settings>,
) -> Result<HttpResponse, TransportError> {
    let manager = manager.into_inner();
    let (session, outbound) = manager.open()?;
    let id = session.id().clone();
    let endpoint = format!("{}?session_id={}", settings.mcp.messages_path, id);

    tracing::info!(session_id = %id, "SSE connection established");
    let guard = SessionGuard { manager, id };
    let stream = SessionStream::new(endpoint, outbound, settings.mcp.keep_alive(), guard);

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(header::CacheControl(vec![header::CacheDirective::NoCache]))
        .insert_header(("x-accel-buffering", "no"))
        .streaming(stream))
}

/// `POST <messages_path>?session_id=…`: hands one message to the session.
/// Failures are reported to the poster only; nothing reaches any stream.
#[tracing::instrument(name = "MCP inbound message", skip(query, body, manager), fields(session_id))]
pub async fn post_message(
    query: web::Query<SessionQuery>,
    body: Bytes,
    manager: web::Data<SessionManager>,
) -> Result<HttpResponse, TransportError> {
    let id = query.session_id()?;
    tracing::Span::current().record("session_id", tracing::field::display(&id));
    manager.accepting(&id)?;

    match codec::decode(&body) {
        Inbound::Request(request) => manager.route(&id, request).await?,
        Inbound::Notification(notification) => manager.notify(&id, notification)?,
        Inbound::Malformed(malformed) => {
            tracing::warn!(reason = %malformed.reason, "Rejecting malformed message");
            return Err(malformed.into());
        }
    }

    Ok(HttpResponse::Accepted().body("Accepted"))
}

/// `DELETE <messages_path>?session_id=…`: explicit termination. Closing a
/// session that is already gone is not an error.
#[tracing::instrument(name = "MCP close session", skip(query, manager))]
pub async fn close_session(
    query: web::Query<SessionQuery>,
    manager: web::Data<SessionManager>,
) -> Result<HttpResponse, TransportError> {
    let id = query.session_id()?;
    if !manager.close(&id) {
        tracing::debug!(session_id = %id, "Session already closed");
    }
    Ok(HttpResponse::NoContent().finish())
}
