use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use super::codec::{Call, Notification, Request};
use super::error::ToolError;
use super::protocol::{
    CallToolRequest, CallToolResponse, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcResponse, ServerCapabilities, ServerInfo, ToolListResponse, ToolsCapability,
    PROTOCOL_VERSION,
};
use super::registry::ToolRegistry;
use super::session::McpSession;

/// Resolves requests against the registry and runs each session's
/// message loop.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    server_info: ServerInfo,
    tool_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, server_name: &str, tool_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            server_info: ServerInfo {
                name: server_name.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            tool_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Produces the single response owed for `request`.
    pub async fn dispatch(&self, session: &McpSession, request: Request) -> JsonRpcResponse {
        let id = request.id;
        let outcome = match request.call {
            Call::Initialize(params) => self.handle_initialize(session, params),
            Call::Ping => Ok(json!({})),
            Call::ListTools => self.handle_tools_list(),
            Call::CallTool(call) => self.handle_tools_call(call).await,
            Call::Unsupported { method, .. } => {
                tracing::warn!(session_id = %session.id(), method = %method, "Method not found");
                Err(JsonRpcError::method_not_found(&method))
            }
            Call::InvalidParams { method, reason, .. } => {
                tracing::warn!(session_id = %session.id(), method = %method, reason = %reason, "Invalid params");
                Err(JsonRpcError::invalid_params(&reason))
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(Some(id), result),
            Err(error) => JsonRpcResponse::error(Some(id), error),
        }
    }

    /// Handles a notification. Notifications never receive a response.
    pub fn notify(&self, session: &McpSession, notification: Notification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                session.set_initialized();
                tracing::info!(session_id = %session.id(), "Client finished initialization");
            }
            method => {
                tracing::debug!(session_id = %session.id(), method = %method, "Ignoring notification");
            }
        }
    }

    fn handle_initialize(
        &self,
        session: &McpSession,
        params: InitializeParams,
    ) -> Result<Value, JsonRpcError> {
        tracing::info!(
            session_id = %session.id(),
            protocol_version = %params.protocol_version,
            client = params
                .client_info
                .as_ref()
                .map(|c| c.name.as_str())
                .unwrap_or("unknown"),
            "MCP client initialized"
        );
        session.set_initialized();

        to_result(&InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
                experimental: None,
            },
            server_info: self.server_info.clone(),
        })
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let tools = self.registry.list();
        tracing::debug!("Listing {} available tools", tools.len());
        to_result(&ToolListResponse { tools })
    }

    async fn handle_tools_call(&self, call: CallToolRequest) -> Result<Value, JsonRpcError> {
        let span = tracing::info_span!("mcp_tool_call", tool = %call.name);
        match self.call_tool(call).instrument(span).await {
            Ok(response) => to_result(&response),
            Err(err) => Err(err.into()),
        }
    }

    /// Resolve, validate, invoke. Every handler fault, including timeouts and
    /// panics, comes back as `ToolError::HandlerFailure`.
    pub async fn call_tool(&self, call: CallToolRequest) -> Result<CallToolResponse, ToolError> {
        let handler = self.registry.resolve(&call.name).map_err(|err| {
            tracing::warn!("Tool not found: {}", call.name);
            err
        })?;
        self.registry.validate(&call.name, &call.arguments)?;

        let execution = AssertUnwindSafe(handler.execute(call.arguments)).catch_unwind();
        let finished = match self.tool_timeout {
            Some(limit) => tokio::time::timeout(limit, execution).await.map_err(|_| {
                ToolError::handler_failure(format!("timed out after {}s", limit.as_secs_f32()))
            })?,
            None => execution.await,
        };

        match finished {
            Ok(Ok(content)) => {
                tracing::info!("Tool executed successfully");
                Ok(CallToolResponse::new(content))
            }
            Ok(Err(err)) => {
                tracing::error!("Tool execution failed: {:#}", err);
                Err(ToolError::handler_failure(format!("{:#}", err)))
            }
            Err(_) => {
                tracing::error!("Tool handler panicked");
                Err(ToolError::handler_failure("tool handler panicked"))
            }
        }
    }

    /// Message loop of one session. Requests run concurrently and each
    /// response is pushed as soon as it is ready. Returns once the inbound
    /// queue is closed and all in-flight requests are done, leaving the
    /// session `Closed`.
    ///
    /// At most `max_in_flight` requests run at once. At the cap the loop
    /// stops reading the inbound queue, so posters wait on `route`.
    pub async fn run(
        self: Arc<Self>,
        session: Arc<McpSession>,
        mut inbound: mpsc::Receiver<Request>,
        max_in_flight: usize,
    ) {
        let limit = Arc::new(Semaphore::new(max_in_flight.max(1)));
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                next = inbound.recv() => match next {
                    Some(request) => self.start(&mut in_flight, &limit, &session, request).await,
                    None => break,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(&session, joined);
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            log_join(&session, joined);
        }
        session.finish();
    }

    async fn start(
        self: &Arc<Self>,
        in_flight: &mut JoinSet<()>,
        limit: &Arc<Semaphore>,
        session: &Arc<McpSession>,
        request: Request,
    ) {
        if limit.available_permits() == 0 {
            tracing::debug!(session_id = %session.id(), id = %request.id, "In-flight limit reached, waiting");
        }
        let permit = match Arc::clone(limit).acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                tracing::error!(session_id = %session.id(), id = %request.id, "Dropping request: {}", err);
                return;
            }
        };

        if !session.begin_request(&request.id) {
            tracing::warn!(session_id = %session.id(), id = %request.id, "Request id reused while in flight");
            let error = JsonRpcError::invalid_request("request id is already in flight");
            session
                .deliver(JsonRpcResponse::error(Some(request.id), error))
                .await;
            return;
        }

        let dispatcher = Arc::clone(self);
        let session = Arc::clone(session);
        in_flight.spawn(async move {
            let id = request.id.clone();
            let response = dispatcher.dispatch(&session, request).await;
            session.end_request(&id);
            session.deliver(response).await;
            drop(permit);
        });
    }
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|err| JsonRpcError::internal_error(&err.to_string()))
}

fn log_join(session: &McpSession, joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        tracing::error!(session_id = %session.id(), "Dispatch task failed: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{RequestId, ToolContent};
    use crate::mcp::session::SessionId;
    use crate::mcp::test_support;
    use serde_json::Map;

    fn session() -> McpSession {
        let (inbound, _) = mpsc::channel(1);
        let (outbound, _) = mpsc::channel(1);
        McpSession::new(SessionId::new(), inbound, outbound)
    }

    fn tool_call(id: i64, name: &str, arguments: Value) -> Request {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Request::new(
            id,
            Call::CallTool(CallToolRequest {
                name: name.to_string(),
                arguments,
            }),
        )
    }

    #[tokio::test]
    async fn echo_returns_text_content() {
        let dispatcher = test_support::dispatcher();
        let response = dispatcher
            .dispatch(&session(), tool_call(1, "echo", json!({"text": "hi"})))
            .await;

        assert_eq!(response.id, Some(RequestId::from(1)));
        assert_eq!(
            response.result().unwrap(),
            &json!({"content": [{"type": "text", "text": "hi"}]})
        );
    }

    #[tokio::test]
    async fn missing_field_is_a_schema_violation() {
        let dispatcher = test_support::dispatcher();
        let response = dispatcher
            .dispatch(&session(), tool_call(2, "echo", json!({})))
            .await;

        assert_eq!(response.id, Some(RequestId::from(2)));
        let error = response.error_ref().unwrap();
        assert_eq!(error.kind(), Some("SchemaViolation"));
        assert_eq!(error.data.as_ref().unwrap()["field"], "text");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_response() {
        let dispatcher = test_support::dispatcher();
        let response = dispatcher
            .dispatch(&session(), tool_call(3, "nope", json!({})))
            .await;

        assert_eq!(response.id, Some(RequestId::from(3)));
        assert_eq!(response.error_ref().unwrap().kind(), Some("UnknownTool"));
    }

    #[tokio::test]
    async fn handler_faults_become_handler_failures() {
        let dispatcher = test_support::dispatcher();
        for name in ["fail", "panic"] {
            let response = dispatcher
                .dispatch(&session(), tool_call(4, name, json!({})))
                .await;
            assert_eq!(
                response.error_ref().unwrap().kind(),
                Some("HandlerFailure"),
                "tool {}",
                name
            );
        }
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let dispatcher = Dispatcher::new(
            Arc::new(test_support::registry()),
            "test",
            Some(Duration::from_millis(20)),
        );
        let err = dispatcher
            .call_tool(CallToolRequest {
                name: "slow".to_string(),
                arguments: match json!({"millis": 500}) {
                    Value::Object(map) => map,
                    _ => unreachable!(),
                },
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::HandlerFailure { detail } if detail.contains("timed out")));
    }

    #[tokio::test]
    async fn tools_list_is_the_registry_snapshot() {
        let dispatcher = test_support::dispatcher();
        let response = dispatcher
            .dispatch(&session(), Request::new("list", Call::ListTools))
            .await;

        let tools = response.result().unwrap()["tools"].as_array().unwrap().clone();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["echo", "slow", "fail", "panic"]);
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["text"]));
    }

    #[tokio::test]
    async fn initialize_marks_session() {
        let dispatcher = test_support::dispatcher();
        let session = session();
        let params: InitializeParams = serde_json::from_value(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0.0"}
        }))
        .unwrap();

        let response = dispatcher
            .dispatch(&session, Request::new(0, Call::Initialize(params)))
            .await;

        assert!(session.is_initialized());
        let result = response.result().unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "test");
    }

    #[tokio::test]
    async fn unsupported_and_invalid_requests_are_answered() {
        let dispatcher = test_support::dispatcher();
        let unsupported = dispatcher
            .dispatch(
                &session(),
                Request::new(
                    1,
                    Call::Unsupported {
                        method: "prompts/list".to_string(),
                        params: None,
                    },
                ),
            )
            .await;
        assert_eq!(unsupported.error_ref().unwrap().code, -32601);

        let invalid = dispatcher
            .dispatch(
                &session(),
                Request::new(
                    2,
                    Call::InvalidParams {
                        method: "tools/call".to_string(),
                        params: Value::Null,
                        reason: "Missing params".to_string(),
                    },
                ),
            )
            .await;
        assert_eq!(invalid.error_ref().unwrap().code, -32602);
    }

    #[tokio::test]
    async fn ping_returns_empty_object() {
        let response = test_support::dispatcher()
            .dispatch(&session(), Request::new(9, Call::Ping))
            .await;
        assert_eq!(response.result(), Some(&json!({})));
    }

    #[tokio::test]
    async fn reused_in_flight_id_is_rejected() {
        let dispatcher = Arc::new(test_support::dispatcher());
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
        let session = Arc::new(McpSession::new(SessionId::new(), inbound_tx.clone(), outbound_tx));
        session.mark_ready();
        let task = tokio::spawn(Arc::clone(&dispatcher).run(Arc::clone(&session), inbound_rx, 8));

        inbound_tx
            .send(tool_call(1, "slow", json!({"millis": 100})))
            .await
            .unwrap();
        inbound_tx
            .send(tool_call(1, "echo", json!({"text": "again"})))
            .await
            .unwrap();

        let first = outbound_rx.recv().await.unwrap();
        assert_eq!(first.error_ref().unwrap().code, -32600);
        let second = outbound_rx.recv().await.unwrap();
        assert!(second.result().is_some());

        drop(inbound_tx);
        session.begin_drain();
        task.await.unwrap();
        assert_eq!(session.state(), crate::mcp::session::SessionState::Closed);
    }

    #[test]
    fn content_serializes_with_type_tags() {
        let value = serde_json::to_value(CallToolResponse::new(vec![ToolContent::text("x")])).unwrap();
        assert_eq!(value, json!({"content": [{"type": "text", "text": "x"}]}));
    }
}
