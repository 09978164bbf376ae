//! Wire codec for the JSON-RPC messages exchanged over the side channel and
//! the event stream.
//!
//! Decoding is total: anything that is not a well-formed JSON-RPC 2.0 request
//! or notification comes back as [`Inbound::Malformed`] instead of an error
//! that could abort the caller.

use serde::{de::DeserializeOwned, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use super::protocol::{
    CallToolRequest, InitializeParams, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId, JSONRPC_VERSION,
};

/// Keep-alive comment sent on idle event streams.
pub const SSE_KEEP_ALIVE: &str = ": ping\n\n";

/// A typed method call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Initialize(InitializeParams),
    Ping,
    ListTools,
    CallTool(CallToolRequest),
    /// A method this server does not implement.
    Unsupported {
        method: String,
        params: Option<Value>,
    },
    /// A known method whose params do not have the expected shape.
    InvalidParams {
        method: String,
        params: Value,
        reason: String,
    },
}

impl Call {
    pub fn method(&self) -> &str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::Ping => "ping",
            Self::ListTools => "tools/list",
            Self::CallTool(_) => "tools/call",
            Self::Unsupported { method, .. } | Self::InvalidParams { method, .. } => method,
        }
    }

    fn from_parts(method: String, params: Option<Value>) -> Self {
        match method.as_str() {
            "initialize" => parse_params(method, params, Self::Initialize),
            "ping" => Self::Ping,
            "tools/list" => Self::ListTools,
            "tools/call" => parse_params(method, params, Self::CallTool),
            _ => Self::Unsupported { method, params },
        }
    }

    fn params(&self) -> Option<Value> {
        match self {
            Self::Initialize(params) => serde_json::to_value(params).ok(),
            Self::CallTool(params) => serde_json::to_value(params).ok(),
            Self::Ping | Self::ListTools => None,
            Self::Unsupported { params, .. } => params.clone(),
            Self::InvalidParams { params, .. } => Some(params.clone()),
        }
    }
}

fn parse_params<T, F>(method: String, params: Option<Value>, wrap: F) -> Call
where
    T: DeserializeOwned,
    F: FnOnce(T) -> Call,
{
    let Some(params) = params else {
        return Call::InvalidParams {
            method,
            params: Value::Null,
            reason: "Missing params".to_string(),
        };
    };

    match serde_json::from_value::<T>(params.clone()) {
        Ok(parsed) => wrap(parsed),
        Err(err) => Call::InvalidParams {
            method,
            params,
            reason: err.to_string(),
        },
    }
}

/// An inbound request that expects exactly one correlated response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub call: Call,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, call: Call) -> Self {
        Self {
            id: id.into(),
            call,
        }
    }
}

impl From<&Request> for JsonRpcRequest {
    fn from(request: &Request) -> Self {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(request.id.clone()),
            method: request.call.method().to_string(),
            params: request.call.params(),
        }
    }
}

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        JsonRpcRequest::from(self).serialize(serializer)
    }
}

/// A fire-and-forget message; never answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

impl From<&Notification> for JsonRpcNotification {
    fn from(notification: &Notification) -> Self {
        JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: notification.method.clone(),
            params: notification.params.clone(),
        }
    }
}

impl Serialize for Notification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        JsonRpcNotification::from(self).serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Could not parse message: {reason}")]
pub struct MalformedMessage {
    pub raw: String,
    pub reason: String,
}

impl MalformedMessage {
    fn new(raw: &[u8], reason: impl Into<String>) -> Self {
        Self {
            raw: String::from_utf8_lossy(raw).into_owned(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request(Request),
    Notification(Notification),
    Malformed(MalformedMessage),
}

pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

pub fn decode(bytes: &[u8]) -> Inbound {
    match decode_envelope(bytes) {
        Ok(envelope) => match envelope.id {
            Some(id) => Inbound::Request(Request {
                id,
                call: Call::from_parts(envelope.method, envelope.params),
            }),
            None => Inbound::Notification(Notification {
                method: envelope.method,
                params: envelope.params,
            }),
        },
        Err(malformed) => Inbound::Malformed(malformed),
    }
}

fn decode_envelope(bytes: &[u8]) -> Result<JsonRpcRequest, MalformedMessage> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| MalformedMessage::new(bytes, format!("invalid UTF-8: {}", err)))?;
    let value: Value = serde_json::from_str(text)
        .map_err(|err| MalformedMessage::new(bytes, format!("invalid JSON: {}", err)))?;

    let object = match &value {
        Value::Object(object) => object,
        Value::Array(_) => {
            return Err(MalformedMessage::new(
                bytes,
                "batch messages are not supported",
            ))
        }
        _ => return Err(MalformedMessage::new(bytes, "expected a JSON object")),
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(MalformedMessage::new(bytes, "jsonrpc must be \"2.0\""));
    }
    if !object.contains_key("method") {
        let reason = if object.contains_key("result") || object.contains_key("error") {
            "responses are not accepted on the inbound channel"
        } else {
            "missing method"
        };
        return Err(MalformedMessage::new(bytes, reason));
    }

    serde_json::from_value(value).map_err(|err| MalformedMessage::new(bytes, err.to_string()))
}

/// Decodes a server response. Used by callers reading the event stream.
pub fn decode_response(bytes: &[u8]) -> Result<JsonRpcResponse, MalformedMessage> {
    serde_json::from_slice(bytes).map_err(|err| MalformedMessage::new(bytes, err.to_string()))
}

/// Frames one server-sent event. Multi-line payloads are split across
/// several `data:` lines so the client reassembles them unchanged.
pub fn sse_event(event: &str, data: &str) -> String {
    let mut frame = format!("event: {}\n", event);
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::JsonRpcError;
    use serde_json::json;

    fn call_echo(text: &str) -> Call {
        let mut arguments = serde_json::Map::new();
        arguments.insert("text".to_string(), json!(text));
        Call::CallTool(CallToolRequest {
            name: "echo".to_string(),
            arguments,
        })
    }

    #[test]
    fn request_survives_encode_decode() {
        let requests = vec![
            Request::new(7, call_echo("hi")),
            Request::new("req-a", Call::ListTools),
            Request::new(RequestId::Number(serde_json::Number::from_f64(1.5).unwrap()), Call::Ping),
            Request::new(
                3,
                Call::Unsupported {
                    method: "resources/list".to_string(),
                    params: Some(json!({"cursor": "x"})),
                },
            ),
        ];

        for request in requests {
            let wire = encode(&request).unwrap();
            assert_eq!(decode(wire.as_bytes()), Inbound::Request(request));
        }
    }

    #[test]
    fn response_survives_encode_decode() {
        let ok = JsonRpcResponse::success(Some("a".into()), json!({"content": []}));
        let err = JsonRpcResponse::error(Some(9.into()), JsonRpcError::method_not_found("x"));
        let anonymous = JsonRpcResponse::error(None, JsonRpcError::parse_error());

        for response in [ok, err, anonymous] {
            let wire = encode(&response).unwrap();
            assert_eq!(decode_response(wire.as_bytes()).unwrap(), response);
        }
    }

    #[test]
    fn response_carries_exactly_one_outcome() {
        let wire = encode(&JsonRpcResponse::success(Some(1.into()), json!({}))).unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert!(value.get("result").is_some());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn notification_survives_encode_decode() {
        let notifications = vec![
            Notification {
                method: "notifications/initialized".to_string(),
                params: None,
            },
            Notification {
                method: "notifications/progress".to_string(),
                params: Some(json!({"progress": 3})),
            },
        ];

        for notification in notifications {
            let wire = encode(&notification).unwrap();
            let value: Value = serde_json::from_str(&wire).unwrap();
            assert_eq!(value["jsonrpc"], "2.0");
            assert_eq!(decode(wire.as_bytes()), Inbound::Notification(notification));
        }
    }

    #[test]
    fn null_params_are_kept_apart_from_absent_params() {
        let explicit = Request::new(
            11,
            Call::Unsupported {
                method: "resources/list".to_string(),
                params: Some(Value::Null),
            },
        );
        let absent = Request::new(
            12,
            Call::Unsupported {
                method: "resources/list".to_string(),
                params: None,
            },
        );

        let wire = encode(&explicit).unwrap();
        assert!(wire.contains(r#""params":null"#));
        assert_eq!(decode(wire.as_bytes()), Inbound::Request(explicit));

        let wire = encode(&absent).unwrap();
        assert!(!wire.contains("params"));
        assert_eq!(decode(wire.as_bytes()), Inbound::Request(absent));
    }

    #[test]
    fn string_and_numeric_ids_are_distinct() {
        assert_ne!(RequestId::from(1), RequestId::from("1"));
    }

    #[test]
    fn message_without_id_is_a_notification() {
        let inbound = decode(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert_eq!(
            inbound,
            Inbound::Notification(Notification {
                method: "notifications/initialized".to_string(),
                params: None,
            })
        );
    }

    #[test]
    fn bad_params_stay_correlated() {
        let inbound = decode(br#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"arguments":{}}}"#);
        match inbound {
            Inbound::Request(Request {
                id,
                call: Call::InvalidParams { method, .. },
            }) => {
                assert_eq!(id, RequestId::from(4));
                assert_eq!(method, "tools/call");
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn null_arguments_become_empty() {
        let inbound = decode(
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":null}}"#,
        );
        match inbound {
            Inbound::Request(Request {
                call: Call::CallTool(call),
                ..
            }) => assert!(call.arguments.is_empty()),
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn structurally_invalid_input_is_malformed() {
        let cases: [&[u8]; 7] = [
            b"not json",
            b"\xff\xfe",
            b"[]",
            b"42",
            br#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#,
            br#"{"jsonrpc":"2.0","id":1}"#,
            br#"{"jsonrpc":"2.0","id":{"nested":true},"method":"ping"}"#,
        ];

        for raw in cases {
            assert!(
                matches!(decode(raw), Inbound::Malformed(_)),
                "expected malformed for {:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn inbound_responses_are_rejected() {
        match decode(br#"{"jsonrpc":"2.0","id":1,"result":{}}"#) {
            Inbound::Malformed(malformed) => {
                assert!(malformed.reason.contains("responses"));
                assert!(malformed.raw.contains("result"));
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn sse_frames_split_lines() {
        assert_eq!(sse_event("message", "{}"), "event: message\ndata: {}\n\n");
        assert_eq!(
            sse_event("message", "a\nb"),
            "event: message\ndata: a\ndata: b\n\n"
        );
    }
}
