pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;
pub mod sse;
#[cfg(test)]
mod test_support;
pub mod tools;

pub use codec::{Call, Inbound, MalformedMessage, Notification, Request};
pub use dispatcher::Dispatcher;
pub use error::{RegistryError, SessionError, ToolError, TransportError};
pub use protocol::*;
pub use registry::{ToolDescriptor, ToolHandler, ToolRegistry};
pub use schema::{ArgumentKind, ArgumentSchema};
pub use session::{McpSession, SessionId, SessionManager, SessionState};
pub use sse::{close_session, post_message, sse_connect};
