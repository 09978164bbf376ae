//! Built-in tools exposed by the server.

pub mod fetch;
pub mod text;

pub use fetch::*;
pub use text::*;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::configuration::FetchSettings;

use super::registry::ToolRegistry;

/// Deserializes validated tool arguments into a handler's typed `Args`.
fn parse<T: DeserializeOwned>(args: Map<String, Value>) -> anyhow::Result<T> {
    serde_json::from_value(Value::Object(args)).context("Invalid arguments")
}

/// Builds the registry served by the process. Fails on duplicate names or
/// when the HTTP client for `fetch_url` cannot be created.
pub fn builtin_registry(fetch: &FetchSettings) -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool)?;
    registry.register(GreetTool)?;
    registry.register(RedValueTool)?;
    registry.register(FetchUrlTool::new(fetch)?)?;
    Ok(registry)
}
