//! Tools and fixtures shared by the unit tests of the session core.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::dispatcher::Dispatcher;
use super::protocol::ToolContent;
use super::registry::{ToolDescriptor, ToolHandler, ToolRegistry};
use super::schema::{ArgumentKind, ArgumentSchema};
use super::tools::EchoTool;

pub struct SlowTool;

#[async_trait]
impl ToolHandler for SlowTool {
    async fn execute(&self, args: Map<String, Value>) -> anyhow::Result<Vec<ToolContent>> {
        let millis = args.get("millis").and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(vec![ToolContent::text(format!("slept {}ms", millis))])
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "slow",
            "Sleeps before answering",
            ArgumentSchema::new().required("millis", ArgumentKind::Integer, "Delay"),
        )
    }
}

pub struct FailingTool;

#[async_trait]
impl ToolHandler for FailingTool {
    async fn execute(&self, _args: Map<String, Value>) -> anyhow::Result<Vec<ToolContent>> {
        anyhow::bail!("remote returned 503 Service Unavailable")
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("fail", "Always fails", ArgumentSchema::new())
    }
}

pub struct PanickingTool;

#[async_trait]
impl ToolHandler for PanickingTool {
    async fn execute(&self, _args: Map<String, Value>) -> anyhow::Result<Vec<ToolContent>> {
        panic!("handler bug")
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("panic", "Always panics", ArgumentSchema::new())
    }
}

pub fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool).unwrap();
    registry.register(SlowTool).unwrap();
    registry.register(FailingTool).unwrap();
    registry.register(PanickingTool).unwrap();
    registry
}

pub fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(registry()), "test", None)
}
