use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::parse;
use crate::mcp::protocol::ToolContent;
use crate::mcp::registry::{ToolDescriptor, ToolHandler};
use crate::mcp::schema::{ArgumentKind, ArgumentSchema};

/// Returns its input unchanged
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn execute(&self, args: Map<String, Value>) -> anyhow::Result<Vec<ToolContent>> {
        #[derive(Deserialize)]
        struct Args {
            text: String,
        }

        let params: Args = parse(args)?;
        Ok(vec![ToolContent::text(params.text)])
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "echo",
            "Echo the given text back",
            ArgumentSchema::new().required("text", ArgumentKind::String, "Text to echo"),
        )
    }
}

/// Greet the user with their name
pub struct GreetTool;

#[async_trait]
impl ToolHandler for GreetTool {
    async fn execute(&self, args: Map<String, Value>) -> anyhow::Result<Vec<ToolContent>> {
        #[derive(Deserialize)]
        struct Args {
            name: String,
        }

        let params: Args = parse(args)?;
        tracing::info!("Greeting user: {}", params.name);
        Ok(vec![ToolContent::text(format!("Hello, {}!", params.name))])
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "greet",
            "Greet the user with their name",
            ArgumentSchema::new().required("name", ArgumentKind::String, "The name of the user"),
        )
    }
}

/// Offset of the red channel applied by `get_red_value`.
const RED_OFFSET: i64 = 50;

pub struct RedValueTool;

#[async_trait]
impl ToolHandler for RedValueTool {
    async fn execute(&self, args: Map<String, Value>) -> anyhow::Result<Vec<ToolContent>> {
        #[derive(Deserialize)]
        struct Args {
            a: i64,
        }

        let params: Args = parse(args)?;
        let red = params
            .a
            .checked_add(RED_OFFSET)
            .with_context(|| format!("{} is out of range", params.a))?;
        Ok(vec![ToolContent::text(format!("The red value is {}", red))])
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "get_red_value",
            "Get the red value of a given integer",
            ArgumentSchema::new().required(
                "a",
                ArgumentKind::Integer,
                "The number to get the red value for",
            ),
        )
    }
}
