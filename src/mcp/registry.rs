use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::{RegistryError, ToolError};
use super::protocol::{Tool, ToolContent};
use super::schema::ArgumentSchema;

/// Name, human description and argument schema of a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: ArgumentSchema,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str, schema: ArgumentSchema) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema,
        }
    }

    /// Wire form used by `tools/list`
    pub fn to_tool(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.to_json_schema(),
        }
    }
}

/// Trait for tool handlers
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with arguments that already passed schema validation
    async fn execute(&self, args: Map<String, Value>) -> anyhow::Result<Vec<ToolContent>>;

    /// Return the tool definition
    fn descriptor(&self) -> ToolDescriptor;
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Tool registry managing all available MCP tools.
///
/// Built once at startup and then shared read-only behind an `Arc`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool handler under the name from its descriptor
    pub fn register<H>(&mut self, handler: H) -> Result<(), RegistryError>
    where
        H: ToolHandler + 'static,
    {
        let descriptor = handler.descriptor();
        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateName(descriptor.name));
        }

        tracing::debug!(tool = %descriptor.name, "Registered tool");
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// List all available tools in registration order
    pub fn list(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.descriptor.to_tool()).collect()
    }

    /// Get a tool handler by name
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolHandler>, ToolError> {
        self.entry(name).map(|t| Arc::clone(&t.handler))
    }

    /// Check arguments against the tool's schema
    pub fn validate(&self, name: &str, arguments: &Map<String, Value>) -> Result<(), ToolError> {
        self.entry(name)?.descriptor.schema.validate(arguments)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn entry(&self, name: &str) -> Result<&RegisteredTool, ToolError> {
        self.index
            .get(name)
            .and_then(|&i| self.tools.get(i))
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }
}
