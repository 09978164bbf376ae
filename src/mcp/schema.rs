use serde_json::{json, Map, Value};

use super::error::ToolError;

/// Primitive types a tool argument may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ArgumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ArgumentField {
    name: String,
    kind: ArgumentKind,
    required: bool,
    description: String,
}

/// Named arguments of a tool, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentSchema {
    fields: Vec<ArgumentField>,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, kind: ArgumentKind, description: &str) -> Self {
        self.field(name, kind, true, description)
    }

    pub fn optional(self, name: &str, kind: ArgumentKind, description: &str) -> Self {
        self.field(name, kind, false, description)
    }

    fn field(mut self, name: &str, kind: ArgumentKind, required: bool, description: &str) -> Self {
        self.fields.push(ArgumentField {
            name: name.to_string(),
            kind,
            required,
            description: description.to_string(),
        });
        self
    }

    /// Renders the schema as the JSON Schema object advertised in discovery.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                json!({
                    "type": field.kind.as_str(),
                    "description": field.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Checks fields in declaration order and reports the first violation.
    /// Arguments the schema does not declare are ignored.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<(), ToolError> {
        for field in &self.fields {
            match arguments.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(ToolError::SchemaViolation {
                        field: field.name.clone(),
                        reason: "missing required field".to_string(),
                    });
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.kind.accepts(value) => {
                    return Err(ToolError::SchemaViolation {
                        field: field.name.clone(),
                        reason: format!(
                            "expected {}, got {}",
                            field.kind.as_str(),
                            json_type_name(value)
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
