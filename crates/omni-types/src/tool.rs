use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Definition of a callable tool.
/// Follows the OpenAI function-calling schema for broad provider compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String, // always "function"
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema-like parameter object
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

fn function_type() -> String {
    "function".to_string()
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ToolDescriptor {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: function_type(),
            function: FunctionSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Accept either the OpenAI shape or a bare MCP tool
    /// (`{name, description, inputSchema}`).
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get("function").is_some() {
            return serde_json::from_value(value.clone()).ok();
        }
        let name = value.get("name")?.as_str()?;
        let description = value
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default();
        let parameters = value
            .get("inputSchema")
            .or_else(|| value.get("parameters"))
            .cloned()
            .unwrap_or_else(empty_object);
        Some(Self::function(name, description, parameters))
    }
}
