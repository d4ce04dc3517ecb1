//! Discovered tool and resource descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between server name and tool name in a qualified name.
pub const QUALIFIED_NAME_SEPARATOR: char = '.';

/// A tool advertised by a connected server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name as the server knows it.
    pub name: String,

    /// Name of the server that advertised the tool (lookup key, not ownership).
    pub server: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the tool's arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

impl ToolDescriptor {
    pub fn new(server: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            description: None,
            input_schema: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// System-wide unique name: `<server>.<tool>`.
    pub fn qualified_name(&self) -> String {
        format!("{}{QUALIFIED_NAME_SEPARATOR}{}", self.server, self.name)
    }

    /// Schema advertised to the completion provider.
    pub fn to_schema(&self) -> ToolSchema {
        let description = self.description.as_deref().unwrap_or("No description");
        ToolSchema {
            name: self.qualified_name(),
            description: format!("[MCP:{}] {description}", self.server),
            parameters: self.input_schema.clone().unwrap_or_else(|| {
                serde_json::json!({ "type": "object", "properties": {} })
            }),
        }
    }
}

/// Function schema handed to a completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    /// OpenAI-style `{"type": "function", "function": {...}}` wrapper.
    pub fn to_openai_function(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Content fetched for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceContent {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Binary {
        data: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl ResourceContent {
    /// Text view of the content; binary data is summarized by size.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text { text, .. } => text.clone(),
            Self::Binary { data, mime_type } => format!(
                "<{} bytes of {}>",
                data.len(),
                mime_type.as_deref().unwrap_or("binary data")
            ),
        }
    }
}

/// A resource advertised by a connected server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,

    /// Name of the advertising server.
    pub server: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Lazily fetched content; `None` until first read or after eviction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ResourceContent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ResourceDescriptor {
    pub fn new(server: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            server: server.into(),
            name: None,
            description: None,
            mime_type: None,
            content: None,
            fetched_at: None,
        }
    }

    /// Whether cached content is present and younger than `ttl` (if any).
    pub fn has_fresh_content(&self, now: DateTime<Utc>, ttl: Option<chrono::Duration>) -> bool {
        match (&self.content, self.fetched_at, ttl) {
            (None, _, _) => false,
            (Some(_), _, None) => true,
            (Some(_), Some(fetched), Some(ttl)) => now - fetched < ttl,
            (Some(_), None, Some(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_qualified_name_and_schema() {
        let tool = ToolDescriptor::new("blender", "add_cube")
            .with_description("Add a cube")
            .with_input_schema(json!({"type": "object", "properties": {"size": {"type": "number"}}}));

        assert_eq!(tool.qualified_name(), "blender.add_cube");

        let function = tool.to_schema().to_openai_function();
        assert_eq!(function["type"], "function");
        assert_eq!(function["function"]["name"], "blender.add_cube");
        assert_eq!(function["function"]["description"], "[MCP:blender] Add a cube");
        assert_eq!(
            function["function"]["parameters"]["properties"]["size"]["type"],
            "number"
        );
    }

    #[test]
    fn test_schema_defaults_to_empty_object() {
        let schema = ToolDescriptor::new("s", "t").to_schema();
        assert_eq!(schema.parameters["type"], "object");
        assert!(schema.description.ends_with("No description"));
    }

    #[test]
    fn test_fresh_content_respects_ttl() {
        let now = Utc::now();
        let mut resource = ResourceDescriptor::new("docs", "file:///readme.md");
        assert!(!resource.has_fresh_content(now, None));

        resource.content = Some(ResourceContent::Text {
            text: "hello".into(),
            mime_type: None,
        });
        resource.fetched_at = Some(now - chrono::Duration::seconds(120));

        assert!(resource.has_fresh_content(now, None));
        assert!(resource.has_fresh_content(now, Some(chrono::Duration::seconds(300))));
        assert!(!resource.has_fresh_content(now, Some(chrono::Duration::seconds(60))));
    }
}
