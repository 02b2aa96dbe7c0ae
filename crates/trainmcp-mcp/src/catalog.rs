//! Snapshot of the tools advertised by the server.

use serde_json::{json, Value};
use trainmcp_core::ToolDefinition;

use crate::protocol::McpToolDescriptor;

const UNKNOWN_TOOL: &str = "unknown_tool";

/// Tools known to the session, in server order.
///
/// A catalog is immutable; a refresh builds a new one and swaps it in whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCatalog {
    tools: Vec<ToolDefinition>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self { tools }
    }

    /// Build from raw descriptors, filling in missing fields.
    pub fn from_descriptors(descriptors: Vec<McpToolDescriptor>) -> Self {
        let tools = descriptors
            .into_iter()
            .map(|d| ToolDefinition {
                name: d.name.unwrap_or_else(|| UNKNOWN_TOOL.to_string()),
                description: d.description.unwrap_or_default(),
                parameters: d.input_schema.unwrap_or_else(|| json!({})),
            })
            .collect();
        Self { tools }
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools in the OpenAI function-calling shape.
    pub fn function_schemas(&self) -> Vec<Value> {
        self.tools.iter().map(ToolDefinition::to_function_schema).collect()
    }

    /// One `- name: description` line per tool.
    pub fn summary(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: Option<&str>, description: Option<&str>) -> McpToolDescriptor {
        McpToolDescriptor {
            name: name.map(String::from),
            description: description.map(String::from),
            input_schema: None,
        }
    }

    #[test]
    fn test_missing_fields_are_filled() {
        let catalog = ToolCatalog::from_descriptors(vec![descriptor(None, None)]);
        let tool = &catalog.definitions()[0];
        assert_eq!(tool.name, "unknown_tool");
        assert_eq!(tool.description, "");
        assert_eq!(tool.parameters, json!({}));
    }

    #[test]
    fn test_function_schemas_and_summary() {
        let catalog = ToolCatalog::from_descriptors(vec![
            descriptor(Some("get-current-date"), Some("Current date in Shanghai")),
            descriptor(Some("get-tickets"), Some("Query remaining tickets")),
        ]);

        let schemas = catalog.function_schemas();
        assert_eq!(schemas.len(), 2);
        assert_eq!(schemas[1]["function"]["name"], "get-tickets");
        assert_eq!(
            catalog.summary(),
            "- get-current-date: Current date in Shanghai\n- get-tickets: Query remaining tickets"
        );
        assert_eq!(catalog.names(), vec!["get-current-date", "get-tickets"]);
        assert!(catalog.get("get-tickets").is_some());
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = ToolCatalog::default();
        assert!(catalog.is_empty());
        assert_eq!(catalog.summary(), "");
        assert!(catalog.function_schemas().is_empty());
    }
}
