//! Provider trait definitions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trainmcp_core::{ChatMessage, ToolCallRequest, ToolDefinition};

/// Request for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use; empty means the provider default
    pub model: String,
    /// Messages in the conversation, system prompt first
    pub messages: Vec<ChatMessage>,
    /// Tools offered with automatic tool choice; empty offers none
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response text, absent when the model only requested tools
    pub content: Option<String>,
    /// Tool calls requested, in the order the model listed them
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Finish reason
    pub finish_reason: FinishReason,
    /// Usage statistics
    pub usage: Usage,
}

impl CompletionResponse {
    /// Plain text answer with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Answer requesting the given tool calls.
    pub fn with_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            finish_reason: FinishReason::ToolUse,
            ..Self::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Reason the completion finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Normal completion
    #[default]
    Stop,
    /// Hit max tokens limit
    MaxTokens,
    /// Tool use requested
    ToolUse,
    /// Content was filtered
    ContentFilter,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens used
    pub input_tokens: u32,
    /// Output tokens generated
    pub output_tokens: u32,
}

/// Core provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Model used when a request leaves `model` empty.
    fn default_model(&self) -> &str;

    /// Check if provider is configured and ready.
    fn is_configured(&self) -> bool;

    /// Generate a completion.
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse>;
}
