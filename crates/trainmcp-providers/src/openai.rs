//! OpenAI-compatible chat-completions provider.
//!
//! DeepSeek speaks the same wire format, so it is the default target.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use trainmcp_core::config::{LlmConfig, NetworkConfig};
use trainmcp_core::{ChatMessage, ProviderError, ToolCallRequest, ToolDefinition};

use crate::traits::{CompletionRequest, CompletionResponse, FinishReason, Provider, Usage};

/// Default API base URL.
const DEEPSEEK_API_URL: &str = "https://api.deepseek.com";

const DEFAULT_MODEL: &str = "deepseek-chat";

/// Provider for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    label: String,
}

impl OpenAIProvider {
    /// Create a provider for the DeepSeek endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEEPSEEK_API_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            label: "deepseek".to_string(),
        }
    }

    /// Build from the `llm` and `network` config sections.
    pub fn from_config(llm: &LlmConfig, network: &NetworkConfig) -> Result<Self, ProviderError> {
        let api_key = llm.resolve_api_key().ok_or_else(|| ProviderError::NotConfigured {
            provider: llm.provider.clone(),
            env_var: Some(llm.api_key_env.clone()),
        })?;

        let network_error = |e: reqwest::Error| ProviderError::NetworkError {
            provider: llm.provider.clone(),
            message: e.to_string(),
        };

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(llm.request_timeout_seconds))
            .danger_accept_invalid_certs(!network.verify_ssl);

        if let Some(ref proxy) = network.http_proxy {
            builder = builder.proxy(reqwest::Proxy::http(proxy).map_err(network_error)?);
        }
        if let Some(ref proxy) = network.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy).map_err(network_error)?);
        }

        let client = builder.build().map_err(network_error)?;

        let mut provider = Self {
            client,
            api_key,
            base_url: DEEPSEEK_API_URL.to_string(),
            default_model: llm.model.clone(),
            label: llm.provider.clone(),
        };
        if let Some(ref base_url) = llm.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        Ok(provider)
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn format_messages(messages: &[ChatMessage]) -> Vec<OpenAIMessage> {
        messages.iter().map(Self::convert_message).collect()
    }

    fn convert_message(message: &ChatMessage) -> OpenAIMessage {
        let role = message.role().as_str().to_string();
        match message {
            ChatMessage::System { content } | ChatMessage::User { content } => OpenAIMessage {
                role,
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            ChatMessage::Assistant { content, tool_calls } => OpenAIMessage {
                role,
                content: content.clone(),
                tool_calls: (!tool_calls.is_empty()).then(|| {
                    tool_calls
                        .iter()
                        .map(|tc| OpenAIToolCall {
                            id: tc.id.clone(),
                            tool_type: "function".to_string(),
                            function: OpenAIFunctionCall {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: None,
                name: None,
            },
            ChatMessage::Tool {
                tool_call_id,
                name,
                content,
            } => OpenAIMessage {
                role,
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
                name: Some(name.clone()),
            },
        }
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<OpenAITool> {
        tools
            .iter()
            .map(|t| OpenAITool {
                tool_type: "function".to_string(),
                function: OpenAIFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_request(&self, request: &CompletionRequest) -> OpenAIRequest {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        let (tools, tool_choice) = if request.tools.is_empty() {
            (None, None)
        } else {
            (Some(Self::format_tools(&request.tools)), Some("auto".to_string()))
        };

        OpenAIRequest {
            model,
            messages: Self::format_messages(&request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools,
            tool_choice,
            stream: false,
        }
    }

    fn parse_response(response: OpenAIResponse) -> anyhow::Result<CompletionResponse> {
        let Some(choice) = response.choices.into_iter().next() else {
            anyhow::bail!("Completion response contained no choices");
        };

        // Arguments stay raw; they are validated right before dispatch
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest::new(tc.id, tc.function.name, tc.function.arguments))
            .collect();

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("length") => FinishReason::MaxTokens,
            Some("tool_calls") => FinishReason::ToolUse,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        let usage = response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn id(&self) -> &str {
        &self.label
    }

    fn name(&self) -> &str {
        "OpenAI-compatible"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    #[instrument(skip(self, request), fields(model = %request.model, messages = request.messages.len()))]
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let api_request = self.build_request(&request);

        debug!(tools = request.tools.len(), "Sending chat completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&api_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("{} API error: {} - {}", self.label, status, error_text);
            return Err(ProviderError::api_error(&self.label, status.as_u16(), error_text).into());
        }

        let api_response: OpenAIResponse = response.json().await?;
        let parsed = Self::parse_response(api_response)?;
        debug!(
            tool_calls = parsed.tool_calls.len(),
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "Chat completion received"
        );
        Ok(parsed)
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    // Assistant messages with tool calls carry an explicit null
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    tool_type: String,
    function: OpenAIFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
