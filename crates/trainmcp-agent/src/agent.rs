//! Core agent implementation.
//!
//! The [`Agent`] answers one user turn at a time:
//!
//! ```text
//! Agent
//! ├── Provider (LLM completions)
//! ├── McpSession (remote tools)
//! ├── HistoryStore / ProfileStore (optional memory)
//! └── AgentEventHandler (UI callbacks)
//! ```
//!
//! Each round sends the transcript and the tool catalog to the model. Tool
//! calls it requests are executed in order over MCP and their results are
//! appended to the transcript. A reply without tool calls ends the turn; when
//! the round limit is hit a last call without tools forces a text answer.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trainmcp_core::{ChatMessage, Config, ProviderError, Role, ToolCallRequest};
use trainmcp_mcp::{McpError, McpSession, ToolCatalog};
use trainmcp_memory::{HistoryEntry, HistoryStore, ProfileStore, StoreError};
use trainmcp_providers::{CompletionRequest, Provider};

use crate::prompt::SystemPrompt;
use crate::stations::StationCodeMapper;

/// Answer when the server advertised no tools.
pub const NO_TOOLS_MESSAGE: &str = "Error: no tools loaded, check the MCP server";

/// Answer when the model stopped without any text.
pub const TASK_COMPLETED: &str = "Task completed.";

/// Answer when the forced final call returned no text.
pub const MAX_ROUNDS_REACHED: &str = "Reached the maximum number of processing rounds.";

/// Characters of a tool result logged at debug level.
const TOOL_PREVIEW_CHARS: usize = 250;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during agent operations.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Error from the LLM provider.
    #[error("Provider error: {0}")]
    Provider(#[from] anyhow::Error),

    /// Error from the MCP session.
    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    /// Error while saving history or the profile.
    #[error("Memory error: {0}")]
    Memory(#[from] StoreError),

    /// A precondition of the turn is not met.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Agent not properly configured.
    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl From<AgentError> for trainmcp_core::Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Provider(e) => match e.downcast::<ProviderError>() {
                Ok(provider) => trainmcp_core::Error::Provider(provider),
                Err(e) => trainmcp_core::Error::Internal(e.to_string()),
            },
            AgentError::Mcp(e) => e.into(),
            AgentError::Memory(e) => e.into(),
            AgentError::Config(msg) | AgentError::NotConfigured(msg) => {
                trainmcp_core::Error::Config(msg)
            }
            AgentError::Cancelled => trainmcp_core::Error::Cancelled,
        }
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier; empty uses the provider default.
    pub model: String,
    /// Tool-bearing rounds before the answer is forced.
    pub max_iterations: usize,
    /// Sampling temperature, provider default when unset.
    pub temperature: Option<f32>,
    /// Add a summary of earlier sessions to the system prompt.
    pub load_recent_history: bool,
    /// Number of earlier sessions summarized.
    pub recent_history_count: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            max_iterations: 5,
            temperature: None,
            load_recent_history: true,
            recent_history_count: 3,
        }
    }
}

impl AgentConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.llm.model.clone(),
            max_iterations: config.llm.max_iterations,
            temperature: None,
            load_recent_history: config.memory.load_recent_history,
            recent_history_count: config.memory.recent_history_count,
        }
    }
}

// ============================================================================
// Event Handler
// ============================================================================

/// Callbacks fired while a turn runs. All methods default to no-ops.
pub trait AgentEventHandler: Send + Sync {
    /// Called before each request to the model, `round` starts at 1.
    fn on_thinking(&self, _round: usize) {}

    /// Called when a tool call starts.
    fn on_tool_start(&self, _call: &ToolCallRequest) {}

    /// Called with the text fed back to the model for a tool call.
    fn on_tool_complete(&self, _call: &ToolCallRequest, _output: &str, _success: bool) {}

    /// Called with the final answer of a turn.
    fn on_final(&self, _answer: &str) {}
}

/// Default event handler that does nothing.
pub struct NoOpEventHandler;

impl AgentEventHandler for NoOpEventHandler {}

// ============================================================================
// Agent
// ============================================================================

/// The tool-calling loop and its collaborators.
pub struct Agent {
    provider: Arc<dyn Provider>,
    session: Option<Arc<McpSession>>,
    /// `None` when session memory is disabled.
    history: Option<Arc<dyn HistoryStore>>,
    /// `None` when the persistent profile is disabled.
    profile: Option<Arc<dyn ProfileStore>>,
    stations: StationCodeMapper,
    config: AgentConfig,
    event_handler: Arc<dyn AgentEventHandler>,
    cancel_token: CancellationToken,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn session(&self) -> Option<&Arc<McpSession>> {
        self.session.as_ref()
    }

    pub fn history(&self) -> Option<&Arc<dyn HistoryStore>> {
        self.history.as_ref()
    }

    pub fn profile(&self) -> Option<&Arc<dyn ProfileStore>> {
        self.profile.as_ref()
    }

    pub fn stations(&self) -> &StationCodeMapper {
        &self.stations
    }

    /// Tool catalog of the session, empty without one.
    pub fn catalog(&self) -> Arc<ToolCatalog> {
        self.session
            .as_ref()
            .map(|s| s.catalog())
            .unwrap_or_default()
    }

    fn model(&self) -> String {
        if self.config.model.is_empty() {
            self.provider.default_model().to_string()
        } else {
            self.config.model.clone()
        }
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel the running turn at its next step.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Token observed by the running turn, for cancelling from another task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Reset the cancellation token for a new operation.
    pub fn reset_cancel(&mut self) {
        self.cancel_token = CancellationToken::new();
    }

    fn check_cancelled(&self) -> AgentResult<()> {
        if self.cancel_token.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Turn
    // ========================================================================

    /// Answer one user message.
    ///
    /// `max_iterations` overrides the configured round limit. Fails with
    /// [`AgentError::Config`] when there is no connected session; an empty
    /// tool catalog yields [`NO_TOOLS_MESSAGE`] without calling the model.
    pub async fn chat(&self, user_text: &str, max_iterations: Option<usize>) -> AgentResult<String> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| AgentError::Config("no MCP session, connect first".to_string()))?;
        if !session.is_connected() {
            return Err(AgentError::Config(format!(
                "MCP session is {}",
                session.state()
            )));
        }

        // one snapshot for the whole turn
        let catalog = session.catalog();
        if catalog.is_empty() {
            warn!("No MCP tools loaded");
            return Ok(NO_TOOLS_MESSAGE.to_string());
        }

        let max_iterations = max_iterations.unwrap_or(self.config.max_iterations);

        if let Some(ref history) = self.history {
            history.append(Role::User, user_text);
        }
        if let Some(ref profile) = self.profile {
            profile.record_query();
        }

        let mut messages = self.initial_messages(&catalog, user_text);
        info!(query = user_text, tools = catalog.len(), "Starting turn");

        for round in 1..=max_iterations {
            self.check_cancelled()?;
            self.event_handler.on_thinking(round);
            debug!(round, messages = messages.len(), "Requesting completion");

            let request = self
                .completion_request(messages.clone())
                .with_tools(catalog.definitions().to_vec());
            let response = self.provider.complete(request).await?;

            if !response.has_tool_calls() {
                info!(round, "Model produced the final answer");
                return Ok(self.finish(response.content, TASK_COMPLETED));
            }

            debug!(round, calls = response.tool_calls.len(), "Model requested tools");
            let tool_calls = response.tool_calls;
            messages.push(ChatMessage::assistant_with_tools(
                response.content,
                tool_calls.clone(),
            ));

            for call in &tool_calls {
                self.check_cancelled()?;
                let output = self.execute_tool_call(session, call).await;
                messages.push(ChatMessage::tool(&call.id, &call.name, output));
            }
        }

        warn!(max_iterations, "Round limit reached, forcing a final answer");
        self.check_cancelled()?;
        let response = self
            .provider
            .complete(self.completion_request(messages))
            .await?;
        Ok(self.finish(response.content, MAX_ROUNDS_REACHED))
    }

    fn completion_request(&self, messages: Vec<ChatMessage>) -> CompletionRequest {
        let request = CompletionRequest::new(self.model(), messages);
        match self.config.temperature {
            Some(temperature) => request.with_temperature(temperature),
            None => request,
        }
    }

    /// System prompt, then the session window when memory is on, otherwise
    /// just the user message.
    fn initial_messages(&self, catalog: &ToolCatalog, user_text: &str) -> Vec<ChatMessage> {
        let mut prompt = SystemPrompt::new(catalog, &self.stations);
        if let Some(ref profile) = self.profile {
            prompt = prompt.with_preferences(profile.preferences());
        }
        if let Some(ref history) = self.history {
            if self.config.load_recent_history {
                prompt = prompt.with_recent_history(
                    history.recent_summarized_context(self.config.recent_history_count),
                );
            }
        }

        let mut messages = vec![ChatMessage::system(prompt.build())];
        if let Some(ref history) = self.history {
            messages.extend(
                history
                    .session_window()
                    .iter()
                    .filter_map(HistoryEntry::to_chat_message),
            );
        }
        if messages.len() == 1 {
            messages.push(ChatMessage::user(user_text));
        }
        messages
    }

    fn finish(&self, content: Option<String>, fallback: &str) -> String {
        let answer = content
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| fallback.to_string());
        if let Some(ref history) = self.history {
            history.append(Role::Assistant, &answer);
        }
        self.event_handler.on_final(&answer);
        answer
    }

    /// Run one requested call and return the text fed back to the model.
    ///
    /// Never fails: malformed arguments and failed calls become an error
    /// text so every request gets exactly one result.
    async fn execute_tool_call(&self, session: &McpSession, call: &ToolCallRequest) -> String {
        self.event_handler.on_tool_start(call);

        let arguments = match call.parse_arguments() {
            Ok(arguments) => arguments,
            Err(e) => {
                let message = format!(
                    "Error: arguments for tool '{}' are not valid JSON",
                    call.name
                );
                error!(tool = %call.name, error = %e, "Invalid tool arguments");
                self.event_handler.on_tool_complete(call, &message, false);
                return message;
            }
        };

        info!(tool = %call.name, "Calling tool");
        debug!(tool = %call.name, arguments = %arguments, "Tool arguments");

        let (output, success) = match session.call_tool(&call.name, arguments).await {
            Ok(result) => (normalize_tool_result(&result), true),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                let output = json!({ "error": format!("tool call failed after retries: {}", e) });
                (output.to_string(), false)
            }
        };

        let preview: String = output.chars().take(TOOL_PREVIEW_CHARS).collect();
        debug!(tool = %call.name, result = %preview, "Tool result");
        self.event_handler.on_tool_complete(call, &output, success);
        output
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Close the MCP session, then save history and the profile.
    ///
    /// Both stores are saved even when the first one fails; the last error
    /// is returned.
    pub async fn cleanup(&self) -> AgentResult<()> {
        if let Some(ref session) = self.session {
            session.cleanup().await;
        }

        let mut result = Ok(());
        if let Some(ref history) = self.history {
            if let Err(e) = history.flush().await {
                error!(error = %e, "Failed to save conversation history");
                result = Err(e.into());
            }
        }
        if let Some(ref profile) = self.profile {
            if let Err(e) = profile.persist().await {
                error!(error = %e, "Failed to save user profile");
                result = Err(e.into());
            }
        }
        result
    }
}

/// Text fed back to the model for a tool result.
///
/// An MCP content list yields the text of its first item; anything else is
/// rendered as JSON, with plain strings passed through.
pub fn normalize_tool_result(result: &Value) -> String {
    let first = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.first());

    if let Some(first) = first {
        return match first.get("text") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => result.to_string(),
        };
    }

    match result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Agent Builder
// ============================================================================

/// Builder for constructing an [`Agent`].
pub struct AgentBuilder {
    provider: Option<Arc<dyn Provider>>,
    session: Option<Arc<McpSession>>,
    history: Option<Arc<dyn HistoryStore>>,
    profile: Option<Arc<dyn ProfileStore>>,
    stations: Option<StationCodeMapper>,
    config: AgentConfig,
    event_handler: Option<Arc<dyn AgentEventHandler>>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            provider: None,
            session: None,
            history: None,
            profile: None,
            stations: None,
            config: AgentConfig::default(),
            event_handler: None,
        }
    }

    /// Set the LLM provider.
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the MCP session.
    pub fn session(mut self, session: Arc<McpSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Enable session memory.
    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Enable the persistent user profile.
    pub fn profile(mut self, profile: Arc<dyn ProfileStore>) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Set the station code table, the built-in one by default.
    pub fn stations(mut self, stations: StationCodeMapper) -> Self {
        self.stations = Some(stations);
        self
    }

    /// Set the model to use.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the round limit.
    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    /// Set the full configuration.
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn AgentEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Build the agent.
    pub fn build(self) -> AgentResult<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::NotConfigured("provider is required".to_string()))?;

        Ok(Agent {
            provider,
            session: self.session,
            history: self.history,
            profile: self.profile,
            stations: self.stations.unwrap_or_default(),
            config: self.config,
            event_handler: self
                .event_handler
                .unwrap_or_else(|| Arc::new(NoOpEventHandler)),
            cancel_token: CancellationToken::new(),
        })
    }
}
