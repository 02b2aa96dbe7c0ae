//! Error types for trainmcp.
//!
//! Each crate carries its own error enum; everything that reaches the CLI is
//! folded into [`Error`] so it can be printed with a recovery suggestion.

use thiserror::Error;

/// Result type alias using the workspace error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for trainmcp.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, also used when the agent is missing its session
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider error with structured details
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// MCP error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Conversation memory error
    #[error("Memory error: {0}")]
    Memory(String),

    /// The current turn was interrupted
    #[error("Cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check config.json or run 'trainmcp config validate'"),
            Error::Provider(e) => e.recovery_suggestion(),
            Error::Mcp(_) => Some("Check that the MCP server is running and reachable"),
            Error::Memory(_) => Some("Check permissions on the history and profile files"),
            _ => None,
        }
    }

    /// Create a provider-not-configured error.
    pub fn provider_not_configured(provider: &str) -> Self {
        Error::Provider(ProviderError::NotConfigured {
            provider: provider.to_string(),
            env_var: match provider {
                "deepseek" => Some("DEEPSEEK_API_KEY".to_string()),
                "openai" => Some("OPENAI_API_KEY".to_string()),
                _ => None,
            },
        })
    }
}

/// Provider-specific errors with detailed context.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider not configured
    #[error("Provider '{provider}' is not configured")]
    NotConfigured {
        provider: String,
        env_var: Option<String>,
    },

    /// API request failed
    #[error("API request to {provider} failed: {status} - {message}")]
    ApiError {
        provider: String,
        status: u16,
        message: String,
    },

    /// Response could not be understood
    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },

    /// Network error
    #[error("Network error connecting to {provider}: {message}")]
    NetworkError { provider: String, message: String },
}

impl ProviderError {
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ProviderError::NotConfigured {
                env_var: Some(_), ..
            } => Some("Export the API key variable, e.g. DEEPSEEK_API_KEY"),
            ProviderError::NotConfigured { .. } => Some("Set llm.api_key in config.json"),
            ProviderError::ApiError { status: 401, .. } => {
                Some("The LLM endpoint rejected the key; check llm.api_key")
            }
            ProviderError::ApiError { status: 429, .. } => {
                Some("The LLM endpoint is rate limiting, ask again shortly")
            }
            ProviderError::ApiError {
                status: 500..=599, ..
            } => Some("The LLM endpoint is failing on its side, retry later"),
            ProviderError::NetworkError { .. } => {
                Some("Check network.https_proxy and whether llm.base_url is reachable")
            }
            _ => None,
        }
    }

    /// Non-2xx reply from the endpoint.
    pub fn api_error(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        ProviderError::ApiError {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_not_configured() {
        let err = Error::provider_not_configured("deepseek");
        assert!(err.to_string().contains("deepseek"));
        assert!(err.recovery_suggestion().is_some());
        match err {
            Error::Provider(ProviderError::NotConfigured { env_var, .. }) => {
                assert_eq!(env_var.as_deref(), Some("DEEPSEEK_API_KEY"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_api_error() {
        let err = ProviderError::api_error("deepseek", 429, "Rate limited");
        assert!(err.to_string().contains("429"));
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_format_with_suggestion() {
        let err = Error::Config("no MCP session".to_string());
        let text = format_error_with_suggestion(&err);
        assert!(text.starts_with("Configuration error: no MCP session"));
        assert!(text.contains("Suggestion:"));

        let plain = format_error_with_suggestion(&Error::Cancelled);
        assert_eq!(plain, "Cancelled");
    }
}
