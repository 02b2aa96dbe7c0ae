//! Configuration system for trainmcp.
//!
//! Values are layered with figment: built-in defaults, then the config file
//! (JSON or TOML, chosen by extension), then `TRAINMCP_`-prefixed environment
//! variables using `__` as the nesting separator. The handful of legacy
//! variables (`DEEPSEEK_API_KEY`, `BASE_URL`, `MODEL`, proxy and TLS switches)
//! are resolved once here so nothing else in the workspace reads the
//! environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Main configuration struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote MCP server
    pub mcp_server: McpServerConfig,
    /// LLM endpoint
    pub llm: LlmConfig,
    /// Conversation memory and user profile
    pub memory: MemoryConfig,
    /// Logging
    pub logging: LoggingConfig,
    /// Outbound HTTP settings for the LLM client
    pub network: NetworkConfig,
    /// Optional JSON file extending the station code table
    pub city_codes_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServerConfig {
    /// Base URL; `/mcp` and `/sse` are appended
    pub url: String,
    /// Retry, timeout and keep-alive settings
    pub connection: ConnectionConfig,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:12306".to_string(),
            connection: ConnectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Attempts per RPC call and per connect
    pub retry_attempts: u32,
    /// Base backoff in seconds, doubled on every attempt
    pub retry_delay: f64,
    /// Upper bound for a single backoff wait in seconds
    pub max_retry_delay: f64,
    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
    /// Run the background SSE listener
    pub sse_reconnect_enabled: bool,
    /// Seconds between SSE reconnect attempts
    pub sse_reconnect_interval: u64,
    /// Seconds between heartbeat pings, 0 disables
    pub heartbeat_interval: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay: 1.0,
            max_retry_delay: 30.0,
            timeout_seconds: 30,
            sse_reconnect_enabled: true,
            sse_reconnect_interval: 5,
            heartbeat_interval: 60,
        }
    }
}

impl ConnectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay.max(0.0))
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_retry_delay.max(0.0))
    }

    pub fn sse_reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.sse_reconnect_interval)
    }

    /// Heartbeat period, or `None` when heartbeats are disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval > 0).then(|| Duration::from_secs(self.heartbeat_interval))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider label, used for logging and error messages
    pub provider: String,
    /// Model name sent with every completion request
    pub model: String,
    /// Base URL (provider default when unset)
    pub base_url: Option<String>,
    /// API key (resolved from `api_key_env` at load time when unset)
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Tool-calling rounds per turn before the forced final answer
    pub max_iterations: usize,
    /// Timeout for a single completion request in seconds
    pub request_timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            api_key: None,
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            max_iterations: 5,
            request_timeout_seconds: 60,
        }
    }
}

impl LlmConfig {
    /// The configured API key, if any non-empty key is present.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.as_ref().filter(|k| !k.is_empty()).cloned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Keep the running conversation and feed it back to the LLM
    pub session_enabled: bool,
    /// Keep a persistent user profile
    pub persistent_enabled: bool,
    /// Size of the conversation window sent to the LLM
    pub max_context_messages: usize,
    /// Archived sessions file
    pub history_path: PathBuf,
    /// User profile file
    pub user_profile_path: PathBuf,
    /// Summarize recent archived sessions into the system prompt
    pub load_recent_history: bool,
    /// How many archived sessions to summarize
    pub recent_history_count: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            session_enabled: true,
            persistent_enabled: true,
            max_context_messages: 20,
            history_path: PathBuf::from("conversation_history.json"),
            user_profile_path: PathBuf::from("user_profile.json"),
            load_recent_history: true,
            recent_history_count: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name: TRACE, DEBUG, INFO, WARN/WARNING, ERROR/CRITICAL
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 7] = ["trace", "debug", "info", "warn", "warning", "error", "critical"];

impl LoggingConfig {
    /// Translate the level into a `tracing` filter directive.
    pub fn filter_directive(&self) -> &'static str {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "warn" | "warning" => "warn",
            "error" | "critical" => "error",
            _ => "info",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    /// Verify TLS certificates
    pub verify_ssl: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_proxy: None,
            https_proxy: None,
            verify_ssl: true,
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Field path (e.g., "mcp_server.connection.retry_attempts")
    pub field: String,
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Resolve which config file to read: explicit path, `CONFIG_PATH`, then `config.json`.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load configuration from defaults, the config file and the environment.
    ///
    /// A missing file is not an error; the defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self, Error> {
        let path = Self::resolve_path(explicit);
        let model_in_file = Self::file_figment(&path).find_value("llm.model").is_ok();

        let mut config: Config = Self::layered(&path)
            .merge(Env::prefixed("TRAINMCP_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.apply_env_overrides(|key| std::env::var(key).ok(), model_in_file);
        Ok(config)
    }

    /// Load defaults plus a single file, ignoring the environment.
    pub fn load_file(path: &Path) -> Result<Self, Error> {
        Self::layered(path)
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    fn layered(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Self::file_figment(path))
    }

    fn file_figment(path: &Path) -> Figment {
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Figment::from(Json::file(path))
        } else {
            Figment::from(Toml::file(path))
        }
    }

    /// Fold the legacy environment variables into the loaded tree.
    pub fn apply_env_overrides<F>(&mut self, lookup: F, model_in_file: bool)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.llm.resolve_api_key().is_none() {
            if let Some(key) = lookup(&self.llm.api_key_env).filter(|k| !k.is_empty()) {
                self.llm.api_key = Some(key);
            }
        }

        if self.llm.base_url.is_none() {
            self.llm.base_url = lookup("BASE_URL").filter(|u| !u.is_empty());
        }

        if !model_in_file {
            if let Some(model) = lookup("MODEL").filter(|m| !m.is_empty()) {
                self.llm.model = model;
            }
        }

        if self.network.http_proxy.is_none() {
            self.network.http_proxy = lookup("HTTP_PROXY").or_else(|| lookup("http_proxy"));
        }
        if self.network.https_proxy.is_none() {
            self.network.https_proxy = lookup("HTTPS_PROXY").or_else(|| lookup("https_proxy"));
        }

        if let Some(verify) = lookup("VERIFY_SSL") {
            if verify.eq_ignore_ascii_case("false") {
                self.network.verify_ssl = false;
            }
        }
    }

    /// Look up a value by dotted path, falling back to `default` when the path
    /// is missing, null, or of a different type.
    pub fn get<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        let Ok(tree) = serde_json::to_value(self) else {
            return default;
        };

        let mut node = &tree;
        for key in path.split('.') {
            match node.get(key) {
                Some(next) => node = next,
                None => return default,
            }
        }

        serde_json::from_value(node.clone()).unwrap_or(default)
    }

    /// Render the configuration as TOML with the API key masked.
    pub fn to_toml_redacted(&self) -> Result<String, Error> {
        let mut shown = self.clone();
        if shown.llm.api_key.is_some() {
            shown.llm.api_key = Some("********".to_string());
        }
        toml::to_string_pretty(&shown).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        let url = &self.mcp_server.url;
        if url.is_empty() {
            result.add_error("mcp_server.url", "Server URL cannot be empty");
        } else if !url.starts_with("http://") && !url.starts_with("https://") {
            result.add_error("mcp_server.url", "Server URL must start with http:// or https://");
        }

        let conn = &self.mcp_server.connection;
        if conn.retry_attempts == 0 {
            result.add_error(
                "mcp_server.connection.retry_attempts",
                "retry_attempts must be greater than 0",
            );
        }

        if conn.retry_delay < 0.0 {
            result.add_error("mcp_server.connection.retry_delay", "retry_delay cannot be negative");
        }

        if conn.max_retry_delay < 0.0 {
            result.add_error(
                "mcp_server.connection.max_retry_delay",
                "max_retry_delay cannot be negative",
            );
        } else if conn.max_retry_delay < conn.retry_delay {
            result.add_warning(
                "mcp_server.connection.max_retry_delay",
                "max_retry_delay is below retry_delay, every wait will be capped",
            );
        }

        if conn.timeout_seconds == 0 {
            result.add_error(
                "mcp_server.connection.timeout_seconds",
                "timeout_seconds must be greater than 0",
            );
        }

        if self.llm.model.is_empty() {
            result.add_error("llm.model", "Model name cannot be empty");
        }

        if self.llm.max_iterations == 0 {
            result.add_error("llm.max_iterations", "max_iterations must be greater than 0");
        }

        if let Some(ref base_url) = self.llm.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                result.add_error("llm.base_url", "base_url must start with http:// or https://");
            }
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            result.add_error(
                "logging.level",
                format!("Invalid log level '{}'", self.logging.level),
            );
        }

        if !self.network.verify_ssl {
            result.add_warning("network.verify_ssl", "TLS certificate verification is disabled");
        }

        result
    }

    /// Per-user configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("trainmcp"))
            .unwrap_or_else(|| PathBuf::from("~/.config/trainmcp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_ok(), "Default config should be valid: {:?}", result.issues);
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.mcp_server.url, "http://localhost:12306");
        assert_eq!(config.mcp_server.connection.retry_attempts, 3);
        assert_eq!(config.mcp_server.connection.heartbeat_interval, 60);
        assert_eq!(config.llm.model, "deepseek-chat");
        assert_eq!(config.llm.max_iterations, 5);
        assert_eq!(config.memory.max_context_messages, 20);
    }

    #[test]
    fn test_dotted_get() {
        let config = Config::default();
        assert_eq!(config.get("mcp_server.connection.retry_attempts", 0u32), 3);
        assert_eq!(config.get("llm.model", String::new()), "deepseek-chat");
        assert!(config.get("memory.session_enabled", false));
    }

    #[test]
    fn test_dotted_get_falls_back() {
        let config = Config::default();
        assert_eq!(config.get("mcp_server.nope", 7u32), 7);
        // Unset optional value is null in the tree
        assert_eq!(config.get("llm.base_url", "fallback".to_string()), "fallback");
        // Wrong type
        assert_eq!(config.get("llm.model", 1u8), 1);
    }

    #[test]
    fn test_load_json_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"mcp_server": {{"url": "http://example:9000", "connection": {{"retry_attempts": 5}}}},
                "llm": {{"max_iterations": 2}}}}"#
        )
        .unwrap();

        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.mcp_server.url, "http://example:9000");
        assert_eq!(config.mcp_server.connection.retry_attempts, 5);
        // Untouched siblings keep their defaults
        assert_eq!(config.mcp_server.connection.timeout_seconds, 30);
        assert_eq!(config.llm.max_iterations, 2);
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[memory]\nsession_enabled = false\n").unwrap();

        let config = Config::load_file(&path).unwrap();
        assert!(!config.memory.session_enabled);
        assert!(config.memory.persistent_enabled);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.mcp_server.url, "http://localhost:12306");
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("DEEPSEEK_API_KEY", "sk-test"),
            ("BASE_URL", "https://proxy.example/v1"),
            ("MODEL", "deepseek-reasoner"),
            ("HTTPS_PROXY", "http://127.0.0.1:8080"),
            ("VERIFY_SSL", "FALSE"),
        ]);
        let mut config = Config::default();
        config.apply_env_overrides(|k| vars.get(k).cloned(), false);

        assert_eq!(config.llm.resolve_api_key().as_deref(), Some("sk-test"));
        assert_eq!(config.llm.base_url.as_deref(), Some("https://proxy.example/v1"));
        assert_eq!(config.llm.model, "deepseek-reasoner");
        assert_eq!(config.network.https_proxy.as_deref(), Some("http://127.0.0.1:8080"));
        assert!(config.network.http_proxy.is_none());
        assert!(!config.network.verify_ssl);
    }

    #[test]
    fn test_env_overrides_respect_file_values() {
        let vars = env(&[("MODEL", "other"), ("DEEPSEEK_API_KEY", "sk-env")]);
        let mut config = Config::default();
        config.llm.api_key = Some("sk-file".to_string());
        config.apply_env_overrides(|k| vars.get(k).cloned(), true);

        assert_eq!(config.llm.model, "deepseek-chat");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn test_invalid_retry_attempts() {
        let mut config = Config::default();
        config.mcp_server.connection.retry_attempts = 0;
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result
            .errors()
            .iter()
            .any(|e| e.field == "mcp_server.connection.retry_attempts"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.mcp_server.url = "localhost:12306".to_string();
        assert!(!config.validate().is_ok());
    }

    #[test]
    fn test_log_level_directive() {
        let mut config = Config::default();
        assert_eq!(config.logging.filter_directive(), "info");
        config.logging.level = "WARNING".to_string();
        assert_eq!(config.logging.filter_directive(), "warn");
        config.logging.level = "verbose".to_string();
        assert!(!config.validate().is_ok());
    }

    #[test]
    fn test_low_max_retry_delay_is_warning() {
        let mut config = Config::default();
        config.mcp_server.connection.max_retry_delay = 0.5;
        let result = config.validate();
        assert!(result.is_ok());
        assert!(result
            .warnings()
            .iter()
            .any(|w| w.field == "mcp_server.connection.max_retry_delay"));
    }

    #[test]
    fn test_heartbeat_zero_disables() {
        let mut conn = ConnectionConfig::default();
        assert_eq!(conn.heartbeat_interval(), Some(Duration::from_secs(60)));
        conn.heartbeat_interval = 0;
        assert!(conn.heartbeat_interval().is_none());
    }

    #[test]
    fn test_redacted_toml_hides_key() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret".to_string());
        let rendered = config.to_toml_redacted().unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("********"));
    }
}
