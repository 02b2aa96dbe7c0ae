//! Persistent user profile.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::store::{read_json, write_json, Result};

/// Profile store used by the agent.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Preferences rendered for the system prompt, empty when there are none.
    fn preferences(&self) -> String;

    /// Count one user query.
    fn record_query(&self);

    /// Write the profile to disk.
    async fn persist(&self) -> Result<()>;

    /// The whole profile document.
    fn snapshot(&self) -> Value;
}

/// Stored travel preferences. Unknown keys are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_departure_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_arrival_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_seat_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileMetadata {
    pub total_queries: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The profile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub user_id: String,
    pub created_at: String,
    pub preferences: Preferences,
    /// Personal place names, e.g. `"home" -> "北京"`
    pub aliases: Map<String, Value>,
    pub travel_history: Value,
    pub metadata: ProfileMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            user_id: "default_user".to_string(),
            created_at: Utc::now().to_rfc3339(),
            preferences: Preferences::default(),
            aliases: Map::new(),
            travel_history: json!({"frequent_routes": []}),
            metadata: ProfileMetadata::default(),
            extra: Map::new(),
        }
    }
}

impl UserProfile {
    /// Render the `# User preferences` prompt section.
    pub fn render_preferences(&self) -> String {
        let prefs = &self.preferences;
        let mut lines = Vec::new();

        if let Some(city) = prefs.default_departure_city.as_deref().filter(|c| !c.is_empty()) {
            lines.push(format!("- Usual departure city: {}", city));
        }
        if let Some(city) = prefs.default_arrival_city.as_deref().filter(|c| !c.is_empty()) {
            lines.push(format!("- Usual destination: {}", city));
        }
        if let Some(seat) = prefs.preferred_seat_type.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("- Preferred seat type: {}", seat));
        }

        let aliases: Vec<String> = self
            .aliases
            .iter()
            .filter_map(|(name, target)| match target {
                Value::String(s) if !s.is_empty() => Some(format!("'{}' = '{}'", name, s)),
                Value::Null | Value::Bool(false) | Value::String(_) => None,
                other => Some(format!("'{}' = '{}'", name, other)),
            })
            .collect();
        if !aliases.is_empty() {
            lines.push(format!("- Place aliases: {}", aliases.join(", ")));
        }

        if lines.is_empty() {
            String::new()
        } else {
            format!("# User preferences\n{}", lines.join("\n"))
        }
    }
}

/// JSON-file backed [`ProfileStore`].
#[derive(Debug)]
pub struct UserProfileStore {
    path: PathBuf,
    profile: RwLock<UserProfile>,
}

impl UserProfileStore {
    /// Open the profile at `path`, creating and saving a default one when it
    /// is missing. An unreadable file falls back to the default in memory.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let profile = match read_json::<UserProfile>(&path) {
            Ok(Some(profile)) => {
                debug!(path = %path.display(), "Loaded user profile");
                profile
            }
            Ok(None) => {
                let profile = UserProfile::default();
                if let Err(e) = write_json(&path, &profile) {
                    error!(path = %path.display(), error = %e, "Failed to save user profile");
                }
                profile
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load user profile");
                UserProfile::default()
            }
        };

        Self {
            path,
            profile: RwLock::new(profile),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profile(&self) -> UserProfile {
        self.profile.read().clone()
    }
}

#[async_trait]
impl ProfileStore for UserProfileStore {
    fn preferences(&self) -> String {
        self.profile.read().render_preferences()
    }

    fn record_query(&self) {
        let mut profile = self.profile.write();
        profile.metadata.total_queries += 1;
        profile.metadata.last_active = Some(Utc::now().to_rfc3339());
    }

    async fn persist(&self) -> Result<()> {
        let profile = self.profile();
        write_json(&self.path, &profile)
    }

    fn snapshot(&self) -> Value {
        serde_json::to_value(&*self.profile.read()).unwrap_or(Value::Null)
    }
}
