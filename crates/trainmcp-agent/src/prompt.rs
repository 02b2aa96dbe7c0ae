//! System prompt assembly.

use trainmcp_mcp::ToolCatalog;

use crate::stations::StationCodeMapper;

/// Prompt used when the server advertised no tools.
pub const FALLBACK_PROMPT: &str = "You are a helpful assistant.";

/// Number of station codes rendered into the prompt.
pub const PROMPT_STATION_LIMIT: usize = 15;

const ROLE: &str = "# Role
You are a proactive and resilient train ticket assistant for the 12306 railway service. \
Your only goal is to help the user find train ticket information efficiently, and you \
must use the provided tools to do it.";

const WORKFLOW: &str = "# Query workflow (always follow)
When the user asks about train tickets, work in this order:
1. Get the date: call `get-current-date` to learn today's date.
2. Resolve station codes, trying in order:
   a. `get-station-code-of-citys` for the main station of each city
   b. if that fails, `get-stations-code-in-city` for every station of the city
   c. if that still fails, the fallback code table below
3. Query tickets: always call `get-tickets`, whether or not the station lookups succeeded.";

const RECOVERY: &str = "# Error recovery
A tool answering \"Error\" or \"not found\" is a hint, not the end of the task:
1. Do not give up.
2. Look the city up in the fallback code table.
3. If it is listed, call `get-tickets` with that code directly.
4. Only report failure to the user after `get-tickets` itself has failed.

# Rules
1. Infer what the user needs and call tools without asking for confirmation.
2. Tool arguments must match the tool schema exactly.
3. After the tool calls are done, answer with one complete, helpful reply.";

/// Builder for the system message of a turn.
pub struct SystemPrompt<'a> {
    catalog: &'a ToolCatalog,
    stations: &'a StationCodeMapper,
    preferences: Option<String>,
    recent_history: Option<String>,
}

impl<'a> SystemPrompt<'a> {
    pub fn new(catalog: &'a ToolCatalog, stations: &'a StationCodeMapper) -> Self {
        Self {
            catalog,
            stations,
            preferences: None,
            recent_history: None,
        }
    }

    /// Append the user's stored preferences. Blank text is ignored.
    pub fn with_preferences(mut self, preferences: impl Into<String>) -> Self {
        self.preferences = non_blank(preferences.into());
        self
    }

    /// Append a summary of earlier sessions. Blank text is ignored.
    pub fn with_recent_history(mut self, history: impl Into<String>) -> Self {
        self.recent_history = non_blank(history.into());
        self
    }

    pub fn build(&self) -> String {
        if self.catalog.is_empty() {
            return FALLBACK_PROMPT.to_string();
        }

        let mut sections = vec![
            ROLE.to_string(),
            format!("# Available tools\n{}", self.catalog.summary()),
            WORKFLOW.to_string(),
        ];

        if !self.stations.is_empty() {
            sections.push(format!(
                "# Fallback station codes\n\
                 Use these codes directly when the station lookup tools fail:\n{}",
                self.stations.prompt_table(PROMPT_STATION_LIMIT)
            ));
        }
        sections.push(RECOVERY.to_string());

        if let Some(ref preferences) = self.preferences {
            sections.push(preferences.clone());
        }
        if let Some(ref history) = self.recent_history {
            sections.push(history.clone());
        }

        sections.join("\n\n")
    }
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
