//! Agent event handler for the terminal.

use std::time::Instant;

use parking_lot::Mutex;
use trainmcp_agent::AgentEventHandler;
use trainmcp_core::ToolCallRequest;

/// Prints round and tool progress to stderr, keeping stdout for answers.
pub struct CliEventHandler {
    /// Track when tools start for duration calculation
    tool_start: Mutex<Option<Instant>>,
}

impl CliEventHandler {
    pub fn new() -> Self {
        Self {
            tool_start: Mutex::new(None),
        }
    }
}

impl Default for CliEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentEventHandler for CliEventHandler {
    fn on_thinking(&self, round: usize) {
        eprintln!("[Thinking... round {}]", round);
    }

    fn on_tool_start(&self, call: &ToolCallRequest) {
        *self.tool_start.lock() = Some(Instant::now());
        eprintln!("[Tool: {}] Starting...", call.name);
    }

    fn on_tool_complete(&self, call: &ToolCallRequest, output: &str, success: bool) {
        let duration = self
            .tool_start
            .lock()
            .take()
            .map(|start| start.elapsed().as_millis())
            .unwrap_or(0);

        let status = if success { "OK" } else { "FAILED" };
        eprintln!("[Tool: {}] {} ({}ms)", call.name, status, duration);

        if !success {
            eprintln!("[Error: {}]", output);
        }
    }
}
