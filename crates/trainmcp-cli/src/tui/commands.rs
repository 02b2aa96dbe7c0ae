//! Reserved words of the REPL.

use trainmcp_agent::Agent;

/// Characters of a tool description shown by `tools`.
const DESCRIPTION_PREVIEW_CHARS: usize = 80;

/// A reserved word typed at the prompt. Matching ignores case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Quit,
    Help,
    Tools,
    Clear,
    Profile,
    History,
}

impl ReplCommand {
    /// `None` when the input is a question for the agent.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "quit" | "exit" | "q" => Some(Self::Quit),
            "help" => Some(Self::Help),
            "tools" => Some(Self::Tools),
            "clear" => Some(Self::Clear),
            "profile" => Some(Self::Profile),
            "history" => Some(Self::History),
            _ => None,
        }
    }
}

/// Result of command execution.
pub enum CommandResult {
    /// Continue the REPL loop
    Continue,
    /// Exit the REPL
    Exit,
    /// An error occurred
    Error(String),
}

pub async fn execute(command: ReplCommand, agent: &Agent) -> CommandResult {
    match command {
        ReplCommand::Quit => {
            println!("Goodbye!");
            CommandResult::Exit
        }
        ReplCommand::Help => {
            print_help();
            CommandResult::Continue
        }
        ReplCommand::Tools => {
            print_tools(agent);
            CommandResult::Continue
        }
        ReplCommand::Clear => {
            if let Some(history) = agent.history() {
                if let Err(e) = history.clear_session().await {
                    return CommandResult::Error(format!("Failed to archive the session: {}", e));
                }
            }
            // Clear screen using ANSI escape codes
            print!("\x1B[2J\x1B[1;1H");
            println!("Session cleared.");
            CommandResult::Continue
        }
        ReplCommand::Profile => match agent.profile() {
            Some(profile) => match serde_json::to_string_pretty(&profile.snapshot()) {
                Ok(text) => {
                    println!("User profile:");
                    println!("{}", text);
                    CommandResult::Continue
                }
                Err(e) => CommandResult::Error(e.to_string()),
            },
            None => {
                println!("User profile is disabled.");
                CommandResult::Continue
            }
        },
        ReplCommand::History => {
            match agent.history() {
                Some(history) => {
                    println!("Messages in this session: {}", history.current_len());
                    println!("Archived sessions:        {}", history.archived_len());
                }
                None => println!("Session memory is disabled."),
            }
            CommandResult::Continue
        }
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  quit, exit, q  Leave the assistant");
    println!("  tools          List the tools of the MCP server");
    println!("  clear          Archive this session and clear the screen");
    println!("  profile        Show the stored user profile");
    println!("  history        Show conversation history counts");
    println!("  help           Show this help message");
    println!();
    println!("Anything else is sent to the assistant as a question.");
}

fn print_tools(agent: &Agent) {
    let catalog = agent.catalog();
    if catalog.is_empty() {
        println!("No tools loaded.");
        return;
    }

    println!("Available tools:");
    for (i, tool) in catalog.definitions().iter().enumerate() {
        println!("{}. {}", i + 1, tool.name);
        println!("   {}", preview(&tool.description, DESCRIPTION_PREVIEW_CHARS));
    }
}

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{}...", cut)
    }
}
