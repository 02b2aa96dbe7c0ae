//! Interactive mode.
//!
//! A readline REPL: free text goes to the agent, a few reserved words are
//! handled locally (see [`commands`]). The MCP session and the stores are
//! always cleaned up on the way out.

use std::path::PathBuf;
use std::sync::Arc;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::error;

use trainmcp_agent::agent::NO_TOOLS_MESSAGE;
use trainmcp_agent::{Agent, AgentBuilder, AgentConfig, AgentError, StationCodeMapper};
use trainmcp_core::error::format_error_with_suggestion;
use trainmcp_core::Config;
use trainmcp_mcp::McpSession;
use trainmcp_memory::{ConversationHistory, UserProfileStore};
use trainmcp_providers::{OpenAIProvider, Provider};

use crate::AppContext;

mod commands;
mod handlers;

pub use handlers::CliEventHandler;

/// Run the interactive REPL.
pub async fn run(ctx: &AppContext, max_iterations: Option<usize>) -> anyhow::Result<()> {
    let mut agent = match create_agent(ctx, max_iterations) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("{}", format_error_with_suggestion(&e));
            return Err(e.into());
        }
    };

    print_welcome_banner(ctx, &agent);

    let result = repl(&mut agent).await;

    if let Err(e) = agent.cleanup().await {
        error!(error = %e, "Cleanup failed");
    }
    result
}

/// Connect, then read and answer until the user leaves.
async fn repl(agent: &mut Agent) -> anyhow::Result<()> {
    let Some(session) = agent.session().cloned() else {
        anyhow::bail!("no MCP session");
    };

    println!("Connecting to {} ...", session.base_url());
    if let Err(e) = session.connect().await {
        let e = trainmcp_core::Error::from(e);
        eprintln!("{}", format_error_with_suggestion(&e));
        return Err(e.into());
    }

    let catalog = session.catalog();
    if catalog.is_empty() {
        eprintln!("{}", NO_TOOLS_MESSAGE);
        return Ok(());
    }
    println!("[Connected | {} tools loaded]", catalog.len());
    println!();

    let mut editor = DefaultEditor::new()?;
    let history_path = get_history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
    }

    loop {
        match editor.readline("\n>>> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                if let Some(command) = commands::ReplCommand::parse(line) {
                    match commands::execute(command, agent).await {
                        commands::CommandResult::Continue => continue,
                        commands::CommandResult::Exit => break,
                        commands::CommandResult::Error(e) => {
                            eprintln!("Error: {}", e);
                            continue;
                        }
                    }
                }

                process_message(line, agent).await;
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(parent) = history_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = editor.save_history(&history_path);

    Ok(())
}

/// Answer one question. Ctrl-C abandons the turn, errors are logged and the
/// loop goes on.
async fn process_message(input: &str, agent: &mut Agent) {
    agent.reset_cancel();

    let outcome = tokio::select! {
        result = agent.chat(input, None) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(Ok(answer)) => {
            println!("\n{}", answer);
        }
        Some(Err(AgentError::Cancelled)) | None => {
            eprintln!("\n[Turn cancelled]");
        }
        Some(Err(e)) => {
            error!(error = %e, "Turn failed");
            let e = trainmcp_core::Error::from(e);
            eprintln!("Error: {}", format_error_with_suggestion(&e));
        }
    }
}

/// Build the agent and its collaborators from the configuration.
fn create_agent(
    ctx: &AppContext,
    max_iterations: Option<usize>,
) -> Result<Agent, trainmcp_core::Error> {
    let config = &ctx.config;

    let provider = OpenAIProvider::from_config(&config.llm, &config.network)?;
    let session = Arc::new(McpSession::from_config(&config.mcp_server));

    let mut agent_config = AgentConfig::from_config(config);
    if let Some(max) = max_iterations {
        agent_config.max_iterations = max;
    }

    let mut builder = AgentBuilder::new()
        .provider(Arc::new(provider))
        .session(session)
        .stations(StationCodeMapper::with_custom_file(
            config.city_codes_file.as_deref(),
        ))
        .config(agent_config)
        .event_handler(Arc::new(CliEventHandler::new()));

    if config.memory.session_enabled {
        builder = builder.history(Arc::new(ConversationHistory::open(
            &config.memory.history_path,
            config.memory.max_context_messages,
        )));
    }
    if config.memory.persistent_enabled {
        builder = builder.profile(Arc::new(UserProfileStore::open(
            &config.memory.user_profile_path,
        )));
    }

    Ok(builder.build()?)
}

fn print_welcome_banner(ctx: &AppContext, agent: &Agent) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!(
        "║  trainmcp v{:<50}║",
        env!("CARGO_PKG_VERSION")
    );
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Ask about train tickets, or type 'help' for commands.       ║");
    println!("║  Ctrl+C cancels a running question, Ctrl+D exits.            ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "[Provider: {} | Model: {} | Server: {}]",
        agent.provider().name(),
        agent.config().model,
        ctx.config.mcp_server.url
    );
}

/// Get the path to the readline history file.
fn get_history_path() -> PathBuf {
    Config::config_dir().join("readline_history.txt")
}
