//! Minimal CLI host for the sage agent: reads a line of user input, runs one
//! agent turn, streams assistant text to stdout as it arrives, and prompts
//! the operator before any flagged shell command runs.

use anyhow::{Context, Result};
use futures::StreamExt;
use sage_core::agent::{Agent, AgentConfig, AgentEvent};
use sage_core::config::Config;
use sage_core::conversation::ConversationManager;
use sage_core::provider::OpenAICompatibleProvider;
use sage_core::registry::ToolRegistry;
use sage_core::safety::{ConfirmationCallback, PathSafety};
use sage_tools::{
    DeleteFileTool, EditFileTool, ListDirectoryTool, ReadFileTool, RunCommandTool, SearchFilesTool,
    WriteFileTool,
};
use std::io::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prompts the operator on stdin/stdout before a flagged action proceeds.
struct StdinConfirmation;

#[async_trait::async_trait]
impl ConfirmationCallback for StdinConfirmation {
    async fn confirm(&self, prompt: &str) -> bool {
        println!("{prompt}");
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        if reader.read_line(&mut line).await.is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sage=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("Sage starting up");
    info!("  base URL: {}", config.base_url);
    info!("  model: {}", config.model);
    info!("  workspace: {}", config.workspace_path);

    let path_safety = Arc::new(PathSafety::new(&config.workspace_path));
    let confirmation: Arc<dyn ConfirmationCallback> = Arc::new(StdinConfirmation);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ReadFileTool::new(path_safety.clone(), confirmation.clone())));
    registry.register(Arc::new(WriteFileTool::new(path_safety.clone(), confirmation.clone())));
    registry.register(Arc::new(EditFileTool::new(path_safety.clone(), confirmation.clone())));
    registry.register(Arc::new(DeleteFileTool::new(path_safety.clone(), confirmation.clone())));
    registry.register(Arc::new(ListDirectoryTool::new(path_safety.clone(), confirmation.clone())));
    registry.register(Arc::new(SearchFilesTool::new(path_safety.clone(), confirmation.clone())));
    registry.register(Arc::new(RunCommandTool::new(path_safety.clone(), confirmation)));

    let provider = OpenAICompatibleProvider::new(&config.base_url, &config.api_key, &config.model);
    let agent_config = AgentConfig {
        max_iterations: config.max_iterations,
    };
    let agent = Agent::new(provider, registry, agent_config);

    let mut conversation = ConversationManager::new(&config.workspace_path);

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    print!("> ");
    std::io::stdout().flush().ok();

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            print!("> ");
            std::io::stdout().flush().ok();
            continue;
        }

        let mut turn = Box::pin(agent.run_turn(&mut conversation, line, &today));
        while let Some(event) = turn.next().await {
            match event {
                Ok(AgentEvent::TextDelta(text)) => {
                    print!("{text}");
                    std::io::stdout().flush().ok();
                }
                Ok(AgentEvent::ToolCallStarted { id: _, name }) => {
                    println!("\n[running {name}]");
                }
                Ok(AgentEvent::ToolResult(result)) => {
                    let label = if result.is_error { "error" } else { "ok" };
                    println!("[{} {}]", result.name, label);
                }
                Ok(AgentEvent::Done) => {
                    println!();
                }
                Ok(AgentEvent::IterationLimitReached) => {
                    // The sentinel text itself already arrived as a TextDelta;
                    // this is just a host-level marker that the turn stopped here.
                    println!();
                }
                Err(e) => {
                    println!("\n[error: {e}]");
                    break;
                }
            }
        }

        print!("> ");
        std::io::stdout().flush().ok();
    }

    Ok(())
}
