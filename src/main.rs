//! Sporos console - terminal client for the legislative-research pipeline.
//!
//! Submits queries to a LangGraph pipeline server, renders the stage
//! timeline live as the run progresses, and archives each finished
//! timeline against its answer for later revisiting.

mod client;
mod config;
mod console;
mod session;
mod state_machine;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use client::ResearchClient;
use config::ClientConfig;
use console::Console;
use session::langgraph::LangGraphSession;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout belongs to the conversation.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sporos_console=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ClientConfig::from_env();
    tracing::info!(
        api_url = %config.api_url,
        assistant_id = %config.assistant_id,
        "starting sporos console"
    );

    let (update_tx, update_rx) = mpsc::channel(64);
    let session = Arc::new(LangGraphSession::new(&config, update_tx));
    let handle = ResearchClient::spawn(session, update_rx);

    Console::new(handle).run(&config).await?;
    Ok(())
}
