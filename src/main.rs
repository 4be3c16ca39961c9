//! Relaybot CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use relaybot::agent::ChannelRunner;
use relaybot::llm::retry::SamplingParams;
use relaybot::llm::{CredentialPool, HttpCompletionClient, RetryingClient, TokenBudget};
use relaybot::messaging::ConsoleMessenger;
use relaybot::InboundMessage;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt as _;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relaybot")]
#[command(about = "Bridges chat messages to an LLM completion endpoint")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = relaybot::config::Config::load()
        .with_context(|| "failed to load configuration from environment")?;

    tracing::info!(
        model = %config.llm.model,
        credentials = config.llm.credentials.len(),
        token_budget = config.context.token_budget,
        "configuration loaded"
    );

    let http_client = HttpCompletionClient::new(&config.llm)
        .with_context(|| "failed to build completion client")?;
    let credentials = Arc::new(
        CredentialPool::new(
            config.llm.credentials.clone(),
            config.retry.rotate_after_failures,
        )
        .with_context(|| "failed to initialize credential pool")?,
    );
    let budget = Arc::new(TokenBudget::new(config.context));

    let retrying_client = RetryingClient::new(
        http_client,
        credentials,
        budget,
        config.retry,
        SamplingParams {
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        },
    );

    let messenger = Arc::new(ConsoleMessenger::new(config.messaging.max_message_len));
    let runner = Arc::new(ChannelRunner::new(
        retrying_client,
        messenger,
        config.llm.system_prompt.clone(),
    ));

    tracing::info!("relaybot started, reading messages from stdin");

    // Local console loop: each stdin line is a message in the "console"
    // conversation. A line of just "/cancel" interrupts the active turn.
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        if text == "/cancel" {
                            if !runner.cancel(&Arc::from("console")) {
                                tracing::info!("no active turn to cancel");
                            }
                            continue;
                        }
                        let _turn = runner.handle_message(InboundMessage::new("console", "local", text));
                    }
                    None => {
                        tracing::info!("stdin closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    tracing::info!("relaybot stopped");
    Ok(())
}
