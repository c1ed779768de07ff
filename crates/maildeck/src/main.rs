//! `MailDeck` - keyboard-driven mail client for the terminal
//!
//! Reads key sequences and `:commands` line by line and drives the
//! `maildeck-core` engine over an HTTP gateway, or over a seeded in-memory
//! mailbox when no gateway is configured.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod config;
mod repl;

use std::sync::Arc;

use anyhow::Context;
use maildeck_core::gateway::MailGateway;
use maildeck_core::outbox::OutboxEvent;
use maildeck_core::{HttpGateway, MailClient, MemoryGateway, Settings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repl::{Action, Input, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maildeck=info,maildeck_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting MailDeck");

    let settings_path = Settings::default_path();
    let settings = Settings::load(&settings_path)
        .await
        .with_context(|| format!("loading {}", settings_path.display()))?;
    let config = config::load(&config::default_path()).await?;

    match config.gateway {
        Some(gateway) => {
            info!(base_url = %gateway.base_url, "Using HTTP gateway");
            let gateway = HttpGateway::new(&gateway)?;
            run(gateway, settings, config.address, settings_path).await
        }
        None => {
            info!(
                "No gateway configured ({} unset), running on the demo mailbox",
                config::URL_VAR
            );
            run(MemoryGateway::demo(), settings, config.address, settings_path).await
        }
    }
}

async fn run<G: MailGateway + 'static>(
    gateway: G,
    settings: Settings,
    address: String,
    settings_path: std::path::PathBuf,
) -> anyhow::Result<()> {
    let client = MailClient::new(Arc::new(gateway), settings, address);
    if let Err(e) = client.start().await {
        tracing::warn!(?e, "Initial load failed");
    }

    let countdown = {
        let mut countdown = client.scheduler().subscribe_countdown();
        let mut events = client.scheduler().subscribe_events();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = countdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = countdown.borrow_and_update().clone();
                        if let Some(current) = current {
                            println!(
                                "Sending \"{}\" in {}s (z to undo)",
                                current.subject, current.remaining_secs
                            );
                        }
                    }
                    event = events.recv() => match event {
                        Ok(OutboxEvent::Completed(id)) => println!("{id} sent"),
                        Ok(OutboxEvent::Canceled(id)) => println!("{id} canceled"),
                        Ok(OutboxEvent::Superseded(id)) => {
                            println!("{id} will be sent without undo");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    };

    let session = Session::new(&client, settings_path);
    println!("{}", repl::render_screen(&client));
    println!("Type keys (j, k, o, g i, ...) or :help. :quit to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match repl::parse_line(&line) {
            Ok(Input::Action(Action::Quit)) => break,
            Ok(input) => input,
            Err(e) => {
                println!("{e:#}");
                continue;
            }
        };
        match session.run(input).await {
            Ok(output) => print!("{output}"),
            Err(e) => {
                if repl::is_retryable(&e) {
                    println!("error: {e:#} (temporary, try again)");
                } else {
                    println!("error: {e:#}");
                }
            }
        }
    }

    countdown.abort();
    if let Some(live) = client.scheduler().live() {
        println!("{} is still queued and will be sent by the server", live.id);
    }
    info!("Exiting MailDeck");
    Ok(())
}
