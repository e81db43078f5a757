mod bot;
mod config;
mod gate;
mod github;
mod platform;
mod server;
#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::Config;
use crate::github::GithubClient;
use crate::platform::telegram::{self, TelegramMessenger};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,santabot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // `santabot [config.toml]` serves, `santabot set-webhook [config.toml]` registers.
    let mut args = std::env::args().skip(1).peekable();
    let set_webhook = args.peek().is_some_and(|a| a == "set-webhook");
    if set_webhook {
        args.next();
    }
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = load_config(&config_path)?;

    if set_webhook {
        let public_url = config
            .server
            .public_url
            .as_deref()
            .context("server.public_url (PUBLIC_URL) is required to register the webhook")?;
        telegram::register_webhook(
            &config.telegram.bot_token,
            public_url,
            config.webhook_secret(),
        )
        .await?;
        info!("Webhook registered");
        return Ok(());
    }

    info!("Configuration loaded successfully");
    info!("  Organizer configured: {}", config.admin_chat_id().is_some());
    if config.webhook_secret().is_none() {
        warn!("No webhook secret configured, accepting calls on any path");
    }
    info!("  Participants: {}", config.participants.len());
    info!("  Broadcast concurrency: {}", config.broadcast.concurrency);

    let github = Arc::new(GithubClient::new(&config.github));
    let messenger = Arc::new(TelegramMessenger::new(&config.telegram.bot_token));
    let listen = config.server.listen.clone();

    // Create shared state
    let state = Arc::new(AppState::new(config, messenger, github.clone(), github));

    info!("Bot is starting...");
    server::serve(state, &listen).await?;

    Ok(())
}

/// Read the TOML file when it exists, otherwise the environment.
fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        info!("Loading configuration from: {}", path.display());
        Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        info!(
            "{} not found, loading configuration from environment",
            path.display()
        );
        Config::from_env().context("Failed to load config from environment")
    }
}
