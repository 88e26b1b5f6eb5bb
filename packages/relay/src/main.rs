use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use verto_relay::config::Config;
use verto_relay::ledger::ArweaveClient;
use verto_relay::publisher::WebhookNotifier;
use verto_relay::relay::Relay;
use verto_relay::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    info!(
        "Starting relay: gateway {} ({:?}), cache {:?}, notify on {:?}",
        config.gateway, config.backend, config.cache, config.notify_on
    );

    let ledger = ArweaveClient::new(config.gateway_config()).context("creating gateway client")?;
    let notifier = WebhookNotifier::new(config.webhook_target()).context("creating webhook client")?;
    let dedup = config.open_dedup().await.context("opening dedup ledger")?;

    let relay = Relay::new(
        Arc::new(ledger),
        Arc::new(notifier),
        dedup,
        config.relay_config(),
    );

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    server::serve(listener, Arc::new(relay)).await?;
    Ok(())
}
