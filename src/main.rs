//! Solana Webhook Indexer - service binary
//!
//! Loads configuration from the environment, connects to the metadata store,
//! restores indexer state and serves the webhook ingress.

use solana_webhook_indexer::telemetry::{TelemetryConfig, init_telemetry};
use solana_webhook_indexer::{Result, WebhookIndexerConfig, WebhookIndexerService};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = init_telemetry(TelemetryConfig {
        json: std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
        ..TelemetryConfig::default()
    });

    let config = WebhookIndexerConfig::from_env()?;
    tracing::info!(
        listen_addr = %config.ingress.listen_addr,
        network = ?config.helius.network,
        capacity = config.subscription.capacity,
        "Configuration loaded"
    );

    let service = WebhookIndexerService::connect(config).await?;
    service.run().await
}
