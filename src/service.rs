//! Top-level wiring of the webhook indexer service.

use crate::config::WebhookIndexerConfig;
use crate::core::dispatcher::Dispatcher;
use crate::core::manager::IndexerManager;
use crate::core::mapping::WebhookMappingRegistry;
use crate::core::metadata::TokenMetadataFetcher;
use crate::core::registry::IndexerRegistry;
use crate::core::subscription::{SubscriptionManager, SubscriptionSettings};
use crate::server::{self, IngressState};
use crate::storage::{MetadataStore, PgMetadataStore, PoolProvider, TenantPools};
use crate::utils::error::{Result, WebhookIndexerError};
use crate::utils::logging::{self, LogLevel};
use crate::webhook::{HeliusWebhookClient, WebhookService};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(300);

/// The assembled service: metadata store, shared subscription, indexer
/// lifecycle and the HTTP ingress.
pub struct WebhookIndexerService {
    config: WebhookIndexerConfig,
    manager: Arc<IndexerManager>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<IndexerRegistry>,
}

impl WebhookIndexerService {
    /// Connects to the metadata store, creates its tables and builds the
    /// service with the Helius webhook client.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata store is unreachable or a client
    /// cannot be constructed.
    pub async fn connect(config: WebhookIndexerConfig) -> Result<Self> {
        let store = PgMetadataStore::new(&config.database_url).await?;
        store.initialize().await?;
        let webhooks = Arc::new(HeliusWebhookClient::new(&config.helius)?);
        let pools = Arc::new(TenantPools::new(config.pool));
        Self::with_parts(config, Arc::new(store), webhooks, pools)
    }

    /// Builds the service from explicit backends.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` if the metadata client cannot be constructed.
    pub fn with_parts(
        config: WebhookIndexerConfig,
        store: Arc<dyn MetadataStore>,
        webhooks: Arc<dyn WebhookService>,
        pools: Arc<dyn PoolProvider>,
    ) -> Result<Self> {
        let mappings = Arc::new(WebhookMappingRegistry::new());
        let registry = Arc::new(IndexerRegistry::new());
        let subscriptions = Arc::new(SubscriptionManager::new(
            webhooks,
            SubscriptionSettings::from_config(&config.ingress, &config.subscription),
        ));
        let fetcher = TokenMetadataFetcher::from_config(&config.metadata, config.helius.network)?
            .map(Arc::new);

        let mut dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&mappings),
            Arc::clone(&registry),
            Arc::clone(&pools),
            config.retry,
        );
        let mut manager = IndexerManager::new(
            store,
            subscriptions,
            mappings,
            Arc::clone(&registry),
            pools,
        );
        if let Some(fetcher) = fetcher {
            dispatcher = dispatcher.with_metadata_fetcher(Arc::clone(&fetcher));
            manager = manager.with_metadata_fetcher(fetcher);
        }

        Ok(Self {
            config,
            manager: Arc::new(manager),
            dispatcher: Arc::new(dispatcher),
            registry,
        })
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<IndexerManager> {
        &self.manager
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn config(&self) -> &WebhookIndexerConfig {
        &self.config
    }

    /// Restores state from the store and serves the ingress until the
    /// process stops.
    ///
    /// # Errors
    ///
    /// Returns an error if restore fails, the listen address cannot be
    /// bound, or the server loop fails.
    pub async fn run(self) -> Result<()> {
        logging::log_startup(
            &self.config.ingress.listen_addr,
            &self.config.ingress.callback_url,
            self.config.subscription.capacity,
        );

        logging::log_section("Restore");
        let mapped = self
            .manager
            .restore(self.config.subscription.existing_webhook_id.clone())
            .await?;
        logging::log(
            LogLevel::Success,
            &format!("Restored {mapped} webhook mappings"),
        );

        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(METRICS_REPORT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.metrics().report();
            }
        });

        let addr = &self.config.ingress.listen_addr;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            WebhookIndexerError::ConfigError(format!("Cannot listen on {addr}: {e}"))
        })?;
        let router = server::router(IngressState::new(
            Arc::clone(&self.dispatcher),
            &self.config.ingress,
        ));
        server::serve(listener, router).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookIndexerConfigBuilder;
    use crate::storage::MemoryMetadataStore;
    use crate::webhook::{WebhookConfig, WebhookInfo};
    use async_trait::async_trait;

    struct NoWebhooks;

    #[async_trait]
    impl WebhookService for NoWebhooks {
        async fn create_webhook(&self, _config: &WebhookConfig) -> Result<String> {
            Err(WebhookIndexerError::InternalError("offline".into()))
        }

        async fn get_webhook(&self, webhook_id: &str) -> Result<WebhookInfo> {
            Err(WebhookIndexerError::NotFound(webhook_id.to_string()))
        }

        async fn update_webhook(&self, _webhook_id: &str, _config: &WebhookConfig) -> Result<()> {
            Ok(())
        }

        async fn delete_webhook(&self, _webhook_id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_with_parts_skips_fetcher_without_key() {
        let config = WebhookIndexerConfigBuilder::new()
            .with_database("postgresql://localhost/meta")
            .with_callback_url("https://indexer.example/webhook")
            .with_helius("key")
            .build()
            .unwrap();
        let pools = Arc::new(TenantPools::new(config.pool));
        let service = WebhookIndexerService::with_parts(
            config,
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(NoWebhooks),
            pools,
        )
        .unwrap();

        assert_eq!(service.manager().restore(None).await.unwrap(), 0);
        assert!(
            service
                .manager()
                .enrich_metadata("missing")
                .await
                .is_err()
        );
    }
}
