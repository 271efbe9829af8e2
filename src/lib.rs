//! `solana-webhook-indexer` - multi-tenant Solana indexing driven by Helius
//! webhooks.
//!
//! Tenants register *indexers*: a variant (token price, token borrow, NFT
//! bid, NFT price), variant parameters naming the on-chain addresses to
//! watch, a target table and a credential for their own Postgres database.
//! All indexers share one upstream webhook subscription whose address list
//! is the union of their declared addresses. Each delivery is routed back to
//! the indexers behind the subscription and written to the tenant's table
//! with slot-monotonic, idempotent upserts.
//!
//! # Quick Start
//!
//! ```no_run
//! use solana_webhook_indexer::{
//!     CreateIndexerRequest, IndexerType, WebhookIndexerConfigBuilder, WebhookIndexerService,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WebhookIndexerConfigBuilder::new()
//!     .with_database("postgresql://localhost/indexer_meta")
//!     .with_callback_url("https://indexer.example.com/webhook")
//!     .with_helius("my-api-key")
//!     .build()?;
//!
//! let service = WebhookIndexerService::connect(config).await?;
//! service
//!     .manager()
//!     .create_indexer(CreateIndexerRequest {
//!         id: None,
//!         tenant_id: "acme".into(),
//!         indexer_type: IndexerType::TokenPrice,
//!         params: json!({ "tokens": ["So11111111111111111111111111111111111111112"] }),
//!         target_table: "token_prices".into(),
//!         credential_id: "acme-db".into(),
//!     })
//!     .await?;
//! service.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! 1. **Ingress** (`server`) - authenticates deliveries, acknowledges them
//!    and hands envelopes to bounded background tasks
//! 2. **`WebhookMappingRegistry`** - subscription id to indexer ids
//! 3. **`Dispatcher`** - status gating, credential and pool resolution,
//!    per-indexer processing and log entries
//! 4. **Indexers** (`indexers`) - normalize the detail blob through ordered
//!    shape matchers and upsert into the tenant table
//! 5. **`SubscriptionManager`** - the single shared upstream subscription
//!    and its capacity-bounded address list
//! 6. **`IndexerManager`** - create / pause / resume / delete and start-up
//!    restore

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub use config::{HeliusNetwork, WebhookIndexerConfig, WebhookIndexerConfigBuilder};
pub use crate::core::{
    CreateIndexerRequest, DispatchOutcome, DispatchStatus, Dispatcher, IndexerManager,
    IndexerRegistry, SubscriptionManager, SubscriptionSettings, TokenMetadataFetcher,
    WebhookMappingRegistry,
};
pub use service::WebhookIndexerService;
pub use storage::{MemoryMetadataStore, MetadataStore, PgMetadataStore, PoolProvider, TenantPools};
pub use types::models::{
    DatabaseCredential, IndexerLogEntry, IndexerRecord, IndexerStatus, IndexerType, LogType,
    TableName,
};
pub use types::payload::{InboundBody, WebhookEvent};
pub use types::traits::{Indexer, ItemStatus, MetadataAware, ProcessReport};
pub use utils::error::{Result, WebhookIndexerError};
pub use webhook::{HeliusWebhookClient, WebhookConfig, WebhookInfo, WebhookService};

// Module declarations
pub mod config;
pub mod core;
pub mod indexers;
pub mod server;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod webhook;
