//! Request-time routing, indexer lifecycle and shared subscription state.

pub mod dispatcher;
pub mod manager;
pub mod mapping;
pub mod metadata;
pub mod registry;
pub mod registry_metrics;
pub mod subscription;

pub use dispatcher::{DispatchOutcome, DispatchStatus, Dispatcher};
pub use manager::{CreateIndexerRequest, IndexerManager};
pub use mapping::WebhookMappingRegistry;
pub use metadata::TokenMetadataFetcher;
pub use registry::IndexerRegistry;
pub use subscription::{SubscriptionManager, SubscriptionSettings};
