//! The contract every indexer variant implements.
//!
//! An [`Indexer`] owns one normalization strategy and writes to one target
//! table in the tenant's database. The dispatcher only ever sees the trait
//! object; variants are chosen by the registry from the stored type tag.

use crate::core::metadata::TokenMetadataFetcher;
use crate::types::models::{IndexerType, TableName};
use crate::types::payload::WebhookEvent;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;

/// Outcome of one normalized item (one upsert, delete or status flip).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ItemStatus {
    /// The statement committed.
    Applied,
    /// The item was recognized but could not be resolved; nothing was written.
    Skipped(String),
    /// The statement failed and was rolled back.
    Failed(String),
}

/// Per-item result of processing one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    /// Upsert key or other identification of the item.
    pub key: String,
    #[serde(flatten)]
    pub status: ItemStatus,
}

/// Everything `process` did for one event.
///
/// Items are independent: a failed item does not roll back the items applied
/// before it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub items: Vec<ItemOutcome>,
}

impl ProcessReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&mut self, key: impl Into<String>) {
        self.items.push(ItemOutcome {
            key: key.into(),
            status: ItemStatus::Applied,
        });
    }

    pub fn skipped(&mut self, key: impl Into<String>, reason: impl Into<String>) {
        let key = key.into();
        let reason = reason.into();
        tracing::warn!(key = %key, reason = %reason, "Skipping event item");
        self.items.push(ItemOutcome {
            key,
            status: ItemStatus::Skipped(reason),
        });
    }

    pub fn failed(&mut self, key: impl Into<String>, error: impl Into<String>) {
        let key = key.into();
        let error = error.into();
        tracing::error!(key = %key, error = %error, "Event item failed");
        self.items.push(ItemOutcome {
            key,
            status: ItemStatus::Failed(error),
        });
    }

    /// Records `result` as applied or failed under `key`.
    pub fn record(&mut self, key: impl Into<String>, result: Result<()>) {
        match result {
            Ok(()) => self.applied(key),
            Err(e) => self.failed(key, e.to_string()),
        }
    }

    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Applied))
    }

    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Skipped(_)))
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&ItemStatus) -> bool) -> usize {
        self.items.iter().filter(|i| pred(&i.status)).count()
    }

    /// First failure, as `(key, error)`.
    #[must_use]
    pub fn first_failure(&self) -> Option<(&str, &str)> {
        self.items.iter().find_map(|i| match &i.status {
            ItemStatus::Failed(err) => Some((i.key.as_str(), err.as_str())),
            _ => None,
        })
    }

    pub fn extend(&mut self, other: ProcessReport) {
        self.items.extend(other.items);
    }
}

/// A tenant-configured normalization strategy.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Identifier of the indexer record this instance was built for.
    fn id(&self) -> &str;

    /// Variant tag.
    fn indexer_type(&self) -> IndexerType;

    /// Addresses the upstream subscription must watch for this indexer.
    fn declared_addresses(&self) -> Vec<String>;

    /// Idempotently creates the target table and its indexes, optionally
    /// pre-populating rows.
    async fn initialize(&self, db: &PgPool, table: &TableName) -> Result<()>;

    /// Normalizes one event and applies the resulting statements, each in
    /// its own transaction.
    ///
    /// # Errors
    ///
    /// Returns an error only when the event's detail blob cannot be decoded.
    /// Storage failures of individual statements are reported as
    /// [`ItemStatus::Failed`] entries.
    async fn process(&self, db: &PgPool, table: &TableName, event: &WebhookEvent)
    -> Result<ProcessReport>;

    /// Token variants expose the metadata-aware contract.
    fn as_metadata_aware(&self) -> Option<&dyn MetadataAware> {
        None
    }
}

/// Indexers that can backfill token display metadata.
#[async_trait]
pub trait MetadataAware: Send + Sync {
    /// Fills missing `token_name` / `token_symbol` columns. Returns the
    /// number of rows updated.
    async fn enrich_metadata(
        &self,
        db: &PgPool,
        table: &TableName,
        fetcher: &TokenMetadataFetcher,
    ) -> Result<usize>;

    /// Like [`Indexer::process`], but looks up metadata for any token that
    /// lacks a name or symbol before writing.
    async fn process_with_metadata(
        &self,
        db: &PgPool,
        table: &TableName,
        event: &WebhookEvent,
        fetcher: &TokenMetadataFetcher,
    ) -> Result<ProcessReport>;
}
