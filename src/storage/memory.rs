//! In-process metadata store.

use super::MetadataStore;
use crate::types::models::{DatabaseCredential, IndexerLogEntry, IndexerRecord, IndexerStatus};
use crate::utils::error::{Result, WebhookIndexerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Metadata store backed by hash maps, for tests and single-process runs.
#[derive(Default)]
pub struct MemoryMetadataStore {
    indexers: RwLock<HashMap<String, IndexerRecord>>,
    credentials: RwLock<HashMap<String, DatabaseCredential>>,
    logs: RwLock<Vec<IndexerLogEntry>>,
}

impl MemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every log entry appended so far, oldest first.
    pub async fn all_logs(&self) -> Vec<IndexerLogEntry> {
        self.logs.read().await.clone()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get_indexer(&self, id: &str) -> Result<Option<IndexerRecord>> {
        Ok(self.indexers.read().await.get(id).cloned())
    }

    async fn get_indexers_by_webhook_id(&self, webhook_id: &str) -> Result<Vec<IndexerRecord>> {
        let indexers = self.indexers.read().await;
        let mut found: Vec<IndexerRecord> = indexers
            .values()
            .filter(|r| r.webhook_id.as_deref() == Some(webhook_id))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn list_indexers(&self) -> Result<Vec<IndexerRecord>> {
        let mut all: Vec<IndexerRecord> = self.indexers.read().await.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        Ok(all)
    }

    async fn create_indexer(&self, record: &IndexerRecord) -> Result<()> {
        let mut indexers = self.indexers.write().await;
        if indexers.contains_key(&record.id) {
            return Err(WebhookIndexerError::ValidationError(format!(
                "Indexer {} already exists",
                record.id
            )));
        }
        indexers.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: IndexerStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut indexers = self.indexers.write().await;
        let record = indexers
            .get_mut(id)
            .ok_or_else(|| WebhookIndexerError::NotFound(format!("indexer {id}")))?;
        record.status = status;
        record.error_message = error_message.map(str::to_string);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn set_webhook_id(&self, id: &str, webhook_id: Option<&str>) -> Result<()> {
        if let Some(record) = self.indexers.write().await.get_mut(id) {
            record.webhook_id = webhook_id.map(str::to_string);
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn touch_last_indexed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(record) = self.indexers.write().await.get_mut(id) {
            record.last_indexed_at = Some(at);
        }
        Ok(())
    }

    async fn delete_indexer(&self, id: &str) -> Result<()> {
        self.indexers.write().await.remove(id);
        Ok(())
    }

    async fn get_credential(&self, id: &str) -> Result<Option<DatabaseCredential>> {
        Ok(self.credentials.read().await.get(id).cloned())
    }

    async fn put_credential(&self, credential: &DatabaseCredential) -> Result<()> {
        self.credentials
            .write()
            .await
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn append_log(&self, entry: &IndexerLogEntry) -> Result<()> {
        self.logs.write().await.push(entry.clone());
        Ok(())
    }

    async fn recent_logs(&self, indexer_id: &str, limit: usize) -> Result<Vec<IndexerLogEntry>> {
        Ok(self
            .logs
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| e.indexer_id == indexer_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::models::{IndexerType, LogType, TableName};
    use serde_json::json;

    fn record(id: &str) -> IndexerRecord {
        IndexerRecord::new(
            id,
            "tenant",
            IndexerType::NftBid,
            json!({}),
            TableName::parse("bids").unwrap(),
            "cred",
        )
    }

    #[tokio::test]
    async fn test_status_and_webhook_updates() {
        let store = MemoryMetadataStore::new();
        store.create_indexer(&record("a")).await.unwrap();
        store.create_indexer(&record("b")).await.unwrap();
        assert!(store.create_indexer(&record("a")).await.is_err());

        store.set_webhook_id("a", Some("wh")).await.unwrap();
        store.set_webhook_id("b", Some("wh")).await.unwrap();
        store
            .update_status("a", IndexerStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let a = store.get_indexer("a").await.unwrap().unwrap();
        assert_eq!(a.status, IndexerStatus::Failed);
        assert_eq!(a.error_message.as_deref(), Some("boom"));
        assert_eq!(store.get_indexers_by_webhook_id("wh").await.unwrap().len(), 2);

        assert!(matches!(
            store.update_status("missing", IndexerStatus::Active, None).await,
            Err(WebhookIndexerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_recent_logs_newest_first() {
        let store = MemoryMetadataStore::new();
        for i in 0..5u64 {
            store
                .append_log(&IndexerLogEntry::new("a", LogType::Success, format!("m{i}")).with_slot(i))
                .await
                .unwrap();
        }
        store
            .append_log(&IndexerLogEntry::new("b", LogType::Error, "other"))
            .await
            .unwrap();

        let logs = store.recent_logs("a", 2).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].slot, Some(4));
        assert_eq!(logs[1].slot, Some(3));
    }
}
