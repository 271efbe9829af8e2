//! Metadata store and per-tenant database access.
//!
//! The metadata store keeps indexer records, tenant database credentials and
//! the append-only log. [`PgMetadataStore`] is the production backend;
//! [`MemoryMetadataStore`] serves tests and local runs. Tenant target
//! databases are reached through [`TenantPools`].

use crate::types::models::{
    DatabaseCredential, IndexerLogEntry, IndexerRecord, IndexerStatus, LogType, TableName,
};
use crate::utils::error::{Result, WebhookIndexerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;

pub mod memory;
pub mod pool;

pub use memory::MemoryMetadataStore;
pub use pool::{PoolProvider, TenantPools};

/// Abstract interface to the metadata store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_indexer(&self, id: &str) -> Result<Option<IndexerRecord>>;
    async fn get_indexers_by_webhook_id(&self, webhook_id: &str) -> Result<Vec<IndexerRecord>>;
    async fn list_indexers(&self) -> Result<Vec<IndexerRecord>>;
    async fn create_indexer(&self, record: &IndexerRecord) -> Result<()>;
    async fn update_status(
        &self,
        id: &str,
        status: IndexerStatus,
        error_message: Option<&str>,
    ) -> Result<()>;
    async fn set_webhook_id(&self, id: &str, webhook_id: Option<&str>) -> Result<()>;
    async fn touch_last_indexed(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    async fn delete_indexer(&self, id: &str) -> Result<()>;

    async fn get_credential(&self, id: &str) -> Result<Option<DatabaseCredential>>;
    async fn put_credential(&self, credential: &DatabaseCredential) -> Result<()>;

    async fn append_log(&self, entry: &IndexerLogEntry) -> Result<()>;
    async fn recent_logs(&self, indexer_id: &str, limit: usize) -> Result<Vec<IndexerLogEntry>>;
}

/// Postgres-backed metadata store.
///
/// # Example
///
/// ```no_run
/// use solana_webhook_indexer::PgMetadataStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PgMetadataStore::new("postgresql://localhost/indexer_meta").await?;
/// store.initialize().await?;
/// # Ok(())
/// # }
/// ```
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Connects to the metadata database.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the metadata tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if a statement fails.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS indexers (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                indexer_type TEXT NOT NULL,
                params JSONB NOT NULL DEFAULT '{}'::jsonb,
                target_table TEXT NOT NULL,
                credential_id TEXT NOT NULL,
                webhook_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT,
                last_indexed_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_indexers_webhook_id ON indexers(webhook_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS database_credentials (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                database_name TEXT NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                ssl_mode TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS indexer_logs (
                id BIGSERIAL PRIMARY KEY,
                indexer_id TEXT NOT NULL,
                log_type TEXT NOT NULL,
                message TEXT NOT NULL,
                slot BIGINT,
                signatures TEXT[] NOT NULL DEFAULT '{}',
                details JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_indexer_logs_indexer ON indexer_logs(indexer_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

const INDEXER_COLUMNS: &str = "id, tenant_id, indexer_type, params, target_table, credential_id, \
     webhook_id, status, error_message, last_indexed_at, created_at, updated_at";

fn indexer_from_row(row: &PgRow) -> Result<IndexerRecord> {
    let indexer_type: String = row.try_get("indexer_type")?;
    let status: String = row.try_get("status")?;
    let target_table: String = row.try_get("target_table")?;
    Ok(IndexerRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        indexer_type: indexer_type.parse()?,
        params: row.try_get("params")?,
        target_table: TableName::parse(&target_table)?,
        credential_id: row.try_get("credential_id")?,
        webhook_id: row.try_get("webhook_id")?,
        status: status.parse()?,
        error_message: row.try_get("error_message")?,
        last_indexed_at: row.try_get("last_indexed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn slot_to_db(slot: u64) -> i64 {
    i64::try_from(slot).unwrap_or(i64::MAX)
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn get_indexer(&self, id: &str) -> Result<Option<IndexerRecord>> {
        let row = sqlx::query(&format!("SELECT {INDEXER_COLUMNS} FROM indexers WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(indexer_from_row).transpose()
    }

    async fn get_indexers_by_webhook_id(&self, webhook_id: &str) -> Result<Vec<IndexerRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {INDEXER_COLUMNS} FROM indexers WHERE webhook_id = $1 ORDER BY created_at"
        ))
        .bind(webhook_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(indexer_from_row).collect()
    }

    async fn list_indexers(&self) -> Result<Vec<IndexerRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {INDEXER_COLUMNS} FROM indexers ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(indexer_from_row).collect()
    }

    async fn create_indexer(&self, record: &IndexerRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO indexers (id, tenant_id, indexer_type, params, target_table, credential_id,
                                  webhook_id, status, error_message, last_indexed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(&record.id)
        .bind(&record.tenant_id)
        .bind(record.indexer_type.as_str())
        .bind(&record.params)
        .bind(record.target_table.as_str())
        .bind(&record.credential_id)
        .bind(&record.webhook_id)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.last_indexed_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: IndexerStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE indexers SET status = $2, error_message = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WebhookIndexerError::NotFound(format!("indexer {id}")));
        }
        Ok(())
    }

    async fn set_webhook_id(&self, id: &str, webhook_id: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE indexers SET webhook_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(webhook_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_last_indexed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE indexers SET last_indexed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_indexer(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM indexers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_credential(&self, id: &str) -> Result<Option<DatabaseCredential>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, host, port, database_name, username, password, ssl_mode \
             FROM database_credentials WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let port: i32 = row.try_get("port")?;
        Ok(Some(DatabaseCredential {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            host: row.try_get("host")?,
            port: u16::try_from(port).map_err(|_| {
                WebhookIndexerError::DecodingError(format!("Invalid port stored: {port}"))
            })?,
            database: row.try_get("database_name")?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            ssl_mode: row.try_get("ssl_mode")?,
        }))
    }

    async fn put_credential(&self, credential: &DatabaseCredential) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO database_credentials (id, tenant_id, host, port, database_name, username, password, ssl_mode)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                host = EXCLUDED.host,
                port = EXCLUDED.port,
                database_name = EXCLUDED.database_name,
                username = EXCLUDED.username,
                password = EXCLUDED.password,
                ssl_mode = EXCLUDED.ssl_mode
            ",
        )
        .bind(&credential.id)
        .bind(&credential.tenant_id)
        .bind(&credential.host)
        .bind(i32::from(credential.port))
        .bind(&credential.database)
        .bind(&credential.username)
        .bind(&credential.password)
        .bind(&credential.ssl_mode)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_log(&self, entry: &IndexerLogEntry) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO indexer_logs (indexer_id, log_type, message, slot, signatures, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(&entry.indexer_id)
        .bind(entry.log_type.as_str())
        .bind(&entry.message)
        .bind(entry.slot.map(slot_to_db))
        .bind(&entry.signatures)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_logs(&self, indexer_id: &str, limit: usize) -> Result<Vec<IndexerLogEntry>> {
        let rows = sqlx::query(
            r"
            SELECT indexer_id, log_type, message, slot, signatures, details, created_at
            FROM indexer_logs WHERE indexer_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            ",
        )
        .bind(indexer_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let log_type: String = row.try_get("log_type")?;
                let slot: Option<i64> = row.try_get("slot")?;
                let details: Option<serde_json::Value> = row.try_get("details")?;
                Ok(IndexerLogEntry {
                    indexer_id: row.try_get("indexer_id")?,
                    log_type: log_type.parse::<LogType>()?,
                    message: row.try_get("message")?,
                    slot: slot.and_then(|s| u64::try_from(s).ok()),
                    signatures: row.try_get("signatures")?,
                    details: details.unwrap_or(serde_json::Value::Null),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
