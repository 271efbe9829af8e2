//! Connection pools for tenant target databases.

use crate::config::TenantPoolConfig;
use crate::types::models::DatabaseCredential;
use crate::utils::error::{Result, WebhookIndexerError};
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

/// Hands out a connection pool for a tenant database.
#[async_trait]
pub trait PoolProvider: Send + Sync {
    async fn pool_for(&self, credential: &DatabaseCredential) -> Result<PgPool>;
}

/// One lazily created pool per credential identity.
///
/// Pools are shared by every indexer writing to the same database and live
/// until [`TenantPools::close_all`] runs.
pub struct TenantPools {
    config: TenantPoolConfig,
    pools: DashMap<String, PgPool>,
}

impl TenantPools {
    #[must_use]
    pub fn new(config: TenantPoolConfig) -> Self {
        Self {
            config,
            pools: DashMap::new(),
        }
    }

    async fn connect(&self, credential: &DatabaseCredential) -> Result<PgPool> {
        let options = connect_options(credential)?;
        tracing::info!(dsn = %credential.redacted_dsn(), "Opening tenant pool");

        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .min_connections(self.config.min_connections)
            .max_lifetime(self.config.max_lifetime())
            .idle_timeout(self.config.idle_timeout())
            .acquire_timeout(self.config.connect_timeout())
            .connect_with(options)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(pool)
    }

    /// Number of cached pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Drops the pool for `credential` so the next call reconnects.
    pub async fn invalidate(&self, credential: &DatabaseCredential) {
        if let Some((_, pool)) = self.pools.remove(&credential.identity()) {
            pool.close().await;
        }
    }

    pub async fn close_all(&self) {
        let pools: Vec<PgPool> = self.pools.iter().map(|p| p.value().clone()).collect();
        self.pools.clear();
        for pool in pools {
            pool.close().await;
        }
    }
}

#[async_trait]
impl PoolProvider for TenantPools {
    /// Returns the cached pool for `credential`, connecting on first use.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for an unknown `ssl_mode` and
    /// `DatabaseError` when the connection or the health probe fails.
    async fn pool_for(&self, credential: &DatabaseCredential) -> Result<PgPool> {
        let key = credential.identity();
        if let Some(pool) = self.pools.get(&key) {
            return Ok(pool.clone());
        }

        let pool = self.connect(credential).await?;
        // A concurrent caller may have won the race; keep whichever landed first.
        let entry = self.pools.entry(key).or_insert(pool);
        Ok(entry.clone())
    }
}

/// Builds connect options from a stored credential.
///
/// # Errors
///
/// Returns `ValidationError` if `ssl_mode` is not a libpq mode name.
pub fn connect_options(credential: &DatabaseCredential) -> Result<PgConnectOptions> {
    let ssl_mode = match credential.ssl_mode.as_deref() {
        None | Some("") => PgSslMode::Prefer,
        Some(mode) => mode.parse::<PgSslMode>().map_err(|_| {
            WebhookIndexerError::ValidationError(format!("Unknown sslmode: {mode}"))
        })?,
    };

    Ok(PgConnectOptions::new()
        .host(&credential.host)
        .port(credential.port)
        .database(&credential.database)
        .username(&credential.username)
        .password(&credential.password)
        .ssl_mode(ssl_mode))
}
