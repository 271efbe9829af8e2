//! Lending market rates per token and platform.
//!
//! Each lending event is treated as a full snapshot of the market: every
//! column is overwritten and `slot` is set to the event's slot. Snapshots
//! older than the stored slot are ignored.

use super::shapes::{Normalized, allowed, first_f64, first_str, get_path};
use super::sql::{create_index, run_ddl, slot_param};
use super::tokens::{TokenFields, TokenSet, enrich_table, fill_missing_metadata};
use crate::core::metadata::{TokenMetadata, TokenMetadataFetcher};
use crate::types::models::{IndexerType, TableName};
use crate::types::payload::{EventDetails, WebhookEvent};
use crate::types::traits::{Indexer, MetadataAware, ProcessReport};
use crate::utils::error::{Result, WebhookIndexerError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;

/// Event types carrying lending market data.
pub const LENDING_EVENT_TYPES: [&str; 6] =
    ["BORROW", "REPAY", "SUPPLY", "WITHDRAW", "LIQUIDATE", "UPDATE_RATES"];

/// Platforms rows are pre-created for when no allow-list is configured.
pub const KNOWN_LENDING_PLATFORMS: [&str; 4] = ["UNKNOWN", "SOLEND", "MARGINFI", "KAMINO"];

const MINT_PATHS: &[&str] = &[
    "mint",
    "tokenAddress",
    "token_address",
    "token.mint",
    "reserve.mint",
];
const PLATFORM_PATHS: &[&str] = &["source", "protocol"];

/// Parameters accepted at creation.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenBorrowParams {
    #[serde(alias = "token_addresses", alias = "tokenAddresses")]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
}

/// Market snapshot for one token on one platform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BorrowSnapshot {
    pub token_address: String,
    pub platform: String,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub borrow_rate: Option<f64>,
    pub supply_rate: Option<f64>,
    pub utilization_rate: Option<f64>,
    pub total_borrowed: Option<f64>,
    pub total_supplied: Option<f64>,
    pub available_liquidity: Option<f64>,
    pub transaction_id: Option<String>,
}

impl TokenFields for BorrowSnapshot {
    fn token_address(&self) -> &str {
        &self.token_address
    }

    fn needs_metadata(&self) -> bool {
        self.name.is_none() || self.symbol.is_none()
    }

    fn apply_metadata(&mut self, metadata: &TokenMetadata) {
        if self.name.is_none() {
            self.name.clone_from(&metadata.name);
        }
        if self.symbol.is_none() {
            self.symbol.clone_from(&metadata.symbol);
        }
    }
}

/// Market-data sub-object of an entry, or the entry itself.
fn market_data(body: &Value) -> &Value {
    body.get("marketData")
        .or_else(|| body.get("market_data"))
        .filter(|v| v.is_object())
        .unwrap_or(body)
}

/// Token lending indexer.
pub struct TokenBorrowIndexer {
    id: String,
    tokens: TokenSet,
    platforms: Option<Vec<String>>,
}

impl TokenBorrowIndexer {
    /// # Errors
    ///
    /// Returns `ValidationError` for malformed params or an empty token list.
    pub fn from_params(id: impl Into<String>, params: &Value) -> Result<Self> {
        let parsed: TokenBorrowParams = serde_json::from_value(params.clone()).map_err(|e| {
            WebhookIndexerError::ValidationError(format!("Invalid token borrow params: {e}"))
        })?;
        Ok(Self {
            id: id.into(),
            tokens: TokenSet::new(&parsed.tokens)?,
            platforms: parsed.platforms.filter(|p| !p.is_empty()),
        })
    }

    /// Lending snapshots in one event.
    ///
    /// # Errors
    ///
    /// Returns `DecodingError` when the detail blob cannot be decoded.
    pub fn normalize(&self, event: &WebhookEvent) -> Result<Vec<Normalized<BorrowSnapshot>>> {
        let details = event.details()?;
        let signature = event.signature();
        let items = details
            .event_entries()
            .into_iter()
            .filter(|e| e.is_type(&LENDING_EVENT_TYPES))
            .enumerate()
            .filter_map(|(i, entry)| self.entry_item(&details, entry.body, i, signature.as_ref()))
            .collect();
        Ok(items)
    }

    fn entry_item(
        &self,
        details: &EventDetails,
        body: &Value,
        index: usize,
        signature: Option<&String>,
    ) -> Option<Normalized<BorrowSnapshot>> {
        let platform = first_str(body, PLATFORM_PATHS)
            .or_else(|| details.source())
            .map_or_else(|| "UNKNOWN".to_string(), |p| p.to_uppercase());
        if !allowed(self.platforms.as_deref(), &platform) {
            return None;
        }

        let Some(mint) = first_str(body, MINT_PATHS) else {
            return Some(Normalized::skip(
                format!("event#{index}:{platform}"),
                "missing mint",
            ));
        };
        let token = self.tokens.canonical(&mint)?;
        let market = market_data(body);

        Some(Normalized::apply(
            format!("{token}:{platform}"),
            BorrowSnapshot {
                token_address: token.to_string(),
                platform,
                symbol: first_str(body, &["symbol", "token.symbol"]),
                name: first_str(body, &["name", "token.name"]),
                borrow_rate: first_f64(market, &["borrowRate", "borrow_rate", "borrowApy"]),
                supply_rate: first_f64(market, &["supplyRate", "supply_rate", "supplyApy"]),
                utilization_rate: first_f64(market, &["utilizationRate", "utilization_rate"]),
                total_borrowed: first_f64(market, &["totalBorrowed", "total_borrowed"]),
                total_supplied: first_f64(market, &["totalSupplied", "total_supplied"]),
                available_liquidity: first_f64(
                    market,
                    &["availableLiquidity", "available_liquidity"],
                ),
                transaction_id: signature
                    .cloned()
                    .or_else(|| get_path(body, "signature").and_then(Value::as_str).map(str::to_string)),
            },
        ))
    }

    async fn apply(&self, db: &PgPool, table: &TableName, snap: &BorrowSnapshot, slot: u64) -> Result<()> {
        let mut tx = db.begin().await?;
        sqlx::query(&format!(
            r"
            INSERT INTO {table} AS t (
                token_address, platform, token_symbol, token_name,
                borrow_rate, supply_rate, utilization_rate,
                total_borrowed, total_supplied, available_liquidity,
                slot, transaction_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW())
            ON CONFLICT (token_address, platform) DO UPDATE SET
                token_symbol = COALESCE(EXCLUDED.token_symbol, t.token_symbol),
                token_name = COALESCE(EXCLUDED.token_name, t.token_name),
                borrow_rate = EXCLUDED.borrow_rate,
                supply_rate = EXCLUDED.supply_rate,
                utilization_rate = EXCLUDED.utilization_rate,
                total_borrowed = EXCLUDED.total_borrowed,
                total_supplied = EXCLUDED.total_supplied,
                available_liquidity = EXCLUDED.available_liquidity,
                slot = EXCLUDED.slot,
                transaction_id = CASE WHEN EXCLUDED.slot > t.slot
                    THEN EXCLUDED.transaction_id ELSE t.transaction_id END,
                updated_at = CASE WHEN EXCLUDED.slot > t.slot THEN NOW() ELSE t.updated_at END
            WHERE EXCLUDED.slot >= t.slot
            "
        ))
        .bind(&snap.token_address)
        .bind(&snap.platform)
        .bind(&snap.symbol)
        .bind(&snap.name)
        .bind(snap.borrow_rate)
        .bind(snap.supply_rate)
        .bind(snap.utilization_rate)
        .bind(snap.total_borrowed)
        .bind(snap.total_supplied)
        .bind(snap.available_liquidity)
        .bind(slot_param(slot))
        .bind(&snap.transaction_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_all(
        &self,
        db: &PgPool,
        table: &TableName,
        items: Vec<Normalized<BorrowSnapshot>>,
        slot: u64,
    ) -> ProcessReport {
        let mut report = ProcessReport::new();
        for entry in items {
            match entry {
                Normalized::Apply { key, item } => {
                    let result = self.apply(db, table, &item, slot).await;
                    report.record(key, result);
                }
                Normalized::Skip { key, reason } => report.skipped(key, reason),
            }
        }
        report
    }
}

#[async_trait]
impl Indexer for TokenBorrowIndexer {
    fn id(&self) -> &str {
        &self.id
    }

    fn indexer_type(&self) -> IndexerType {
        IndexerType::TokenBorrow
    }

    fn declared_addresses(&self) -> Vec<String> {
        self.tokens.addresses().to_vec()
    }

    async fn initialize(&self, db: &PgPool, table: &TableName) -> Result<()> {
        run_ddl(
            db,
            &[
                format!(
                    r"
                    CREATE TABLE IF NOT EXISTS {table} (
                        id BIGSERIAL PRIMARY KEY,
                        token_address TEXT NOT NULL,
                        platform TEXT NOT NULL DEFAULT 'UNKNOWN',
                        token_symbol TEXT,
                        token_name TEXT,
                        borrow_rate DOUBLE PRECISION,
                        supply_rate DOUBLE PRECISION,
                        utilization_rate DOUBLE PRECISION,
                        total_borrowed DOUBLE PRECISION,
                        total_supplied DOUBLE PRECISION,
                        available_liquidity DOUBLE PRECISION,
                        slot BIGINT NOT NULL DEFAULT 0,
                        transaction_id TEXT,
                        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        UNIQUE (token_address, platform)
                    )
                    "
                ),
                create_index(table, "token_idx", "token_address"),
                create_index(table, "platform_idx", "platform"),
            ],
        )
        .await?;

        let platforms: Vec<String> = match &self.platforms {
            Some(list) => list.iter().map(|p| p.to_uppercase()).collect(),
            None => KNOWN_LENDING_PLATFORMS.iter().map(|p| (*p).to_string()).collect(),
        };
        for token in self.tokens.addresses() {
            for platform in &platforms {
                sqlx::query(&format!(
                    "INSERT INTO {table} (token_address, platform) VALUES ($1, $2) \
                     ON CONFLICT (token_address, platform) DO NOTHING"
                ))
                .bind(token)
                .bind(platform)
                .execute(db)
                .await?;
            }
        }
        Ok(())
    }

    async fn process(
        &self,
        db: &PgPool,
        table: &TableName,
        event: &WebhookEvent,
    ) -> Result<ProcessReport> {
        let items = self.normalize(event)?;
        Ok(self.apply_all(db, table, items, event.slot).await)
    }

    fn as_metadata_aware(&self) -> Option<&dyn MetadataAware> {
        Some(self)
    }
}

#[async_trait]
impl MetadataAware for TokenBorrowIndexer {
    async fn enrich_metadata(
        &self,
        db: &PgPool,
        table: &TableName,
        fetcher: &TokenMetadataFetcher,
    ) -> Result<usize> {
        enrich_table(db, table, fetcher).await
    }

    async fn process_with_metadata(
        &self,
        db: &PgPool,
        table: &TableName,
        event: &WebhookEvent,
        fetcher: &TokenMetadataFetcher,
    ) -> Result<ProcessReport> {
        let mut items = self.normalize(event)?;
        fill_missing_metadata(&mut items, fetcher).await;
        Ok(self.apply_all(db, table, items, event.slot).await)
    }
}
