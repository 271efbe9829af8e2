//! Token prices per token and platform.
//!
//! Rows are keyed by `(token_address, platform)`. Price fields only move
//! when an event carries a usable value and is not older than what is
//! stored, so a late, stale delivery can never roll a price back.

use super::shapes::{
    Normalized, ShapeMatcher, allowed, first_f64, first_f64_strict, first_match, first_str,
    get_path,
};
use super::sql::{create_index, positive, run_ddl, slot_param};
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

/// Platform recorded when an event names none.
pub const UNKNOWN_PLATFORM: &str = "UNKNOWN";

/// Platforms rows are pre-created for when no allow-list is configured.
pub const KNOWN_PLATFORMS: [&str; 6] = [
    UNKNOWN_PLATFORM,
    "JUPITER",
    "RAYDIUM",
    "ORCA",
    "METEORA",
    "PUMP_FUN",
];

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

const MINT_PATHS: &[&str] = &["mint", "tokenAddress", "token_address", "token.mint", "token.address"];
const SYMBOL_PATHS: &[&str] = &["symbol", "tokenSymbol", "token.symbol", "metadata.symbol"];
const NAME_PATHS: &[&str] = &["name", "tokenName", "token.name", "metadata.name"];
const AMOUNT_PATHS: &[&str] = &["amount", "tokenAmount", "priceSol", "price_sol"];
const USD_PATHS: &[&str] = &["usdValue", "priceUsd", "price_usd", "usdPrice", "price.usd"];
const VOLUME_PATHS: &[&str] = &["volume24h", "volume_24h", "volume"];
const MARKET_CAP_PATHS: &[&str] = &["marketCap", "market_cap", "mcap"];
const LIQUIDITY_PATHS: &[&str] = &["liquidity", "liquidityUsd"];
const PRICE_CHANGE_PATHS: &[&str] = &["priceChange24h", "price_change_24h", "priceChange"];
const SUPPLY_PATHS: &[&str] = &["totalSupply", "total_supply", "supply"];

/// Parameters accepted at creation.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPriceParams {
    #[serde(alias = "token_addresses", alias = "tokenAddresses")]
    pub tokens: Vec<String>,
    /// Optional case-insensitive platform allow-list.
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
}

/// One price observation ready to upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceUpdate {
    pub token_address: String,
    pub platform: String,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub price_sol: Option<f64>,
    pub price_usd: Option<f64>,
    pub volume_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub liquidity: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub total_supply: Option<f64>,
    pub transaction_id: Option<String>,
}

impl TokenFields for PriceUpdate {
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

type PriceItems = Vec<Normalized<PriceUpdate>>;

/// Event layouts, most specific first.
static PRICE_MATCHERS: [ShapeMatcher<TokenSet, PriceItems>; 4] = [
    ShapeMatcher::new("swap", match_swap_type),
    ShapeMatcher::new("swap_events", match_swap_events),
    ShapeMatcher::new("token_transfers", match_token_transfers),
    ShapeMatcher::new("token_balances", match_token_balances),
];

fn non_empty(items: PriceItems) -> Option<PriceItems> {
    if items.is_empty() { None } else { Some(items) }
}

fn match_swap_type(details: &EventDetails, tokens: &TokenSet) -> Option<PriceItems> {
    let event_type = details.event_type()?;
    if event_type != "SWAP" && event_type != "JUPITER_SWAP" {
        return None;
    }
    let body = details
        .event_entries()
        .into_iter()
        .find(|e| e.is_type(&["SWAP", "JUPITER_SWAP"]))
        .map_or(details.raw(), |e| e.body);
    non_empty(swap_items(body, tokens))
}

fn match_swap_events(details: &EventDetails, tokens: &TokenSet) -> Option<PriceItems> {
    let items: PriceItems = details
        .event_entries()
        .into_iter()
        .filter(|e| e.is_type(&["SWAP", "JUPITER_SWAP"]))
        .flat_map(|e| swap_items(e.body, tokens))
        .collect();
    non_empty(items)
}

fn match_token_transfers(details: &EventDetails, tokens: &TokenSet) -> Option<PriceItems> {
    let items: PriceItems = details
        .token_transfers()
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| entry_item(entry, tokens, i))
        .collect();
    non_empty(items)
}

fn match_token_balances(details: &EventDetails, tokens: &TokenSet) -> Option<PriceItems> {
    let items: PriceItems = details
        .token_balances()
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| entry_item(entry, tokens, i))
        .collect();
    non_empty(items)
}

/// Token legs of a swap, priced against its native SOL leg when present.
fn swap_items(body: &Value, tokens: &TokenSet) -> PriceItems {
    let native_lamports = first_f64(
        body,
        &["nativeInput.amount", "nativeOutput.amount", "nativeAmount"],
    );

    let legs = ["tokenInputs", "tokenOutputs"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_array))
        .flatten();

    legs.enumerate()
        .filter_map(|(i, leg)| {
            let mut item = entry_item(leg, tokens, i)?;
            if let Normalized::Apply { item: update, .. } = &mut item
                && let (Some(lamports), Some(amount)) = (native_lamports, update.price_sol)
                && amount > 0.0
            {
                update.price_sol = Some(lamports / LAMPORTS_PER_SOL / amount);
            }
            Some(item)
        })
        .collect()
}

/// Token amount from `rawTokenAmount` (scaled by its decimals) or from the
/// plain amount fields.
fn entry_amount(entry: &Value) -> std::result::Result<Option<f64>, &'static str> {
    if let Some(raw) = first_f64(entry, &["rawTokenAmount.tokenAmount"]) {
        let decimals = get_path(entry, "rawTokenAmount.decimals")
            .and_then(Value::as_i64)
            .and_then(|d| i32::try_from(d).ok())
            .unwrap_or(0);
        return Ok(Some(raw / 10f64.powi(decimals)));
    }
    first_f64_strict(entry, AMOUNT_PATHS)
}

/// Normalizes one array entry. `None` means the entry concerns an
/// untracked token and is ignored silently.
fn entry_item(entry: &Value, tokens: &TokenSet, index: usize) -> Option<Normalized<PriceUpdate>> {
    if !entry.is_object() {
        return Some(Normalized::skip(format!("entry#{index}"), "entry is not an object"));
    }
    let Some(mint) = first_str(entry, MINT_PATHS) else {
        return Some(Normalized::skip(format!("entry#{index}"), "missing mint"));
    };
    let token = tokens.canonical(&mint)?;

    let amount = match entry_amount(entry) {
        Ok(amount) => amount,
        Err(path) => {
            return Some(Normalized::skip(token, format!("non-numeric {path}")));
        }
    };

    Some(Normalized::apply(
        token,
        PriceUpdate {
            token_address: token.to_string(),
            platform: UNKNOWN_PLATFORM.to_string(),
            symbol: first_str(entry, SYMBOL_PATHS),
            name: first_str(entry, NAME_PATHS),
            price_sol: amount,
            price_usd: first_f64(entry, USD_PATHS),
            volume_24h: first_f64(entry, VOLUME_PATHS),
            market_cap: first_f64(entry, MARKET_CAP_PATHS),
            liquidity: first_f64(entry, LIQUIDITY_PATHS),
            price_change_24h: first_f64(entry, PRICE_CHANGE_PATHS),
            total_supply: first_f64(entry, SUPPLY_PATHS),
            transaction_id: None,
        },
    ))
}

/// Token price indexer.
pub struct TokenPriceIndexer {
    id: String,
    tokens: TokenSet,
    platforms: Option<Vec<String>>,
}

impl TokenPriceIndexer {
    /// # Errors
    ///
    /// Returns `ValidationError` for malformed params or an empty token list.
    pub fn from_params(id: impl Into<String>, params: &Value) -> Result<Self> {
        let parsed: TokenPriceParams = serde_json::from_value(params.clone()).map_err(|e| {
            WebhookIndexerError::ValidationError(format!("Invalid token price params: {e}"))
        })?;
        Ok(Self {
            id: id.into(),
            tokens: TokenSet::new(&parsed.tokens)?,
            platforms: parsed.platforms.filter(|p| !p.is_empty()),
        })
    }

    /// Turns one event into price updates. Pure; touches no database.
    ///
    /// # Errors
    ///
    /// Returns `DecodingError` when the detail blob cannot be decoded.
    pub fn normalize(&self, event: &WebhookEvent) -> Result<PriceItems> {
        let details = event.details()?;
        let platform = details
            .source()
            .map_or_else(|| UNKNOWN_PLATFORM.to_string(), |p| p.to_uppercase());
        if !allowed(self.platforms.as_deref(), &platform) {
            tracing::debug!(indexer_id = %self.id, platform = %platform, "Platform not in allow-list");
            return Ok(Vec::new());
        }

        let Some((shape, mut items)) = first_match(&PRICE_MATCHERS, &details, &self.tokens) else {
            return Ok(Vec::new());
        };
        tracing::debug!(indexer_id = %self.id, shape, items = items.len(), "Matched price shape");

        let signature = event.signature();
        for entry in &mut items {
            match entry {
                Normalized::Apply { key, item } => {
                    item.platform.clone_from(&platform);
                    item.transaction_id.clone_from(&signature);
                    *key = format!("{}:{platform}", item.token_address);
                }
                Normalized::Skip { key, .. } => {
                    *key = format!("{key}:{platform}");
                }
            }
        }
        Ok(items)
    }

    async fn apply(&self, db: &PgPool, table: &TableName, update: &PriceUpdate, slot: u64) -> Result<()> {
        let mut tx = db.begin().await?;
        sqlx::query(&format!(
            r"
            INSERT INTO {table} AS t (
                token_address, platform, token_symbol, token_name,
                price_usd, price_sol, volume_24h, market_cap, liquidity,
                price_change_24h, total_supply, slot, transaction_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW())
            ON CONFLICT (token_address, platform) DO UPDATE SET
                token_symbol = COALESCE(NULLIF(EXCLUDED.token_symbol, ''), t.token_symbol),
                token_name = COALESCE(NULLIF(EXCLUDED.token_name, ''), t.token_name),
                price_usd = CASE WHEN EXCLUDED.price_usd > 0 AND EXCLUDED.slot >= t.slot
                    THEN EXCLUDED.price_usd ELSE t.price_usd END,
                price_sol = CASE WHEN EXCLUDED.price_sol > 0 AND EXCLUDED.slot >= t.slot
                    THEN EXCLUDED.price_sol ELSE t.price_sol END,
                volume_24h = CASE WHEN EXCLUDED.volume_24h > 0 AND EXCLUDED.slot >= t.slot
                    THEN EXCLUDED.volume_24h ELSE t.volume_24h END,
                market_cap = CASE WHEN EXCLUDED.market_cap > 0 AND EXCLUDED.slot >= t.slot
                    THEN EXCLUDED.market_cap ELSE t.market_cap END,
                liquidity = CASE WHEN EXCLUDED.liquidity > 0 AND EXCLUDED.slot >= t.slot
                    THEN EXCLUDED.liquidity ELSE t.liquidity END,
                price_change_24h = CASE WHEN EXCLUDED.price_change_24h <> 0 AND EXCLUDED.slot >= t.slot
                    THEN EXCLUDED.price_change_24h ELSE t.price_change_24h END,
                total_supply = CASE WHEN EXCLUDED.total_supply > 0 AND EXCLUDED.slot >= t.slot
                    THEN EXCLUDED.total_supply ELSE t.total_supply END,
                slot = GREATEST(t.slot, EXCLUDED.slot),
                transaction_id = CASE WHEN EXCLUDED.slot > t.slot
                    THEN EXCLUDED.transaction_id ELSE t.transaction_id END,
                updated_at = CASE WHEN EXCLUDED.slot > t.slot
                    THEN NOW() ELSE t.updated_at END
            "
        ))
        .bind(&update.token_address)
        .bind(&update.platform)
        .bind(&update.symbol)
        .bind(&update.name)
        .bind(positive(update.price_usd))
        .bind(positive(update.price_sol))
        .bind(positive(update.volume_24h))
        .bind(positive(update.market_cap))
        .bind(positive(update.liquidity))
        .bind(update.price_change_24h)
        .bind(positive(update.total_supply))
        .bind(slot_param(slot))
        .bind(&update.transaction_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_all(
        &self,
        db: &PgPool,
        table: &TableName,
        items: PriceItems,
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

    fn prepopulate_platforms(&self) -> Vec<String> {
        match &self.platforms {
            Some(list) => list.iter().map(|p| p.to_uppercase()).collect(),
            None => KNOWN_PLATFORMS.iter().map(|p| (*p).to_string()).collect(),
        }
    }
}

#[async_trait]
impl Indexer for TokenPriceIndexer {
    fn id(&self) -> &str {
        &self.id
    }

    fn indexer_type(&self) -> IndexerType {
        IndexerType::TokenPrice
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
                        price_usd DOUBLE PRECISION,
                        price_sol DOUBLE PRECISION,
                        volume_24h DOUBLE PRECISION,
                        market_cap DOUBLE PRECISION,
                        liquidity DOUBLE PRECISION,
                        price_change_24h DOUBLE PRECISION,
                        total_supply DOUBLE PRECISION,
                        slot BIGINT NOT NULL DEFAULT 0,
                        transaction_id TEXT,
                        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        UNIQUE (token_address, platform)
                    )
                    "
                ),
                create_index(table, "token_idx", "token_address"),
                create_index(table, "slot_idx", "slot DESC"),
            ],
        )
        .await?;

        let platforms = self.prepopulate_platforms();
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

        tracing::info!(indexer_id = %self.id, table = %table, "Token price table ready");
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
impl MetadataAware for TokenPriceIndexer {
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
