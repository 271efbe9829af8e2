//! NFT listings and what became of them.
//!
//! Rows are keyed by the signature that wrote them, but a listing is
//! identified by `(nft_mint, marketplace, seller)`: a sale or cancellation
//! flips the most recent `listed` row for that identity. When no listing
//! was observed the sale (or cancellation) is recorded as a row of its own.
//! A listing that arrives after its identity was closed is dropped.

use super::description::{self, DescribedAction};
use super::nft::{self, NftParams};
use super::shapes::{Normalized, ShapeMatcher, allowed, first_f64_strict, first_match, first_str};
use super::sql::{create_index, run_ddl, slot_param};
use crate::types::models::{IndexerType, TableName};
use crate::types::payload::{EventDetails, WebhookEvent};
use crate::types::traits::{Indexer, ProcessReport};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::fmt;

const LISTING_TYPES: [&str; 3] = ["NFT_LISTING", "NFT_SALE", "NFT_CANCEL_LISTING"];

const SELLER_PATHS: &[&str] = &["seller", "owner", "lister"];
const BUYER_PATHS: &[&str] = &["buyer", "purchaser"];
const PRICE_PATHS: &[&str] = &["price", "amount", "listingPrice"];

/// Listing row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStatus {
    Listed,
    Sold,
    Cancelled,
}

impl ListingStatus {
    fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "NFT_LISTING" => Some(Self::Listed),
            "NFT_SALE" => Some(Self::Sold),
            "NFT_CANCEL_LISTING" => Some(Self::Cancelled),
            _ => None,
        }
    }

    fn from_described(action: DescribedAction) -> Option<Self> {
        match action {
            DescribedAction::Listing => Some(Self::Listed),
            DescribedAction::Sale => Some(Self::Sold),
            DescribedAction::ListingCancelled => Some(Self::Cancelled),
            DescribedAction::Bid | DescribedAction::BidCancelled => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Listed => "listed",
            Self::Sold => "sold",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing fields as found in the event, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawListing {
    pub status: ListingStatus,
    pub mint: Option<String>,
    pub marketplace: String,
    pub seller: Option<String>,
    pub buyer: Option<String>,
    pub price: std::result::Result<Option<f64>, String>,
    pub currency: String,
}

fn raw_listing(status: ListingStatus, body: &Value, details: &EventDetails) -> RawListing {
    RawListing {
        status,
        mint: first_str(body, nft::MINT_PATHS),
        marketplace: nft::marketplace(body, details),
        seller: first_str(body, SELLER_PATHS),
        buyer: first_str(body, BUYER_PATHS),
        price: first_f64_strict(body, PRICE_PATHS).map_err(str::to_string),
        currency: nft::currency(body),
    }
}

fn match_top_level(details: &EventDetails, _: &()) -> Option<Vec<RawListing>> {
    let (event_type, body) = nft::top_level(details, &LISTING_TYPES)?;
    let status = ListingStatus::from_event_type(&event_type)?;
    Some(vec![raw_listing(status, body, details)])
}

fn match_events(details: &EventDetails, _: &()) -> Option<Vec<RawListing>> {
    let listings: Vec<RawListing> = nft::typed_entries(details, &LISTING_TYPES)
        .into_iter()
        .filter_map(|(t, body)| {
            ListingStatus::from_event_type(&t).map(|s| raw_listing(s, body, details))
        })
        .collect();
    if listings.is_empty() { None } else { Some(listings) }
}

fn match_description(details: &EventDetails, _: &()) -> Option<Vec<RawListing>> {
    let text = details.description()?;
    let status = ListingStatus::from_described(description::listing_action(text)?)?;
    let parsed = description::parse(text);

    // Sale sentences are written from the buyer's side.
    let (seller, buyer) = if status == ListingStatus::Sold {
        (parsed.counterparty, parsed.actor)
    } else {
        (parsed.actor, None)
    };
    Some(vec![RawListing {
        status,
        mint: parsed.mint,
        marketplace: parsed
            .marketplace
            .or_else(|| details.source())
            .unwrap_or_else(|| nft::UNKNOWN_MARKETPLACE.to_string()),
        seller,
        buyer,
        price: Ok(parsed.amount),
        currency: parsed
            .currency
            .unwrap_or_else(|| nft::DEFAULT_CURRENCY.to_string()),
    }])
}

static LISTING_MATCHERS: [ShapeMatcher<(), Vec<RawListing>>; 3] = [
    ShapeMatcher::new("top_level", match_top_level),
    ShapeMatcher::new("events", match_events),
    ShapeMatcher::new("description", match_description),
];

/// A validated listing transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRow {
    pub status: ListingStatus,
    pub signature: String,
    pub nft_mint: String,
    pub marketplace: String,
    pub seller: String,
    pub buyer: Option<String>,
    pub price: Option<f64>,
    pub currency: String,
}

/// NFT listing indexer.
pub struct NftPriceIndexer {
    id: String,
    params: NftParams,
}

impl NftPriceIndexer {
    /// # Errors
    ///
    /// Returns `ValidationError` for malformed params or no collections.
    pub fn from_params(id: impl Into<String>, params: &Value) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            params: NftParams::parse("nft_price", params)?,
        })
    }

    /// Listing transitions in one event.
    ///
    /// # Errors
    ///
    /// Returns `DecodingError` when the detail blob cannot be decoded.
    pub fn normalize(&self, event: &WebhookEvent) -> Result<Vec<Normalized<ListingRow>>> {
        let details = event.details()?;
        let Some((shape, listings)) = first_match(&LISTING_MATCHERS, &details, &()) else {
            return Ok(Vec::new());
        };
        tracing::debug!(indexer_id = %self.id, shape, listings = listings.len(), "Matched listing shape");

        let signature = event.signature();
        Ok(listings
            .into_iter()
            .filter(|l| allowed(self.params.marketplaces.as_deref(), &l.marketplace))
            .map(|l| validate(l, signature.as_deref()))
            .collect())
    }
}

fn validate(raw: RawListing, signature: Option<&str>) -> Normalized<ListingRow> {
    let Some(signature) = signature else {
        return Normalized::skip("unsigned", format!("{} without signature", raw.status));
    };
    let (Some(mint), Some(seller)) = (raw.mint, raw.seller) else {
        return Normalized::skip(signature, format!("{} without mint or seller", raw.status));
    };

    let price = match raw.price {
        Ok(price) => price.filter(|p| *p > 0.0),
        Err(path) => return Normalized::skip(signature, format!("non-numeric {path}")),
    };
    if price.is_none() && raw.status != ListingStatus::Cancelled {
        return Normalized::skip(signature, format!("{} without a positive price", raw.status));
    }

    Normalized::apply(
        signature,
        ListingRow {
            status: raw.status,
            signature: signature.to_string(),
            nft_mint: mint,
            marketplace: raw.marketplace,
            seller,
            buyer: raw.buyer,
            price,
            currency: raw.currency,
        },
    )
}

async fn upsert_by_signature(
    tx: &mut sqlx::PgConnection,
    table: &TableName,
    row: &ListingRow,
    slot: i64,
) -> Result<()> {
    sqlx::query(&format!(
        r"
        INSERT INTO {table} AS t (
            signature, nft_mint, marketplace, seller, buyer, price, currency,
            status, slot, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
        ON CONFLICT (signature) DO UPDATE SET
            buyer = COALESCE(EXCLUDED.buyer, t.buyer),
            price = COALESCE(EXCLUDED.price, t.price),
            currency = EXCLUDED.currency,
            status = EXCLUDED.status,
            slot = GREATEST(t.slot, EXCLUDED.slot),
            updated_at = CASE WHEN EXCLUDED.slot > t.slot THEN NOW() ELSE t.updated_at END
        WHERE EXCLUDED.slot >= t.slot
        "
    ))
    .bind(&row.signature)
    .bind(&row.nft_mint)
    .bind(&row.marketplace)
    .bind(&row.seller)
    .bind(&row.buyer)
    .bind(row.price)
    .bind(&row.currency)
    .bind(row.status.as_str())
    .bind(slot)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

/// Flips the latest `listed` row for the listing identity. Returns whether
/// a row was found.
async fn flip_listing(
    tx: &mut sqlx::PgConnection,
    table: &TableName,
    row: &ListingRow,
    slot: i64,
) -> Result<bool> {
    let result = sqlx::query(&format!(
        r"
        UPDATE {table} SET
            status = $1,
            buyer = COALESCE($2, buyer),
            price = COALESCE($3, price),
            currency = $4,
            signature = $5,
            slot = GREATEST(slot, $6),
            updated_at = NOW()
        WHERE id = (
            SELECT id FROM {table}
            WHERE nft_mint = $7 AND seller = $8 AND marketplace = $9
              AND status = 'listed' AND slot <= $6
            ORDER BY slot DESC, id DESC
            LIMIT 1
        )
        "
    ))
    .bind(row.status.as_str())
    .bind(&row.buyer)
    .bind(row.price)
    .bind(&row.currency)
    .bind(&row.signature)
    .bind(slot)
    .bind(&row.nft_mint)
    .bind(&row.seller)
    .bind(&row.marketplace)
    .execute(&mut *tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn signature_known(
    tx: &mut sqlx::PgConnection,
    table: &TableName,
    signature: &str,
) -> Result<bool> {
    let known: bool = sqlx::query_scalar(&format!(
        "SELECT EXISTS (SELECT 1 FROM {table} WHERE signature = $1)"
    ))
    .bind(signature)
    .fetch_one(&mut *tx)
    .await?;
    Ok(known)
}

/// Whether the listing identity was already sold or cancelled at or after
/// `slot`. A flipped row carries the transition's signature, so a late or
/// redelivered listing would otherwise reopen it.
async fn listing_closed(
    tx: &mut sqlx::PgConnection,
    table: &TableName,
    row: &ListingRow,
    slot: i64,
) -> Result<bool> {
    let closed: bool = sqlx::query_scalar(&format!(
        r"
        SELECT EXISTS (
            SELECT 1 FROM {table}
            WHERE nft_mint = $1 AND seller = $2 AND marketplace = $3
              AND status IN ('sold', 'cancelled') AND slot >= $4
        )
        "
    ))
    .bind(&row.nft_mint)
    .bind(&row.seller)
    .bind(&row.marketplace)
    .bind(slot)
    .fetch_one(&mut *tx)
    .await?;
    Ok(closed)
}

async fn apply(db: &PgPool, table: &TableName, row: &ListingRow, slot: u64) -> Result<()> {
    let slot = slot_param(slot);
    let mut tx = db.begin().await?;
    match row.status {
        ListingStatus::Listed => {
            if !signature_known(&mut tx, table, &row.signature).await?
                && listing_closed(&mut tx, table, row, slot).await?
            {
                tracing::debug!(
                    nft_mint = %row.nft_mint,
                    signature = %row.signature,
                    "Listing already closed, ignoring"
                );
            } else {
                upsert_by_signature(&mut tx, table, row, slot).await?;
            }
        }
        ListingStatus::Sold | ListingStatus::Cancelled => {
            // A redelivered transition already owns its signature.
            if signature_known(&mut tx, table, &row.signature).await? {
                upsert_by_signature(&mut tx, table, row, slot).await?;
            } else if !flip_listing(&mut tx, table, row, slot).await? {
                tracing::debug!(
                    nft_mint = %row.nft_mint,
                    status = %row.status,
                    "No open listing, recording transition on its own"
                );
                upsert_by_signature(&mut tx, table, row, slot).await?;
            }
        }
    }
    tx.commit().await?;
    Ok(())
}

#[async_trait]
impl Indexer for NftPriceIndexer {
    fn id(&self) -> &str {
        &self.id
    }

    fn indexer_type(&self) -> IndexerType {
        IndexerType::NftPrice
    }

    fn declared_addresses(&self) -> Vec<String> {
        self.params.collections.clone()
    }

    async fn initialize(&self, db: &PgPool, table: &TableName) -> Result<()> {
        run_ddl(
            db,
            &[
                format!(
                    r"
                    CREATE TABLE IF NOT EXISTS {table} (
                        id BIGSERIAL PRIMARY KEY,
                        signature TEXT NOT NULL UNIQUE,
                        nft_mint TEXT NOT NULL,
                        marketplace TEXT NOT NULL DEFAULT 'UNKNOWN',
                        seller TEXT NOT NULL,
                        buyer TEXT,
                        price DOUBLE PRECISION,
                        currency TEXT NOT NULL DEFAULT 'SOL',
                        status TEXT NOT NULL DEFAULT 'listed',
                        slot BIGINT NOT NULL DEFAULT 0,
                        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    )
                    "
                ),
                create_index(table, "listing_idx", "nft_mint, seller, marketplace, status"),
                create_index(table, "status_idx", "status"),
            ],
        )
        .await
    }

    async fn process(
        &self,
        db: &PgPool,
        table: &TableName,
        event: &WebhookEvent,
    ) -> Result<ProcessReport> {
        let mut report = ProcessReport::new();
        for entry in self.normalize(event)? {
            match entry {
                Normalized::Apply { key, item } => {
                    report.record(key, apply(db, table, &item, event.slot).await);
                }
                Normalized::Skip { key, reason } => report.skipped(key, reason),
            }
        }
        Ok(report)
    }
}
