//! Open bids on NFTs, one row per bid transaction.

use super::description::{self, DescribedAction};
use super::nft::{self, NftParams};
use super::shapes::{Normalized, ShapeMatcher, allowed, first_f64_strict, first_match, first_str};
use super::sql::{create_index, run_ddl, slot_param};
use crate::types::models::{IndexerType, TableName};
use crate::types::payload::{EventDetails, WebhookEvent};
use crate::types::traits::{Indexer, ProcessReport};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

const BID_TYPES: [&str; 2] = ["NFT_BID", "NFT_BID_CANCELLED"];

const AUCTION_HOUSE_PATHS: &[&str] = &["auctionHouse", "auction_house"];
const BIDDER_PATHS: &[&str] = &["bidder", "buyer", "wallet"];
const AMOUNT_PATHS: &[&str] = &["amount", "bidAmount", "price"];
const EXPIRY_PATHS: &[&str] = &["expiry", "expiresAt", "expiration"];

/// Bid fields as found in the event, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBid {
    pub cancelled: bool,
    pub mint: Option<String>,
    pub auction_house: Option<String>,
    pub marketplace: String,
    pub bidder: Option<String>,
    /// `Err` carries the field name when a value was present but not numeric.
    pub amount: std::result::Result<Option<f64>, String>,
    pub currency: String,
    pub usd_value: Option<f64>,
    pub expiry: Option<DateTime<Utc>>,
}

fn raw_bid(event_type: &str, body: &Value, details: &EventDetails) -> RawBid {
    RawBid {
        cancelled: event_type == "NFT_BID_CANCELLED",
        mint: first_str(body, nft::MINT_PATHS),
        auction_house: first_str(body, AUCTION_HOUSE_PATHS),
        marketplace: nft::marketplace(body, details),
        bidder: first_str(body, BIDDER_PATHS),
        amount: first_f64_strict(body, AMOUNT_PATHS).map_err(str::to_string),
        currency: nft::currency(body),
        usd_value: nft::usd_value(body),
        expiry: nft::rfc3339(body, EXPIRY_PATHS),
    }
}

fn match_top_level(details: &EventDetails, _: &()) -> Option<Vec<RawBid>> {
    let (event_type, body) = nft::top_level(details, &BID_TYPES)?;
    Some(vec![raw_bid(&event_type, body, details)])
}

fn match_events(details: &EventDetails, _: &()) -> Option<Vec<RawBid>> {
    let bids: Vec<RawBid> = nft::typed_entries(details, &BID_TYPES)
        .into_iter()
        .map(|(t, body)| raw_bid(&t, body, details))
        .collect();
    if bids.is_empty() { None } else { Some(bids) }
}

fn match_description(details: &EventDetails, _: &()) -> Option<Vec<RawBid>> {
    let text = details.description()?;
    let action = description::bid_action(text)?;
    let parsed = description::parse(text);
    Some(vec![RawBid {
        cancelled: action == DescribedAction::BidCancelled,
        mint: parsed.mint,
        auction_house: None,
        marketplace: parsed
            .marketplace
            .or_else(|| details.source())
            .unwrap_or_else(|| nft::UNKNOWN_MARKETPLACE.to_string()),
        bidder: parsed.actor,
        amount: Ok(parsed.amount),
        currency: parsed
            .currency
            .unwrap_or_else(|| nft::DEFAULT_CURRENCY.to_string()),
        usd_value: None,
        expiry: None,
    }])
}

static BID_MATCHERS: [ShapeMatcher<(), Vec<RawBid>>; 3] = [
    ShapeMatcher::new("top_level", match_top_level),
    ShapeMatcher::new("events", match_events),
    ShapeMatcher::new("description", match_description),
];

/// A validated bid row.
#[derive(Debug, Clone, PartialEq)]
pub struct BidRow {
    pub signature: String,
    pub nft_mint: String,
    pub auction_house: Option<String>,
    pub marketplace: String,
    pub bidder: String,
    pub amount: f64,
    pub currency: String,
    pub usd_value: Option<f64>,
    pub expiry: Option<DateTime<Utc>>,
}

/// Statement derived from one bid event.
#[derive(Debug, Clone, PartialEq)]
pub enum BidWrite {
    Place(BidRow),
    Cancel {
        nft_mint: String,
        bidder: String,
        auction_house: Option<String>,
    },
}

/// NFT bid indexer.
pub struct NftBidIndexer {
    id: String,
    params: NftParams,
}

impl NftBidIndexer {
    /// # Errors
    ///
    /// Returns `ValidationError` for malformed params or no collections.
    pub fn from_params(id: impl Into<String>, params: &Value) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            params: NftParams::parse("nft_bid", params)?,
        })
    }

    /// Bid statements in one event.
    ///
    /// # Errors
    ///
    /// Returns `DecodingError` when the detail blob cannot be decoded.
    pub fn normalize(&self, event: &WebhookEvent) -> Result<Vec<Normalized<BidWrite>>> {
        let details = event.details()?;
        let Some((shape, bids)) = first_match(&BID_MATCHERS, &details, &()) else {
            return Ok(Vec::new());
        };
        tracing::debug!(indexer_id = %self.id, shape, bids = bids.len(), "Matched bid shape");

        let signature = event.signature();
        Ok(bids
            .into_iter()
            .filter(|bid| allowed(self.params.marketplaces.as_deref(), &bid.marketplace))
            .map(|bid| validate(bid, signature.as_deref()))
            .collect())
    }
}

fn validate(bid: RawBid, signature: Option<&str>) -> Normalized<BidWrite> {
    let key = signature.unwrap_or("unsigned").to_string();
    let (Some(mint), Some(bidder)) = (bid.mint, bid.bidder) else {
        return Normalized::skip(key, "bid without mint or bidder");
    };

    if bid.cancelled {
        return Normalized::apply(
            format!("{mint}:{bidder}"),
            BidWrite::Cancel {
                nft_mint: mint,
                bidder,
                auction_house: bid.auction_house,
            },
        );
    }

    let Some(signature) = signature else {
        return Normalized::skip(key, "bid without signature");
    };
    let amount = match bid.amount {
        Ok(Some(amount)) if amount > 0.0 => amount,
        Ok(Some(_)) => return Normalized::skip(key, "non-positive bid amount"),
        Ok(None) => return Normalized::skip(key, "bid without amount"),
        Err(path) => return Normalized::skip(key, format!("non-numeric {path}")),
    };

    Normalized::apply(
        key,
        BidWrite::Place(BidRow {
            signature: signature.to_string(),
            nft_mint: mint,
            auction_house: bid.auction_house,
            marketplace: bid.marketplace,
            bidder,
            amount,
            currency: bid.currency,
            usd_value: bid.usd_value,
            expiry: bid.expiry,
        }),
    )
}

async fn apply(db: &PgPool, table: &TableName, write: &BidWrite, slot: u64) -> Result<()> {
    let mut tx = db.begin().await?;
    match write {
        BidWrite::Place(row) => {
            sqlx::query(&format!(
                r"
                INSERT INTO {table} AS t (
                    signature, nft_mint, auction_house, marketplace, bidder,
                    amount, currency, usd_value, expiry, slot, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
                ON CONFLICT (signature) DO UPDATE SET
                    nft_mint = EXCLUDED.nft_mint,
                    auction_house = EXCLUDED.auction_house,
                    marketplace = EXCLUDED.marketplace,
                    bidder = EXCLUDED.bidder,
                    amount = EXCLUDED.amount,
                    currency = EXCLUDED.currency,
                    usd_value = EXCLUDED.usd_value,
                    expiry = EXCLUDED.expiry,
                    slot = EXCLUDED.slot,
                    updated_at = CASE WHEN EXCLUDED.slot > t.slot THEN NOW() ELSE t.updated_at END
                WHERE EXCLUDED.slot >= t.slot
                "
            ))
            .bind(&row.signature)
            .bind(&row.nft_mint)
            .bind(&row.auction_house)
            .bind(&row.marketplace)
            .bind(&row.bidder)
            .bind(row.amount)
            .bind(&row.currency)
            .bind(row.usd_value)
            .bind(row.expiry)
            .bind(slot_param(slot))
            .execute(&mut *tx)
            .await?;
        }
        BidWrite::Cancel {
            nft_mint,
            bidder,
            auction_house,
        } => {
            // Only bids placed at or before the cancellation are removed.
            let result = sqlx::query(&format!(
                r"
                DELETE FROM {table}
                WHERE nft_mint = $1 AND bidder = $2
                  AND ($3::TEXT IS NULL OR auction_house = $3)
                  AND slot <= $4
                "
            ))
            .bind(nft_mint)
            .bind(bidder)
            .bind(auction_house)
            .bind(slot_param(slot))
            .execute(&mut *tx)
            .await?;
            tracing::debug!(nft_mint = %nft_mint, bidder = %bidder, removed = result.rows_affected(), "Bid cancelled");
        }
    }
    tx.commit().await?;
    Ok(())
}

#[async_trait]
impl Indexer for NftBidIndexer {
    fn id(&self) -> &str {
        &self.id
    }

    fn indexer_type(&self) -> IndexerType {
        IndexerType::NftBid
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
                        auction_house TEXT,
                        marketplace TEXT NOT NULL DEFAULT 'UNKNOWN',
                        bidder TEXT NOT NULL,
                        amount DOUBLE PRECISION NOT NULL,
                        currency TEXT NOT NULL DEFAULT 'SOL',
                        usd_value DOUBLE PRECISION,
                        expiry TIMESTAMPTZ,
                        slot BIGINT NOT NULL DEFAULT 0,
                        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    )
                    "
                ),
                create_index(table, "mint_idx", "nft_mint"),
                create_index(table, "bidder_idx", "bidder"),
                create_index(table, "mint_bidder_idx", "nft_mint, bidder"),
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
