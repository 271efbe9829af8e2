//! Pieces shared by the NFT bid and listing indexers.

use super::shapes::{first_f64, first_str};
use crate::types::payload::EventDetails;
use crate::utils::error::{Result, WebhookIndexerError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

pub const UNKNOWN_MARKETPLACE: &str = "UNKNOWN";
pub const DEFAULT_CURRENCY: &str = "SOL";

pub const MINT_PATHS: &[&str] = &["nftMint", "mint", "nfts.0.mint", "nft.mint", "tokenMint"];
pub const MARKETPLACE_PATHS: &[&str] = &["marketplace", "source"];
pub const CURRENCY_PATHS: &[&str] = &["currency", "currencySymbol", "paymentToken"];
pub const USD_PATHS: &[&str] = &["usdValue", "amountUsd", "priceUsd", "price_usd"];

/// Parameters accepted by both NFT indexers.
#[derive(Debug, Clone, Deserialize)]
pub struct NftParams {
    #[serde(
        alias = "collection_addresses",
        alias = "collectionAddresses",
        alias = "addresses"
    )]
    pub collections: Vec<String>,
    /// Optional case-insensitive marketplace allow-list.
    #[serde(default)]
    pub marketplaces: Option<Vec<String>>,
}

impl NftParams {
    /// # Errors
    ///
    /// Returns `ValidationError` for malformed params or when no collection
    /// address is given.
    pub fn parse(kind: &str, params: &Value) -> Result<Self> {
        let mut parsed: NftParams = serde_json::from_value(params.clone()).map_err(|e| {
            WebhookIndexerError::ValidationError(format!("Invalid {kind} params: {e}"))
        })?;
        let mut seen = HashSet::new();
        parsed.collections = parsed
            .collections
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect();
        if parsed.collections.is_empty() {
            return Err(WebhookIndexerError::ValidationError(format!(
                "{kind} indexer requires at least one collection address"
            )));
        }
        parsed.marketplaces = parsed.marketplaces.filter(|m| !m.is_empty());
        Ok(parsed)
    }
}

/// Body of a typed event whose type appears at the top level: the `events`
/// entry of that type (or the keyed `nft` entry) when there is one,
/// otherwise the whole blob.
pub fn top_level<'a>(details: &'a EventDetails, types: &[&str]) -> Option<(String, &'a Value)> {
    let event_type = details.event_type()?;
    if !types.contains(&event_type.as_str()) {
        return None;
    }
    let entries = details.event_entries();
    let body = entries
        .iter()
        .find(|e| e.is_type(&[event_type.as_str()]))
        .or_else(|| entries.iter().find(|e| e.is_type(&["NFT"])))
        .map_or(details.raw(), |e| e.body);
    Some((event_type, body))
}

/// Typed entries of the `events` collection.
pub fn typed_entries<'a>(details: &'a EventDetails, types: &[&str]) -> Vec<(String, &'a Value)> {
    details
        .event_entries()
        .into_iter()
        .filter_map(|e| {
            let t = e.event_type?;
            types.contains(&t.as_str()).then_some((t, e.body))
        })
        .collect()
}

/// Marketplace of an entry, falling back to the event source, then `UNKNOWN`.
pub fn marketplace(body: &Value, details: &EventDetails) -> String {
    first_str(body, MARKETPLACE_PATHS)
        .or_else(|| details.source())
        .unwrap_or_else(|| UNKNOWN_MARKETPLACE.to_string())
}

pub fn currency(body: &Value) -> String {
    first_str(body, CURRENCY_PATHS)
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
}

pub fn usd_value(body: &Value) -> Option<f64> {
    first_f64(body, USD_PATHS)
}

/// RFC3339 timestamp; anything else is treated as absent.
pub fn rfc3339(body: &Value, paths: &[&str]) -> Option<DateTime<Utc>> {
    let raw = first_str(body, paths)?;
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!(value = %raw, error = %e, "Ignoring malformed timestamp");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_aliases_and_validation() {
        let p = NftParams::parse("nft_bid", &json!({"collectionAddresses": ["C1", " "]})).unwrap();
        assert_eq!(p.collections, vec!["C1"]);
        assert!(p.marketplaces.is_none());
        assert!(NftParams::parse("nft_bid", &json!({"collections": []})).is_err());
        assert!(NftParams::parse("nft_bid", &json!({"collections": "C1"})).is_err());
    }

    #[test]
    fn test_params_drop_non_adjacent_duplicates() {
        let p = NftParams::parse("nft_price", &json!({"collections": ["C1", "C2", " C1", "C2"]}))
            .unwrap();
        assert_eq!(p.collections, vec!["C1", "C2"]);
    }

    #[test]
    fn test_top_level_prefers_typed_entry() {
        let details = EventDetails(json!({
            "type": "NFT_BID",
            "events": {"nft": {"type": "NFT_BID", "amount": 5}}
        }));
        let (t, body) = top_level(&details, &["NFT_BID"]).unwrap();
        assert_eq!(t, "NFT_BID");
        assert_eq!(body["amount"], 5);
        assert!(top_level(&details, &["NFT_SALE"]).is_none());
    }

    #[test]
    fn test_marketplace_fallbacks() {
        let details = EventDetails(json!({"source": "TENSOR"}));
        assert_eq!(marketplace(&json!({"marketplace": "ME"}), &details), "ME");
        assert_eq!(marketplace(&json!({}), &details), "TENSOR");
        assert_eq!(marketplace(&json!({}), &EventDetails(json!({}))), "UNKNOWN");
    }

    #[test]
    fn test_rfc3339_ignores_garbage() {
        let v = json!({"expiry": "2026-01-02T03:04:05Z", "bad": "tomorrow"});
        assert!(rfc3339(&v, &["expiry"]).is_some());
        assert!(rfc3339(&v, &["bad"]).is_none());
        assert_eq!(currency(&json!({"currency": "usdc"})), "USDC");
        assert_eq!(currency(&json!({})), "SOL");
    }
}
