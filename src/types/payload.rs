//! Inbound webhook envelope and helpers over the free-form detail blob.
//!
//! Deliveries carry a monotonic `slot` and a transaction object whose
//! `enhancedDetails` field is itself JSON-encoded. The blob follows the
//! Helius enhanced-transaction layout loosely, so accessors here never fail:
//! they return `None` or empty slices when a field is absent or mistyped.

use crate::utils::error::{Result, WebhookIndexerError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One inbound delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Monotonic recency marker used by every upsert.
    pub slot: u64,
    pub transaction: EventTransaction,
}

/// Transaction object nested in the envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTransaction {
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub signatures: Vec<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// JSON-encoded detail blob (a string), or an already-decoded object.
    #[serde(default)]
    pub enhanced_details: Option<Value>,
    /// Any other fields the sender included.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request body: a single envelope or a batch of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundBody {
    Single(WebhookEvent),
    Batch(Vec<WebhookEvent>),
}

impl InboundBody {
    #[must_use]
    pub fn into_events(self) -> Vec<WebhookEvent> {
        match self {
            Self::Single(event) => vec![event],
            Self::Batch(events) => events,
        }
    }
}

impl WebhookEvent {
    /// Decodes the nested detail blob.
    ///
    /// # Errors
    ///
    /// Returns `DecodingError` when `enhancedDetails` is a string that is not
    /// valid JSON, or when neither details nor any other transaction fields
    /// are present.
    pub fn details(&self) -> Result<EventDetails> {
        let value = match &self.transaction.enhanced_details {
            Some(Value::String(raw)) => serde_json::from_str::<Value>(raw).map_err(|e| {
                WebhookIndexerError::DecodingError(format!("enhancedDetails is not valid JSON: {e}"))
            })?,
            Some(Value::Null) | None => {
                if self.transaction.extra.is_empty() {
                    return Err(WebhookIndexerError::DecodingError(
                        "transaction carries no enhancedDetails".into(),
                    ));
                }
                Value::Object(self.transaction.extra.clone())
            }
            Some(other) => other.clone(),
        };

        if !value.is_object() {
            return Err(WebhookIndexerError::DecodingError(
                "enhancedDetails must decode to a JSON object".into(),
            ));
        }
        Ok(EventDetails(value))
    }

    /// The transaction signature, from the envelope or the detail blob.
    #[must_use]
    pub fn signature(&self) -> Option<String> {
        if let Some(sig) = self.transaction.signature.as_ref().filter(|s| !s.is_empty()) {
            return Some(sig.clone());
        }
        if let Some(sig) = self.transaction.signatures.iter().find(|s| !s.is_empty()) {
            return Some(sig.clone());
        }
        self.details().ok().and_then(|d| d.signature())
    }

    /// All signatures known for this delivery, for log entries.
    #[must_use]
    pub fn all_signatures(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        if let Some(sig) = self.signature() {
            out.push(sig);
        }
        for sig in &self.transaction.signatures {
            if !sig.is_empty() && !out.contains(sig) {
                out.push(sig.clone());
            }
        }
        out
    }

    /// Returns `true` if any string in the delivery equals one of `addresses`
    /// (case-insensitive).
    #[must_use]
    pub fn mentions_any(&self, addresses: &[String]) -> bool {
        if addresses.is_empty() {
            return false;
        }
        let wanted: Vec<String> = addresses.iter().map(|a| a.to_lowercase()).collect();
        let details = match self.details() {
            Ok(d) => d.0,
            Err(_) => return false,
        };
        value_mentions(&details, &wanted)
    }
}

fn value_mentions(value: &Value, wanted: &[String]) -> bool {
    match value {
        Value::String(s) => {
            let lower = s.to_lowercase();
            wanted.iter().any(|w| *w == lower)
        }
        Value::Array(items) => items.iter().any(|v| value_mentions(v, wanted)),
        Value::Object(map) => map.values().any(|v| value_mentions(v, wanted)),
        _ => false,
    }
}

/// Decoded detail blob.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDetails(pub Value);

impl EventDetails {
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Top-level `type`, upper-cased.
    #[must_use]
    pub fn event_type(&self) -> Option<String> {
        self.0
            .get("type")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
    }

    /// Top-level `source` (the platform / marketplace that emitted the event).
    #[must_use]
    pub fn source(&self) -> Option<String> {
        self.0
            .get("source")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.0
            .get("description")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    #[must_use]
    pub fn signature(&self) -> Option<String> {
        self.0
            .get("signature")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Event timestamp in unix seconds, if present.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        self.0.get("timestamp").and_then(Value::as_i64)
    }

    /// Typed sub-events.
    ///
    /// Accepts both an `events` array of objects carrying their own `type`,
    /// and the keyed form (`{"nft": {...}, "swap": {...}}`) where the key
    /// stands in for a missing type.
    #[must_use]
    pub fn event_entries(&self) -> Vec<EventEntry<'_>> {
        match self.0.get("events") {
            Some(Value::Array(items)) => items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| EventEntry {
                    event_type: entry_type(item, None),
                    body: item,
                })
                .collect(),
            Some(Value::Object(map)) => map
                .iter()
                .filter(|(_, item)| item.is_object())
                .map(|(key, item)| EventEntry {
                    event_type: entry_type(item, Some(key)),
                    body: item,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn token_transfers(&self) -> &[Value] {
        array_field(&self.0, "tokenTransfers")
    }

    #[must_use]
    pub fn token_balances(&self) -> &[Value] {
        array_field(&self.0, "tokenBalances")
    }
}

fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn entry_type(item: &Value, key: Option<&str>) -> Option<String> {
    item.get("type")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .or_else(|| key.map(str::to_ascii_uppercase))
}

/// One entry of the `events` collection.
#[derive(Debug, Clone)]
pub struct EventEntry<'a> {
    /// Upper-cased entry type (`NFT_BID`, `BORROW`, `SWAP`, ...).
    pub event_type: Option<String>,
    pub body: &'a Value,
}

impl EventEntry<'_> {
    #[must_use]
    pub fn is_type(&self, candidates: &[&str]) -> bool {
        self.event_type
            .as_deref()
            .is_some_and(|t| candidates.contains(&t))
    }
}
