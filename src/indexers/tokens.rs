//! Pieces shared by the two token indexers: the configured token set and
//! display-metadata backfill.

use super::shapes::Normalized;
use crate::core::metadata::{TokenMetadata, TokenMetadataFetcher};
use crate::types::models::TableName;
use crate::utils::error::{Result, WebhookIndexerError};
use sqlx::{PgPool, Row};
use std::collections::HashMap;

/// Configured token addresses, matched case-insensitively.
///
/// Rows are always written under the configured spelling so pre-populated
/// rows and event rows share a key.
#[derive(Debug, Clone, Default)]
pub struct TokenSet {
    ordered: Vec<String>,
    by_lower: HashMap<String, usize>,
}

impl TokenSet {
    /// # Errors
    ///
    /// Returns `ValidationError` when no non-blank address is given.
    pub fn new(tokens: &[String]) -> Result<Self> {
        let mut set = Self::default();
        for token in tokens.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            let lower = token.to_lowercase();
            if !set.by_lower.contains_key(&lower) {
                set.by_lower.insert(lower, set.ordered.len());
                set.ordered.push(token.to_string());
            }
        }
        if set.ordered.is_empty() {
            return Err(WebhookIndexerError::ValidationError(
                "At least one token address is required".into(),
            ));
        }
        Ok(set)
    }

    /// Configured spelling of `address`, if it is tracked.
    #[must_use]
    pub fn canonical(&self, address: &str) -> Option<&str> {
        self.by_lower
            .get(&address.to_lowercase())
            .map(|&i| self.ordered[i].as_str())
    }

    #[must_use]
    pub fn addresses(&self) -> &[String] {
        &self.ordered
    }
}

/// A normalized token row that can carry display metadata.
pub trait TokenFields {
    fn token_address(&self) -> &str;
    fn needs_metadata(&self) -> bool;
    fn apply_metadata(&mut self, metadata: &TokenMetadata);
}

/// Fills name/symbol on items lacking them, one lookup per distinct token.
pub async fn fill_missing_metadata<T: TokenFields>(
    items: &mut [Normalized<T>],
    fetcher: &TokenMetadataFetcher,
) {
    let mut wanted: Vec<String> = Vec::new();
    for item in items.iter() {
        if let Normalized::Apply { item, .. } = item
            && item.needs_metadata()
            && !wanted.iter().any(|w| w.eq_ignore_ascii_case(item.token_address()))
        {
            wanted.push(item.token_address().to_string());
        }
    }
    if wanted.is_empty() {
        return;
    }

    let found = fetcher.fetch_many(&wanted).await;
    for item in items.iter_mut() {
        if let Normalized::Apply { item, .. } = item
            && let Some(metadata) = found.get(&item.token_address().to_lowercase())
        {
            item.apply_metadata(metadata);
        }
    }
}

/// Backfills `token_name` / `token_symbol` for rows missing either and
/// returns the number of rows updated.
pub async fn enrich_table(
    db: &PgPool,
    table: &TableName,
    fetcher: &TokenMetadataFetcher,
) -> Result<usize> {
    let rows = sqlx::query(&format!(
        "SELECT DISTINCT token_address FROM {table} WHERE token_name IS NULL OR token_symbol IS NULL"
    ))
    .fetch_all(db)
    .await?;

    let addresses: Vec<String> = rows
        .iter()
        .map(|r| r.try_get::<String, _>("token_address"))
        .collect::<std::result::Result<_, _>>()?;
    if addresses.is_empty() {
        return Ok(0);
    }

    let found = fetcher.fetch_many(&addresses).await;
    let mut updated = 0usize;
    for address in &addresses {
        let Some(metadata) = found.get(&address.to_lowercase()) else {
            continue;
        };
        if metadata.is_empty() {
            continue;
        }
        let result = sqlx::query(&format!(
            r"
            UPDATE {table}
            SET token_name = COALESCE(token_name, $2),
                token_symbol = COALESCE(token_symbol, $3)
            WHERE token_address = $1 AND (token_name IS NULL OR token_symbol IS NULL)
            "
        ))
        .bind(address)
        .bind(&metadata.name)
        .bind(&metadata.symbol)
        .execute(db)
        .await?;
        updated += usize::try_from(result.rows_affected()).unwrap_or(usize::MAX);
    }

    tracing::info!(table = %table, updated, "Backfilled token metadata");
    Ok(updated)
}
