//! Token display-metadata lookup.
//!
//! Token indexers backfill `token_name` / `token_symbol` from an external
//! asset API. [`TokenMetadataFetcher`] fronts a [`MetadataSource`] with a
//! process-wide cache keyed by the lower-cased address, so the remote API is
//! consulted at most once per address per freshness window.

use crate::config::MetadataConfig;
use crate::utils::error::{Result, WebhookIndexerError};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Display metadata of one token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

impl TokenMetadata {
    /// `true` when neither name nor symbol is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.symbol.is_none()
    }
}

/// Remote lookup of token metadata.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_metadata(&self, address: &str) -> Result<TokenMetadata>;
}

/// DAS `getAsset` over JSON-RPC.
pub struct HeliusAssetSource {
    client: Client,
    endpoint: String,
}

impl HeliusAssetSource {
    /// # Errors
    ///
    /// Returns `HttpError` if the HTTP client cannot be constructed.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MetadataSource for HeliusAssetSource {
    async fn fetch_metadata(&self, address: &str) -> Result<TokenMetadata> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "metadata",
            "method": "getAsset",
            "params": { "id": address }
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookIndexerError::UpstreamError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let payload: Value = response.json().await?;
        if let Some(err) = payload.get("error") {
            return Err(WebhookIndexerError::UpstreamError {
                status: status.as_u16(),
                message: err.to_string(),
            });
        }
        let result = payload.get("result").ok_or_else(|| {
            WebhookIndexerError::NotFound(format!("asset {address}"))
        })?;

        Ok(parse_asset(result))
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Pulls name/symbol/decimals out of a `getAsset` result.
fn parse_asset(result: &Value) -> TokenMetadata {
    let metadata = result.pointer("/content/metadata");
    let token_info = result.get("token_info");

    TokenMetadata {
        name: non_empty_str(metadata.and_then(|m| m.get("name"))),
        symbol: non_empty_str(metadata.and_then(|m| m.get("symbol")))
            .or_else(|| non_empty_str(token_info.and_then(|t| t.get("symbol")))),
        decimals: token_info
            .and_then(|t| t.get("decimals"))
            .and_then(Value::as_u64)
            .and_then(|d| u8::try_from(d).ok()),
    }
}

#[derive(Debug, Clone)]
struct CachedMetadata {
    metadata: TokenMetadata,
    fetched_at: Instant,
}

/// Cached metadata lookup shared by every token indexer.
pub struct TokenMetadataFetcher {
    source: Arc<dyn MetadataSource>,
    cache: DashMap<String, CachedMetadata>,
    ttl: Duration,
    max_concurrency: usize,
}

impl TokenMetadataFetcher {
    #[must_use]
    pub fn new(source: Arc<dyn MetadataSource>, ttl: Duration, max_concurrency: usize) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            ttl,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Builds a fetcher from config, or `None` when no API key is set.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` if the HTTP client cannot be constructed.
    pub fn from_config(
        config: &MetadataConfig,
        network: crate::config::HeliusNetwork,
    ) -> Result<Option<Self>> {
        let Some(endpoint) = config.resolved_endpoint(network) else {
            return Ok(None);
        };
        let source = HeliusAssetSource::new(
            endpoint,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Some(Self::new(
            Arc::new(source),
            config.cache_ttl(),
            config.max_concurrency,
        )))
    }

    /// Fresh cached entry for `address`, if any.
    #[must_use]
    pub fn cached(&self, address: &str) -> Option<TokenMetadata> {
        let key = address.to_lowercase();
        let entry = self.cache.get(&key)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.metadata.clone())
        } else {
            None
        }
    }

    /// Looks up one address, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Propagates the source's error; failures are not cached.
    pub async fn fetch(&self, address: &str) -> Result<TokenMetadata> {
        if let Some(hit) = self.cached(address) {
            return Ok(hit);
        }
        let metadata = self.source.fetch_metadata(address).await?;
        self.cache.insert(
            address.to_lowercase(),
            CachedMetadata {
                metadata: metadata.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(metadata)
    }

    /// Looks up many addresses. The result is keyed by lower-cased address
    /// and omits addresses whose lookup failed.
    pub async fn fetch_many(&self, addresses: &[String]) -> HashMap<String, TokenMetadata> {
        let mut found = HashMap::new();
        let mut pending: Vec<String> = Vec::new();

        for address in addresses {
            let key = address.to_lowercase();
            if found.contains_key(&key) || pending.iter().any(|p| p.to_lowercase() == key) {
                continue;
            }
            match self.cached(address) {
                Some(hit) => {
                    found.insert(key, hit);
                }
                None => pending.push(address.clone()),
            }
        }

        let fetched: Vec<(String, Result<TokenMetadata>)> = stream::iter(pending)
            .map(|address| async move {
                let result = self.fetch(&address).await;
                (address, result)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for (address, result) in fetched {
            match result {
                Ok(metadata) => {
                    found.insert(address.to_lowercase(), metadata);
                }
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "Token metadata lookup failed");
                }
            }
        }

        found
    }

    /// Number of cached entries, stale ones included.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataSource for CountingSource {
        async fn fetch_metadata(&self, address: &str) -> Result<TokenMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if address.starts_with("bad") {
                return Err(WebhookIndexerError::UpstreamError {
                    status: 500,
                    message: "nope".into(),
                });
            }
            Ok(TokenMetadata {
                name: Some(format!("Name {address}")),
                symbol: Some(address.to_uppercase()),
                decimals: Some(6),
            })
        }
    }

    fn fetcher(ttl: Duration) -> (Arc<CountingSource>, TokenMetadataFetcher) {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let fetcher = TokenMetadataFetcher::new(source.clone(), ttl, 4);
        (source, fetcher)
    }

    #[tokio::test]
    async fn test_fetch_caches_case_insensitively() {
        let (source, fetcher) = fetcher(Duration::from_secs(60));
        fetcher.fetch("MintA").await.unwrap();
        let again = fetcher.fetch("minta").await.unwrap();
        assert_eq!(again.symbol.as_deref(), Some("MINTA"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_entries_are_refetched() {
        let (source, fetcher) = fetcher(Duration::ZERO);
        fetcher.fetch("mint").await.unwrap();
        fetcher.fetch("mint").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_many_omits_failures() {
        let (source, fetcher) = fetcher(Duration::from_secs(60));
        fetcher.fetch("cached").await.unwrap();

        let addresses: Vec<String> = ["cached", "a", "bad1", "A", "b"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let result = fetcher.fetch_many(&addresses).await;

        assert_eq!(result.len(), 3);
        assert!(result.contains_key("cached"));
        assert!(result.contains_key("a"));
        assert!(!result.contains_key("bad1"));
        // cached + a + bad1 + b; "A" duplicates "a"
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(fetcher.cache_len(), 3);
    }

    #[test]
    fn test_parse_asset_shapes() {
        let parsed = parse_asset(&json!({
            "content": {"metadata": {"name": "Wrapped SOL", "symbol": ""}},
            "token_info": {"symbol": "SOL", "decimals": 9}
        }));
        assert_eq!(parsed.name.as_deref(), Some("Wrapped SOL"));
        assert_eq!(parsed.symbol.as_deref(), Some("SOL"));
        assert_eq!(parsed.decimals, Some(9));
        assert!(parse_asset(&json!({})).is_empty());
    }
}
