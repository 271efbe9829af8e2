//! Tenant metadata records: indexers, credentials and log entries.

use crate::utils::error::{Result, WebhookIndexerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest identifier Postgres keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Postgres keywords that cannot name a table without quoting.
const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "natural", "not", "notnull", "null", "offset", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "returning", "right",
    "select", "session_user", "similar", "some", "symmetric", "system_user", "table",
    "tablesample", "then", "to", "trailing", "true", "union", "unique", "user", "using",
    "variadic", "verbose", "when", "where", "window", "with",
];

fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(name))
}

/// Normalization strategy of an indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerType {
    /// Open bids on NFTs, one row per bid transaction.
    NftBid,
    /// NFT listings and their sale / cancellation.
    NftPrice,
    /// Lending market rates per token and platform.
    TokenBorrow,
    /// Token prices per token and platform.
    TokenPrice,
}

impl IndexerType {
    /// All variants, in declaration order.
    pub const ALL: [IndexerType; 4] = [
        IndexerType::NftBid,
        IndexerType::NftPrice,
        IndexerType::TokenBorrow,
        IndexerType::TokenPrice,
    ];

    /// Stored type tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NftBid => "nft_bid",
            Self::NftPrice => "nft_price",
            Self::TokenBorrow => "token_borrow",
            Self::TokenPrice => "token_price",
        }
    }
}

impl fmt::Display for IndexerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexerType {
    type Err = WebhookIndexerError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "nft_bid" | "nft_bids" => Ok(Self::NftBid),
            "nft_price" | "nft_prices" => Ok(Self::NftPrice),
            "token_borrow" | "token_borrows" => Ok(Self::TokenBorrow),
            "token_price" | "token_prices" => Ok(Self::TokenPrice),
            _ => Err(WebhookIndexerError::ValidationError(format!(
                "Unknown indexer type: {s}"
            ))),
        }
    }
}

/// Indexer lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexerStatus {
    /// Created, table and subscription not yet provisioned.
    #[default]
    Pending,
    /// Accepting events.
    Active,
    /// Suspended on request; events are rejected.
    Paused,
    /// Provisioning failed; see the record's error message.
    Failed,
    /// Reserved; no variant currently finishes.
    Completed,
}

impl IndexerStatus {
    /// Stored status tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    /// Only active indexers accept inbound events.
    #[must_use]
    pub fn accepts_events(self) -> bool {
        self == Self::Active
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `pending → {active, failed}`, `active ↔ paused`.
    #[must_use]
    pub fn can_transition_to(self, next: IndexerStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Pending, Self::Failed)
                | (Self::Active, Self::Paused)
                | (Self::Paused, Self::Active)
        )
    }
}

impl fmt::Display for IndexerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexerStatus {
    type Err = WebhookIndexerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            other => Err(WebhookIndexerError::DecodingError(format!(
                "Unknown indexer status: {other}"
            ))),
        }
    }
}

/// A validated target table name.
///
/// Only `[A-Za-z0-9_]` is allowed, the first character is not a digit and
/// reserved words are refused, so the name can be interpolated into DDL/DML
/// without quoting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Strictly validates `raw`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if `raw` is empty, too long, starts with a
    /// digit or contains characters outside the allowed alphabet.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(WebhookIndexerError::ValidationError(
                "Table name must not be empty".into(),
            ));
        }
        if raw.len() > MAX_IDENTIFIER_LEN {
            return Err(WebhookIndexerError::ValidationError(format!(
                "Table name longer than {MAX_IDENTIFIER_LEN} characters: {raw}"
            )));
        }
        if raw.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(WebhookIndexerError::ValidationError(format!(
                "Table name must not start with a digit: {raw}"
            )));
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(WebhookIndexerError::ValidationError(format!(
                "Table name may only contain letters, digits and underscores: {raw}"
            )));
        }
        if is_reserved(raw) {
            return Err(WebhookIndexerError::ValidationError(format!(
                "Table name is a reserved word: {raw}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Maps every disallowed character to `_` and prefixes `idx_` when the
    /// result would otherwise be empty, start with a digit or be reserved.
    #[must_use]
    pub fn sanitize(raw: &str) -> Self {
        let mut name: String = raw
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) || is_reserved(&name) {
            name = format!("idx_{name}");
        }
        name.truncate(MAX_IDENTIFIER_LEN);
        Self(name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TableName {
    type Error = WebhookIndexerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

/// A tenant-configured indexer as stored in the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerRecord {
    pub id: String,
    pub tenant_id: String,
    pub indexer_type: IndexerType,
    /// Variant-specific parameters, validated when the indexer is built.
    pub params: serde_json::Value,
    pub target_table: TableName,
    pub credential_id: String,
    /// Upstream subscription id; `None` until provisioned.
    pub webhook_id: Option<String>,
    pub status: IndexerStatus,
    pub error_message: Option<String>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexerRecord {
    /// A fresh `pending` record.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        indexer_type: IndexerType,
        params: serde_json::Value,
        target_table: TableName,
        credential_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            indexer_type,
            params,
            target_table,
            credential_id: credential_id.into(),
            webhook_id: None,
            status: IndexerStatus::Pending,
            error_message: None,
            last_indexed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Connection details for a tenant's target database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseCredential {
    pub id: String,
    pub tenant_id: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// libpq `sslmode` value; `prefer` when absent.
    pub ssl_mode: Option<String>,
}

impl DatabaseCredential {
    /// Pool cache key: one pool per (user, host, port, database).
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}@{}:{}/{}", self.username, self.host, self.port, self.database)
    }

    /// Connection string without the password, safe for logs.
    #[must_use]
    pub fn redacted_dsn(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}?sslmode={}",
            self.username,
            self.host,
            self.port,
            self.database,
            self.ssl_mode.as_deref().unwrap_or("prefer")
        )
    }
}

impl fmt::Debug for DatabaseCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredential")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("dsn", &self.redacted_dsn())
            .finish()
    }
}

/// Category of a structured log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Success,
    Error,
    Warning,
    Info,
}

impl LogType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl FromStr for LogType {
    type Err = WebhookIndexerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "warning" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            other => Err(WebhookIndexerError::DecodingError(format!(
                "Unknown log type: {other}"
            ))),
        }
    }
}

/// Append-only audit entry associated with an indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerLogEntry {
    pub indexer_id: String,
    pub log_type: LogType,
    pub message: String,
    pub slot: Option<u64>,
    pub signatures: Vec<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl IndexerLogEntry {
    #[must_use]
    pub fn new(indexer_id: impl Into<String>, log_type: LogType, message: impl Into<String>) -> Self {
        Self {
            indexer_id: indexer_id.into(),
            log_type,
            message: message.into(),
            slot: None,
            signatures: Vec::new(),
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_slot(mut self, slot: u64) -> Self {
        self.slot = Some(slot);
        self
    }

    #[must_use]
    pub fn with_signatures(mut self, signatures: Vec<String>) -> Self {
        self.signatures = signatures;
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_sanitize_replaces_invalid_chars() {
        assert_eq!(TableName::sanitize("my-prices.v2").as_str(), "my_prices_v2");
        assert_eq!(TableName::sanitize("token prices").as_str(), "token_prices");
    }

    #[test]
    fn test_table_name_sanitize_prefixes_leading_digit() {
        assert_eq!(TableName::sanitize("2024_bids").as_str(), "idx_2024_bids");
        assert_eq!(TableName::sanitize("").as_str(), "idx_");
    }

    #[test]
    fn test_table_name_sanitize_output_always_parses() {
        for raw in ["a", "9", "drop table; --", "ü-name", "___", "table", "x".repeat(90).as_str()] {
            let sanitized = TableName::sanitize(raw);
            assert!(TableName::parse(sanitized.as_str()).is_ok(), "{raw:?} -> {sanitized}");
        }
    }

    #[test]
    fn test_table_name_parse_rejects() {
        assert!(TableName::parse("").is_err());
        assert!(TableName::parse("1abc").is_err());
        assert!(TableName::parse("bad-name").is_err());
        assert!(TableName::parse("prices; DROP TABLE x").is_err());
        assert!(TableName::parse("ok_name_1").is_ok());
    }

    #[test]
    fn test_table_name_reserved_words() {
        assert!(TableName::parse("order").is_err());
        assert!(TableName::parse("USER").is_err());
        assert!(TableName::parse("orders").is_ok());
        assert_eq!(TableName::sanitize("order").as_str(), "idx_order");
        assert_eq!(TableName::sanitize("User").as_str(), "idx_User");
    }

    #[test]
    fn test_status_transitions() {
        use IndexerStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Failed));
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(!Failed.can_transition_to(Active));
        assert!(!Paused.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Active));
        assert!(Active.accepts_events());
        assert!(!Paused.accepts_events());
    }

    #[test]
    fn test_indexer_type_parsing() {
        assert_eq!("token-price".parse::<IndexerType>().unwrap(), IndexerType::TokenPrice);
        assert_eq!("NFT_BIDS".parse::<IndexerType>().unwrap(), IndexerType::NftBid);
        assert!("candles".parse::<IndexerType>().is_err());
        for t in IndexerType::ALL {
            assert_eq!(t.as_str().parse::<IndexerType>().unwrap(), t);
        }
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let cred = DatabaseCredential {
            id: "c1".into(),
            tenant_id: "t1".into(),
            host: "db.internal".into(),
            port: 5432,
            database: "tenant".into(),
            username: "writer".into(),
            password: "hunter2".into(),
            ssl_mode: None,
        };
        let rendered = format!("{cred:?}");
        assert!(!rendered.contains("hunter2"));
        assert_eq!(cred.identity(), "writer@db.internal:5432/tenant");
    }
}
