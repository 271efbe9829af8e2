//! Upstream webhook-subscription API.
//!
//! The provider pushes transactions touching a set of watched addresses to a
//! callback URL. [`WebhookService`] is the seam the subscription manager
//! talks through; [`HeliusWebhookClient`] is the production implementation.

use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod helius;

pub use helius::HeliusWebhookClient;

/// Desired state of one upstream subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(rename = "webhookURL")]
    pub webhook_url: String,
    #[serde(rename = "transactionTypes", default)]
    pub transaction_types: Vec<String>,
    #[serde(rename = "accountAddresses", default)]
    pub account_addresses: Vec<String>,
    #[serde(rename = "webhookType", default = "default_webhook_type")]
    pub webhook_type: String,
    /// Value the provider echoes back in the `Authorization` header.
    #[serde(rename = "authHeader", default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
}

fn default_webhook_type() -> String {
    "enhanced".to_string()
}

/// Subscription as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookInfo {
    #[serde(rename = "webhookID")]
    pub webhook_id: String,
    #[serde(flatten)]
    pub config: WebhookConfig,
}

/// Create / read / rewrite / delete of upstream subscriptions.
#[async_trait]
pub trait WebhookService: Send + Sync {
    /// Creates a subscription and returns its id.
    async fn create_webhook(&self, config: &WebhookConfig) -> Result<String>;

    async fn get_webhook(&self, webhook_id: &str) -> Result<WebhookInfo>;

    /// Replaces the whole subscription state.
    async fn update_webhook(&self, webhook_id: &str, config: &WebhookConfig) -> Result<()>;

    async fn delete_webhook(&self, webhook_id: &str) -> Result<()>;
}
