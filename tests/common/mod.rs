// Shared helpers for the integration tests.
#![allow(dead_code)]

use serde_json::{Value, json};
use solana_webhook_indexer::config::{HeliusConfig, HeliusNetwork};
use solana_webhook_indexer::{HeliusWebhookClient, SubscriptionSettings, WebhookEvent};
use wiremock::MockServer;

pub const CALLBACK_URL: &str = "https://indexer.example.com/webhook";

pub fn helius_client(server: &MockServer) -> HeliusWebhookClient {
    HeliusWebhookClient::new(&HeliusConfig {
        api_key: "test-key".into(),
        network: HeliusNetwork::Devnet,
        api_base_url: Some(server.uri()),
    })
    .unwrap()
}

pub fn settings(capacity: usize) -> SubscriptionSettings {
    SubscriptionSettings {
        callback_url: CALLBACK_URL.into(),
        webhook_type: "enhanced".into(),
        transaction_types: vec!["ANY".into()],
        auth_header: Some("Bearer s3cret".into()),
        capacity,
    }
}

pub fn addresses(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}{i}")).collect()
}

/// Envelope with a JSON-encoded detail blob, as delivered upstream.
pub fn event(slot: u64, signature: &str, details: Value) -> WebhookEvent {
    serde_json::from_value(json!({
        "slot": slot,
        "transaction": {"signature": signature, "enhancedDetails": details.to_string()}
    }))
    .unwrap()
}

pub fn test_database_url() -> String {
    std::env::var("TEST_DATABASE_URL").unwrap_or_else(|_| "postgresql://localhost/test".to_string())
}
