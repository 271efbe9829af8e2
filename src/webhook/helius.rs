//! Helius webhook REST client.

use super::{WebhookConfig, WebhookInfo, WebhookService};
use crate::config::HeliusConfig;
use crate::utils::error::{Result, WebhookIndexerError};
use crate::utils::logging::redact_api_key;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct CreateWebhookResponse {
    #[serde(rename = "webhookID")]
    webhook_id: String,
}

/// Client for `/v0/webhooks`.
///
/// # Example
///
/// ```no_run
/// use solana_webhook_indexer::config::{HeliusConfig, HeliusNetwork};
/// use solana_webhook_indexer::webhook::HeliusWebhookClient;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HeliusWebhookClient::new(&HeliusConfig {
///     api_key: "my-api-key".into(),
///     network: HeliusNetwork::Mainnet,
///     api_base_url: None,
/// })?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HeliusWebhookClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HeliusWebhookClient {
    /// # Errors
    ///
    /// Returns `HttpError` if the HTTP client cannot be constructed.
    pub fn new(config: &HeliusConfig) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url(),
            api_key: config.api_key.clone(),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/v0/webhooks?api-key={}", self.base_url, self.api_key)
    }

    fn item_url(&self, webhook_id: &str) -> String {
        format!(
            "{}/v0/webhooks/{webhook_id}?api-key={}",
            self.base_url, self.api_key
        )
    }
}

async fn check_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(
        url = %redact_api_key(url),
        status = status.as_u16(),
        "Webhook API request rejected"
    );
    Err(WebhookIndexerError::UpstreamError {
        status: status.as_u16(),
        message: body,
    })
}

#[async_trait]
impl WebhookService for HeliusWebhookClient {
    async fn create_webhook(&self, config: &WebhookConfig) -> Result<String> {
        let url = self.collection_url();
        let response = self.client.post(&url).json(config).send().await?;
        let created: CreateWebhookResponse = check_status(response, &url).await?.json().await?;
        tracing::info!(
            webhook_id = %created.webhook_id,
            addresses = config.account_addresses.len(),
            "Created upstream webhook"
        );
        Ok(created.webhook_id)
    }

    async fn get_webhook(&self, webhook_id: &str) -> Result<WebhookInfo> {
        let url = self.item_url(webhook_id);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(WebhookIndexerError::NotFound(format!("webhook {webhook_id}")));
        }
        Ok(check_status(response, &url).await?.json().await?)
    }

    async fn update_webhook(&self, webhook_id: &str, config: &WebhookConfig) -> Result<()> {
        let url = self.item_url(webhook_id);
        let response = self.client.put(&url).json(config).send().await?;
        check_status(response, &url).await?;
        tracing::info!(
            webhook_id = %webhook_id,
            addresses = config.account_addresses.len(),
            "Rewrote upstream webhook"
        );
        Ok(())
    }

    async fn delete_webhook(&self, webhook_id: &str) -> Result<()> {
        let url = self.item_url(webhook_id);
        let response = self.client.delete(&url).send().await?;
        // Deleting something already gone is success.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response, &url).await?;
        tracing::info!(webhook_id = %webhook_id, "Deleted upstream webhook");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeliusNetwork;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HeliusWebhookClient {
        HeliusWebhookClient::new(&HeliusConfig {
            api_key: "test-key".into(),
            network: HeliusNetwork::Devnet,
            api_base_url: Some(server.uri()),
        })
        .unwrap()
    }

    fn config(addresses: &[&str]) -> WebhookConfig {
        WebhookConfig {
            webhook_url: "https://indexer.example.com/webhook".into(),
            transaction_types: vec!["ANY".into()],
            account_addresses: addresses.iter().map(|a| (*a).to_string()).collect(),
            webhook_type: "enhanced".into(),
            auth_header: None,
        }
    }

    #[tokio::test]
    async fn test_create_webhook_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/webhooks"))
            .and(query_param("api-key", "test-key"))
            .and(body_partial_json(json!({"accountAddresses": ["A1"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"webhookID": "wh-123"})))
            .expect(1)
            .mount(&server)
            .await;

        let id = client_for(&server).create_webhook(&config(&["A1"])).await.unwrap();
        assert_eq!(id, "wh-123");
    }

    #[tokio::test]
    async fn test_update_webhook_maps_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v0/webhooks/wh-1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .update_webhook("wh-1", &config(&["A1"]))
            .await
            .unwrap_err();
        match err {
            WebhookIndexerError::UpstreamError { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_missing_webhook_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v0/webhooks/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client_for(&server).delete_webhook("gone").await.is_ok());
    }

    #[tokio::test]
    async fn test_get_webhook_parses_addresses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/webhooks/wh-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "webhookID": "wh-9",
                "webhookURL": "https://indexer.example.com/webhook",
                "transactionTypes": ["ANY"],
                "accountAddresses": ["X", "Y"],
                "webhookType": "enhanced"
            })))
            .mount(&server)
            .await;

        let info = client_for(&server).get_webhook("wh-9").await.unwrap();
        assert_eq!(info.config.account_addresses, vec!["X", "Y"]);
    }
}
