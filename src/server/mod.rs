//! HTTP ingress for upstream webhook deliveries.
//!
//! `POST /webhook?id=<subscription id>` acknowledges a delivery as soon as
//! it is authenticated and parsed, then hands each envelope to a background
//! task. Background work is bounded by a semaphore; ordering between events
//! is not preserved.

use crate::config::IngressConfig;
use crate::core::dispatcher::{DispatchStatus, Dispatcher};
use crate::types::payload::{InboundBody, WebhookEvent};
use crate::utils::error::{Result, WebhookIndexerError};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

/// Fixed acknowledgement body.
pub const ACCEPTED_BODY: &str = "Webhook received";

/// Shared handler state.
#[derive(Clone)]
pub struct IngressState {
    dispatcher: Arc<Dispatcher>,
    secret: Option<String>,
    permits: Arc<Semaphore>,
    max_body_bytes: usize,
}

impl IngressState {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, config: &IngressConfig) -> Self {
        Self {
            dispatcher,
            secret: config.secret.clone().filter(|s| !s.is_empty()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_events.max(1))),
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Checks the `key` query parameter, then a bearer token.
    fn authorized(&self, key: Option<&str>, headers: &HeaderMap) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            return true;
        };
        if key == Some(secret) {
            return true;
        }
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token.trim() == secret)
    }
}

#[derive(Debug, Default, Deserialize)]
struct WebhookQuery {
    id: Option<String>,
    key: Option<String>,
}

/// Builds the ingress router.
pub fn router(state: IngressState) -> Router {
    let limit = state.max_body_bytes;
    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/health", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// Serves `router` on `listener` until the process stops.
///
/// # Errors
///
/// Returns `InternalError` when the server loop fails.
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Webhook ingress listening");
    }
    axum::serve(listener, router)
        .await
        .map_err(|e| WebhookIndexerError::InternalError(format!("HTTP server failed: {e}")))
}

async fn receive_webhook(
    State(state): State<IngressState>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Body,
) -> (StatusCode, &'static str) {
    let Some(subscription_id) = query.id.filter(|id| !id.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing webhook id");
    };
    if !state.authorized(query.key.as_deref(), &headers) {
        tracing::warn!(subscription_id = %subscription_id, "Rejected webhook with bad secret");
        return (StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read webhook body");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read body");
        }
    };
    let events = match serde_json::from_slice::<InboundBody>(&bytes) {
        Ok(body) => body.into_events(),
        Err(e) => {
            tracing::warn!(subscription_id = %subscription_id, error = %e, "Malformed webhook body");
            return (StatusCode::BAD_REQUEST, "Invalid JSON body");
        }
    };

    tracing::debug!(subscription_id = %subscription_id, events = events.len(), "Webhook accepted");
    spawn_dispatch(state, subscription_id, events);
    (StatusCode::OK, ACCEPTED_BODY)
}

fn spawn_dispatch(state: IngressState, subscription_id: String, events: Vec<WebhookEvent>) {
    tokio::spawn(async move {
        for event in events {
            let Ok(permit) = Arc::clone(&state.permits).acquire_owned().await else {
                return;
            };
            let dispatcher = Arc::clone(&state.dispatcher);
            let subscription_id = subscription_id.clone();
            tokio::spawn(async move {
                let _permit = permit;
                dispatch_event(&dispatcher, &subscription_id, &event).await;
            });
        }
    });
}

async fn dispatch_event(dispatcher: &Dispatcher, subscription_id: &str, event: &WebhookEvent) {
    let outcomes = match dispatcher.dispatch(subscription_id, event).await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            tracing::error!(subscription_id, slot = event.slot, error = %e, "Webhook dispatch failed");
            return;
        }
    };

    for outcome in outcomes {
        match outcome.result {
            Ok(DispatchStatus::Processed(report)) => tracing::debug!(
                indexer_id = %outcome.indexer_id,
                slot = event.slot,
                applied = report.applied_count(),
                skipped = report.skipped_count(),
                "Event processed"
            ),
            Ok(DispatchStatus::NotRelevant) => {
                tracing::trace!(indexer_id = %outcome.indexer_id, slot = event.slot, "Event not relevant");
            }
            Err(e) if e.is_rejection() => {
                tracing::warn!(indexer_id = %outcome.indexer_id, slot = event.slot, error = %e, "Event rejected");
            }
            Err(e) => {
                tracing::error!(indexer_id = %outcome.indexer_id, slot = event.slot, error = %e, "Event failed");
            }
        }
    }
}
