//! Shared upstream subscription and its watched-address set.
//!
//! The provider caps the number of addresses one subscription may watch, so
//! every indexer shares a single subscription. [`SubscriptionManager`] is the
//! only place that mutates it: it tracks which indexer asked for which
//! address and when, creates the subscription on first use, rewrites it as
//! owners come and go, and evicts the oldest entries when the cap would be
//! exceeded.
//!
//! All mutations hold the write lock across the upstream calls, so two
//! concurrent `add_addresses` never interleave their read-modify-write of the
//! remote address list.

use crate::config::{IngressConfig, SubscriptionConfig};
use crate::utils::error::{Result, WebhookIndexerError};
use crate::webhook::{WebhookConfig, WebhookService};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One watched address and the indexer that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressEntry {
    pub address: String,
    pub owner: String,
    pub added_at: DateTime<Utc>,
    /// Insertion order; breaks ties between equal timestamps.
    seq: u64,
}

/// Fixed properties of the shared subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    /// Callback URL without the `id` parameter.
    pub callback_url: String,
    pub webhook_type: String,
    pub transaction_types: Vec<String>,
    /// Echoed back by the provider in the `Authorization` header.
    pub auth_header: Option<String>,
    /// Maximum number of watched addresses.
    pub capacity: usize,
}

impl SubscriptionSettings {
    #[must_use]
    pub fn from_config(ingress: &IngressConfig, subscription: &SubscriptionConfig) -> Self {
        Self {
            callback_url: ingress.callback_url.clone(),
            webhook_type: ingress.webhook_type.clone(),
            transaction_types: ingress.transaction_types.clone(),
            auth_header: ingress.secret.as_ref().map(|s| format!("Bearer {s}")),
            capacity: subscription.capacity.max(1),
        }
    }

    /// Callback URL carrying the subscription id, so deliveries can be
    /// routed back to it.
    #[must_use]
    pub fn callback_for(&self, webhook_id: &str) -> String {
        let separator = if self.callback_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}id={webhook_id}", self.callback_url)
    }

    fn webhook_config(&self, webhook_url: String, addresses: Vec<String>) -> WebhookConfig {
        WebhookConfig {
            webhook_url,
            transaction_types: self.transaction_types.clone(),
            account_addresses: addresses,
            webhook_type: self.webhook_type.clone(),
            auth_header: self.auth_header.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct SubscriptionState {
    webhook_id: Option<String>,
    entries: Vec<AddressEntry>,
    next_seq: u64,
}

impl SubscriptionState {
    fn push(&mut self, address: &str, owner: &str, added_at: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(AddressEntry {
            address: address.to_string(),
            owner: owner.to_string(),
            added_at,
            seq,
        });
    }

    fn owns(&self, address: &str, owner: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.address == address && e.owner == owner)
    }

    /// Distinct tracked addresses, oldest first.
    fn distinct_addresses(&self) -> Vec<String> {
        let mut sorted: Vec<&AddressEntry> = self.entries.iter().collect();
        sorted.sort_by_key(|e| (e.added_at, e.seq));
        let mut seen = HashSet::new();
        sorted
            .into_iter()
            .filter(|e| seen.insert(e.address.as_str()))
            .map(|e| e.address.clone())
            .collect()
    }

    /// Keeps the entries of the `capacity` most recently added distinct
    /// addresses and drops the rest. Returns the surviving addresses, oldest
    /// first.
    fn evict_to(&mut self, capacity: usize) -> Vec<String> {
        let mut sorted: Vec<&AddressEntry> = self.entries.iter().collect();
        sorted.sort_by_key(|e| (e.added_at, e.seq));

        let mut kept: Vec<String> = Vec::new();
        for entry in sorted.iter().rev() {
            if kept.len() == capacity {
                break;
            }
            if !kept.contains(&entry.address) {
                kept.push(entry.address.clone());
            }
        }
        kept.reverse();

        let before = self.entries.len();
        self.entries.retain(|e| kept.contains(&e.address));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::info!(
                evicted_entries = evicted,
                surviving = kept.len(),
                "Evicted oldest watched addresses"
            );
        }
        kept
    }
}

/// Owner of the shared upstream subscription.
pub struct SubscriptionManager {
    service: Arc<dyn WebhookService>,
    settings: SubscriptionSettings,
    state: RwLock<SubscriptionState>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(service: Arc<dyn WebhookService>, settings: SubscriptionSettings) -> Self {
        Self {
            service,
            settings,
            state: RwLock::new(SubscriptionState::default()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }

    /// Current upstream subscription id.
    pub async fn webhook_id(&self) -> Option<String> {
        self.state.read().await.webhook_id.clone()
    }

    /// Distinct watched addresses, oldest first.
    pub async fn current_addresses(&self) -> Vec<String> {
        self.state.read().await.distinct_addresses()
    }

    /// Snapshot of every tracked entry.
    pub async fn entries(&self) -> Vec<AddressEntry> {
        self.state.read().await.entries.clone()
    }

    /// Adopts an existing upstream subscription and re-seeds ownership
    /// without calling the provider. Used at start-up.
    pub async fn restore(&self, webhook_id: Option<String>, owners: Vec<(String, Vec<String>)>) {
        let mut state = self.state.write().await;
        state.webhook_id = webhook_id;
        state.entries.clear();
        let now = Utc::now();
        for (owner, addresses) in owners {
            for address in addresses {
                if !state.owns(&address, &owner) {
                    state.push(&address, &owner, now);
                }
            }
        }
        state.evict_to(self.settings.capacity);
        tracing::info!(
            webhook_id = ?state.webhook_id,
            entries = state.entries.len(),
            "Restored subscription state"
        );
    }

    /// Ensures `addresses` are watched on behalf of `owner` and returns the
    /// subscription id.
    ///
    /// # Errors
    ///
    /// Returns the provider's error when neither the rewrite nor the
    /// delete-then-create fallback succeeds.
    pub async fn add_addresses(&self, addresses: &[String], owner: &str) -> Result<String> {
        let mut requested: Vec<String> = Vec::new();
        for address in addresses.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
            if !requested.iter().any(|r| r == address) {
                requested.push(address.to_string());
            }
        }
        if requested.is_empty() {
            return Err(WebhookIndexerError::ValidationError(
                "No addresses to watch".into(),
            ));
        }

        let mut state = self.state.write().await;

        let remote = match state.webhook_id.clone() {
            None => None,
            Some(id) => match self.service.get_webhook(&id).await {
                Ok(info) => Some((id, info.config.account_addresses)),
                Err(e) => {
                    tracing::warn!(
                        webhook_id = %id,
                        error = %e,
                        "Could not fetch subscription, recreating"
                    );
                    state.webhook_id = None;
                    None
                }
            },
        };

        let now = Utc::now();
        let Some((webhook_id, remote_addresses)) = remote else {
            for address in &requested {
                if !state.owns(address, owner) {
                    state.push(address, owner, now);
                }
            }
            let addresses = state.evict_to(self.settings.capacity);
            let id = self.create(addresses).await?;
            state.webhook_id = Some(id.clone());
            return Ok(id);
        };

        let remote_set: HashSet<&str> = remote_addresses.iter().map(String::as_str).collect();
        let new_addresses: Vec<String> = requested
            .iter()
            .filter(|a| !remote_set.contains(a.as_str()))
            .cloned()
            .collect();

        // Shared addresses still get an ownership entry so the other owner's
        // teardown does not drop them.
        for address in &requested {
            if !state.owns(address, owner) {
                state.push(address, owner, now);
            }
        }

        if new_addresses.is_empty() {
            tracing::debug!(owner = owner, "All requested addresses already watched");
            return Ok(webhook_id);
        }

        let target = if remote_addresses.len() + new_addresses.len() > self.settings.capacity {
            state.evict_to(self.settings.capacity)
        } else {
            let mut extended = remote_addresses;
            extended.extend(new_addresses);
            extended
        };

        let id = self.rewrite(&webhook_id, target).await;
        match id {
            Ok(id) => {
                state.webhook_id = Some(id.clone());
                Ok(id)
            }
            Err(e) => {
                state.webhook_id = None;
                Err(e)
            }
        }
    }

    /// Stops watching the addresses only `owner` asked for. Returns the
    /// subscription id afterwards, `None` when the subscription was deleted
    /// because nothing is left to watch.
    ///
    /// # Errors
    ///
    /// Returns the provider's error when the rewrite and its fallback fail.
    pub async fn remove_owner_addresses(&self, owner: &str) -> Result<Option<String>> {
        let mut state = self.state.write().await;

        let owned: Vec<String> = state
            .entries
            .iter()
            .filter(|e| e.owner == owner)
            .map(|e| e.address.clone())
            .collect();
        if owned.is_empty() {
            return Ok(state.webhook_id.clone());
        }

        state.entries.retain(|e| e.owner != owner);
        let still_owned: HashSet<String> = state.entries.iter().map(|e| e.address.clone()).collect();
        let orphaned: HashSet<String> = owned
            .into_iter()
            .filter(|a| !still_owned.contains(a))
            .collect();

        let Some(webhook_id) = state.webhook_id.clone() else {
            return Ok(None);
        };
        if orphaned.is_empty() {
            return Ok(Some(webhook_id));
        }

        let remote = match self.service.get_webhook(&webhook_id).await {
            Ok(info) => info.config.account_addresses,
            Err(e) => {
                tracing::warn!(
                    webhook_id = %webhook_id,
                    error = %e,
                    "Could not fetch subscription, rewriting from tracked entries"
                );
                state.distinct_addresses()
            }
        };
        let remainder: Vec<String> = remote
            .into_iter()
            .filter(|a| !orphaned.contains(a))
            .collect();

        if remainder.is_empty() {
            self.service.delete_webhook(&webhook_id).await?;
            state.webhook_id = None;
            tracing::info!(webhook_id = %webhook_id, "Deleted empty subscription");
            return Ok(None);
        }

        match self.rewrite(&webhook_id, remainder).await {
            Ok(id) => {
                state.webhook_id = Some(id.clone());
                Ok(Some(id))
            }
            Err(e) => {
                state.webhook_id = None;
                Err(e)
            }
        }
    }

    /// Creates the subscription, then points its callback at its own id.
    async fn create(&self, addresses: Vec<String>) -> Result<String> {
        let config = self
            .settings
            .webhook_config(self.settings.callback_url.clone(), addresses);
        let id = self.service.create_webhook(&config).await?;

        let routed = WebhookConfig {
            webhook_url: self.settings.callback_for(&id),
            ..config
        };
        if let Err(e) = self.service.update_webhook(&id, &routed).await {
            tracing::error!(webhook_id = %id, error = %e, "Could not route new subscription");
            if let Err(cleanup) = self.service.delete_webhook(&id).await {
                tracing::warn!(webhook_id = %id, error = %cleanup, "Cleanup delete failed");
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Replaces the address list. Falls back to delete-then-create, which may
    /// change the subscription id.
    async fn rewrite(&self, webhook_id: &str, addresses: Vec<String>) -> Result<String> {
        let config = self
            .settings
            .webhook_config(self.settings.callback_for(webhook_id), addresses.clone());
        match self.service.update_webhook(webhook_id, &config).await {
            Ok(()) => Ok(webhook_id.to_string()),
            Err(e) => {
                tracing::warn!(
                    webhook_id = %webhook_id,
                    error = %e,
                    "Subscription rewrite failed, recreating"
                );
                if let Err(delete_err) = self.service.delete_webhook(webhook_id).await {
                    tracing::warn!(webhook_id = %webhook_id, error = %delete_err, "Delete before recreate failed");
                }
                self.create(addresses).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::WebhookInfo;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeService {
        hooks: Mutex<HashMap<String, WebhookConfig>>,
        next_id: AtomicUsize,
        fail_updates: AtomicBool,
        fail_gets: AtomicBool,
        updates: AtomicUsize,
    }

    impl FakeService {
        fn addresses(&self, id: &str) -> Vec<String> {
            self.hooks.lock().unwrap()[id].account_addresses.clone()
        }

        fn count(&self) -> usize {
            self.hooks.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl WebhookService for FakeService {
        async fn create_webhook(&self, config: &WebhookConfig) -> Result<String> {
            let id = format!("wh-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.hooks.lock().unwrap().insert(id.clone(), config.clone());
            Ok(id)
        }

        async fn get_webhook(&self, webhook_id: &str) -> Result<WebhookInfo> {
            if self.fail_gets.load(Ordering::SeqCst) {
                return Err(WebhookIndexerError::UpstreamError {
                    status: 500,
                    message: "down".into(),
                });
            }
            let hooks = self.hooks.lock().unwrap();
            let config = hooks
                .get(webhook_id)
                .cloned()
                .ok_or_else(|| WebhookIndexerError::NotFound(webhook_id.to_string()))?;
            Ok(WebhookInfo {
                webhook_id: webhook_id.to_string(),
                config,
            })
        }

        async fn update_webhook(&self, webhook_id: &str, config: &WebhookConfig) -> Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            let mut hooks = self.hooks.lock().unwrap();
            // The routing update right after create always succeeds.
            let routing_only = hooks
                .get(webhook_id)
                .is_some_and(|c| c.account_addresses == config.account_addresses);
            if self.fail_updates.load(Ordering::SeqCst) && !routing_only {
                return Err(WebhookIndexerError::UpstreamError {
                    status: 502,
                    message: "bad gateway".into(),
                });
            }
            hooks.insert(webhook_id.to_string(), config.clone());
            Ok(())
        }

        async fn delete_webhook(&self, webhook_id: &str) -> Result<()> {
            self.hooks.lock().unwrap().remove(webhook_id);
            Ok(())
        }
    }

    fn settings(capacity: usize) -> SubscriptionSettings {
        SubscriptionSettings {
            callback_url: "https://indexer.example.com/webhook".into(),
            webhook_type: "enhanced".into(),
            transaction_types: vec!["ANY".into()],
            auth_header: Some("Bearer s3cret".into()),
            capacity,
        }
    }

    fn manager(capacity: usize) -> (Arc<FakeService>, SubscriptionManager) {
        let service = Arc::new(FakeService::default());
        let manager = SubscriptionManager::new(service.clone(), settings(capacity));
        (service, manager)
    }

    fn addrs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_first_add_creates_routed_subscription() {
        let (service, manager) = manager(25);
        let id = manager.add_addresses(&addrs(&["A", "B"]), "idx-1").await.unwrap();

        assert_eq!(service.addresses(&id), addrs(&["A", "B"]));
        let url = service.hooks.lock().unwrap()[&id].webhook_url.clone();
        assert_eq!(url, format!("https://indexer.example.com/webhook?id={id}"));
        assert_eq!(manager.webhook_id().await, Some(id));
    }

    #[tokio::test]
    async fn test_add_existing_addresses_is_noop_upstream() {
        let (service, manager) = manager(25);
        manager.add_addresses(&addrs(&["A"]), "idx-1").await.unwrap();
        let updates = service.updates.load(Ordering::SeqCst);

        manager.add_addresses(&addrs(&["A"]), "idx-2").await.unwrap();
        assert_eq!(service.updates.load(Ordering::SeqCst), updates);
        assert_eq!(manager.entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_thirty_single_adds_evict_oldest() {
        let (service, manager) = manager(25);
        let mut id = String::new();
        for i in 1..=30 {
            id = manager
                .add_addresses(&[format!("addr-{i}")], &format!("idx-{i}"))
                .await
                .unwrap();
            let remote = service.addresses(&id);
            assert!(remote.len() <= 25);
            if i == 26 {
                assert!(!remote.contains(&"addr-1".to_string()));
                assert!(remote.contains(&"addr-26".to_string()));
            }
        }

        let expected: Vec<String> = (6..=30).map(|i| format!("addr-{i}")).collect();
        assert_eq!(service.addresses(&id), expected);
        assert_eq!(manager.current_addresses().await, expected);
    }

    #[tokio::test]
    async fn test_capacity_holds_for_batch_adds() {
        let (service, manager) = manager(5);
        for batch in 0..6 {
            let addresses: Vec<String> = (0..3).map(|i| format!("b{batch}-{i}")).collect();
            let id = manager.add_addresses(&addresses, "owner").await.unwrap();
            assert!(service.addresses(&id).len() <= 5);
            assert!(manager.current_addresses().await.len() <= 5);
        }
        let current = manager.current_addresses().await;
        assert_eq!(current, addrs(&["b4-1", "b4-2", "b5-0", "b5-1", "b5-2"]));
    }

    #[tokio::test]
    async fn test_oversized_first_add_keeps_newest() {
        let (service, manager) = manager(2);
        let id = manager
            .add_addresses(&addrs(&["A", "B", "C"]), "idx")
            .await
            .unwrap();
        assert_eq!(service.addresses(&id), addrs(&["B", "C"]));
    }

    #[tokio::test]
    async fn test_failed_fetch_recreates() {
        let (service, manager) = manager(25);
        let first = manager.add_addresses(&addrs(&["A"]), "idx-1").await.unwrap();

        service.fail_gets.store(true, Ordering::SeqCst);
        let second = manager.add_addresses(&addrs(&["B"]), "idx-2").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(service.addresses(&second), addrs(&["A", "B"]));
    }

    #[tokio::test]
    async fn test_failed_rewrite_falls_back_to_recreate() {
        let (service, manager) = manager(25);
        let first = manager.add_addresses(&addrs(&["A"]), "idx-1").await.unwrap();

        service.fail_updates.store(true, Ordering::SeqCst);
        let second = manager.add_addresses(&addrs(&["B"]), "idx-2").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(service.count(), 1);
        assert_eq!(service.addresses(&second), addrs(&["A", "B"]));
    }

    #[tokio::test]
    async fn test_remove_owner_keeps_shared_addresses() {
        let (service, manager) = manager(25);
        manager.add_addresses(&addrs(&["A", "S"]), "idx-1").await.unwrap();
        let id = manager.add_addresses(&addrs(&["B", "S"]), "idx-2").await.unwrap();

        let after = manager.remove_owner_addresses("idx-1").await.unwrap();
        assert_eq!(after.as_deref(), Some(id.as_str()));
        assert_eq!(service.addresses(&id), addrs(&["S", "B"]));
    }

    #[tokio::test]
    async fn test_removing_last_owner_deletes_subscription() {
        let (service, manager) = manager(25);
        manager.add_addresses(&addrs(&["A"]), "idx-1").await.unwrap();

        assert_eq!(manager.remove_owner_addresses("idx-1").await.unwrap(), None);
        assert_eq!(service.count(), 0);
        assert_eq!(manager.webhook_id().await, None);
    }

    #[tokio::test]
    async fn test_remove_unknown_owner_is_noop() {
        let (service, manager) = manager(25);
        let id = manager.add_addresses(&addrs(&["A"]), "idx-1").await.unwrap();
        let updates = service.updates.load(Ordering::SeqCst);

        assert_eq!(
            manager.remove_owner_addresses("nobody").await.unwrap(),
            Some(id)
        );
        assert_eq!(service.updates.load(Ordering::SeqCst), updates);
    }

    #[tokio::test]
    async fn test_restore_seeds_entries_without_upstream_calls() {
        let (service, manager) = manager(25);
        manager
            .restore(
                Some("wh-existing".into()),
                vec![("idx-1".into(), addrs(&["A", "B"])), ("idx-2".into(), addrs(&["B"]))],
            )
            .await;

        assert_eq!(service.count(), 0);
        assert_eq!(manager.webhook_id().await.as_deref(), Some("wh-existing"));
        assert_eq!(manager.current_addresses().await, addrs(&["A", "B"]));
        assert_eq!(manager.entries().await.len(), 3);
    }

    #[tokio::test]
    async fn test_restore_respects_capacity() {
        let (_service, manager) = manager(3);
        manager
            .restore(
                Some("wh-existing".into()),
                vec![
                    ("idx-1".into(), addrs(&["A", "B"])),
                    ("idx-2".into(), addrs(&["C", "D", "E"])),
                ],
            )
            .await;

        assert_eq!(manager.current_addresses().await, addrs(&["C", "D", "E"]));
        assert_eq!(manager.entries().await.len(), 3);
    }

    #[test]
    fn test_callback_for_appends_id() {
        let mut s = settings(25);
        assert_eq!(s.callback_for("x"), "https://indexer.example.com/webhook?id=x");
        s.callback_url = "https://h/webhook?tenant=1".into();
        assert_eq!(s.callback_for("x"), "https://h/webhook?tenant=1&id=x");
    }
}
