//! Subscription id ↔ indexer id table.
//!
//! The forward direction answers "which indexers receive events delivered
//! under this subscription id"; the reverse direction answers "which
//! subscription does this indexer's teardown touch". Both are updated under
//! one lock so they never disagree.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    by_subscription: HashMap<String, BTreeSet<String>>,
    by_indexer: HashMap<String, String>,
}

/// Bidirectional in-memory mapping, shared by the dispatcher and the
/// lifecycle manager.
#[derive(Debug, Default)]
pub struct WebhookMappingRegistry {
    tables: RwLock<Tables>,
}

impl WebhookMappingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoned locks are recovered.
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maps `indexer_id` to `subscription_id`, replacing any previous
    /// subscription of that indexer.
    pub fn register(&self, subscription_id: &str, indexer_id: &str) {
        let mut tables = self.write();

        if let Some(previous) = tables
            .by_indexer
            .insert(indexer_id.to_string(), subscription_id.to_string())
            && previous != subscription_id
        {
            remove_forward(&mut tables.by_subscription, &previous, indexer_id);
        }
        tables
            .by_subscription
            .entry(subscription_id.to_string())
            .or_default()
            .insert(indexer_id.to_string());
    }

    /// Indexers mapped to `subscription_id`, in id order.
    #[must_use]
    pub fn lookup(&self, subscription_id: &str) -> Vec<String> {
        let tables = self.read();
        tables
            .by_subscription
            .get(subscription_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscription the indexer is mapped to.
    #[must_use]
    pub fn subscription_of(&self, indexer_id: &str) -> Option<String> {
        let tables = self.read();
        tables.by_indexer.get(indexer_id).cloned()
    }

    /// Removes the indexer from both directions and returns the subscription
    /// it was mapped to.
    pub fn unregister_indexer(&self, indexer_id: &str) -> Option<String> {
        let mut tables = self.write();
        let subscription_id = tables.by_indexer.remove(indexer_id)?;
        remove_forward(&mut tables.by_subscription, &subscription_id, indexer_id);
        Some(subscription_id)
    }

    /// Re-keys every indexer mapped under `old` to `new`. Used when the
    /// shared subscription is recreated under a fresh id.
    pub fn rename_subscription(&self, old: &str, new: &str) {
        if old == new {
            return;
        }
        let mut tables = self.write();
        let Some(ids) = tables.by_subscription.remove(old) else {
            return;
        };
        for id in &ids {
            tables.by_indexer.insert(id.clone(), new.to_string());
        }
        tables
            .by_subscription
            .entry(new.to_string())
            .or_default()
            .extend(ids);
    }

    /// Snapshot of the forward direction.
    #[must_use]
    pub fn all_mappings(&self) -> HashMap<String, Vec<String>> {
        let tables = self.read();
        tables
            .by_subscription
            .iter()
            .map(|(sub, ids)| (sub.clone(), ids.iter().cloned().collect()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let tables = self.read();
        tables.by_indexer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn remove_forward(
    by_subscription: &mut HashMap<String, BTreeSet<String>>,
    subscription_id: &str,
    indexer_id: &str,
) {
    if let Some(ids) = by_subscription.get_mut(subscription_id) {
        ids.remove(indexer_id);
        if ids.is_empty() {
            by_subscription.remove(subscription_id);
        }
    }
}
