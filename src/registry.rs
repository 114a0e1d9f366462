//! Lazily populated per-domain state arena.
//!
//! Each domain gets its own `Mutex`, so operations on one domain are
//! serialized while other domains proceed independently. Entries are never
//! removed; memory per entry is bounded by the component that owns it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::domain::DomainKey;

/// Shared map of domain key to per-domain state.
#[derive(Debug)]
pub struct DomainRegistry<T> {
    entries: Arc<RwLock<HashMap<DomainKey, Arc<Mutex<T>>>>>,
}

impl<T> DomainRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the entry for a domain, creating it with `init` on first use.
    pub async fn entry_or_insert_with<F>(&self, domain: &DomainKey, init: F) -> Arc<Mutex<T>>
    where
        F: FnOnce() -> T,
    {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(domain) {
                return entry.clone();
            }
        }

        let mut entries = self.entries.write().await;
        entries
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    /// Get the entry for a domain if it exists.
    pub async fn get(&self, domain: &DomainKey) -> Option<Arc<Mutex<T>>> {
        self.entries.read().await.get(domain).cloned()
    }

    /// Snapshot of the known domain keys.
    pub async fn domains(&self) -> Vec<DomainKey> {
        self.entries.read().await.keys().cloned().collect()
    }
}

impl<T> Default for DomainRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for DomainRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}
