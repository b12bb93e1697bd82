//! The flat key-value store the wallet persists through.
//!
//! The browser host provides two instances: a persistent area (survives
//! restarts) and a session area (mandated to clear on browser shutdown).
//! Both expose the same tiny JSON interface, so they share the
//! [`KvStore`] trait. [`MemoryStore`] backs tests and embedding.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Fixed keys in the persistent area.
pub mod keys {
    pub const WALLET_STATE: &str = "walletState";
    pub const AUTH_STATE: &str = "authState";
    pub const ONBOARDING_STATE: &str = "onboardingState";
    pub const GRIN_PENDING_RECEIVE: &str = "grinPendingReceive";
    pub const GRIN_PENDING_INVOICE: &str = "grinPendingInvoice";
    pub const CONNECTED_SITES: &str = "connectedSites";
    pub const PENDING_SOCIAL_TIPS: &str = "pendingSocialTips";
    pub const PENDING_TXS: &str = "smirk_pending_txs";
    /// Session area only; cleared by the browser on shutdown.
    pub const SESSION_KEYS: &str = "smirk_session_keys";
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<Value>>;
    async fn put_raw(&self, key: &str, value: Value) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Typed read. `None` when the key is absent.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> anyhow::Result<Option<T>> {
    match store.get_raw(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed write.
pub async fn put_json<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    store.put_raw(key, serde_json::to_value(value)?).await
}

/// An in-memory [`KvStore`].
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current keys, for assertions in tests.
    pub fn keys(&self) -> Vec<String> {
        self.map.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    async fn put_raw(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.map.lock().unwrap().insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        put_json(&store, "k", &vec![1u32, 2, 3]).await.unwrap();
        let v: Option<Vec<u32>> = get_json(&store, "k").await.unwrap();
        assert_eq!(v, Some(vec![1, 2, 3]));

        store.remove("k").await.unwrap();
        let v: Option<Vec<u32>> = get_json(&store, "k").await.unwrap();
        assert_eq!(v, None);
    }
}
