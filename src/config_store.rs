//! Configuration store: the external collaborator (§6) providing a
//! hierarchical key-value control plane with transactions.
//!
//! This plays the same structural role in this crate that the SQLite-backed
//! `Store` plays for this workspace's control plane: an async boundary the
//! device lifecycle reads/writes during plug and resume. It is not a
//! xenstore client — a real one is explicitly out of scope (§1) — but the
//! trait and its in-memory test double are complete and independently
//! testable.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// External collaborator (§6): hierarchical key read/write with
/// transactions. A "transaction" here is a batch of reads and/or writes
/// that must observe (and publish) a single consistent snapshot.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn read(&self, key: &str) -> Option<String>;

    async fn write(&self, key: &str, value: &str);

    /// List immediate children of `path` (for `device/vif` enumeration).
    async fn list(&self, path: &str) -> Vec<String>;

    /// Run `writes` as a single atomic publish.
    async fn transaction(&self, writes: &[(&str, &str)]) {
        for (key, value) in writes {
            self.write(key, value).await;
        }
    }

    /// Read a boolean feature key; unreadable keys are `false` (§7).
    async fn read_bool(&self, key: &str) -> bool {
        matches!(self.read(key).await.as_deref(), Some("1") | Some("true"))
    }
}

/// In-memory test double for `ConfigStore`.
#[derive(Default)]
pub struct MemoryConfigStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry before the driver starts (test setup convenience).
    pub fn seed(&self, key: &str, value: &str) {
        self.entries
            .try_lock()
            .expect("seed() is only used before concurrent access begins")
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn read(&self, key: &str) -> Option<String> {
        self.entries.lock().await.get(key).cloned()
    }

    async fn write(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
    }

    async fn list(&self, path: &str) -> Vec<String> {
        let prefix = format!("{path}/");
        let entries = self.entries.lock().await;
        let mut children: Vec<String> = entries
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(str::to_string)
            .collect();
        children.sort();
        children.dedup();
        children
    }

    async fn transaction(&self, writes: &[(&str, &str)]) {
        let mut entries = self.entries.lock().await;
        for (key, value) in writes {
            entries.insert(key.to_string(), value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_write_roundtrip() {
        let store = MemoryConfigStore::new();
        store.write("device/vif/0/mac", "52:54:00:12:34:56").await;
        assert_eq!(
            store.read("device/vif/0/mac").await.as_deref(),
            Some("52:54:00:12:34:56")
        );
    }

    #[tokio::test]
    async fn missing_feature_key_reads_false() {
        let store = MemoryConfigStore::new();
        assert!(!store.read_bool("backend/feature-gso-tcpv4").await);
    }

    #[tokio::test]
    async fn transaction_publishes_all_keys() {
        let store = MemoryConfigStore::new();
        store
            .transaction(&[("a", "1"), ("b", "2"), ("c", "3")])
            .await;
        assert_eq!(store.read("a").await.as_deref(), Some("1"));
        assert_eq!(store.read("b").await.as_deref(), Some("2"));
        assert_eq!(store.read("c").await.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn list_returns_immediate_children() {
        let store = MemoryConfigStore::new();
        store.write("device/vif/0/mac", "x").await;
        store.write("device/vif/7/mac", "y").await;
        let mut children = store.list("device/vif").await;
        children.sort();
        assert_eq!(children, vec!["0".to_string(), "7".to_string()]);
    }
}
