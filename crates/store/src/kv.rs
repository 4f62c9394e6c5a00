//! The shared key-value coordination store.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::error::StoreError;

/// Shared coordination store used by every worker of an execution.
///
/// Counters (`incr`/`decr`) are atomic; `publish` is fire-and-forget,
/// so callers treat delivery as best-effort and never fail on it.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a blob value.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a blob value.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Delete a key of any type. Deleting a missing key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically increment a counter, returning the new value.
    /// A missing key counts from zero.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Atomically decrement a counter, returning the new value.
    async fn decr(&self, key: &str) -> Result<i64, StoreError>;

    /// Add a member to a set. Returns `true` if it was newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// All members of a set; empty for a missing key.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Keys matching a `prefix*` pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Publish a message to a channel. Best-effort: no subscribers is
    /// not an error.
    async fn publish(&self, channel: &str, message: Value) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
enum Entry {
    Blob(Value),
    Counter(i64),
    Set(HashSet<String>),
}

/// In-memory [`KvStore`] backed by a concurrent map and a broadcast
/// channel for pub/sub.
///
/// Messages are delivered as `(channel, message)` pairs to every
/// subscriber; if no subscriber is listening they are dropped, matching
/// the fire-and-forget contract.
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
    events: broadcast::Sender<(String, Value)>,
    published: AtomicU64,
}

impl MemoryKv {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            entries: DashMap::new(),
            events,
            published: AtomicU64::new(0),
        }
    }

    /// Subscribe to all published messages.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<(String, Value)> {
        self.events.subscribe()
    }

    /// Total number of messages published since creation.
    #[must_use]
    pub fn total_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of live keys (test helper).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no keys are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn wrong_type(key: &str, operation: &'static str) -> StoreError {
        StoreError::WrongType {
            key: key.to_string(),
            operation,
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.entries.get(key).map(|entry| entry.value().clone()) {
            None => Ok(None),
            Some(Entry::Blob(value)) => Ok(Some(value)),
            Some(_) => Err(Self::wrong_type(key, "get")),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), Entry::Blob(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(Entry::Counter(0));
        match entry.value_mut() {
            Entry::Counter(count) => {
                *count += 1;
                Ok(*count)
            }
            _ => Err(Self::wrong_type(key, "incr")),
        }
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(Entry::Counter(0));
        match entry.value_mut() {
            Entry::Counter(count) => {
                *count -= 1;
                Ok(*count)
            }
            _ => Err(Self::wrong_type(key, "decr")),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(HashSet::new()));
        match entry.value_mut() {
            Entry::Set(members) => Ok(members.insert(member.to_string())),
            _ => Err(Self::wrong_type(key, "sadd")),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.entries.get(key).map(|entry| entry.value().clone()) {
            None => Ok(Vec::new()),
            Some(Entry::Set(members)) => Ok(members.into_iter().collect()),
            Some(_) => Err(Self::wrong_type(key, "smembers")),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn publish(&self, channel: &str, message: Value) -> Result<(), StoreError> {
        self.published.fetch_add(1, Ordering::Relaxed);
        // Ignore send error (no active receivers).
        let _ = self.events.send((channel.to_string(), message));
        Ok(())
    }
}
