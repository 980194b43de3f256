//! Key-value backend contract and the in-memory implementation
//!
//! The token store needs only three primitives from a backend: point reads,
//! point deletes and an atomic multi-key write. Every write carries an
//! optional TTL; `None` keeps the key until it is deleted.
//!
//! `MemoryKv` keeps all entries behind a single tokio Mutex, so a committed
//! batch is observed either completely or not at all. Expired entries are
//! hidden from reads immediately and physically dropped by
//! [`MemoryKv::purge_expired`] (driven by the sweeper task).

use std::collections::HashMap;
use std::time::Duration;

use oauth2_core::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
}

/// An ordered set of mutations applied as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write. A zero TTL writes a key that is already expired.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
            ttl,
        });
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(WriteOp::Delete { key: key.into() });
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Storage backend for [`crate::KvTokenStore`].
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn KvBackend>`).
pub trait KvBackend: Send + Sync {
    /// Read a live value.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    /// Delete a key. Returns whether a live value was removed.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Apply every operation in `batch` atomically, in order.
    fn commit(&self, batch: WriteBatch) -> BoxFuture<'_, Result<()>>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// `None` never expires
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local backend with per-key TTLs.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, remaining = entries.len(), "purged expired keys");
        }
        purged
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining TTL of a live key.
    ///
    /// `None` when the key is absent or expired, `Some(None)` when it never
    /// expires.
    pub async fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        let entry = entries.get(key).filter(|e| e.is_live(now))?;
        Some(entry.expires_at.map(|at| at.saturating_duration_since(now)))
    }

    /// Number of stored entries including expired ones not yet purged.
    #[cfg(test)]
    async fn raw_len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl KvBackend for MemoryKv {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.entries.lock().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
                Some(_) => {
                    entries.remove(key);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.entries.lock().await;
            Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
        })
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.entries.lock().await;
            for op in batch.into_ops() {
                match op {
                    WriteOp::Put { key, value, ttl } => {
                        // Overflowing deadlines are treated as no expiry
                        let expires_at = ttl.and_then(|ttl| now.checked_add(ttl));
                        entries.insert(key, Entry { value, expires_at });
                    }
                    WriteOp::Delete { key } => {
                        entries.remove(&key);
                    }
                }
            }
            Ok(())
        })
    }
}
