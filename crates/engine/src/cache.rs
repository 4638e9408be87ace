//! Response cache: deterministic fingerprints and TTL-bounded reuse.
//!
//! Entries are immutable once written and replaced wholesale on overwrite.
//! Concurrent requests with the same key may both miss and both compute;
//! the last write wins. Eviction is by TTL expiry or explicit clear only.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use repolens_core::message::{Message, Role};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::CacheError;
use crate::types::QueryResponse;

/// A cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: QueryResponse,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// History as it participates in the fingerprint: ids and timestamps are
/// per-message noise and are left out.
#[derive(Serialize)]
struct CanonicalMessage<'a> {
    role: Role,
    content: &'a str,
    tool_call_id: Option<&'a str>,
    tool_calls: Vec<(&'a str, &'a serde_json::Value)>,
}

#[derive(Serialize)]
struct Fingerprint<'a, O: Serialize> {
    provider: &'a str,
    model: &'a str,
    prompt: &'a str,
    history: Vec<CanonicalMessage<'a>>,
    options: &'a O,
}

/// Compute the cache key for a request: SHA-256 (hex) over the canonical JSON
/// of every input that can change the answer.
pub fn fingerprint<O: Serialize>(
    provider: &str,
    model: &str,
    prompt: &str,
    history: &[Message],
    options: &O,
) -> Result<String, CacheError> {
    let input = Fingerprint {
        provider,
        model,
        prompt,
        history: history
            .iter()
            .map(|m| CanonicalMessage {
                role: m.role,
                content: &m.content,
                tool_call_id: m.tool_call_id.as_deref(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|tc| (tc.function_name.as_str(), &tc.arguments))
                    .collect(),
            })
            .collect(),
        options,
    };

    let bytes = serde_json::to_vec(&input).map_err(|e| CacheError::Fingerprint(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Process-wide response cache. Safe for concurrent use without external locking.
pub struct CacheStore {
    entries: DashMap<String, Arc<CacheEntry>>,
    default_ttl: Duration,
}

impl CacheStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry. Expired entries are removed and reported as misses.
    pub fn get(&self, key: &str) -> Option<QueryResponse> {
        let entry = self.entries.get(key).map(|e| Arc::clone(e.value()))?;
        if entry.is_expired(Instant::now()) {
            self.entries
                .remove_if(key, |_, e| e.is_expired(Instant::now()));
            trace!(cache_key = %key, "Cache entry expired");
            return None;
        }
        Some(entry.value.clone())
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: QueryResponse, ttl: Duration) {
        let key = key.into();
        let entry = Arc::new(CacheEntry {
            key: key.clone(),
            value,
            created_at: Instant::now(),
            ttl,
        });
        self.entries.insert(key, entry);
    }

    /// Remove every expired entry; returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Swept expired cache entries");
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` on a
    /// background task. The task stops when the handle is dropped or the
    /// store itself is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let store: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.sweep_expired();
            }
        });
        SweeperHandle(handle)
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

/// Aborts the background sweeper when dropped.
#[derive(Debug)]
pub struct SweeperHandle(JoinHandle<()>);

impl SweeperHandle {
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}
