use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::envelope::ResponseEnvelope;
use crate::prefs::endpoint_scope;
use crate::store::KeyValueStore;

/// Session-store key prefix for cached responses.
pub const CACHE_PREFIX: &str = "docport.cache.v1";

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    ts: i64,
    data: ResponseEnvelope,
}

/// Time-boxed response cache for one endpoint.
///
/// Entries are namespaced by a digest of the endpoint scope so two
/// clients pointed at different endpoints can share a session store
/// without reading each other's answers. The cache never fails a call:
/// unreadable or stale entries are misses, failed writes are dropped.
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    scope: String,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>, endpoint: &str) -> Self {
        Self {
            store,
            scope: scope_digest(endpoint),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{CACHE_PREFIX}:{}:{name}", self.scope)
    }

    /// Fresh cached envelope for `name`, or `None` on miss, staleness, or
    /// any storage/parse problem.
    #[must_use]
    pub fn read(&self, name: &str, max_age_ms: u64, now: DateTime<Utc>) -> Option<ResponseEnvelope> {
        if max_age_ms == 0 {
            return None;
        }
        let raw = match self.store.get(&self.key(name)) {
            Ok(value) => value?,
            Err(err) => {
                tracing::warn!(error = %err, name, "cache read failed");
                return None;
            }
        };
        let entry: CacheEntry = serde_json::from_str(&raw).ok()?;
        if entry.ts <= 0 {
            return None;
        }
        let age_ms = now.timestamp_millis().saturating_sub(entry.ts);
        if age_ms > i64::try_from(max_age_ms).unwrap_or(i64::MAX) {
            return None;
        }
        Some(entry.data)
    }

    /// Best-effort write; failures are logged and swallowed.
    pub fn write(&self, name: &str, envelope: &ResponseEnvelope, now: DateTime<Utc>) {
        let entry = CacheEntry {
            ts: now.timestamp_millis(),
            data: envelope.clone(),
        };
        match serde_json::to_string(&entry) {
            Ok(raw) => {
                if let Err(err) = self.store.set(&self.key(name), &raw) {
                    tracing::warn!(error = %err, name, "cache write failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, name, "cache entry not serializable"),
        }
    }

    /// Best-effort removal.
    pub fn clear(&self, name: &str) {
        if let Err(err) = self.store.remove(&self.key(name)) {
            tracing::warn!(error = %err, name, "cache clear failed");
        }
    }
}

fn scope_digest(endpoint: &str) -> String {
    let digest = Sha256::digest(endpoint_scope(endpoint).as_bytes());
    let hex = format!("{digest:x}");
    hex.chars().take(16).collect()
}
