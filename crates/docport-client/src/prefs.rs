use std::sync::Arc;

use crate::channel::TransportMode;
use crate::store::KeyValueStore;

/// Durable-store key prefix for remembered transports. Versioned so a
/// future format change can coexist with old entries.
pub const TRANSPORT_PREF_PREFIX: &str = "docport.transport.v1";

/// Scope under which per-endpoint state is filed: the endpoint without
/// query or fragment, lowercased.
#[must_use]
pub fn endpoint_scope(endpoint: &str) -> String {
    let base = endpoint
        .split(['?', '#'])
        .next()
        .unwrap_or(endpoint)
        .trim();
    base.to_ascii_lowercase()
}

/// Remembered transport for one endpoint.
///
/// Reads tolerate missing, unparsable and failing stores; writes are
/// best-effort. Only a concrete channel is ever written.
pub struct TransportPrefs {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl TransportPrefs {
    pub fn new(store: Arc<dyn KeyValueStore>, endpoint: &str) -> Self {
        let key = format!("{TRANSPORT_PREF_PREFIX}:{}", endpoint_scope(endpoint));
        Self { store, key }
    }

    pub fn load(&self) -> Option<TransportMode> {
        match self.store.get(&self.key) {
            Ok(Some(raw)) => {
                TransportMode::parse(&raw).filter(|mode| *mode != TransportMode::Auto)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "transport preference read failed");
                None
            }
        }
    }

    pub fn save(&self, mode: TransportMode) {
        let Some(value) = mode.persisted_value() else {
            return;
        };
        if let Err(err) = self.store.set(&self.key, value) {
            tracing::warn!(error = %err, mode = value, "transport preference not persisted");
        }
    }
}
