//! Client for a script-hosted document-registry RPC endpoint.
//!
//! The endpoint accepts an action name plus a JSON payload and answers
//! with a JSON envelope. Two transports reach it: a plain POST and a
//! script-injection (JSONP) channel for networks where POST is blocked.
//! The client picks a channel per call from capability detection, a
//! persisted per-endpoint preference and caller overrides, retries a
//! silent script channel once with a stretched window, falls back to the
//! other channel on transport failures, and remembers whichever channel
//! succeeded.
//!
//! Transport contract:
//! - `success: false` in a well-formed envelope is an application
//!   rejection ([`ClientError::Api`]) and is never retried or failed over.
//! - Timeouts abandon the in-flight attempt; exactly one outcome settles
//!   each call.
//! - When the script channel and every recovery attempt fail, the error
//!   raised is the original script failure.

mod api;
pub mod cache;
pub mod channel;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod jsonp;
pub mod post;
pub mod prefs;
pub mod progress;
pub mod store;
pub mod types;

pub use channel::{PostChannel, ScriptChannel, TransportMode};
pub use client::{DEVICE_KEY_STORE_KEY, DocRegistryClient, DocRegistryClientBuilder};
pub use config::{
    Capabilities, ClientConfig, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS,
};
pub use envelope::{Identity, RequestEnvelope, ResponseEnvelope};
pub use error::{ClientError, ConfigError, ScriptLoadError, StoreError};
pub use jsonp::{CallbackRegistry, HttpScriptLoader, JsonpChannel, ScriptLoader};
pub use post::HttpPostChannel;
pub use progress::{NoopProgress, ProgressSink, ProgressTicket};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use types::{CallOptions, DocsQuery, InspectionQuery, LoginRequest, StorageSaveInput};
