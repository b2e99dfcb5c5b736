use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::cache::ResponseCache;
use crate::channel::{PostChannel, ScriptChannel, TransportMode};
use crate::config::{
    Capabilities, ClientConfig, clamp_timeout_ms, random_device_key, resolve_timeout_ms,
};
use crate::envelope::{Identity, RequestEnvelope, ResponseEnvelope};
use crate::error::ClientError;
use crate::jsonp::{HttpScriptLoader, JsonpChannel};
use crate::post::HttpPostChannel;
use crate::prefs::TransportPrefs;
use crate::progress::{NoopProgress, ProgressSink, ProgressTicket};
use crate::store::{KeyValueStore, MemoryStore};
use crate::types::CallOptions;

/// Durable-store key holding the generated device key.
pub const DEVICE_KEY_STORE_KEY: &str = "docport.device.v1";

const DEFAULT_PROGRESS_MESSAGE: &str = "Loading...";

/// Client for the document-registry endpoint.
///
/// Owns both channels, the per-endpoint transport preference, the session
/// response cache and the session identity. Construction is cheap; one
/// client is meant to live for the whole session and be shared behind an
/// `Arc` if needed.
pub struct DocRegistryClient {
    endpoint: String,
    timeout_ms: u64,
    post: Arc<dyn PostChannel>,
    jsonp: Arc<dyn ScriptChannel>,
    prefs: TransportPrefs,
    cache: ResponseCache,
    progress: Arc<dyn ProgressSink>,
    identity: RwLock<Identity>,
    mode: RwLock<TransportMode>,
}

/// Assembles a [`DocRegistryClient`], with injection points for every
/// collaborator. Anything not supplied gets the production default:
/// HTTP channels, in-memory stores, no progress indicator.
pub struct DocRegistryClientBuilder {
    config: ClientConfig,
    capabilities: Capabilities,
    durable: Option<Arc<dyn KeyValueStore>>,
    session: Option<Arc<dyn KeyValueStore>>,
    post: Option<Arc<dyn PostChannel>>,
    jsonp: Option<Arc<dyn ScriptChannel>>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl DocRegistryClientBuilder {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            capabilities: Capabilities::detect(),
            durable: None,
            session: None,
            post: None,
            jsonp: None,
            progress: None,
        }
    }

    #[must_use]
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Store for the transport preference and the generated device key.
    #[must_use]
    pub fn durable_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Store for the response cache.
    #[must_use]
    pub fn session_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.session = Some(store);
        self
    }

    #[must_use]
    pub fn post_channel(mut self, channel: Arc<dyn PostChannel>) -> Self {
        self.post = Some(channel);
        self
    }

    #[must_use]
    pub fn script_channel(mut self, channel: Arc<dyn ScriptChannel>) -> Self {
        self.jsonp = Some(channel);
        self
    }

    #[must_use]
    pub fn progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    #[must_use]
    pub fn build(self) -> DocRegistryClient {
        let durable = self
            .durable
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);

        let device_key = resolve_device_key(&self.config, durable.as_ref());
        let identity = Identity::new(device_key, self.config.client_ip_key.clone());

        let prefs = TransportPrefs::new(Arc::clone(&durable), &self.config.endpoint);
        // A configured transport pins the mode; otherwise the endpoint's
        // remembered channel wins, and a POST-less environment starts on
        // the script channel outright.
        let mode = if self.config.transport == TransportMode::Auto {
            prefs.load().unwrap_or(if self.capabilities.post {
                TransportMode::Auto
            } else {
                TransportMode::Jsonp
            })
        } else {
            self.config.transport
        };

        let post = self
            .post
            .unwrap_or_else(|| Arc::new(HttpPostChannel::new(self.capabilities)));
        let jsonp = self
            .jsonp
            .unwrap_or_else(|| Arc::new(JsonpChannel::new(HttpScriptLoader::new())));
        let progress = self
            .progress
            .unwrap_or_else(|| Arc::new(NoopProgress::new()));

        DocRegistryClient {
            cache: ResponseCache::new(session, &self.config.endpoint),
            endpoint: self.config.endpoint,
            timeout_ms: self.config.timeout_ms,
            post,
            jsonp,
            prefs,
            progress,
            identity: RwLock::new(identity),
            mode: RwLock::new(mode),
        }
    }
}

impl DocRegistryClient {
    /// Build with production defaults. See [`DocRegistryClientBuilder`]
    /// for injection points.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        DocRegistryClientBuilder::new(config).build()
    }

    #[must_use]
    pub fn builder(config: ClientConfig) -> DocRegistryClientBuilder {
        DocRegistryClientBuilder::new(config)
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current session device key.
    #[must_use]
    pub fn device_key(&self) -> String {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .device_key
            .clone()
    }

    /// The mode the next unforced call will start from.
    #[must_use]
    pub fn transport_mode(&self) -> TransportMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Invoke a remote action.
    ///
    /// The payload is normalized to an object and filled with the session
    /// identity; identity the caller supplies becomes the new session
    /// default. Channel choice, retry and fallback follow the mode:
    ///
    /// * **Jsonp**: script channel first. `Timeout`/`NoCallback` earn a
    ///   single retry with the window stretched 1.5x (clamped); any
    ///   remaining script failure falls back to one POST. When everything
    ///   fails, the error raised is the original script failure, not the
    ///   fallback's. `opts.jsonp_only` disables both the retry and the
    ///   fallback.
    /// * **Post**: POST first; transport failures fall back to one
    ///   script call whose own error then propagates. Application errors
    ///   never fail over.
    /// * **Auto**: like Post, except a success over POST does not
    ///   overwrite a runtime preference that has already settled on the
    ///   script channel.
    ///
    /// Whichever channel succeeds is persisted as the endpoint's
    /// preference for future clients.
    pub async fn call(
        &self,
        action: &str,
        payload: Value,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        let payload = self.absorb_identity(payload);
        let identity = self.identity_snapshot();
        let envelope = RequestEnvelope::build(
            action,
            Value::Object(payload),
            &identity,
            opts.request_id.clone(),
        );

        let ticket = self.begin_progress(opts);
        let result = self.dispatch(&envelope, opts).await;
        if let Some(ticket) = ticket {
            self.progress.end(ticket);
        }
        result
    }

    async fn dispatch(
        &self,
        envelope: &RequestEnvelope,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        let timeout_ms = resolve_timeout_ms(opts.timeout_ms, self.timeout_ms);
        let mode = if opts.jsonp_only {
            TransportMode::Jsonp
        } else {
            opts.transport.unwrap_or_else(|| self.transport_mode())
        };
        tracing::debug!(action = %envelope.action, %mode, timeout_ms, "dispatching call");

        match mode {
            TransportMode::Jsonp => self.jsonp_first(envelope, timeout_ms, opts).await,
            TransportMode::Post => self.post_first(envelope, timeout_ms, false).await,
            TransportMode::Auto => self.post_first(envelope, timeout_ms, true).await,
        }
    }

    async fn jsonp_first(
        &self,
        envelope: &RequestEnvelope,
        timeout_ms: u64,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        let timeout = Duration::from_millis(timeout_ms);
        let original = match self.jsonp.send(&self.endpoint, envelope, timeout).await {
            Ok(response) => {
                self.remember(TransportMode::Jsonp);
                return Ok(response);
            }
            Err(err) => err,
        };

        if opts.jsonp_only || !script_recoverable(&original) {
            return Err(original);
        }

        if original.is_retryable() {
            let base = opts.timeout_ms.filter(|ms| *ms > 0).unwrap_or(self.timeout_ms);
            let retry_timeout = clamp_timeout_ms(base.saturating_mul(3) / 2);
            tracing::debug!(
                action = %envelope.action,
                retry_timeout_ms = retry_timeout,
                "script channel silent; retrying with a longer window"
            );
            if let Ok(response) = self
                .jsonp
                .send(&self.endpoint, envelope, Duration::from_millis(retry_timeout))
                .await
            {
                self.remember(TransportMode::Jsonp);
                return Ok(response);
            }
        }

        tracing::warn!(
            action = %envelope.action,
            error = %original,
            "script channel failed; trying the post channel"
        );
        match self.post.send(&self.endpoint, envelope, timeout).await {
            Ok(response) => {
                self.remember(TransportMode::Post);
                Ok(response)
            }
            // The first failure explains the outage; the fallback's
            // failure is noise on top of it.
            Err(_) => Err(original),
        }
    }

    async fn post_first(
        &self,
        envelope: &RequestEnvelope,
        timeout_ms: u64,
        respect_script_preference: bool,
    ) -> Result<ResponseEnvelope, ClientError> {
        let timeout = Duration::from_millis(timeout_ms);
        match self.post.send(&self.endpoint, envelope, timeout).await {
            Ok(response) => {
                if !respect_script_preference || self.transport_mode() != TransportMode::Jsonp {
                    self.remember(TransportMode::Post);
                }
                Ok(response)
            }
            Err(err) if err.is_application() => Err(err),
            Err(err) => {
                tracing::warn!(
                    action = %envelope.action,
                    error = %err,
                    "post channel failed; trying the script channel"
                );
                let response = self.jsonp.send(&self.endpoint, envelope, timeout).await?;
                self.remember(TransportMode::Jsonp);
                Ok(response)
            }
        }
    }

    /// Normalize the payload to an object, inject session identity where
    /// the caller left it blank, and adopt identity the caller supplied.
    fn absorb_identity(&self, payload: Value) -> Map<String, Value> {
        let mut payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut identity = self.identity.write().unwrap_or_else(PoisonError::into_inner);

        if blank(&payload, "deviceKey") {
            payload.insert(
                "deviceKey".to_string(),
                Value::String(identity.device_key.clone()),
            );
        }
        if blank(&payload, "clientIpKey") && !identity.client_ip_key.is_empty() {
            payload.insert(
                "clientIpKey".to_string(),
                Value::String(identity.client_ip_key.clone()),
            );
        }

        if let Some(device_key) = payload.get("deviceKey").and_then(Value::as_str) {
            let device_key = device_key.trim();
            if !device_key.is_empty() {
                identity.device_key = device_key.to_string();
            }
        }
        if let Some(ip_key) = payload.get("clientIpKey").and_then(Value::as_str) {
            let ip_key = ip_key.trim();
            if !ip_key.is_empty() {
                identity.client_ip_key = ip_key.to_string();
            }
        }

        payload
    }

    fn identity_snapshot(&self) -> Identity {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn begin_progress(&self, opts: &CallOptions) -> Option<ProgressTicket> {
        if opts.no_progress {
            return None;
        }
        let message = opts
            .progress_message
            .as_deref()
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .unwrap_or(DEFAULT_PROGRESS_MESSAGE);
        Some(self.progress.begin(message))
    }

    fn remember(&self, mode: TransportMode) {
        if mode == TransportMode::Auto {
            return;
        }
        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
        self.prefs.save(mode);
    }
}

fn blank(payload: &Map<String, Value>, key: &str) -> bool {
    payload
        .get(key)
        .and_then(Value::as_str)
        .is_none_or(|value| value.trim().is_empty())
}

/// Script failures the selector may recover from by falling back to the
/// post channel. Everything else (application rejections, malformed
/// bodies) ends the call.
fn script_recoverable(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::Timeout { .. } | ClientError::NoCallback | ClientError::Unreachable { .. }
    )
}

fn resolve_device_key(config: &ClientConfig, durable: &dyn KeyValueStore) -> String {
    let saved = match durable.get(DEVICE_KEY_STORE_KEY) {
        Ok(value) => value
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        Err(err) => {
            tracing::warn!(error = %err, "device key read failed");
            None
        }
    };

    let resolved = if config.device_key.is_empty() {
        saved
            .clone()
            .unwrap_or_else(random_device_key)
    } else {
        config.device_key.clone()
    };

    if saved.as_deref() != Some(resolved.as_str()) {
        if let Err(err) = durable.set(DEVICE_KEY_STORE_KEY, &resolved) {
            tracing::warn!(error = %err, "device key persist failed");
        }
    }
    resolved
}
