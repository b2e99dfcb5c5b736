use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::oneshot;
use url::Url;
use uuid::Uuid;

use crate::channel::ScriptChannel;
use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::{ClientError, ScriptLoadError};

/// How long after the script resource finishes loading the channel keeps
/// waiting for the callback before giving up.
pub const CALLBACK_GRACE_MS: u64 = 120;

/// Live callback slots for in-flight script calls.
///
/// Each call registers a uniquely-named one-shot slot; the loader (or the
/// remote script it executes) dispatches the response into it. The first
/// dispatch for a name wins, later ones are dropped, and unregistering an
/// unknown name is a no-op, so the channel's cleanup is idempotent.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    slots: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl CallbackRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot for `name` and hand back its receiving end.
    pub fn register(&self, name: &str) -> oneshot::Receiver<Value> {
        let (sender, receiver) = oneshot::channel();
        if let Ok(mut slots) = self.slots.lock() {
            slots.insert(name.to_string(), sender);
        }
        receiver
    }

    /// Deliver a response to a registered slot. Returns `false` when the
    /// name is unknown or already settled.
    pub fn dispatch(&self, name: &str, value: Value) -> bool {
        let Ok(mut slots) = self.slots.lock() else {
            return false;
        };
        match slots.remove(name) {
            Some(sender) => sender.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop the slot for `name`, if it still exists.
    pub fn unregister(&self, name: &str) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(name);
        }
    }

    /// Number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().map_or(0, |slots| slots.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Opens the script resource. Resolving `Ok` means the resource loaded;
/// whether the callback actually fired is the channel's business, not the
/// loader's. Callback invocations flow through the registry.
#[async_trait]
pub trait ScriptLoader: Send + Sync {
    async fn load(&self, url: &str, registry: &CallbackRegistry) -> Result<(), ScriptLoadError>;
}

/// Script channel over an injected [`ScriptLoader`].
pub struct JsonpChannel<L: ScriptLoader> {
    loader: L,
    registry: std::sync::Arc<CallbackRegistry>,
}

impl<L: ScriptLoader> JsonpChannel<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            registry: std::sync::Arc::new(CallbackRegistry::new()),
        }
    }

    /// Share a registry with other channels (or with an embedder that
    /// dispatches callbacks itself).
    pub fn with_registry(loader: L, registry: std::sync::Arc<CallbackRegistry>) -> Self {
        Self { loader, registry }
    }

    #[must_use]
    pub fn registry(&self) -> &std::sync::Arc<CallbackRegistry> {
        &self.registry
    }
}

#[async_trait]
impl<L: ScriptLoader> ScriptChannel for JsonpChannel<L> {
    async fn send(
        &self,
        endpoint: &str,
        envelope: &RequestEnvelope,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, ClientError> {
        let callback = callback_name();
        let mut receiver = self.registry.register(&callback);
        // Unregisters on every exit path below, including early returns.
        let _cleanup = UnregisterGuard {
            registry: &self.registry,
            name: &callback,
        };

        let url = build_script_url(endpoint, envelope, &callback)?;

        let overall = tokio::time::sleep(timeout);
        tokio::pin!(overall);
        let load = self.loader.load(&url, &self.registry);
        tokio::pin!(load);

        // Phase one: the script resource is still loading. A callback can
        // legitimately arrive before the load future resolves.
        tokio::select! {
            biased;
            value = &mut receiver => return settle(value),
            result = &mut load => {
                result.map_err(|err| ClientError::Unreachable { detail: err.detail })?;
            }
            () = &mut overall => return Err(timeout_error(timeout)),
        }

        // Phase two: loaded. Give the callback a short grace window; the
        // overall timer keeps running underneath it.
        let grace = tokio::time::sleep(Duration::from_millis(CALLBACK_GRACE_MS));
        tokio::pin!(grace);
        tokio::select! {
            biased;
            value = &mut receiver => settle(value),
            () = &mut overall => Err(timeout_error(timeout)),
            () = &mut grace => Err(ClientError::NoCallback),
        }
    }
}

struct UnregisterGuard<'a> {
    registry: &'a CallbackRegistry,
    name: &'a str,
}

impl Drop for UnregisterGuard<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.name);
    }
}

fn settle(value: Result<Value, oneshot::error::RecvError>) -> Result<ResponseEnvelope, ClientError> {
    match value {
        // Validation folds `success: false` into an application error.
        Ok(value) => ResponseEnvelope::from_value(value),
        // The slot vanished without a dispatch; treat it like silence.
        Err(_) => Err(ClientError::NoCallback),
    }
}

fn timeout_error(timeout: Duration) -> ClientError {
    ClientError::Timeout {
        timeout_ms: timeout.as_millis() as u64,
    }
}

fn callback_name() -> String {
    format!(
        "cb_{}_{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

fn build_script_url(
    endpoint: &str,
    envelope: &RequestEnvelope,
    callback: &str,
) -> Result<String, ClientError> {
    let mut url = Url::parse(endpoint).map_err(|err| ClientError::Unreachable {
        detail: format!("endpoint not a url: {err}"),
    })?;
    let payload_json =
        serde_json::to_string(&envelope.payload).map_err(|err| ClientError::Unreachable {
            detail: format!("payload encode failed: {err}"),
        })?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("api", "1");
        query.append_pair("action", &envelope.action);
        query.append_pair("callback", callback);
        for (key, value) in envelope.identity_query_pairs() {
            query.append_pair(key, value);
        }
        query.append_pair("payload", &payload_json);
        // Cache buster; the endpoint ignores it.
        query.append_pair("_", &Utc::now().timestamp_millis().to_string());
    }
    Ok(url.into())
}

/// Production loader: fetches the script body over GET and executes the
/// single callback invocation it contains by dispatching into the
/// registry.
///
/// A body without a recognizable invocation still counts as a successful
/// load; the channel then times out its grace window exactly as a
/// browser would with a script that never calls back.
#[derive(Debug, Clone, Default)]
pub struct HttpScriptLoader {
    http: reqwest::Client,
}

impl HttpScriptLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_http(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ScriptLoader for HttpScriptLoader {
    async fn load(&self, url: &str, registry: &CallbackRegistry) -> Result<(), ScriptLoadError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| ScriptLoadError::new(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScriptLoadError::new(format!(
                "script status {}",
                status.as_u16()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|err| ScriptLoadError::new(format!("script read failed: {err}")))?;

        if let Some((name, argument)) = extract_invocation(&body) {
            match serde_json::from_str::<Value>(&argument) {
                Ok(value) => {
                    registry.dispatch(&name, value);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "script callback argument is not json");
                }
            }
        }
        Ok(())
    }
}

/// Pull `name(<json>)` out of a script body. Returns `None` when the body
/// does not look like a single callback invocation.
fn extract_invocation(script: &str) -> Option<(String, String)> {
    let text = script.trim();
    let open = text.find('(')?;
    let close = text.rfind(')')?;
    if close <= open {
        return None;
    }
    let name = text[..open].trim();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return None;
    }
    let argument = text[open + 1..close].trim();
    Some((name.to_string(), argument.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use url::Url;

    use super::{
        CALLBACK_GRACE_MS, CallbackRegistry, JsonpChannel, ScriptLoader, build_script_url,
        extract_invocation,
    };
    use crate::channel::ScriptChannel;
    use crate::envelope::{Identity, RequestEnvelope};
    use crate::error::{ClientError, ScriptLoadError};

    const ENDPOINT: &str = "https://host.example/macros/s/abc/exec";

    fn envelope() -> RequestEnvelope {
        RequestEnvelope::build(
            "docs.list",
            json!({"page": 2}),
            &Identity::new("dk_1", "ip_1"),
            None,
        )
    }

    fn callback_param(url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        parsed
            .query_pairs()
            .find(|(key, _)| key == "callback")
            .map(|(_, value)| value.into_owned())
    }

    /// Parses the callback name from the URL and answers immediately.
    struct EchoLoader {
        response: Value,
    }

    #[async_trait]
    impl ScriptLoader for EchoLoader {
        async fn load(&self, url: &str, registry: &CallbackRegistry) -> Result<(), ScriptLoadError> {
            let name = callback_param(url).ok_or_else(|| ScriptLoadError::new("no callback"))?;
            registry.dispatch(&name, self.response.clone());
            Ok(())
        }
    }

    /// Loads fine but never calls back; remembers the callback name.
    #[derive(Default)]
    struct SilentLoader {
        seen: Arc<Mutex<Option<String>>>,
    }

    #[async_trait]
    impl ScriptLoader for SilentLoader {
        async fn load(&self, url: &str, _registry: &CallbackRegistry) -> Result<(), ScriptLoadError> {
            if let Ok(mut seen) = self.seen.lock() {
                *seen = callback_param(url);
            }
            Ok(())
        }
    }

    struct FailingLoader;

    #[async_trait]
    impl ScriptLoader for FailingLoader {
        async fn load(
            &self,
            _url: &str,
            _registry: &CallbackRegistry,
        ) -> Result<(), ScriptLoadError> {
            Err(ScriptLoadError::new("blocked by proxy"))
        }
    }

    struct HangingLoader;

    #[async_trait]
    impl ScriptLoader for HangingLoader {
        async fn load(
            &self,
            _url: &str,
            _registry: &CallbackRegistry,
        ) -> Result<(), ScriptLoadError> {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
            Ok(())
        }
    }

    #[test]
    fn registry_slots_settle_exactly_once() {
        let registry = CallbackRegistry::new();
        let mut receiver = registry.register("cb_1");

        assert!(registry.dispatch("cb_1", json!({"success": true})));
        assert!(!registry.dispatch("cb_1", json!({"success": false})));
        assert!(matches!(receiver.try_recv(), Ok(value) if value["success"] == json!(true)));

        registry.unregister("cb_1");
        registry.unregister("cb_1");
        assert!(registry.is_empty());
        assert!(!registry.dispatch("cb_unknown", json!({})));
    }

    #[test]
    fn script_url_carries_action_callback_payload_and_buster() {
        let url = build_script_url(ENDPOINT, &envelope(), "cb_test");
        let url = if let Ok(url) = url {
            url
        } else {
            assert!(false, "url should build");
            return;
        };
        let parsed = if let Ok(parsed) = Url::parse(&url) {
            parsed
        } else {
            assert!(false, "url should parse");
            return;
        };
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "api",
                "action",
                "callback",
                "dk",
                "deviceKey",
                "ipk",
                "clientIpKey",
                "payload",
                "_"
            ]
        );
        let lookup = |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        assert_eq!(lookup("action"), "docs.list");
        assert_eq!(lookup("callback"), "cb_test");
        assert_eq!(lookup("payload"), r#"{"page":2}"#);
        assert!(!lookup("_").is_empty());
    }

    #[test]
    fn invocation_extraction_handles_the_wire_shapes() {
        assert_eq!(
            extract_invocation(r#"cb_1({"success":true});"#),
            Some(("cb_1".to_string(), r#"{"success":true}"#.to_string()))
        );
        assert_eq!(
            extract_invocation("  cb_2 ( {\"a\": [1,2]} )  "),
            Some(("cb_2".to_string(), r#"{"a": [1,2]}"#.to_string()))
        );
        // Nested parens inside the argument survive the outer match.
        assert_eq!(
            extract_invocation(r#"cb_3({"text":"a (nested) note"})"#),
            Some((
                "cb_3".to_string(),
                r#"{"text":"a (nested) note"}"#.to_string()
            ))
        );
        assert_eq!(extract_invocation("<html>sign in</html>"), None);
        assert_eq!(extract_invocation("var x = 1;"), None);
        assert_eq!(extract_invocation("not a name()("), None);
        assert_eq!(extract_invocation(""), None);
    }

    #[tokio::test]
    async fn callback_resolves_the_call() {
        let channel = JsonpChannel::new(EchoLoader {
            response: json!({"success": true, "rows": [1, 2, 3]}),
        });
        let result = channel
            .send(ENDPOINT, &envelope(), Duration::from_secs(5))
            .await;
        assert!(matches!(&result, Ok(envelope) if envelope.has_field("rows")));
        assert!(channel.registry().is_empty());
    }

    #[tokio::test]
    async fn failure_envelope_from_callback_is_application_class() {
        let channel = JsonpChannel::new(EchoLoader {
            response: json!({"success": false, "code": "unauthorized", "error": "no session"}),
        });
        let result = channel
            .send(ENDPOINT, &envelope(), Duration::from_secs(5))
            .await;
        assert!(matches!(
            &result,
            Err(ClientError::Api { code, .. }) if code == "unauthorized"
        ));
        assert!(channel.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_script_times_out_after_the_grace_window() {
        let seen = Arc::new(Mutex::new(None));
        let channel = JsonpChannel::new(SilentLoader { seen: seen.clone() });

        let started = tokio::time::Instant::now();
        let result = channel
            .send(ENDPOINT, &envelope(), Duration::from_secs(30))
            .await;
        assert!(matches!(result, Err(ClientError::NoCallback)));
        // The grace window, not the overall timer, ended the call.
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(started.elapsed() >= Duration::from_millis(CALLBACK_GRACE_MS));

        // The slot is gone: a late dispatch finds nobody.
        let name = seen.lock().ok().and_then(|seen| seen.clone());
        let name = if let Some(name) = name {
            name
        } else {
            assert!(false, "loader should have seen a callback name");
            return;
        };
        assert!(!channel.registry().dispatch(&name, json!({"success": true})));
        assert!(channel.registry().is_empty());
    }

    #[tokio::test]
    async fn load_failure_is_unreachable() {
        let channel = JsonpChannel::new(FailingLoader);
        let result = channel
            .send(ENDPOINT, &envelope(), Duration::from_secs(5))
            .await;
        assert!(matches!(
            &result,
            Err(ClientError::Unreachable { detail }) if detail.contains("blocked")
        ));
        assert!(channel.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_load_hits_the_overall_timer() {
        let channel = JsonpChannel::new(HangingLoader);
        let result = channel
            .send(ENDPOINT, &envelope(), Duration::from_secs(30))
            .await;
        assert!(matches!(
            result,
            Err(ClientError::Timeout { timeout_ms: 30_000 })
        ));
        assert!(channel.registry().is_empty());
    }
}
