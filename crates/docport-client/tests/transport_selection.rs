//! Channel selection, retry, fallback and preference persistence,
//! exercised through scripted in-memory channels.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use docport_client::prefs::{TRANSPORT_PREF_PREFIX, endpoint_scope};
use docport_client::{
    CallOptions, ClientConfig, ClientError, DocRegistryClient, KeyValueStore, MemoryStore,
    PostChannel, RequestEnvelope, ResponseEnvelope, ScriptChannel, TransportMode,
};

const ENDPOINT: &str = "https://host.example/macros/s/abc/exec";

type Outcome = Result<ResponseEnvelope, ClientError>;

/// Channel double that replays a fixed sequence of outcomes and records
/// every call it saw. It implements both channel traits so one type
/// covers both sides of the selector.
struct ScriptedChannel {
    outcomes: Mutex<VecDeque<Outcome>>,
    calls: Mutex<Vec<(String, u64)>>,
}

impl ScriptedChannel {
    fn new(outcomes: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn next_outcome(&self) -> Outcome {
        self.outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front())
            .unwrap_or_else(|| {
                Err(ClientError::Unreachable {
                    detail: "unscripted call".to_string(),
                })
            })
    }

    fn record(&self, envelope: &RequestEnvelope, timeout: Duration) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((envelope.action.clone(), timeout.as_millis() as u64));
        }
    }

    fn calls(&self) -> Vec<(String, u64)> {
        self.calls
            .lock()
            .map_or_else(|_| Vec::new(), |calls| calls.clone())
    }

    fn call_count(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl PostChannel for ScriptedChannel {
    async fn send(
        &self,
        _endpoint: &str,
        envelope: &RequestEnvelope,
        timeout: Duration,
    ) -> Outcome {
        self.record(envelope, timeout);
        self.next_outcome()
    }
}

#[async_trait]
impl ScriptChannel for ScriptedChannel {
    async fn send(
        &self,
        _endpoint: &str,
        envelope: &RequestEnvelope,
        timeout: Duration,
    ) -> Outcome {
        self.record(envelope, timeout);
        self.next_outcome()
    }
}

fn ok_via(channel: &str) -> Outcome {
    ResponseEnvelope::parse(&json!({"success": true, "via": channel}).to_string())
}

fn timeout_err() -> Outcome {
    Err(ClientError::Timeout { timeout_ms: 15_000 })
}

fn no_callback_err() -> Outcome {
    Err(ClientError::NoCallback)
}

fn unreachable_err() -> Outcome {
    Err(ClientError::Unreachable {
        detail: "connection refused".to_string(),
    })
}

fn api_err(code: &str) -> Outcome {
    Err(ClientError::Api {
        code: code.to_string(),
        message: "rejected".to_string(),
    })
}

fn config() -> anyhow::Result<ClientConfig> {
    Ok(ClientConfig::new(ENDPOINT)?)
}

struct Rig {
    client: DocRegistryClient,
    post: Arc<ScriptedChannel>,
    jsonp: Arc<ScriptedChannel>,
    durable: Arc<dyn KeyValueStore>,
}

fn rig(config: ClientConfig, post: Arc<ScriptedChannel>, jsonp: Arc<ScriptedChannel>) -> Rig {
    let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let client = DocRegistryClient::builder(config)
        .durable_store(Arc::clone(&durable))
        .post_channel(Arc::clone(&post) as Arc<dyn PostChannel>)
        .script_channel(Arc::clone(&jsonp) as Arc<dyn ScriptChannel>)
        .build();
    Rig {
        client,
        post,
        jsonp,
        durable,
    }
}

fn stored_preference(durable: &Arc<dyn KeyValueStore>) -> Option<String> {
    let key = format!("{TRANSPORT_PREF_PREFIX}:{}", endpoint_scope(ENDPOINT));
    durable.get(&key).ok().flatten()
}

fn answered_via(response: &ResponseEnvelope) -> Option<String> {
    response
        .field("via")
        .and_then(|value| value.as_str())
        .map(ToString::to_string)
}

#[tokio::test]
async fn post_success_in_auto_persists_the_post_preference() -> anyhow::Result<()> {
    let rig = rig(
        config()?,
        ScriptedChannel::new(vec![ok_via("post")]),
        ScriptedChannel::new(vec![]),
    );

    let response = rig
        .client
        .call("health", json!({}), &CallOptions::default())
        .await?;
    assert_eq!(answered_via(&response).as_deref(), Some("post"));
    assert_eq!(rig.jsonp.call_count(), 0);
    assert_eq!(stored_preference(&rig.durable).as_deref(), Some("post"));
    Ok(())
}

#[tokio::test]
async fn api_rejection_over_post_never_fails_over() -> anyhow::Result<()> {
    let rig = rig(
        config()?,
        ScriptedChannel::new(vec![api_err("unauthorized")]),
        ScriptedChannel::new(vec![ok_via("jsonp")]),
    );

    let result = rig
        .client
        .call("auth.me", json!({}), &CallOptions::default())
        .await;
    assert!(matches!(
        &result,
        Err(ClientError::Api { code, .. }) if code == "unauthorized"
    ));
    assert_eq!(rig.jsonp.call_count(), 0);
    assert_eq!(stored_preference(&rig.durable), None);
    Ok(())
}

#[tokio::test]
async fn post_transport_failure_falls_back_to_the_script_channel() -> anyhow::Result<()> {
    let rig = rig(
        config()?,
        ScriptedChannel::new(vec![Err(ClientError::Http { status: 500 })]),
        ScriptedChannel::new(vec![ok_via("jsonp")]),
    );

    let response = rig
        .client
        .call("docs.list", json!({}), &CallOptions::default())
        .await?;
    assert_eq!(answered_via(&response).as_deref(), Some("jsonp"));
    assert_eq!(rig.post.call_count(), 1);
    assert_eq!(rig.jsonp.call_count(), 1);
    assert_eq!(stored_preference(&rig.durable).as_deref(), Some("jsonp"));
    Ok(())
}

#[tokio::test]
async fn missing_post_capability_error_falls_back_to_the_script_channel() -> anyhow::Result<()> {
    let rig = rig(
        config()?.with_transport(TransportMode::Post),
        ScriptedChannel::new(vec![Err(ClientError::PostUnsupported)]),
        ScriptedChannel::new(vec![ok_via("jsonp")]),
    );

    let response = rig
        .client
        .call("health", json!({}), &CallOptions::default())
        .await?;
    assert_eq!(answered_via(&response).as_deref(), Some("jsonp"));
    Ok(())
}

#[tokio::test]
async fn script_fallback_failure_propagates_the_fallback_error() -> anyhow::Result<()> {
    let rig = rig(
        config()?,
        ScriptedChannel::new(vec![unreachable_err()]),
        ScriptedChannel::new(vec![no_callback_err()]),
    );

    let result = rig
        .client
        .call("health", json!({}), &CallOptions::default())
        .await;
    // Post-first recovery surfaces the later, script-side error.
    assert!(matches!(result, Err(ClientError::NoCallback)));
    assert_eq!(stored_preference(&rig.durable), None);
    Ok(())
}

#[tokio::test]
async fn script_timeout_earns_one_retry_with_a_stretched_window() -> anyhow::Result<()> {
    let rig = rig(
        config()?.with_transport(TransportMode::Jsonp),
        ScriptedChannel::new(vec![]),
        ScriptedChannel::new(vec![timeout_err(), ok_via("jsonp")]),
    );

    let response = rig
        .client
        .call("docs.list", json!({}), &CallOptions::default())
        .await?;
    assert_eq!(answered_via(&response).as_deref(), Some("jsonp"));

    let calls = rig.jsonp.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1, 15_000);
    assert_eq!(calls[1].1, 22_500);
    assert_eq!(rig.post.call_count(), 0);
    assert_eq!(stored_preference(&rig.durable).as_deref(), Some("jsonp"));
    Ok(())
}

#[tokio::test]
async fn retry_window_is_derived_from_the_raw_override_and_clamped() -> anyhow::Result<()> {
    let rig = rig(
        config()?.with_transport(TransportMode::Jsonp),
        ScriptedChannel::new(vec![]),
        ScriptedChannel::new(vec![timeout_err(), ok_via("jsonp")]),
    );

    let opts = CallOptions {
        timeout_ms: Some(2_000),
        ..CallOptions::default()
    };
    rig.client.call("health", json!({}), &opts).await?;

    let calls = rig.jsonp.calls();
    // 2 000 clamps to the 5 000 floor for the first leg; the retry's
    // 1.5x is computed from the raw override and clamps to 5 000 too.
    assert_eq!(calls[0].1, 5_000);
    assert_eq!(calls[1].1, 5_000);
    Ok(())
}

#[tokio::test]
async fn failed_retry_falls_back_and_the_original_error_wins() -> anyhow::Result<()> {
    let rig = rig(
        config()?.with_transport(TransportMode::Jsonp),
        ScriptedChannel::new(vec![Err(ClientError::Http { status: 502 })]),
        ScriptedChannel::new(vec![no_callback_err(), timeout_err()]),
    );

    let result = rig
        .client
        .call("health", json!({}), &CallOptions::default())
        .await;
    assert!(matches!(result, Err(ClientError::NoCallback)));
    assert_eq!(rig.jsonp.call_count(), 2);
    assert_eq!(rig.post.call_count(), 1);
    assert_eq!(stored_preference(&rig.durable), None);
    Ok(())
}

#[tokio::test]
async fn script_unreachable_skips_the_retry_but_still_falls_back() -> anyhow::Result<()> {
    let rig = rig(
        config()?.with_transport(TransportMode::Jsonp),
        ScriptedChannel::new(vec![ok_via("post")]),
        ScriptedChannel::new(vec![unreachable_err()]),
    );

    let response = rig
        .client
        .call("health", json!({}), &CallOptions::default())
        .await?;
    assert_eq!(answered_via(&response).as_deref(), Some("post"));
    assert_eq!(rig.jsonp.call_count(), 1);
    assert_eq!(stored_preference(&rig.durable).as_deref(), Some("post"));
    Ok(())
}

#[tokio::test]
async fn forced_jsonp_only_fails_immediately_without_recovery() -> anyhow::Result<()> {
    let rig = rig(
        config()?,
        ScriptedChannel::new(vec![ok_via("post")]),
        ScriptedChannel::new(vec![unreachable_err()]),
    );

    let opts = CallOptions {
        jsonp_only: true,
        ..CallOptions::default()
    };
    let result = rig.client.call("health", json!({}), &opts).await;
    assert!(matches!(result, Err(ClientError::Unreachable { .. })));
    assert_eq!(rig.jsonp.call_count(), 1);
    assert_eq!(rig.post.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn malformed_script_response_is_terminal_in_script_mode() -> anyhow::Result<()> {
    let rig = rig(
        config()?.with_transport(TransportMode::Jsonp),
        ScriptedChannel::new(vec![ok_via("post")]),
        ScriptedChannel::new(vec![Err(ClientError::InvalidResponse {
            detail: "not an object".to_string(),
        })]),
    );

    let result = rig
        .client
        .call("health", json!({}), &CallOptions::default())
        .await;
    assert!(matches!(result, Err(ClientError::InvalidResponse { .. })));
    assert_eq!(rig.jsonp.call_count(), 1);
    assert_eq!(rig.post.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn script_success_while_auto_switches_future_clients() -> anyhow::Result<()> {
    let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let post = ScriptedChannel::new(vec![unreachable_err()]);
    let jsonp = ScriptedChannel::new(vec![ok_via("jsonp")]);
    let client = DocRegistryClient::builder(config()?)
        .durable_store(Arc::clone(&durable))
        .post_channel(Arc::clone(&post) as Arc<dyn PostChannel>)
        .script_channel(Arc::clone(&jsonp) as Arc<dyn ScriptChannel>)
        .build();

    client.call("health", json!({}), &CallOptions::default()).await?;
    assert_eq!(client.transport_mode(), TransportMode::Jsonp);

    // A client built later on the same store starts on the script channel.
    let later = DocRegistryClient::builder(config()?)
        .durable_store(Arc::clone(&durable))
        .build();
    assert_eq!(later.transport_mode(), TransportMode::Jsonp);
    Ok(())
}

#[tokio::test]
async fn auto_post_success_does_not_overwrite_a_settled_script_preference() -> anyhow::Result<()> {
    let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let seed = DocRegistryClient::builder(config()?)
        .durable_store(Arc::clone(&durable))
        .post_channel(ScriptedChannel::new(vec![unreachable_err()]) as Arc<dyn PostChannel>)
        .script_channel(ScriptedChannel::new(vec![ok_via("jsonp")]) as Arc<dyn ScriptChannel>)
        .build();
    seed.call("health", json!({}), &CallOptions::default()).await?;
    assert_eq!(stored_preference(&durable).as_deref(), Some("jsonp"));

    // Same client, explicit auto call that succeeds over POST: the
    // settled script preference stays put.
    let post = ScriptedChannel::new(vec![ok_via("post")]);
    let client = DocRegistryClient::builder(config()?)
        .durable_store(Arc::clone(&durable))
        .post_channel(Arc::clone(&post) as Arc<dyn PostChannel>)
        .script_channel(ScriptedChannel::new(vec![]) as Arc<dyn ScriptChannel>)
        .build();
    assert_eq!(client.transport_mode(), TransportMode::Jsonp);

    let opts = CallOptions {
        transport: Some(TransportMode::Auto),
        ..CallOptions::default()
    };
    let response = client.call("health", json!({}), &opts).await?;
    assert_eq!(answered_via(&response).as_deref(), Some("post"));
    assert_eq!(client.transport_mode(), TransportMode::Jsonp);
    assert_eq!(stored_preference(&durable).as_deref(), Some("jsonp"));
    Ok(())
}

#[tokio::test]
async fn forced_post_success_rewrites_a_script_preference() -> anyhow::Result<()> {
    let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let seed = DocRegistryClient::builder(config()?)
        .durable_store(Arc::clone(&durable))
        .script_channel(ScriptedChannel::new(vec![ok_via("jsonp")]) as Arc<dyn ScriptChannel>)
        .build();
    let opts = CallOptions {
        jsonp_only: true,
        ..CallOptions::default()
    };
    seed.call("health", json!({}), &opts).await?;
    assert_eq!(stored_preference(&durable).as_deref(), Some("jsonp"));

    let client = DocRegistryClient::builder(config()?)
        .durable_store(Arc::clone(&durable))
        .post_channel(ScriptedChannel::new(vec![ok_via("post")]) as Arc<dyn PostChannel>)
        .build();
    let opts = CallOptions {
        transport: Some(TransportMode::Post),
        ..CallOptions::default()
    };
    client.call("health", json!({}), &opts).await?;
    assert_eq!(stored_preference(&durable).as_deref(), Some("post"));
    Ok(())
}
