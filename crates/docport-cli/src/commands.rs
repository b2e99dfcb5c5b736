//! Handlers behind the `docport` subcommands.
//!
//! Each handler builds a client from the resolved [`Settings`], runs one
//! facade call, and prints the response envelope as pretty JSON.

use anyhow::{Context, Result};
use docport_client::{
    CallOptions, Capabilities, ClientError, DocsQuery, HttpPostChannel, HttpScriptLoader,
    Identity, JsonpChannel, LoginRequest, PostChannel, RequestEnvelope, ResponseEnvelope,
    ScriptChannel,
};
use serde_json::json;

use crate::settings::Settings;

const ENV_PASSWORD: &str = "DOCPORT_PASSWORD";

pub async fn health(settings: &Settings) -> Result<()> {
    let client = settings.client()?;
    let response = client.health(&CallOptions::default()).await?;
    print_envelope(&response)
}

pub async fn login(settings: &Settings, username: &str, password: Option<String>) -> Result<()> {
    let password = password
        .or_else(|| std::env::var(ENV_PASSWORD).ok())
        .filter(|value| !value.is_empty())
        .with_context(|| format!("no password given; pass --password or set {ENV_PASSWORD}"))?;

    let client = settings.client()?;
    let response = client
        .login(LoginRequest::new(username, password), &CallOptions::default())
        .await?;
    print_envelope(&response)
}

pub async fn logout(settings: &Settings) -> Result<()> {
    let client = settings.client()?;
    let response = client.logout(&CallOptions::default()).await?;
    print_envelope(&response)
}

pub async fn me(settings: &Settings, refresh: bool) -> Result<()> {
    let client = settings.client()?;
    let opts = CallOptions {
        force_refresh: refresh,
        ..CallOptions::default()
    };
    let response = client.me(&opts).await?;
    print_envelope(&response)
}

pub async fn docs_list(
    settings: &Settings,
    page: u32,
    per_page: u32,
    search: &str,
    status: &str,
) -> Result<()> {
    let client = settings.client()?;
    let query = DocsQuery {
        page,
        items_per_page: per_page,
        search_query: search.to_string(),
        status_filter: status.to_string(),
    };
    let response = client.docs_list(&query, &CallOptions::default()).await?;
    print_envelope(&response)
}

pub async fn doc_detail(settings: &Settings, id: &str) -> Result<()> {
    let client = settings.client()?;
    let response = client.doc_detail(id, &CallOptions::default()).await?;
    print_envelope(&response)
}

/// Probe both channels directly, outside the selector, so each one's
/// verdict stands on its own.
pub async fn doctor(settings: &Settings) -> Result<()> {
    let client = settings.client()?;
    println!("endpoint:            {}", client.endpoint());
    println!("device key:          {}", client.device_key());
    println!("configured transport: {}", settings.transport);
    println!("session transport:    {}", client.transport_mode());
    if let Some(dir) = &settings.state_dir {
        println!("state dir:           {}", dir.display());
    }
    println!();

    let identity = Identity::new(
        client.device_key(),
        settings.client_ip_key.clone().unwrap_or_default(),
    );
    let envelope = RequestEnvelope::build("health", json!({}), &identity, None);
    let timeout = std::time::Duration::from_millis(settings.timeout_ms);

    let post = HttpPostChannel::new(Capabilities::detect());
    report("post ", post.send(client.endpoint(), &envelope, timeout).await);

    let jsonp = JsonpChannel::new(HttpScriptLoader::new());
    report("jsonp", jsonp.send(client.endpoint(), &envelope, timeout).await);

    Ok(())
}

fn report(channel: &str, outcome: Result<ResponseEnvelope, ClientError>) {
    match outcome {
        Ok(_) => println!("{channel} ok"),
        Err(err) => println!("{channel} failed: {err}"),
    }
}

fn print_envelope(envelope: &ResponseEnvelope) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(envelope).context("failed to render JSON output")?;
    println!("{rendered}");
    Ok(())
}
