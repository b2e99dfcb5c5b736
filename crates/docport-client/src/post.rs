use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::channel::PostChannel;
use crate::config::Capabilities;
use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::ClientError;

/// The endpoint rejects preflighted requests, so the body goes out as a
/// "simple" content type with the JSON inside.
const POST_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

/// HTTP implementation of the post channel.
pub struct HttpPostChannel {
    http: reqwest::Client,
    capabilities: Capabilities,
}

impl HttpPostChannel {
    #[must_use]
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            http: reqwest::Client::new(),
            capabilities,
        }
    }

    /// Reuse an existing connection pool.
    #[must_use]
    pub fn with_http(http: reqwest::Client, capabilities: Capabilities) -> Self {
        Self { http, capabilities }
    }
}

impl Default for HttpPostChannel {
    fn default() -> Self {
        Self::new(Capabilities::detect())
    }
}

#[async_trait]
impl PostChannel for HttpPostChannel {
    async fn send(
        &self,
        endpoint: &str,
        envelope: &RequestEnvelope,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, ClientError> {
        if !self.capabilities.post {
            return Err(ClientError::PostUnsupported);
        }

        let url = build_post_url(endpoint, envelope)?;
        let body = serde_json::to_string(envelope).map_err(|err| ClientError::Unreachable {
            detail: format!("request encode failed: {err}"),
        })?;

        let exchange = async {
            let response = self
                .http
                .post(url)
                .header(CONTENT_TYPE, POST_CONTENT_TYPE)
                .body(body)
                .send()
                .await
                .map_err(|err| ClientError::Unreachable {
                    detail: err.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(ClientError::Http {
                    status: status.as_u16(),
                });
            }

            let text = response
                .text()
                .await
                .map_err(|err| ClientError::Unreachable {
                    detail: format!("body read failed: {err}"),
                })?;
            // Parsing folds `success: false` into an application error, so
            // a returned envelope is always a successful one.
            ResponseEnvelope::parse(&text)
        };

        // The timer wins the race outright; the in-flight exchange is
        // dropped, not awaited further.
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

fn build_post_url(endpoint: &str, envelope: &RequestEnvelope) -> Result<Url, ClientError> {
    let mut url = Url::parse(endpoint).map_err(|err| ClientError::Unreachable {
        detail: format!("endpoint not a url: {err}"),
    })?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("api", "1");
        for (key, value) in envelope.identity_query_pairs() {
            query.append_pair(key, value);
        }
    }
    Ok(url)
}
