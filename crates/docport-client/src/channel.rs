use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::ClientError;

/// How a call should reach the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Try the post channel first, fall back to the script channel.
    Auto,
    /// Post channel first (explicitly chosen or remembered).
    Post,
    /// Script channel first.
    Jsonp,
}

impl TransportMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Post => "post",
            Self::Jsonp => "jsonp",
        }
    }

    /// Parse a stored or user-supplied mode. Unknown values are `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "post" => Some(Self::Post),
            "jsonp" => Some(Self::Jsonp),
            _ => None,
        }
    }

    /// Value written to the preference store. `Auto` is a resolution
    /// strategy, not a channel, and is never persisted.
    #[must_use]
    pub fn persisted_value(self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::Post => Some("post"),
            Self::Jsonp => Some("jsonp"),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/response channel: one POST, one body, one parsed envelope.
#[async_trait]
pub trait PostChannel: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        envelope: &RequestEnvelope,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, ClientError>;
}

/// Script-injection channel: a GET for a script resource that invokes a
/// named callback with the envelope.
#[async_trait]
pub trait ScriptChannel: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        envelope: &RequestEnvelope,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, ClientError>;
}
