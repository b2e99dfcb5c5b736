use thiserror::Error;

/// Failure raised by [`crate::DocRegistryClient`] calls and by the
/// individual channels.
///
/// Variants split into two classes. Transport-class errors mean the
/// envelope never made it to application code on the endpoint (or the
/// answer never made it back); the selector may retry or switch channels
/// on those. [`ClientError::Api`] is application-class: the endpoint
/// answered with a well-formed envelope carrying `success: false`, and the
/// selector must surface it untouched.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The channel timer fired before the endpoint answered. The in-flight
    /// exchange is abandoned, not cancelled server-side.
    #[error("timeout: no response within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The post channel got a non-2xx status. The body is not inspected.
    #[error("http_{status}: endpoint returned a non-success status")]
    Http { status: u16 },

    /// The script resource loaded but the named callback never fired
    /// within the grace window. Usually a sign the endpoint is not a
    /// script-callback deployment (or the action name is unknown).
    #[error("no_callback: script loaded but the callback never fired")]
    NoCallback,

    /// The request could not be delivered at all: connect failure, DNS,
    /// interrupted body read, or a script resource that failed to load.
    #[error("unreachable: {detail}")]
    Unreachable { detail: String },

    /// The environment offers no usable POST primitive.
    #[error("post_unsupported: no request primitive available")]
    PostUnsupported,

    /// The endpoint answered with something that is not a JSON object
    /// envelope.
    #[error("invalid_response: {detail}")]
    InvalidResponse { detail: String },

    /// Application-level rejection: a well-formed envelope with
    /// `success: false`. `code` defaults to `api_error` when the endpoint
    /// omits it.
    #[error("{code}: {message}")]
    Api { code: String, message: String },
}

impl ClientError {
    /// `true` for application-class rejections (`success: false`).
    #[must_use]
    pub fn is_application(&self) -> bool {
        matches!(self, Self::Api { .. })
    }

    /// `true` for anything eligible for fallback between channels.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        !self.is_application()
    }

    /// `true` for the two script-channel failures worth one retry with a
    /// stretched timer: the endpoint may simply have been slow.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::NoCallback)
    }

    /// Application error code, when this is an application-class failure.
    #[must_use]
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Failure from a [`crate::KeyValueStore`] implementation.
///
/// Callers inside this crate treat every store failure as soft: a failed
/// preference read falls back to defaults, a failed cache write is dropped.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store_io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store_serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store_poisoned: lock poisoned")]
    Poisoned,
}

/// Invalid client configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("endpoint_missing: an endpoint URL is required")]
    EndpointMissing,
    #[error("endpoint_invalid: `{0}` is not an absolute http(s) URL")]
    EndpointInvalid(String),
}

/// Failure reported by a [`crate::ScriptLoader`] when the script resource
/// cannot be fetched or executed.
#[derive(Debug, Error)]
#[error("script_load: {detail}")]
pub struct ScriptLoadError {
    pub detail: String,
}

impl ScriptLoadError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}
