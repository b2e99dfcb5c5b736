use url::Url;
use uuid::Uuid;

use crate::channel::TransportMode;
use crate::error::ConfigError;

/// Default per-call timeout when neither the config nor the call options
/// set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
/// Lower clamp for call timeouts.
pub const MIN_TIMEOUT_MS: u64 = 5_000;
/// Upper clamp for call timeouts (also caps the stretched retry timer).
pub const MAX_TIMEOUT_MS: u64 = 120_000;

/// Validated client configuration.
///
/// The endpoint is normalized on construction: a staging `/dev` path
/// segment is rewritten to the published `/exec` segment, and the result
/// must be an absolute http(s) URL.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub device_key: String,
    pub client_ip_key: String,
    pub timeout_ms: u64,
    pub transport: TransportMode,
}

impl ClientConfig {
    pub fn new(endpoint: impl AsRef<str>) -> Result<Self, ConfigError> {
        let endpoint = normalize_endpoint(endpoint.as_ref())?;
        Ok(Self {
            endpoint,
            device_key: String::new(),
            client_ip_key: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            transport: TransportMode::Auto,
        })
    }

    #[must_use]
    pub fn with_device_key(mut self, device_key: impl AsRef<str>) -> Self {
        self.device_key = device_key.as_ref().trim().to_string();
        self
    }

    #[must_use]
    pub fn with_client_ip_key(mut self, client_ip_key: impl AsRef<str>) -> Self {
        self.client_ip_key = client_ip_key.as_ref().trim().to_string();
        self
    }

    /// Set the default call timeout. Values outside the supported window
    /// are clamped; zero falls back to [`DEFAULT_TIMEOUT_MS`].
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = if timeout_ms == 0 {
            DEFAULT_TIMEOUT_MS
        } else {
            clamp_timeout_ms(timeout_ms)
        };
        self
    }

    /// Pin the starting transport instead of resolving it from the
    /// persisted preference and capability detection.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }
}

/// Rewrite a staging endpoint to its published form and validate it.
///
/// The `/dev` segment is only rewritten when it ends the path (optionally
/// followed by a query or fragment); `/dev/` mid-path is left alone. The
/// comparison is case-insensitive.
pub fn normalize_endpoint(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EndpointMissing);
    }
    let rewritten = rewrite_dev_suffix(trimmed);
    let parsed =
        Url::parse(&rewritten).map_err(|_| ConfigError::EndpointInvalid(rewritten.clone()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::EndpointInvalid(rewritten));
    }
    Ok(rewritten)
}

fn rewrite_dev_suffix(url: &str) -> String {
    let lowered = url.to_ascii_lowercase();
    for (idx, _) in lowered.match_indices("/dev") {
        let rest = &url[idx + 4..];
        if rest.is_empty() || rest.starts_with('?') || rest.starts_with('#') {
            let mut out = String::with_capacity(url.len() + 1);
            out.push_str(&url[..idx]);
            out.push_str("/exec");
            out.push_str(rest);
            return out;
        }
    }
    url.to_string()
}

/// Clamp a timeout into the supported window.
#[must_use]
pub fn clamp_timeout_ms(timeout_ms: u64) -> u64 {
    timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

/// Effective timeout for one call: the per-call override when given and
/// positive (clamped), otherwise the configured default.
pub(crate) fn resolve_timeout_ms(override_ms: Option<u64>, default_ms: u64) -> u64 {
    match override_ms {
        Some(ms) if ms > 0 => clamp_timeout_ms(ms),
        _ => default_ms,
    }
}

/// Generate a fresh device key.
#[must_use]
pub fn random_device_key() -> String {
    format!("dk_{}", Uuid::new_v4().simple())
}

/// What the running environment can do, injected so tests and embedders
/// can simulate environments without a POST primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// A request/response POST primitive is available.
    pub post: bool,
}

impl Capabilities {
    /// Probe the current environment. The bundled HTTP stack is always
    /// compiled in, so this reports POST support; embedders behind
    /// script-only egress inject their own value instead.
    #[must_use]
    pub fn detect() -> Self {
        Self { post: true }
    }

    /// An environment where only the script channel works.
    #[must_use]
    pub fn script_only() -> Self {
        Self { post: false }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}
