use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClientError;

/// Session identity attached to outgoing requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub device_key: String,
    pub client_ip_key: String,
}

impl Identity {
    pub fn new(device_key: impl Into<String>, client_ip_key: impl Into<String>) -> Self {
        Self {
            device_key: device_key.into(),
            client_ip_key: client_ip_key.into(),
        }
    }
}

/// Outgoing request body.
///
/// The endpoint reads identity under several historical spellings, so the
/// resolved device key is mirrored as `deviceKey`/`dk` and the ip key as
/// `clientIpKey`/`ipKey`/`ipk`. Aliases are only written when the resolved
/// value is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub action: String,
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RequestEnvelope {
    /// Assemble the body for one call.
    ///
    /// Identity explicitly present in the payload wins over the client
    /// defaults; within the payload, the canonical spelling wins over its
    /// aliases. Anything that is not a JSON object is treated as an empty
    /// payload.
    pub fn build(
        action: &str,
        payload: Value,
        identity: &Identity,
        request_id: Option<String>,
    ) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let device_key = non_empty(
            first_non_empty(&payload, &["deviceKey", "dk"])
                .unwrap_or_else(|| identity.device_key.trim().to_string()),
        );
        let ip_key = non_empty(
            first_non_empty(&payload, &["clientIpKey", "ipKey", "ipk"])
                .unwrap_or_else(|| identity.client_ip_key.trim().to_string()),
        );

        Self {
            action: action.to_string(),
            payload,
            dk: device_key.clone(),
            device_key,
            client_ip_key: ip_key.clone(),
            ipk: ip_key.clone(),
            ip_key,
            request_id: request_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
        }
    }

    /// Resolved device key, if any.
    #[must_use]
    pub fn device_key(&self) -> Option<&str> {
        self.device_key.as_deref()
    }

    /// Resolved client ip key, if any.
    #[must_use]
    pub fn client_ip_key(&self) -> Option<&str> {
        self.client_ip_key.as_deref()
    }

    /// Identity pairs in the order the endpoint expects them on the query
    /// string. Empty identity contributes nothing.
    #[must_use]
    pub fn identity_query_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = Vec::with_capacity(4);
        if let Some(dk) = self.dk.as_deref() {
            pairs.push(("dk", dk));
        }
        if let Some(device_key) = self.device_key.as_deref() {
            pairs.push(("deviceKey", device_key));
        }
        if let Some(ipk) = self.ipk.as_deref() {
            pairs.push(("ipk", ipk));
        }
        if let Some(client_ip_key) = self.client_ip_key.as_deref() {
            pairs.push(("clientIpKey", client_ip_key));
        }
        pairs
    }
}

fn first_non_empty(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        map.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

/// Parsed response body.
///
/// `success` defaults to `true` when the endpoint omits it; everything
/// beyond the envelope fields lands in `data` and is reachable through
/// [`ResponseEnvelope::field`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

fn default_success() -> bool {
    true
}

impl ResponseEnvelope {
    /// Parse and validate a response body.
    ///
    /// Non-JSON text and JSON that is not an object fail with
    /// [`ClientError::InvalidResponse`]; a well-formed envelope carrying
    /// `success: false` fails with [`ClientError::Api`].
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| ClientError::InvalidResponse {
                detail: format!("body is not json: {err}"),
            })?;
        Self::from_value(value)
    }

    /// Same validation for an already-parsed value, e.g. a script callback
    /// argument.
    pub fn from_value(value: Value) -> Result<Self, ClientError> {
        if !value.is_object() {
            return Err(ClientError::InvalidResponse {
                detail: format!("expected an object envelope, got {}", json_kind(&value)),
            });
        }
        let envelope: Self =
            serde_json::from_value(value).map_err(|err| ClientError::InvalidResponse {
                detail: format!("malformed envelope: {err}"),
            })?;
        envelope.ensure_success()
    }

    fn ensure_success(self) -> Result<Self, ClientError> {
        if self.success {
            return Ok(self);
        }
        let code = self
            .code
            .clone()
            .filter(|code| !code.trim().is_empty())
            .unwrap_or_else(|| "api_error".to_string());
        let message = self
            .error
            .clone()
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| code.clone());
        Err(ClientError::Api { code, message })
    }

    /// Action-specific field access.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// `true` when the named field is present and not `null`.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some_and(|value| !value.is_null())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
