use crate::channel::TransportMode;

/// Per-call knobs accepted by every facade operation.
///
/// All fields default to "do what the client would do anyway": no timeout
/// override, no forced transport, progress shown, cache honored.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Override the client timeout for this call. Zero and `None` both
    /// mean "use the configured default"; non-zero values are clamped to
    /// the supported range.
    pub timeout_ms: Option<u64>,
    /// Force a transport for this call without touching the persisted
    /// preference seed.
    pub transport: Option<TransportMode>,
    /// Script channel only: no retry, no fallback, errors surface as-is.
    pub jsonp_only: bool,
    /// Correlation id attached to the request envelope.
    pub request_id: Option<String>,
    /// Suppress the progress indicator for this call.
    pub no_progress: bool,
    /// Progress indicator label; a blank value falls back to the default.
    pub progress_message: Option<String>,
    /// Skip the response cache and hit the endpoint.
    pub force_refresh: bool,
}

/// Credentials for [`login`](crate::DocRegistryClient::login). The
/// optional keys override the client's session identity for this login
/// and, when accepted, become the new defaults.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_key: Option<String>,
    pub ip_key: Option<String>,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            device_key: None,
            ip_key: None,
        }
    }
}

/// Paged document listing parameters.
#[derive(Debug, Clone)]
pub struct DocsQuery {
    pub page: u32,
    pub items_per_page: u32,
    pub search_query: String,
    pub status_filter: String,
}

impl Default for DocsQuery {
    fn default() -> Self {
        Self {
            page: 1,
            items_per_page: 20,
            search_query: String::new(),
            status_filter: "all".to_string(),
        }
    }
}

/// Input for [`save_storage_data`](crate::DocRegistryClient::save_storage_data).
#[derive(Debug, Clone, Default)]
pub struct StorageSaveInput {
    pub doc_id: String,
    pub new_location: String,
    pub user_name: String,
    pub fiscal_year: String,
    pub destroy_date: String,
}

/// Filters for the inspection report.
#[derive(Debug, Clone, Default)]
pub struct InspectionQuery {
    pub officer_name: String,
    pub fiscal_years: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub start_time: String,
    pub end_time: String,
    pub group: String,
}
