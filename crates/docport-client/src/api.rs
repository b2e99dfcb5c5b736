//! Typed operations over [`DocRegistryClient::call`].
//!
//! Every method maps 1:1 to a remote action and a fixed payload shape.
//! Read operations for slow-moving data go through the session response
//! cache; writes always hit the endpoint.

use chrono::Utc;
use serde_json::{Map, Value, json};

use crate::client::DocRegistryClient;
use crate::envelope::ResponseEnvelope;
use crate::error::ClientError;
use crate::types::{CallOptions, DocsQuery, InspectionQuery, LoginRequest, StorageSaveInput};

/// Session snapshots go stale fast; twenty seconds keeps navigation
/// snappy without masking a logout elsewhere.
const ME_CACHE_MS: u64 = 20_000;
/// Option catalogs change rarely; ten minutes.
const OPTIONS_CACHE_MS: u64 = 10 * 60 * 1000;

impl DocRegistryClient {
    /// Ping the endpoint.
    pub async fn health(&self, opts: &CallOptions) -> Result<ResponseEnvelope, ClientError> {
        self.call("health", json!({}), opts).await
    }

    /// Authenticate and prime the session cache.
    ///
    /// A successful response carrying a `user` object is written to the
    /// `auth.me` cache entry so the next [`me`](Self::me) is free.
    pub async fn login(
        &self,
        request: LoginRequest,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        let mut payload = Map::new();
        payload.insert("username".to_string(), json!(request.username.trim()));
        payload.insert("password".to_string(), json!(request.password));
        if let Some(device_key) = normalized(request.device_key) {
            payload.insert("deviceKey".to_string(), json!(device_key));
        }
        if let Some(ip_key) = normalized(request.ip_key) {
            payload.insert("clientIpKey".to_string(), json!(ip_key));
        }

        let response = self.call("auth.login", Value::Object(payload), opts).await?;
        if response.success && response.has_field("user") {
            self.cache().write("auth.me", &response, Utc::now());
        }
        Ok(response)
    }

    /// End the session. The cached session snapshot is dropped whether or
    /// not the endpoint acknowledged the logout.
    pub async fn logout(&self, opts: &CallOptions) -> Result<ResponseEnvelope, ClientError> {
        let result = self.call("auth.logout", json!({}), opts).await;
        self.cache().clear("auth.me");
        result
    }

    /// Current session, served from cache when fresh.
    pub async fn me(&self, opts: &CallOptions) -> Result<ResponseEnvelope, ClientError> {
        self.cached_call("auth.me", ME_CACHE_MS, true, opts).await
    }

    /// Form option catalog.
    pub async fn options_info(&self, opts: &CallOptions) -> Result<ResponseEnvelope, ClientError> {
        self.cached_call("options.info", OPTIONS_CACHE_MS, false, opts)
            .await
    }

    /// Member directory used by assignment pickers.
    pub async fn options_members(
        &self,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.cached_call("options.members", OPTIONS_CACHE_MS, false, opts)
            .await
    }

    /// Storage location catalog.
    pub async fn storage_options(
        &self,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.cached_call("storage.options", OPTIONS_CACHE_MS, false, opts)
            .await
    }

    /// Paged document listing.
    pub async fn docs_list(
        &self,
        query: &DocsQuery,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        let status = query.status_filter.trim();
        self.call(
            "docs.list",
            json!({
                "page": if query.page == 0 { 1 } else { query.page },
                "itemsPerPage": if query.items_per_page == 0 { 20 } else { query.items_per_page },
                "searchQuery": query.search_query.trim(),
                "statusFilter": if status.is_empty() { "all" } else { status },
            }),
            opts,
        )
        .await
    }

    /// Single document with its full history.
    pub async fn doc_detail(
        &self,
        doc_id: &str,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.call("doc.detail", json!({"docId": doc_id.trim()}), opts)
            .await
    }

    /// Registry-wide report rollup.
    pub async fn system_report(&self, opts: &CallOptions) -> Result<ResponseEnvelope, ClientError> {
        self.call("docs.report_all", json!({}), opts).await
    }

    pub async fn doc_create(
        &self,
        form: Value,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.call("doc.create", json!({"formData": form_or_empty(form)}), opts)
            .await
    }

    pub async fn doc_update(
        &self,
        doc_id: &str,
        form: Value,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.call(
            "doc.update",
            json!({"docId": doc_id.trim(), "formData": form_or_empty(form)}),
            opts,
        )
        .await
    }

    pub async fn doc_update_status(
        &self,
        doc_id: &str,
        status: Value,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.call(
            "doc.update_status",
            json!({"docId": doc_id.trim(), "statusData": form_or_empty(status)}),
            opts,
        )
        .await
    }

    /// Move a document between main workflow states.
    pub async fn doc_change_main_status(
        &self,
        doc_id: &str,
        new_status: &str,
        remark: &str,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.call(
            "doc.change_main_status",
            json!({
                "docId": doc_id.trim(),
                "newStatus": new_status.trim(),
                "statusRemark": remark,
            }),
            opts,
        )
        .await
    }

    /// Patch a single field on a document.
    pub async fn doc_update_field(
        &self,
        doc_id: &str,
        field_name: &str,
        field_value: Value,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.call(
            "doc.update_field",
            json!({
                "docId": doc_id.trim(),
                "fieldName": field_name.trim(),
                "fieldValue": field_value,
            }),
            opts,
        )
        .await
    }

    /// Whether a document may be moved into box storage. The id goes out
    /// under every spelling deployed revisions have used for it.
    pub async fn check_storage_eligibility(
        &self,
        doc_id: &str,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        let id = doc_id.trim();
        self.call(
            "storage.check_eligibility",
            json!({"docId": id, "id": id, "amDocNo": id}),
            opts,
        )
        .await
    }

    pub async fn save_documents_to_box(
        &self,
        doc_ids: &[String],
        box_id: &str,
        user_name: &str,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.call(
            "storage.save_documents",
            json!({
                "docIds": doc_ids,
                "boxId": box_id.trim(),
                "userName": user_name.trim(),
            }),
            opts,
        )
        .await
    }

    pub async fn save_storage_data(
        &self,
        input: &StorageSaveInput,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.call(
            "storage.save_data",
            json!({
                "docId": input.doc_id.trim(),
                "newLoc": input.new_location.trim(),
                "userName": input.user_name.trim(),
                "fiscalYear": input.fiscal_year.trim(),
                "destroyDate": input.destroy_date.trim(),
            }),
            opts,
        )
        .await
    }

    /// Box contents lookup. The box identifier is mirrored under every
    /// parameter name the lookup has ever answered to, so each deployed
    /// revision of the endpoint finds one it knows.
    pub async fn box_detail(
        &self,
        box_name: &str,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        let name = box_name.trim();
        let mut payload = Map::new();
        for key in [
            "boxName",
            "box",
            "boxId",
            "box_name",
            "id",
            "name",
            "location",
            "loc",
            "detail",
            "selectedLocation",
            "storedLoc",
            "newLoc",
        ] {
            payload.insert(key.to_string(), json!(name));
        }
        self.call("box.detail", Value::Object(payload), opts).await
    }

    /// Inspection report filtered by officer, fiscal years and window.
    pub async fn inspection_report(
        &self,
        query: &InspectionQuery,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.call(
            "inspection.report",
            json!({
                "officerName": query.officer_name.trim(),
                "selectedFiscalYears": query.fiscal_years,
                "startDate": query.start_date.trim(),
                "endDate": query.end_date.trim(),
                "startTime": query.start_time.trim(),
                "endTime": query.end_time.trim(),
                "group": query.group.trim(),
            }),
            opts,
        )
        .await
    }

    /// Read-through call for slow-moving data. The cache entry shares the
    /// action's name. `requires_user` additionally gates both sides on a
    /// `user` object being present, which keeps a userless (expired)
    /// session snapshot from being served or stored.
    async fn cached_call(
        &self,
        action: &str,
        max_age_ms: u64,
        requires_user: bool,
        opts: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        if !opts.force_refresh {
            if let Some(cached) = self.cache().read(action, max_age_ms, Utc::now()) {
                if cached.success && (!requires_user || cached.has_field("user")) {
                    tracing::debug!(action, "serving cached response");
                    return Ok(cached);
                }
            }
        }

        let response = self.call(action, json!({}), opts).await?;
        if response.success && (!requires_user || response.has_field("user")) {
            self.cache().write(action, &response, Utc::now());
        }
        Ok(response)
    }
}

fn form_or_empty(form: Value) -> Value {
    if form.is_null() { json!({}) } else { form }
}

fn normalized(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
