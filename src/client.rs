use std::fmt;
use std::sync::{Arc, RwLock};

use reqwest::{header, multipart, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use tokio::time::sleep;

use crate::{
    wire::{
        Ack, CompileOptions, CompileStatus, ConfigTemplate, DeviceConfig, DeviceSearch, Envelope,
        FileEntry, FileKind, FileValidation, Health, LoginData, RepositoryStatus, StorageInfo,
    },
    ClientError, ClientOptions, Result, TokenCache,
};

/// HTTP client for the OpenWrt Compiler REST API.
///
/// Every endpoint method funnels through one retrying send loop: 5xx
/// responses and transport-level failures are retried with linearly
/// increasing delays up to the attempt ceiling, while 4xx responses and
/// timeouts fail on the first attempt. A bearer token, once set or loaded
/// from an attached [`TokenCache`], rides along on each request and is
/// invalidated on a 401 response.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
    cache: Option<TokenCache>,
    options: ClientOptions,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("token", &self.read_token().map(|_| "<redacted>"))
            .field("options", &self.options)
            .finish()
    }
}

impl ApiClient {
    /// Creates a client against the API root, e.g. `http://host:5000/api`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            http: reqwest::Client::new(),
            base_url,
            token: Arc::new(RwLock::new(None)),
            cache: None,
            options: ClientOptions::default(),
        }
    }

    /// Creates a client with an already-issued token.
    ///
    /// A `Bearer ` prefix on the token is accepted and stripped.
    pub fn new_bearer(base_url: impl Into<String>, token: impl AsRef<str>) -> Self {
        let client = Self::new(base_url);
        client.set_token(strip_bearer_prefix(token.as_ref()));
        client
    }

    /// Creates a client from environment variables.
    ///
    /// Reads `OWCOMPILER_URL` (API root) and, when set and non-empty,
    /// `OWCOMPILER_TOKEN`.
    pub fn from_env() -> std::result::Result<Self, String> {
        let url = std::env::var("OWCOMPILER_URL")
            .map_err(|_| "missing OWCOMPILER_URL environment variable".to_owned())?;
        if url.trim().is_empty() {
            return Err("OWCOMPILER_URL is set but empty".to_owned());
        }
        match std::env::var("OWCOMPILER_TOKEN") {
            Ok(token) if !token.trim().is_empty() => Ok(Self::new_bearer(url, token.trim())),
            _ => Ok(Self::new(url)),
        }
    }

    /// Applies request timeout and retry options.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Attaches a persistent token cache and eagerly loads any stored
    /// token. Subsequent logins persist through the cache; logout and 401
    /// responses clear it.
    pub fn with_token_cache(mut self, cache: TokenCache) -> Result<Self> {
        if let Some(token) = cache.load()? {
            self.store_token(Some(token));
        }
        self.cache = Some(cache);
        Ok(self)
    }

    /// Sets the bearer token used on subsequent requests.
    pub fn set_token(&self, token: impl Into<String>) {
        self.store_token(Some(token.into()));
    }

    /// Clears the in-memory token and, when attached, the persisted cache.
    pub fn clear_token(&self) -> Result<()> {
        self.store_token(None);
        if let Some(cache) = &self.cache {
            cache.clear()?;
        }
        Ok(())
    }

    /// The currently held token, if any.
    pub fn token(&self) -> Option<String> {
        self.read_token()
    }

    // ── auth ────────────────────────────────────────────────────────────

    /// Registers an account; the issued token is stored like a login's.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<LoginData> {
        let body = json!({ "username": username, "password": password, "email": email });
        let data: LoginData = self
            .call(Method::POST, "/auth/register", Some(&body))
            .await?;
        self.adopt_token(&data.token)?;
        Ok(data)
    }

    /// Logs in and stores the issued token, persisting it when a cache is
    /// attached.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginData> {
        let body = json!({ "username": username, "password": password });
        let data: LoginData = self.call(Method::POST, "/auth/login", Some(&body)).await?;
        self.adopt_token(&data.token)?;
        Ok(data)
    }

    /// Drops the stored token locally; the backend keeps no session state.
    pub fn logout(&self) -> Result<()> {
        self.clear_token()
    }

    /// Validates the held token against the backend, as done on startup to
    /// resume a cached session.
    ///
    /// `Ok(Some(user))` for a valid token. A rejected token clears the
    /// in-memory token and the persisted cache and yields `Ok(None)`, as
    /// does holding no token at all. Transport failures are surfaced
    /// without touching the token: the backend never saw it.
    pub async fn validate_token(&self) -> Result<Option<JsonValue>> {
        if self.read_token().is_none() {
            return Ok(None);
        }
        match self.call_raw(Method::GET, "/auth/validate", &[], None).await {
            Ok((_, envelope)) if envelope.success => {
                let user = envelope
                    .data
                    .and_then(|mut data| data.get_mut("user").map(JsonValue::take))
                    .unwrap_or(JsonValue::Null);
                Ok(Some(user))
            }
            Ok(_) | Err(ClientError::Api { .. }) => {
                self.invalidate_token();
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    // ── config management ───────────────────────────────────────────────

    pub async fn config_templates(&self) -> Result<Vec<ConfigTemplate>> {
        self.call(Method::GET, "/config/templates", None).await
    }

    pub async fn template(&self, template_id: &str) -> Result<ConfigTemplate> {
        self.call(Method::GET, &format!("/config/templates/{template_id}"), None)
            .await
    }

    pub async fn apply_template(&self, template_id: &str, config_name: &str) -> Result<Ack> {
        let body = json!({ "template_id": template_id, "config_name": config_name });
        self.call_ack(Method::POST, "/config/apply-template", Some(&body))
            .await
    }

    pub async fn configs(&self) -> Result<JsonValue> {
        self.call(Method::GET, "/configs", None).await
    }

    pub async fn config(&self, name: &str) -> Result<JsonValue> {
        self.call(Method::GET, &format!("/config/{name}"), None).await
    }

    pub async fn update_config(
        &self,
        name: &str,
        config_data: &JsonValue,
        metadata: Option<&JsonValue>,
    ) -> Result<Ack> {
        let body = json!({ "config_data": config_data, "metadata": metadata });
        self.call_ack(Method::PUT, &format!("/config/{name}"), Some(&body))
            .await
    }

    pub async fn delete_config(&self, name: &str) -> Result<Ack> {
        self.call_ack(Method::DELETE, &format!("/config/{name}"), None)
            .await
    }

    // ── repository lifecycle ────────────────────────────────────────────

    /// Starts a repository clone; progress arrives on the event stream.
    pub async fn clone_repository(&self, url: &str, branch: Option<&str>) -> Result<Ack> {
        let body = json!({ "url": url, "branch": branch });
        self.call_ack(Method::POST, "/repository/clone", Some(&body))
            .await
    }

    pub async fn update_feeds(&self) -> Result<Ack> {
        self.call_ack(Method::POST, "/repository/update-feeds", None)
            .await
    }

    pub async fn install_feeds(&self) -> Result<Ack> {
        self.call_ack(Method::POST, "/repository/install-feeds", None)
            .await
    }

    pub async fn repository_status(&self) -> Result<RepositoryStatus> {
        self.call(Method::GET, "/repository/status", None).await
    }

    // ── device catalog ──────────────────────────────────────────────────

    /// Searches the device catalog; an empty query lists popular devices.
    pub async fn search_devices(&self, query: &str, limit: u32) -> Result<DeviceSearch> {
        let query = [("q", query.to_owned()), ("limit", limit.to_string())];
        self.call_query(Method::GET, "/devices/search", &query, None)
            .await
    }

    /// Generates a build configuration for a device, optionally with the
    /// iStore feed and extra packages.
    pub async fn device_config(
        &self,
        device_id: &str,
        istore: bool,
        packages: &[String],
    ) -> Result<DeviceConfig> {
        let mut query = vec![("istore", istore.to_string())];
        for package in packages {
            query.push(("packages", package.clone()));
        }
        self.call_query(
            Method::GET,
            &format!("/devices/{device_id}/config"),
            &query,
            None,
        )
        .await
    }

    pub async fn package_categories(&self) -> Result<JsonValue> {
        self.call(Method::GET, "/packages/categories", None).await
    }

    // ── user statistics ─────────────────────────────────────────────────

    pub async fn user_statistics(&self, username: &str) -> Result<JsonValue> {
        self.call(Method::GET, &format!("/users/{username}/statistics"), None)
            .await
    }

    pub async fn compile_history(&self, username: &str, limit: u32) -> Result<JsonValue> {
        let query = [("limit", limit.to_string())];
        self.call_query(
            Method::GET,
            &format!("/users/{username}/compile-history"),
            &query,
            None,
        )
        .await
    }

    // ── compile lifecycle ───────────────────────────────────────────────

    /// Starts a compile; log lines and progress arrive on the event stream.
    pub async fn start_compile(&self, options: &CompileOptions) -> Result<JsonValue> {
        let body = serde_json::to_value(options)
            .map_err(|err| ClientError::Decode(format!("invalid compile options: {err}")))?;
        self.call(Method::POST, "/compile/start", Some(&body)).await
    }

    pub async fn stop_compile(&self) -> Result<Ack> {
        self.call_ack(Method::POST, "/compile/stop", None).await
    }

    pub async fn compile_status(&self) -> Result<CompileStatus> {
        self.call(Method::GET, "/compile/status", None).await
    }

    pub async fn compile_logs(&self) -> Result<JsonValue> {
        self.call(Method::GET, "/compile/logs", None).await
    }

    // ── file management ─────────────────────────────────────────────────

    pub async fn firmware_files(&self) -> Result<Vec<FileEntry>> {
        self.call(Method::GET, "/files/firmware", None).await
    }

    pub async fn config_files(&self) -> Result<Vec<FileEntry>> {
        self.call(Method::GET, "/files/configs", None).await
    }

    pub async fn storage_info(&self) -> Result<StorageInfo> {
        self.call(Method::GET, "/files/storage", None).await
    }

    pub async fn file_info(&self, kind: FileKind, filename: &str) -> Result<FileEntry> {
        let path = format!("/files/{}/{filename}/info", kind.as_str());
        self.call(Method::GET, &path, None).await
    }

    pub async fn delete_file(&self, kind: FileKind, filename: &str) -> Result<Ack> {
        let path = format!("/files/{}/{filename}", kind.as_str());
        self.call_ack(Method::DELETE, &path, None).await
    }

    pub async fn validate_file(
        &self,
        kind: FileKind,
        filename: &str,
        md5: Option<&str>,
        sha256: Option<&str>,
    ) -> Result<FileValidation> {
        let path = format!("/files/{}/{filename}/validate", kind.as_str());
        let body = json!({ "md5": md5, "sha256": sha256 });
        self.call(Method::POST, &path, Some(&body)).await
    }

    pub async fn cleanup_temp_files(&self) -> Result<Ack> {
        self.call_ack(Method::POST, "/files/cleanup", None).await
    }

    /// Uploads a config file as multipart form data.
    ///
    /// Single attempt: replaying a large upload is left to the caller.
    pub async fn upload_config_file(
        &self,
        filename: &str,
        contents: Vec<u8>,
        overwrite: bool,
    ) -> Result<Ack> {
        let url = format!("{}/files/configs/{filename}", self.base_url);
        let part = multipart::Part::bytes(contents).file_name(filename.to_owned());
        let form = multipart::Form::new()
            .part("file", part)
            .text("overwrite", overwrite.to_string());

        let mut request = self
            .http
            .post(&url)
            .timeout(self.options.timeout)
            .multipart(form);
        if let Some(authorization) = self.authorization() {
            request = request.header(header::AUTHORIZATION, authorization);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.invalidate_token();
            }
            return Err(api_error(status.as_u16(), &body));
        }
        let envelope: Envelope<JsonValue> = decode_body(&body)?;
        ensure_success(&envelope, status.as_u16())?;
        Ok(Ack {
            message: envelope.message,
        })
    }

    /// Downloads a stored file's raw contents.
    ///
    /// Single attempt, like the upload path; replaying a large transfer is
    /// left to the caller.
    pub async fn download_file(&self, kind: FileKind, filename: &str) -> Result<Vec<u8>> {
        let url = format!("{}/files/{}/{filename}", self.base_url, kind.as_str());
        let mut request = self.http.get(&url).timeout(self.options.timeout);
        if let Some(authorization) = self.authorization() {
            request = request.header(header::AUTHORIZATION, authorization);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.invalidate_token();
            }
            let body = response.text().await?;
            return Err(api_error(status.as_u16(), &body));
        }
        Ok(response.bytes().await?.to_vec())
    }

    // ── websocket introspection ─────────────────────────────────────────

    pub async fn websocket_stats(&self) -> Result<JsonValue> {
        self.call(Method::GET, "/websocket/stats", None).await
    }

    pub async fn websocket_clients(&self) -> Result<JsonValue> {
        self.call(Method::GET, "/websocket/clients", None).await
    }

    pub async fn websocket_rooms(&self) -> Result<JsonValue> {
        self.call(Method::GET, "/websocket/rooms", None).await
    }

    // ── system status ───────────────────────────────────────────────────

    pub async fn system_status(&self) -> Result<JsonValue> {
        self.call(Method::GET, "/status", None).await
    }

    pub async fn system_info(&self) -> Result<JsonValue> {
        self.call(Method::GET, "/system/info", None).await
    }

    /// Probes `/health`. Never fails: an unreachable or unhealthy backend
    /// is reported as `healthy: false`.
    pub async fn health_check(&self) -> Health {
        match self.call_raw(Method::GET, "/health", &[], None).await {
            Ok((_, envelope)) => Health {
                healthy: envelope.success,
                detail: envelope.data,
                error: None,
            },
            Err(err) => Health {
                healthy: false,
                detail: None,
                error: Some(err.to_string()),
            },
        }
    }

    // ── internals ───────────────────────────────────────────────────────

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<T> {
        self.call_query(method, path, &[], body).await
    }

    async fn call_query<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&JsonValue>,
    ) -> Result<T> {
        let (status, envelope) = self.call_raw(method, path, query, body).await?;
        ensure_success(&envelope, status)?;
        let data = envelope
            .data
            .ok_or_else(|| ClientError::Decode(format!("missing data payload for {path}")))?;
        serde_json::from_value(data)
            .map_err(|err| ClientError::Decode(format!("invalid data payload for {path}: {err}")))
    }

    async fn call_ack(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> Result<Ack> {
        let (status, envelope) = self.call_raw(method, path, &[], body).await?;
        ensure_success(&envelope, status)?;
        Ok(Ack {
            message: envelope.message,
        })
    }

    /// The retrying send loop every JSON endpoint goes through. Returns the
    /// observed HTTP status alongside the decoded envelope.
    async fn call_raw(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&JsonValue>,
    ) -> Result<(u16, Envelope<JsonValue>)> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 1u32;
        loop {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .timeout(self.options.timeout);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(authorization) = self.authorization() {
                request = request.header(header::AUTHORIZATION, authorization);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body_text = response.text().await.map_err(ClientError::Transport)?;

                    if !status.is_success() {
                        if status == StatusCode::UNAUTHORIZED {
                            self.invalidate_token();
                        }
                        let err = api_error(status.as_u16(), &body_text);
                        if err.is_retryable() && attempt < self.options.max_attempts {
                            self.wait_before_retry(attempt).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(err);
                    }

                    return Ok((status.as_u16(), decode_body(&body_text)?));
                }
                Err(err) => {
                    let err = ClientError::Transport(err);
                    if err.is_retryable() && attempt < self.options.max_attempts {
                        self.wait_before_retry(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Sleeps `retry_delay * attempt` before the next try (linear backoff).
    async fn wait_before_retry(&self, attempt: u32) {
        let delay = self.options.retry_delay.saturating_mul(attempt);
        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying request"
        );
        sleep(delay).await;
    }

    fn authorization(&self) -> Option<String> {
        self.read_token().map(|token| format!("Bearer {token}"))
    }

    fn adopt_token(&self, token: &str) -> Result<()> {
        self.store_token(Some(token.to_owned()));
        if let Some(cache) = &self.cache {
            cache.store(token)?;
        }
        Ok(())
    }

    /// Drops the token after a 401. Cache-clear failures are logged rather
    /// than shadowing the auth error being surfaced.
    fn invalidate_token(&self) {
        self.store_token(None);
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.clear() {
                tracing::warn!(error = %err, "failed to clear persisted token");
            }
        }
    }

    fn read_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_token(&self, value: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

/// `http_status` is the fallback when a `success: false` envelope carries
/// no `code` of its own.
fn ensure_success(envelope: &Envelope<JsonValue>, http_status: u16) -> Result<()> {
    if envelope.success {
        return Ok(());
    }
    Err(ClientError::Api {
        status: envelope.code.unwrap_or(http_status),
        message: envelope
            .message
            .clone()
            .unwrap_or_else(|| "request failed".to_owned()),
        error_code: envelope.error_code.clone(),
    })
}

fn decode_body(body: &str) -> Result<Envelope<JsonValue>> {
    serde_json::from_str(body)
        .map_err(|err| ClientError::Decode(format!("invalid response envelope: {err}; body: {body}")))
}

fn api_error(status: u16, body: &str) -> ClientError {
    let envelope: Option<Envelope<JsonValue>> = serde_json::from_str(body).ok();
    let (message, error_code) = match envelope {
        Some(envelope) => (
            envelope
                .message
                .unwrap_or_else(|| format!("HTTP {status}")),
            envelope.error_code,
        ),
        None => (format!("HTTP {status}"), None),
    };
    ClientError::Api {
        status,
        message,
        error_code,
    }
}

fn strip_bearer_prefix(token: &str) -> &str {
    let trimmed = token.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim_start(),
        _ => trimmed,
    }
}
