//! Admin dashboard API client.
//!
//! Authenticated HTTP communication with the admin dashboard: connectivity
//! testing, count session lifecycle, count writes, and barcode/product
//! lookups. Implements [`CountBackend`] so the counting engine never sees
//! HTTP details.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;
use zeroize::Zeroize;

use crate::backend::{
    BarcodeResolution, CompletionRequest, CountBackend, NewProduct, ProductRef,
    ProductSuggestion, RecordCount,
};
use crate::ledger::{CountItem, CountSummary};
use crate::session::CountSession;
use crate::storage;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

const COUNTS_BASE: &str = "/api/pos/inventory/counts";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Remote call failures, classified so the UI can offer a retry only when it
/// is safe.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("cannot reach admin dashboard at {url}")]
    Connect { url: String },
    #[error("connection to {url} timed out")]
    Timeout { url: String },
    #[error("network error communicating with {url}: {detail}")]
    Network { url: String, detail: String },
    #[error("API key is invalid or expired")]
    Unauthorized,
    #[error("terminal not authorized")]
    Forbidden,
    #[error("admin dashboard endpoint not found: {path}")]
    NotFound { path: String },
    #[error("admin dashboard server error (HTTP {status})")]
    Server { status: u16 },
    #[error("admin dashboard rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response from admin dashboard: {0}")]
    InvalidResponse(String),
    #[error("terminal not configured: missing {0}")]
    NotConfigured(&'static str),
}

impl ApiError {
    /// Transient failures are safe to retry as-is; everything else needs the
    /// operator (credentials, state re-sync) first. Retries are always
    /// user-initiated, never automatic.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Connect { .. }
                | ApiError::Timeout { .. }
                | ApiError::Network { .. }
                | ApiError::Server { .. }
        )
    }

    fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if err.is_connect() {
            return ApiError::Connect { url: url.to_string() };
        }
        if err.is_timeout() {
            return ApiError::Timeout { url: url.to_string() };
        }
        ApiError::Network {
            url: url.to_string(),
            detail: err.to_string(),
        }
    }

    fn from_status(status: StatusCode, path: &str, body: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden,
            404 => ApiError::NotFound {
                path: path.to_string(),
            },
            s if s >= 500 => ApiError::Server { status: s },
            s => {
                // Preserve validation details from the dashboard's error body.
                let message = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|json| {
                        json.get("error")
                            .or_else(|| json.get("message"))
                            .and_then(Value::as_str)
                            .map(|m| m.to_string())
                    })
                    .unwrap_or_else(|| {
                        let trimmed = body.trim();
                        if trimmed.is_empty() {
                            "unexpected response".to_string()
                        } else {
                            trimmed.to_string()
                        }
                    });
                ApiError::Rejected { status: s, message }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the admin dashboard URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_admin_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Connection string decoding
// ---------------------------------------------------------------------------

/// The onboarding connection string is either raw JSON or base64url-encoded
/// JSON carrying `{key, url, tid}`.
fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed).ok();
    }

    let mut compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        let parsed = serde_json::from_str::<Value>(&compact).ok();
        compact.zeroize();
        return parsed;
    }
    if compact.len() < 20 {
        compact.zeroize();
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let mut padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    compact.zeroize();
    let decoded = BASE64_STANDARD.decode(&padded).ok();
    padded.zeroize();
    let mut decoded = decoded?;
    let parsed = serde_json::from_slice::<Value>(&decoded).ok();
    decoded.zeroize();
    parsed
}

pub fn extract_api_key_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("key")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

pub fn extract_admin_url_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("url")
                .and_then(Value::as_str)
                .map(normalize_admin_url)
        })
        .filter(|s| !s.is_empty())
}

pub fn extract_terminal_id_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("tid")
                .or_else(|| v.get("terminalId"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Result of a connectivity test.
#[derive(Debug, serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Authenticated client for the admin dashboard.
pub struct AdminApi {
    base_url: String,
    api_key: String,
    terminal_id: String,
    client: Client,
}

impl AdminApi {
    pub fn new(admin_url: &str, api_key: &str, terminal_id: &str) -> Result<Self, ApiError> {
        let base_url = normalize_admin_url(admin_url);
        // Connection strings are accepted anywhere an API key is, so pasting
        // the onboarding payload into a config field still works.
        let api_key = extract_api_key_from_connection_string(api_key)
            .unwrap_or_else(|| api_key.trim().to_string());

        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::InvalidResponse(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            api_key,
            terminal_id: terminal_id.trim().to_string(),
            client,
        })
    }

    /// Build a client from the terminal's stored credentials.
    pub fn from_storage() -> Result<Self, ApiError> {
        let admin_url = storage::get_credential(storage::KEY_ADMIN_URL)
            .ok_or(ApiError::NotConfigured("admin dashboard URL"))?;
        let api_key = storage::get_credential(storage::KEY_API_KEY)
            .ok_or(ApiError::NotConfigured("API key"))?;
        let terminal_id = storage::get_credential(storage::KEY_TERMINAL_ID)
            .ok_or(ApiError::NotConfigured("terminal id"))?;
        Self::new(&admin_url, &api_key, &terminal_id)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Test connectivity with a lightweight authenticated health-check.
    pub async fn test_connectivity(&self) -> ConnectivityResult {
        let health_url = format!("{}/api/health", self.base_url);

        let client = match Client::builder().timeout(CONNECTIVITY_TIMEOUT).build() {
            Ok(c) => c,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(format!("failed to create HTTP client: {e}")),
                };
            }
        };

        let start = Instant::now();
        let resp = match client
            .get(&health_url)
            .header("X-POS-API-Key", &self.api_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(ApiError::from_reqwest(&self.base_url, &e).to_string()),
                };
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        let status = resp.status();

        if status.is_success() {
            info!(latency_ms = latency, "connectivity test passed");
            ConnectivityResult {
                success: true,
                latency_ms: Some(latency),
                error: None,
            }
        } else {
            ConnectivityResult {
                success: false,
                latency_ms: Some(latency),
                error: Some(ApiError::from_status(status, "/api/health", "").to_string()),
            }
        }
    }

    /// Perform an authenticated request. `path` includes the leading slash.
    async fn fetch(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let full_url = format!("{}{path}", self.base_url);

        let mut req = self
            .client
            .request(method, &full_url)
            .header("X-POS-API-Key", &self.api_key)
            .header("x-terminal-id", &self.terminal_id)
            .header("Content-Type", "application/json");

        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ApiError::from_status(status, path, &body_text));
        }

        // Empty 204 responses come back as null.
        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| ApiError::InvalidResponse(format!("invalid JSON: {e}")))
    }

    fn parse<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T, ApiError> {
        serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("unexpected {what} shape: {e}")))
    }
}

impl CountBackend for AdminApi {
    async fn get_session(&self, session_id: &str) -> Result<CountSession, ApiError> {
        let value = self
            .fetch(Method::GET, &format!("{COUNTS_BASE}/{session_id}"), None)
            .await?;
        Self::parse(value, "count session")
    }

    async fn get_items(&self, session_id: &str) -> Result<Vec<CountItem>, ApiError> {
        let value = self
            .fetch(
                Method::GET,
                &format!("{COUNTS_BASE}/{session_id}/items"),
                None,
            )
            .await?;
        Self::parse(value, "count items")
    }

    async fn get_summary(&self, session_id: &str) -> Result<CountSummary, ApiError> {
        let value = self
            .fetch(
                Method::GET,
                &format!("{COUNTS_BASE}/{session_id}/summary"),
                None,
            )
            .await?;
        Self::parse(value, "count summary")
    }

    async fn start_session(&self, session_id: &str) -> Result<CountSession, ApiError> {
        let value = self
            .fetch(
                Method::POST,
                &format!("{COUNTS_BASE}/{session_id}/start"),
                None,
            )
            .await?;
        Self::parse(value, "count session")
    }

    async fn cancel_session(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<CountSession, ApiError> {
        let value = self
            .fetch(
                Method::POST,
                &format!("{COUNTS_BASE}/{session_id}/cancel"),
                Some(serde_json::json!({ "reason": reason })),
            )
            .await?;
        Self::parse(value, "count session")
    }

    async fn complete_session(
        &self,
        session_id: &str,
        request: &CompletionRequest,
    ) -> Result<CountSession, ApiError> {
        let body = serde_json::to_value(request)
            .map_err(|e| ApiError::InvalidResponse(format!("serialize completion: {e}")))?;
        let value = self
            .fetch(
                Method::POST,
                &format!("{COUNTS_BASE}/{session_id}/complete"),
                Some(body),
            )
            .await?;
        Self::parse(value, "count session")
    }

    async fn record_count(&self, session_id: &str, record: &RecordCount) -> Result<(), ApiError> {
        let body = serde_json::to_value(record)
            .map_err(|e| ApiError::InvalidResponse(format!("serialize count: {e}")))?;
        self.fetch(
            Method::POST,
            &format!("{COUNTS_BASE}/{session_id}/items/{}/count", record.item_id),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn resolve_barcode(&self, barcode: &str) -> Result<BarcodeResolution, ApiError> {
        let value = self
            .fetch(
                Method::GET,
                &format!("/api/pos/inventory/products/barcode/{barcode}"),
                None,
            )
            .await;

        // A 404 here is an answer, not a failure: the catalog simply does
        // not know the barcode.
        let value = match value {
            Ok(v) => v,
            Err(ApiError::NotFound { .. }) => return Ok(BarcodeResolution::NotFound),
            Err(e) => return Err(e),
        };

        if let Some(product) = value.get("product").filter(|v| !v.is_null()) {
            let product: ProductRef = Self::parse(product.clone(), "product")?;
            return Ok(BarcodeResolution::Product(product));
        }
        if let Some(suggestion) = value.get("suggestion").filter(|v| !v.is_null()) {
            let suggestion: ProductSuggestion = Self::parse(suggestion.clone(), "suggestion")?;
            return Ok(BarcodeResolution::Suggestion(suggestion));
        }
        Ok(BarcodeResolution::NotFound)
    }

    async fn create_product(&self, product: &NewProduct) -> Result<ProductRef, ApiError> {
        let body = serde_json::to_value(product)
            .map_err(|e| ApiError::InvalidResponse(format!("serialize product: {e}")))?;
        let value = self
            .fetch(Method::POST, "/api/pos/inventory/products", Some(body))
            .await?;
        Self::parse(value, "product")
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_api_suffix_and_slashes() {
        assert_eq!(
            normalize_admin_url("https://admin.thesmall.app/api/"),
            "https://admin.thesmall.app"
        );
        assert_eq!(
            normalize_admin_url("admin.thesmall.app///"),
            "https://admin.thesmall.app"
        );
        assert_eq!(
            normalize_admin_url("localhost:3000/api"),
            "http://localhost:3000"
        );
        assert_eq!(
            normalize_admin_url("  https://admin.thesmall.app  "),
            "https://admin.thesmall.app"
        );
    }

    #[test]
    fn connection_string_roundtrip() {
        let payload = serde_json::json!({
            "key": "sk-count-12345",
            "url": "https://admin.thesmall.app/api",
            "tid": "term-9",
        });
        let encoded = BASE64_STANDARD
            .encode(serde_json::to_vec(&payload).unwrap())
            .replace('+', "-")
            .replace('/', "_")
            .replace('=', "");

        assert_eq!(
            extract_api_key_from_connection_string(&encoded).as_deref(),
            Some("sk-count-12345")
        );
        assert_eq!(
            extract_admin_url_from_connection_string(&encoded).as_deref(),
            Some("https://admin.thesmall.app")
        );
        assert_eq!(
            extract_terminal_id_from_connection_string(&encoded).as_deref(),
            Some("term-9")
        );
    }

    #[test]
    fn plain_json_connection_string_is_accepted() {
        let raw = r#"{"key": "sk-abc", "tid": "term-1"}"#;
        assert_eq!(
            extract_api_key_from_connection_string(raw).as_deref(),
            Some("sk-abc")
        );
        assert_eq!(extract_admin_url_from_connection_string(raw), None);
    }

    #[test]
    fn short_garbage_is_not_a_connection_string() {
        assert_eq!(extract_api_key_from_connection_string("sk-raw-key"), None);
    }

    #[test]
    fn status_mapping_classifies_retryability() {
        let unauthorized = ApiError::from_status(StatusCode::UNAUTHORIZED, "/x", "");
        assert!(matches!(unauthorized, ApiError::Unauthorized));
        assert!(!unauthorized.retryable());

        let server = ApiError::from_status(StatusCode::BAD_GATEWAY, "/x", "");
        assert!(matches!(server, ApiError::Server { status: 502 }));
        assert!(server.retryable());

        let rejected = ApiError::from_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            "/x",
            r#"{"error": "quantity must be positive"}"#,
        );
        match rejected {
            ApiError::Rejected { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "quantity must be positive");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn client_resolves_connection_string_api_key() {
        let payload = serde_json::json!({ "key": "sk-decoded", "tid": "t1" });
        let encoded = BASE64_STANDARD.encode(serde_json::to_vec(&payload).unwrap());

        let api = AdminApi::new("admin.thesmall.app", &encoded, "term-1").unwrap();
        assert_eq!(api.api_key, "sk-decoded");
        assert_eq!(api.base_url(), "https://admin.thesmall.app");
    }
}
