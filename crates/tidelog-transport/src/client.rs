//! Typed HTTP client for the relay's wire protocol (§6). Every call stamps
//! the client version header and performs no retries itself: idempotence
//! and retry belong to the Sync Engine (§4.3).

use std::time::Duration;

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use tidelog_core::entry::{DeletionRequest, DumpRequest, EncryptedEntry};

use crate::error::{Result, TransportError};
use crate::types::BannerResponse;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;
const VERSION_HEADER: &str = "X-Hishtory-Version";

/// Response shape from `/api/v1/submit`: normally empty, but a relay may
/// piggy-back an outstanding dump request on the response instead of
/// requiring a separate poll (§4.4 "Dump response").
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub dump_requests: Vec<DumpRequest>,
}

/// Client for the relay's HTTP API. Stateless beyond the underlying
/// `reqwest::Client` and base URL; an env var can force every call to fail
/// as offline, for deterministic tests of the Sync Engine's retry paths.
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    base_url: String,
    client_version: String,
}

impl RelayClient {
    pub fn new(base_url: &str, client_version: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_version: client_version.to_string(),
        }
    }

    fn simulated_network_error() -> bool {
        std::env::var("TIDELOG_SIMULATE_NETWORK_ERROR")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let version_value = HeaderValue::from_str(&format!("v0.{}", self.client_version))
            .map_err(|_| TransportError::Status { status: 0, body: "invalid client version".into() })?;
        headers.insert(VERSION_HEADER, version_value);
        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("relay response status: {status}");
            return;
        }
        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("relay response error ({status}): {preview}");
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16(), body });
        }

        serde_json::from_str(&body).map_err(TransportError::from)
    }

    async fn api_get(&self, path: &str) -> Result<reqwest::Response> {
        if Self::simulated_network_error() {
            return Err(TransportError::Simulated);
        }
        let url = format!("{}{path}", self.base_url);
        self.client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(TransportError::from)
    }

    async fn api_post(&self, path: &str, body: &impl serde::Serialize) -> Result<reqwest::Response> {
        if Self::simulated_network_error() {
            return Err(TransportError::Simulated);
        }
        let url = format!("{}{path}", self.base_url);
        self.client
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(TransportError::from)
    }

    /// `GET /api/v1/register` — idempotent device registration.
    pub async fn register(&self, user_id: &str, device_id: &str) -> Result<()> {
        let path = format!(
            "/api/v1/register?user_id={}&device_id={}",
            urlencoding::encode(user_id),
            urlencoding::encode(device_id)
        );
        let response = self.api_get(&path).await?;
        Self::parse_response::<serde_json::Value>(response).await.map(|_| ())
    }

    /// `GET /api/v1/bootstrap` — every existing encrypted entry for this
    /// user, used once at device setup.
    pub async fn bootstrap(&self, user_id: &str, device_id: &str) -> Result<Vec<EncryptedEntry>> {
        let path = format!(
            "/api/v1/bootstrap?user_id={}&device_id={}",
            urlencoding::encode(user_id),
            urlencoding::encode(device_id)
        );
        let response = self.api_get(&path).await?;
        Self::parse_response(response).await
    }

    /// `POST /api/v1/submit?source_device_id=<id>` — at-least-once ingest
    /// of one or more encrypted entries.
    pub async fn submit(&self, source_device_id: &str, entries: &[EncryptedEntry]) -> Result<SubmitResponse> {
        let path = format!("/api/v1/submit?source_device_id={}", urlencoding::encode(source_device_id));
        let response = self.api_post(&path, &entries).await?;
        Self::parse_response(response).await
    }

    /// `GET /api/v1/query` — encrypted entries not yet acked by this
    /// device.
    pub async fn query(&self, device_id: &str, user_id: &str) -> Result<Vec<EncryptedEntry>> {
        let path = format!(
            "/api/v1/query?device_id={}&user_id={}",
            urlencoding::encode(device_id),
            urlencoding::encode(user_id)
        );
        let response = self.api_get(&path).await?;
        Self::parse_response(response).await
    }

    /// `GET /api/v1/get-deletion-requests`.
    pub async fn get_deletion_requests(&self, user_id: &str, device_id: &str) -> Result<Vec<DeletionRequest>> {
        let path = format!(
            "/api/v1/get-deletion-requests?user_id={}&device_id={}",
            urlencoding::encode(user_id),
            urlencoding::encode(device_id)
        );
        let response = self.api_get(&path).await?;
        Self::parse_response(response).await
    }

    /// `POST /api/v1/add-deletion-request` — broadcast a deletion.
    pub async fn add_deletion_request(&self, request: &DeletionRequest) -> Result<()> {
        let response = self.api_post("/api/v1/add-deletion-request", request).await?;
        Self::parse_response::<serde_json::Value>(response).await.map(|_| ())
    }

    /// `GET /api/v1/get-dump-requests` — outstanding dump requests
    /// addressed to devices this installation has sourced.
    pub async fn get_dump_requests(&self, user_id: &str, device_id: &str) -> Result<Vec<DumpRequest>> {
        let path = format!(
            "/api/v1/get-dump-requests?user_id={}&device_id={}",
            urlencoding::encode(user_id),
            urlencoding::encode(device_id)
        );
        let response = self.api_get(&path).await?;
        Self::parse_response(response).await
    }

    /// `POST /api/v1/submit-dump?user_id=&requesting_device_id=&source_device_id=`
    /// — satisfies a pending dump request with the full local history.
    pub async fn submit_dump(
        &self,
        user_id: &str,
        requesting_device_id: &str,
        source_device_id: &str,
        entries: &[EncryptedEntry],
    ) -> Result<()> {
        let path = format!(
            "/api/v1/submit-dump?user_id={}&requesting_device_id={}&source_device_id={}",
            urlencoding::encode(user_id),
            urlencoding::encode(requesting_device_id),
            urlencoding::encode(source_device_id)
        );
        let response = self.api_post(&path, &entries).await?;
        Self::parse_response::<serde_json::Value>(response).await.map(|_| ())
    }

    /// `GET /api/v1/banner` — optional informational banner; failures here
    /// are never fatal to the caller (out of scope beyond a typed response).
    pub async fn banner(&self, commit_hash: &str, user_id: &str, device_id: &str, version: &str) -> Result<BannerResponse> {
        let path = format!(
            "/api/v1/banner?commit_hash={}&user_id={}&device_id={}&version={}",
            urlencoding::encode(commit_hash),
            urlencoding::encode(user_id),
            urlencoding::encode(device_id),
            urlencoding::encode(version)
        );
        let response = self.api_get(&path).await?;
        Self::parse_response(response).await
    }

    /// `GET /api/v1/ping` — liveness probe used by the offline classifier;
    /// when this fails every other error this cycle should be treated as
    /// offline (see [`crate::error::classify_with_ping_override`]).
    pub async fn ping(&self) -> Result<()> {
        let response = self.api_get("/api/v1/ping").await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Status { status: response.status().as_u16(), body: String::new() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn start_mock_server(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn register_succeeds_on_200() {
        let base_url = start_mock_server("HTTP/1.1 200 OK", "{}");
        let client = RelayClient::new(&base_url, "1");
        client.register("user-1", "dev-1").await.unwrap();
    }

    #[tokio::test]
    async fn bootstrap_parses_entry_array() {
        let body = r#"[{"encrypted_data":"aa","nonce":"bb","user_id":"u1","date":100,"encrypted_id":"e1","read_count":0,"device_id":"d1"}]"#;
        let base_url = start_mock_server("HTTP/1.1 200 OK", body);
        let client = RelayClient::new(&base_url, "1");
        let entries = client.bootstrap("u1", "d1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].encrypted_id, "e1");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let base_url = start_mock_server("HTTP/1.1 500 Internal Server Error", "boom");
        let client = RelayClient::new(&base_url, "1");
        let err = client.register("u1", "d1").await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn simulated_network_error_short_circuits() {
        std::env::set_var("TIDELOG_SIMULATE_NETWORK_ERROR", "true");
        let client = RelayClient::new("http://127.0.0.1:1", "1");
        let err = client.register("u1", "d1").await.unwrap_err();
        assert!(matches!(err, TransportError::Simulated));
        std::env::remove_var("TIDELOG_SIMULATE_NETWORK_ERROR");
    }
}
