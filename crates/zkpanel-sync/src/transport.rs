use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;
use zkpanel_core::{Credentials, SyncConfig};
use zkpanel_protocol::{SyncRequest, SyncResponse};

use crate::error::SyncError;

const DETAIL_LIMIT: usize = 200;

/// One request/response exchange with a panel API.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn sync(
        &self,
        credentials: &Credentials,
        request: &SyncRequest,
    ) -> Result<SyncResponse, SyncError>;
}

/// Check that credentials are usable before any network call: a non-empty key
/// and an http(s) base URL.
pub fn validate_credentials(credentials: &Credentials) -> Result<(), String> {
    if credentials.api_key.trim().is_empty() {
        return Err("api key is empty".into());
    }
    sync_endpoint(&credentials.base_url).map(|_| ())
}

/// `{base_url}/api/sync`, keeping any path prefix of the base URL.
pub fn sync_endpoint(base_url: &str) -> Result<Url, String> {
    let base = base_url.trim();
    if base.is_empty() {
        return Err("base url is empty".into());
    }
    let url = Url::parse(&format!("{}/api/sync", base.trim_end_matches('/')))
        .map_err(|e| format!("base url `{base}` is invalid: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("base url scheme `{other}` is not http(s)")),
    }
}

/// `reqwest` transport speaking the panel's JSON sync call.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(cfg: &SyncConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("zkpanel-sync/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs.max(1)))
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn sync(
        &self,
        credentials: &Credentials,
        request: &SyncRequest,
    ) -> Result<SyncResponse, SyncError> {
        let url = sync_endpoint(&credentials.base_url).map_err(SyncError::Transport)?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(credentials.api_key.trim())
            .json(request)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Rejected {
                status: status.as_u16(),
                detail: failure_detail(&body)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
            });
        }

        let body: SyncResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))?;
        if body.success == Some(false) {
            return Err(SyncError::Rejected {
                status: status.as_u16(),
                detail: body
                    .message
                    .unwrap_or_else(|| "panel reported failure".to_string()),
            });
        }
        Ok(body)
    }
}

/// Pull a human-readable reason out of an error body: problem `detail`, then
/// `message`/`error`/`title`, then the raw text.
fn failure_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "message", "error", "title"] {
            if let Some(text) = map.get(key).and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    return Some(truncate(text.trim()));
                }
            }
        }
    }
    Some(truncate(body))
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= DETAIL_LIMIT {
        return text.to_string();
    }
    let mut out: String = text.chars().take(DETAIL_LIMIT).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(base_url: &str, api_key: &str) -> Credentials {
        Credentials {
            base_url: base_url.into(),
            api_key: api_key.into(),
            user_id: "u".into(),
            workspace_id: "w".into(),
        }
    }

    #[test]
    fn endpoint_keeps_path_prefix() {
        assert_eq!(
            sync_endpoint("http://127.0.0.1:8081").unwrap().as_str(),
            "http://127.0.0.1:8081/api/sync"
        );
        assert_eq!(
            sync_endpoint("https://panel.example/tenant-a/").unwrap().as_str(),
            "https://panel.example/tenant-a/api/sync"
        );
    }

    #[test]
    fn validation_rejects_unusable_credentials() {
        assert!(validate_credentials(&creds("http://localhost:8081", "k")).is_ok());
        assert!(validate_credentials(&creds("http://localhost:8081", "  ")).is_err());
        assert!(validate_credentials(&creds("", "k")).is_err());
        assert!(validate_credentials(&creds("ftp://panel.example", "k")).is_err());
        assert!(validate_credentials(&creds("not a url", "k")).is_err());
    }

    #[test]
    fn failure_detail_prefers_problem_fields() {
        assert_eq!(
            failure_detail(r#"{"title":"Unauthorized","detail":"bad key"}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            failure_detail(r#"{"message":"slow down"}"#).as_deref(),
            Some("slow down")
        );
        assert_eq!(failure_detail("gateway down").as_deref(), Some("gateway down"));
        assert_eq!(failure_detail("   "), None);
        let long = "x".repeat(500);
        assert_eq!(failure_detail(&long).unwrap().chars().count(), DETAIL_LIMIT + 1);
    }
}
