use crate::error::ClientError;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tempbox_core::{AccountCredentials, MailMessage, ProviderKind};

pub const CREDENTIALS_HEADER: &str = "x-account-credentials";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedInbox {
    pub email: String,
    pub provider: ProviderKind,
    pub created_at: i64,
    #[serde(default)]
    pub permanent: bool,
    pub credentials: AccountCredentials,
}

impl GeneratedInbox {
    /// The blob to persist locally, with the fields a restore needs filled in.
    pub fn restorable_credentials(&self) -> AccountCredentials {
        let mut credentials = self.credentials.clone();
        credentials.email.get_or_insert_with(|| self.email.clone());
        credentials.provider.get_or_insert(self.provider);
        if credentials.created_at.is_none() {
            credentials.created_at = chrono::DateTime::from_timestamp_millis(self.created_at);
        }
        credentials
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Inbox {
    pub emails: Vec<MailMessage>,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub providers: Vec<ProviderKind>,
    pub active_provider: ProviderKind,
    #[serde(default)]
    pub provider_failures: BTreeMap<ProviderKind, u32>,
    #[serde(default)]
    pub provider_usage: BTreeMap<ProviderKind, u64>,
    pub redis_connected: bool,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub providers: Vec<ProviderKind>,
    pub active_provider: ProviderKind,
    pub redis: bool,
}

#[derive(Debug, Deserialize)]
struct Success {
    success: bool,
}

/// HTTP client for the tempbox API.
#[derive(Debug, Clone)]
pub struct InboxClient {
    http: reqwest::Client,
    base: Url,
}

impl InboxClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|err| ClientError::InvalidUrl(format!("{base_url}: {err}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tempbox/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{path}", self.base_url()))
    }

    pub async fn generate(
        &self,
        provider: Option<ProviderKind>,
    ) -> Result<GeneratedInbox, ClientError> {
        let mut request = self.request(Method::POST, "/api/generate-email");
        if let Some(provider) = provider {
            request = request.query(&[("provider", provider.as_str())]);
        }
        decode(request.send().await?).await
    }

    /// Lists an inbox. The credential blob lets the server rebuild an
    /// account it no longer holds.
    pub async fn list_messages(
        &self,
        address: &str,
        credentials: Option<&AccountCredentials>,
    ) -> Result<Inbox, ClientError> {
        let mut request = self.request(Method::GET, &format!("/api/emails/{address}"));
        if let Some(credentials) = credentials {
            request = request.header(CREDENTIALS_HEADER, serde_json::to_string(credentials)?);
        }
        decode(request.send().await?).await
    }

    pub async fn get_message(&self, address: &str, id: &str) -> Result<MailMessage, ClientError> {
        let request = self.request(Method::GET, &format!("/api/emails/{address}/{id}"));
        decode(request.send().await?).await
    }

    pub async fn delete_message(&self, address: &str, id: &str) -> Result<bool, ClientError> {
        let request = self.request(Method::DELETE, &format!("/api/emails/{address}/{id}"));
        let body: Success = decode(request.send().await?).await?;
        Ok(body.success)
    }

    pub async fn delete_account(&self, address: &str) -> Result<bool, ClientError> {
        let request = self.request(Method::DELETE, &format!("/api/account/{address}"));
        let body: Success = decode(request.send().await?).await?;
        Ok(body.success)
    }

    pub async fn info(&self) -> Result<ServerInfo, ClientError> {
        decode(self.request(Method::GET, "/api/info").send().await?).await
    }

    pub async fn health(&self) -> Result<HealthReport, ClientError> {
        decode(self.request(Method::GET, "/api/health").send().await?).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
    let field = |name: &str| body.get(name).and_then(Value::as_str).map(str::to_string);
    Err(ClientError::Api {
        status: status.as_u16(),
        error: field("error").unwrap_or_else(|| status.to_string()),
        message: field("message").unwrap_or(text),
        needs_restore: body
            .get("needsRestore")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}
