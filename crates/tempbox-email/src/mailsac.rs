use crate::backend::{check_status, endpoint, http_client, random_token, AccountMap};
use crate::{EmailError, ProviderBackend};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use url::Url;
use tempbox_config::MailsacConfig;
use tempbox_core::{Account, MailAttachment, MailMessage, ProviderKind};

const PROVIDER: ProviderKind = ProviderKind::Mailsac;
const KEY_HEADER: &str = "Mailsac-Key";

/// Mailsac: any address on its public domain receives mail without
/// registration, so accounts are purely local bookkeeping.
pub struct MailsacBackend {
    http: reqwest::Client,
    api_base: String,
    domain: String,
    api_key: Option<String>,
    accounts: AccountMap,
}

impl fmt::Debug for MailsacBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailsacBackend")
            .field("api_base", &self.api_base)
            .field("domain", &self.domain)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl MailsacBackend {
    pub fn new(
        api_base: impl Into<String>,
        domain: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EmailError> {
        Ok(Self {
            http: http_client(timeout)?,
            api_base: api_base.into(),
            domain: domain.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
            accounts: AccountMap::default(),
        })
    }

    pub fn from_config(config: &MailsacConfig) -> Result<Self, EmailError> {
        Self::new(
            config.api_base.as_str(),
            config.domain.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn with_key(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(KEY_HEADER, key),
            None => request,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, EmailError> {
        endpoint(&self.api_base, segments)
    }

    /// Fetches a body rendition; any failure yields an empty string.
    async fn fetch_body(&self, rendition: &str, address: &str, message_id: &str) -> String {
        let url = match self.url(&[rendition, address, message_id]) {
            Ok(url) => url,
            Err(err) => {
                tracing::debug!(rendition, "mailsac body skipped: {err}");
                return String::new();
            }
        };
        let path = url.path().to_string();
        let response = match self.with_key(self.http.get(url)).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(%path, "mailsac body fetch failed: {err}");
                return String::new();
            }
        };
        match check_status(PROVIDER, response).await {
            Ok(response) => response.text().await.unwrap_or_default(),
            Err(err) => {
                tracing::debug!(%path, "mailsac body unavailable: {err}");
                String::new()
            }
        }
    }
}

#[async_trait]
impl ProviderBackend for MailsacBackend {
    fn kind(&self) -> ProviderKind {
        PROVIDER
    }

    async fn create_account(&self) -> Result<Account, EmailError> {
        let account = Account::new(format!("{}@{}", random_token(10), self.domain), PROVIDER);
        self.accounts.insert(account.clone()).await;
        tracing::info!(address = %account.email, "mailsac inbox created");
        Ok(account)
    }

    async fn list_messages(&self, address: &str) -> Result<Vec<MailMessage>, EmailError> {
        let url = self.url(&["addresses", address, "messages"])?;
        let response = self.with_key(self.http.get(url)).send().await?;
        let messages: Vec<MailsacMessage> = match check_status(PROVIDER, response).await {
            Ok(response) => response.json().await?,
            Err(EmailError::NotFound(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(messages
            .into_iter()
            .map(|message| message.into_mail_message(address))
            .collect())
    }

    async fn get_message(&self, address: &str, message_id: &str) -> Result<MailMessage, EmailError> {
        let url = self.url(&["addresses", address, "messages", message_id])?;
        let response = self.with_key(self.http.get(url)).send().await?;
        let metadata: MailsacMessage = check_status(PROVIDER, response).await?.json().await?;

        let mut message = metadata.into_mail_message(address);
        message.text = self.fetch_body("text", address, message_id).await;
        message.html = self.fetch_body("body", address, message_id).await;
        Ok(message)
    }

    async fn delete_message(&self, address: &str, message_id: &str) -> Result<(), EmailError> {
        let url = self.url(&["addresses", address, "messages", message_id])?;
        let response = self
            .with_key(self.http.delete(url))
            .send()
            .await?;
        check_status(PROVIDER, response).await?;
        Ok(())
    }

    async fn get_account(&self, address: &str) -> Option<Account> {
        self.accounts.get(address).await
    }

    async fn set_account(&self, account: Account) {
        self.accounts.insert(account).await;
    }

    async fn remove_account(&self, address: &str) -> Option<Account> {
        self.accounts.remove(address).await
    }
}

#[derive(Debug, Deserialize)]
struct MailsacAddress {
    #[serde(default)]
    address: String,
    #[serde(default)]
    name: Option<String>,
}

/// Older API versions report an attachment count, newer ones a list of hashes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Attachments {
    Hashes(Vec<String>),
    Count(u64),
}

#[derive(Debug, Deserialize)]
struct MailsacMessage {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    from: Vec<MailsacAddress>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    received: Option<DateTime<Utc>>,
    #[serde(default)]
    attachments: Option<Attachments>,
    #[serde(default)]
    read: Option<bool>,
}

impl MailsacMessage {
    fn into_mail_message(self, address: &str) -> MailMessage {
        let sender = self.from.into_iter().next();
        let from_name = sender
            .as_ref()
            .and_then(|s| s.name.clone())
            .filter(|name| !name.is_empty());
        let from = sender
            .map(|s| s.address)
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| "unknown@mailsac.com".to_string());

        let attachments: Vec<MailAttachment> = match &self.attachments {
            Some(Attachments::Hashes(hashes)) => hashes
                .iter()
                .map(|hash| MailAttachment {
                    id: hash.clone(),
                    filename: String::new(),
                    content_type: String::new(),
                    size: 0,
                })
                .collect(),
            _ => Vec::new(),
        };
        let has_attachments = match self.attachments {
            Some(Attachments::Hashes(hashes)) => !hashes.is_empty(),
            Some(Attachments::Count(count)) => count > 0,
            None => false,
        };
        let subject = self
            .subject
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "(no subject)".to_string());

        MailMessage {
            id: self.id,
            from,
            from_name,
            to: address.to_string(),
            intro: subject.clone(),
            subject,
            text: String::new(),
            html: String::new(),
            received_at: self.received.unwrap_or_else(Utc::now),
            has_attachments,
            seen: self.read.unwrap_or(false),
            attachments,
            brand_info: None,
            verification_code: None,
            service: None,
        }
    }
}
