use crate::backend::{
    check_status, endpoint, http_client, random_suffix, random_token, AccountMap,
};
use crate::{EmailError, ProviderBackend, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;
use tempbox_config::MailTmConfig;
use tempbox_core::{Account, MailAttachment, MailMessage, ProviderKind};

const PROVIDER: ProviderKind = ProviderKind::MailTm;

/// Mail.tm: registered accounts with bearer-token auth.
pub struct MailTmBackend {
    http: reqwest::Client,
    api_base: String,
    retry: RetryPolicy,
    accounts: AccountMap,
}

impl MailTmBackend {
    pub fn new(
        api_base: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, EmailError> {
        Ok(Self {
            http: http_client(timeout)?,
            api_base: api_base.into(),
            retry,
            accounts: AccountMap::default(),
        })
    }

    pub fn from_config(config: &MailTmConfig, retry: RetryPolicy) -> Result<Self, EmailError> {
        Self::new(
            config.api_base.as_str(),
            Duration::from_secs(config.request_timeout_secs),
            retry,
        )
    }

    pub async fn account_count(&self) -> usize {
        self.accounts.len().await
    }

    fn url(&self, segments: &[&str]) -> Result<Url, EmailError> {
        endpoint(&self.api_base, segments)
    }

    async fn register(&self) -> Result<Account, EmailError> {
        let domains: Collection<MailTmDomain> = check_status(
            PROVIDER,
            self.http.get(self.url(&["domains"])?).send().await?,
        )
        .await?
        .json()
        .await?;

        let domain = domains
            .into_vec()
            .into_iter()
            .find(|d| d.is_active)
            .map(|d| d.domain)
            .ok_or_else(|| EmailError::Data("mail.tm returned no active domains".to_string()))?;

        let email = format!("{}{}@{domain}", random_token(8), random_suffix(1000));
        let password = random_token(13);
        let credentials = serde_json::json!({ "address": email, "password": password });

        let created: MailTmAccountCreated = check_status(
            PROVIDER,
            self.http
                .post(self.url(&["accounts"])?)
                .json(&credentials)
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        let token = self.fetch_token(&email, &password).await?;

        let mut account = Account::new(email, PROVIDER);
        account.id = Some(created.id);
        account.password = Some(password);
        account.token = Some(token);
        Ok(account)
    }

    async fn fetch_token(&self, address: &str, password: &str) -> Result<String, EmailError> {
        let response = self
            .http
            .post(self.url(&["token"])?)
            .json(&serde_json::json!({ "address": address, "password": password }))
            .send()
            .await?;
        let payload: MailTmToken = check_status(PROVIDER, response).await?.json().await?;
        if payload.token.is_empty() {
            return Err(EmailError::Data("mail.tm returned an empty token".to_string()));
        }
        Ok(payload.token)
    }

    /// Trades the stored password for a fresh token and stores it in place.
    pub async fn reauthenticate(&self, address: &str) -> Result<Account, EmailError> {
        let account = self
            .accounts
            .get(address)
            .await
            .ok_or_else(|| EmailError::AccountNotFound(address.to_string()))?;
        let password = account
            .password
            .as_deref()
            .ok_or(EmailError::Unauthorized { provider: PROVIDER })?;

        tracing::info!(address, "refreshing mail.tm token");
        let token = self.fetch_token(address, password).await?;
        self.accounts
            .replace_token(address, token)
            .await
            .ok_or_else(|| EmailError::AccountNotFound(address.to_string()))
    }

    /// Sends with the stored token; a 401 triggers one re-authentication and
    /// exactly one retry.
    async fn send_authorized(
        &self,
        address: &str,
        method: Method,
        segments: &[&str],
    ) -> Result<reqwest::Response, EmailError> {
        let url = self.url(segments)?;
        let account = self
            .accounts
            .get(address)
            .await
            .ok_or_else(|| EmailError::AccountNotFound(address.to_string()))?;

        let token = match account.token {
            Some(token) => token,
            None => self.reauthenticate(address).await?.token.unwrap_or_default(),
        };

        let response = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(&token)
            .send()
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(PROVIDER, response).await;
        }

        tracing::warn!(address, "mail.tm token rejected");
        let refreshed = self.reauthenticate(address).await?;
        let response = self
            .http
            .request(method, url)
            .bearer_auth(refreshed.token.unwrap_or_default())
            .send()
            .await?;
        check_status(PROVIDER, response).await
    }
}

#[async_trait]
impl ProviderBackend for MailTmBackend {
    fn kind(&self) -> ProviderKind {
        PROVIDER
    }

    async fn create_account(&self) -> Result<Account, EmailError> {
        // Each attempt draws fresh credentials, so upstream rejections such as
        // an address collision are worth another try.
        let account = self
            .retry
            .run(
                "mail.tm account creation",
                |_| self.register(),
                |err: &EmailError| !matches!(err, EmailError::Unauthorized { .. }),
            )
            .await
            .map_err(|err| EmailError::ProviderUnavailable {
                provider: PROVIDER,
                message: upstream_reason(err),
            })?;

        self.accounts.insert(account.clone()).await;
        tracing::info!(address = %account.email, "mail.tm inbox created");
        Ok(account)
    }

    async fn list_messages(&self, address: &str) -> Result<Vec<MailMessage>, EmailError> {
        let response = self.send_authorized(address, Method::GET, &["messages"]).await?;
        let collection: Collection<MailTmMessage> = response.json().await?;
        Ok(collection
            .into_vec()
            .into_iter()
            .map(|message| message.into_mail_message(address))
            .collect())
    }

    async fn get_message(&self, address: &str, message_id: &str) -> Result<MailMessage, EmailError> {
        let response = self
            .send_authorized(address, Method::GET, &["messages", message_id])
            .await?;
        let message: MailTmMessage = response.json().await?;
        Ok(message.into_mail_message(address))
    }

    async fn delete_message(&self, address: &str, message_id: &str) -> Result<(), EmailError> {
        self.send_authorized(address, Method::DELETE, &["messages", message_id])
            .await?;
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

fn upstream_reason(err: EmailError) -> String {
    match err {
        EmailError::Upstream { message, .. } => message,
        other => other.to_string(),
    }
}

/// Mail.tm answers with JSON-LD collections or bare arrays depending on `Accept`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Collection<T> {
    Hydra {
        #[serde(rename = "hydra:member")]
        member: Vec<T>,
    },
    Plain(Vec<T>),
}

impl<T> Collection<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Hydra { member } => member,
            Self::Plain(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailTmDomain {
    domain: String,
    #[serde(default = "default_true")]
    is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct MailTmAccountCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MailTmToken {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Deserialize)]
struct MailTmAddress {
    #[serde(default)]
    address: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HtmlBody {
    Parts(Vec<String>),
    Single(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailTmAttachment {
    id: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailTmMessage {
    id: String,
    #[serde(default)]
    from: Option<MailTmAddress>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    intro: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    html: Option<HtmlBody>,
    #[serde(default)]
    seen: bool,
    #[serde(default)]
    has_attachments: bool,
    #[serde(default)]
    attachments: Vec<MailTmAttachment>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl MailTmMessage {
    fn into_mail_message(self, address: &str) -> MailMessage {
        let html = match self.html {
            Some(HtmlBody::Parts(parts)) => parts.join(""),
            Some(HtmlBody::Single(html)) => html,
            None => String::new(),
        };
        let (from, from_name) = match self.from {
            Some(sender) => (sender.address, sender.name.filter(|n| !n.is_empty())),
            None => (String::new(), None),
        };
        let attachments = self
            .attachments
            .into_iter()
            .map(|a| MailAttachment {
                id: a.id,
                filename: a.filename,
                content_type: a.content_type,
                size: a.size,
            })
            .collect::<Vec<_>>();

        MailMessage {
            id: self.id,
            from,
            from_name,
            to: address.to_string(),
            subject: self.subject,
            intro: self.intro,
            text: self.text.unwrap_or_default(),
            html,
            received_at: self.created_at.unwrap_or_else(Utc::now),
            has_attachments: self.has_attachments || !attachments.is_empty(),
            seen: self.seen,
            attachments,
            brand_info: None,
            verification_code: None,
            service: None,
        }
    }
}
