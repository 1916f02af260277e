use crate::EmailError;
use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;
use tempbox_core::{Account, MailMessage, ProviderKind};
use tokio::sync::RwLock;
use url::Url;

/// One third-party temporary-mail provider.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn create_account(&self) -> Result<Account, EmailError>;

    async fn list_messages(&self, address: &str) -> Result<Vec<MailMessage>, EmailError>;

    /// Inbox listing for polling paths: any failure reads as an empty inbox.
    async fn list_messages_or_empty(&self, address: &str) -> Vec<MailMessage> {
        match self.list_messages(address).await {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(provider = %self.kind(), address, "listing messages failed: {err}");
                Vec::new()
            }
        }
    }

    async fn get_message(&self, address: &str, message_id: &str) -> Result<MailMessage, EmailError>;

    async fn delete_message(&self, address: &str, message_id: &str) -> Result<(), EmailError>;

    async fn get_account(&self, address: &str) -> Option<Account>;

    async fn set_account(&self, account: Account);

    async fn remove_account(&self, address: &str) -> Option<Account>;
}

/// Accounts a backend knows about, keyed by address.
#[derive(Default)]
pub(crate) struct AccountMap {
    inner: RwLock<HashMap<String, Account>>,
}

impl AccountMap {
    pub(crate) async fn get(&self, address: &str) -> Option<Account> {
        self.inner.read().await.get(address).cloned()
    }

    pub(crate) async fn insert(&self, account: Account) {
        self.inner
            .write()
            .await
            .insert(account.email.clone(), account);
    }

    pub(crate) async fn remove(&self, address: &str) -> Option<Account> {
        self.inner.write().await.remove(address)
    }

    pub(crate) async fn replace_token(&self, address: &str, token: String) -> Option<Account> {
        let mut accounts = self.inner.write().await;
        let account = accounts.get_mut(address)?;
        account.token = Some(token);
        Some(account.clone())
    }

    pub(crate) async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

const LOCAL_PART_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub(crate) fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| LOCAL_PART_CHARSET[rng.gen_range(0..LOCAL_PART_CHARSET.len())] as char)
        .collect()
}

pub(crate) fn random_suffix(upper: u32) -> u32 {
    rand::thread_rng().gen_range(0..upper)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, EmailError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Appends `segments` to `base`, percent-encoding each one. Empty and
/// dot-only segments are refused so caller input cannot climb the path.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url, EmailError> {
    if let Some(bad) = segments
        .iter()
        .find(|segment| segment.is_empty() || segment.chars().all(|c| c == '.'))
    {
        return Err(EmailError::InvalidInput(format!("path segment '{bad}'")));
    }

    let mut url = Url::parse(base)
        .map_err(|err| EmailError::Data(format!("invalid api base '{base}': {err}")))?;
    url.path_segments_mut()
        .map_err(|_| EmailError::Data(format!("api base '{base}' cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Passes successful responses through and turns the rest into errors.
pub(crate) async fn check_status(
    provider: ProviderKind,
    response: reqwest::Response,
) -> Result<reqwest::Response, EmailError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED => Err(EmailError::Unauthorized { provider }),
        StatusCode::NOT_FOUND => Err(EmailError::NotFound(path)),
        _ => Err(EmailError::Upstream {
            provider,
            status: status.as_u16(),
            message: upstream_message(&body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string()
            }),
        }),
    }
}

/// Pulls a human-readable message out of a provider error body.
pub(crate) fn upstream_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "hydra:description", "detail", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_tokens_use_lowercase_alphanumerics() {
        let token = random_token(24);
        assert_eq!(token.len(), 24);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn builds_endpoints_without_double_slashes() {
        let url = endpoint("https://api.mail.tm/", &["domains"]).expect("endpoint");
        assert_eq!(url.as_str(), "https://api.mail.tm/domains");
        let url = endpoint("https://mailsac.com/api", &["addresses", "a+b@c.co", "messages"])
            .expect("endpoint");
        assert_eq!(url.as_str(), "https://mailsac.com/api/addresses/a+b@c.co/messages");
    }

    #[test]
    fn endpoint_segments_cannot_change_the_path() {
        let url = endpoint("https://api.mail.tm", &["messages", "a/b?c#d"]).expect("endpoint");
        assert_eq!(url.path(), "/messages/a%2Fb%3Fc%23d");
        assert_eq!(url.query(), None);

        for bad in ["", ".", "..", "..."] {
            let err = endpoint("https://api.mail.tm", &["messages", bad]).expect_err("refused");
            assert!(matches!(err, EmailError::InvalidInput(_)), "{bad:?}");
            assert!(!err.is_provider_fault());
        }
    }

    #[test]
    fn extracts_upstream_messages() {
        assert_eq!(
            upstream_message(r#"{"hydra:description":"address: This value is already used."}"#)
                .as_deref(),
            Some("address: This value is already used.")
        );
        assert_eq!(upstream_message(r#"{"message":"Rate limited"}"#).as_deref(), Some("Rate limited"));
        assert_eq!(upstream_message("<html>bad gateway</html>"), None);
    }

    #[tokio::test]
    async fn replacing_a_token_keeps_a_single_entry() {
        let map = AccountMap::default();
        let mut account = Account::new("box@dcctb.com", ProviderKind::MailTm);
        account.token = Some("old".to_string());
        map.insert(account).await;

        let updated = map
            .replace_token("box@dcctb.com", "new".to_string())
            .await
            .expect("account present");
        assert_eq!(updated.token.as_deref(), Some("new"));
        assert_eq!(map.len().await, 1);
        assert!(map.replace_token("missing@dcctb.com", "x".to_string()).await.is_none());
    }
}
