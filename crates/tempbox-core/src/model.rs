use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderKind {
    #[serde(rename = "mail.tm")]
    MailTm,
    #[serde(rename = "mailsac")]
    Mailsac,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::MailTm, ProviderKind::Mailsac];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MailTm => "mail.tm",
            Self::Mailsac => "mailsac",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown provider '{}'", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mail.tm" | "mailtm" => Ok(Self::MailTm),
            "mailsac" => Ok(Self::Mailsac),
            _ => Err(UnknownProvider(value.to_string())),
        }
    }
}

/// A provider inbox plus the material needed to authenticate against it.
///
/// Mailsac inboxes are unauthenticated, so `id`, `password` and `token`
/// stay empty for them.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub email: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("email", &self.email)
            .field("provider", &self.provider)
            .field("id", &self.id)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Account {
    pub fn new(email: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            email: email.into(),
            provider,
            id: None,
            password: None,
            token: None,
            created_at: Utc::now(),
        }
    }

    pub fn credentials(&self) -> AccountCredentials {
        AccountCredentials {
            id: self.id.clone(),
            password: self.password.clone(),
            token: self.token.clone(),
            provider: Some(self.provider),
            email: None,
            created_at: None,
        }
    }

    /// Rebuilds an account from a blob a client handed back to us.
    pub fn from_credentials(
        email: &str,
        credentials: AccountCredentials,
        mailsac_domain: &str,
    ) -> Self {
        let provider = credentials.resolve_provider(email, mailsac_domain);
        Self {
            email: email.to_string(),
            provider,
            id: credentials.id,
            password: credentials.password,
            token: credentials.token,
            created_at: credentials.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Serialized identity a client stores locally and may resubmit in the
/// `x-account-credentials` header.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountCredentials {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("id", &self.id)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("provider", &self.provider)
            .field("email", &self.email)
            .finish()
    }
}

impl AccountCredentials {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Explicit provider wins; otherwise the address domain decides.
    pub fn resolve_provider(&self, email: &str, mailsac_domain: &str) -> ProviderKind {
        if let Some(provider) = self.provider {
            return provider;
        }

        let on_mailsac = email
            .rsplit_once('@')
            .map(|(_, domain)| domain.eq_ignore_ascii_case(mailsac_domain))
            .unwrap_or(false);
        if on_mailsac {
            ProviderKind::Mailsac
        } else {
            ProviderKind::MailTm
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.password.is_none() && self.token.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MailAttachment {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BrandInfo {
    pub domain: Option<String>,
    pub company_name: String,
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    Verification,
    Invitation,
    Receipt,
    Account,
    Order,
    Security,
    Welcome,
    Invoice,
    Message,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHint {
    pub service: Option<String>,
    pub category: MessageCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub id: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    pub to: String,
    pub subject: String,
    pub intro: String,
    pub text: String,
    pub html: String,
    #[serde(rename = "date")]
    pub received_at: DateTime<Utc>,
    pub has_attachments: bool,
    pub seen: bool,
    #[serde(default)]
    pub attachments: Vec<MailAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_info: Option<BrandInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceHint>,
}

impl MailMessage {
    /// Body used for display and code extraction: text, falling back to the intro.
    pub fn display_text(&self) -> &str {
        if self.text.trim().is_empty() {
            &self.intro
        } else {
            &self.text
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub providers: Vec<ProviderKind>,
    pub best_provider: ProviderKind,
    pub failures: BTreeMap<ProviderKind, u32>,
    pub usage: BTreeMap<ProviderKind, u64>,
    pub seconds_since_rotation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_round_trip_through_serde() {
        let json = serde_json::to_string(&ProviderKind::MailTm).expect("serialize");
        assert_eq!(json, "\"mail.tm\"");
        assert_eq!("MailTM".parse::<ProviderKind>(), Ok(ProviderKind::MailTm));
        assert_eq!(" mailsac ".parse::<ProviderKind>(), Ok(ProviderKind::Mailsac));
        assert!("guerrilla".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut account = Account::new("abc@example.com", ProviderKind::MailTm);
        account.password = Some("hunter2".to_string());
        account.token = Some("jwt-value".to_string());

        let rendered = format!("{account:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("jwt-value"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn credentials_infer_provider_from_domain() {
        let blob = AccountCredentials::parse(r#"{"id":null,"password":null,"token":null}"#)
            .expect("blob parsed");
        assert_eq!(
            blob.resolve_provider("box@mailsac.com", "mailsac.com"),
            ProviderKind::Mailsac
        );
        assert_eq!(
            blob.resolve_provider("box@dcctb.com", "mailsac.com"),
            ProviderKind::MailTm
        );

        let explicit = AccountCredentials::parse(r#"{"token":"t","provider":"mailsac"}"#)
            .expect("blob parsed");
        assert_eq!(
            explicit.resolve_provider("box@dcctb.com", "mailsac.com"),
            ProviderKind::Mailsac
        );
    }

    #[test]
    fn account_rebuilt_from_credentials_keeps_secrets() {
        let blob = AccountCredentials::parse(
            r#"{"id":"acc-1","password":"pw","token":"tok","createdAt":1700000000000}"#,
        )
        .expect("blob parsed");
        let account = Account::from_credentials("box@dcctb.com", blob, "mailsac.com");

        assert_eq!(account.provider, ProviderKind::MailTm);
        assert_eq!(account.id.as_deref(), Some("acc-1"));
        assert_eq!(account.token.as_deref(), Some("tok"));
        assert_eq!(account.created_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn emitted_credentials_keep_null_secret_fields() {
        let account = Account::new("box@mailsac.com", ProviderKind::Mailsac);
        let value = serde_json::to_value(account.credentials()).expect("serialize");
        assert!(value.get("id").expect("id present").is_null());
        assert!(value.get("token").expect("token present").is_null());
        assert_eq!(value["provider"], "mailsac");
    }
}
