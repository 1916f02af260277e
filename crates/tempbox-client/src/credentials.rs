use crate::error::ClientError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempbox_core::AccountCredentials;

pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedCredentials {
    pub credentials: AccountCredentials,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub saved_at: DateTime<Utc>,
}

/// Inbox credentials kept on disk so an inbox survives a server restart.
///
/// Every mutation rewrites the whole file through a temp file and rename.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    entries: BTreeMap<String, SavedCredentials>,
}

impl CredentialStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(path = %path.display(), "discarding unreadable credential file: {err}");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(path = %path.display(), saved = entries.len(), "credential store opened");
        Ok(Self { path, entries })
    }

    pub fn in_dir(data_dir: &Path) -> Result<Self, ClientError> {
        Self::open(data_dir.join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(
        &mut self,
        email: &str,
        credentials: AccountCredentials,
    ) -> Result<(), ClientError> {
        self.entries.insert(
            email.to_string(),
            SavedCredentials {
                credentials,
                saved_at: Utc::now(),
            },
        );
        self.flush()
    }

    pub fn get(&self, email: &str) -> Option<&AccountCredentials> {
        self.entries.get(email).map(|saved| &saved.credentials)
    }

    pub fn all(&self) -> &BTreeMap<String, SavedCredentials> {
        &self.entries
    }

    /// Returns whether an entry existed.
    pub fn delete(&mut self, email: &str) -> Result<bool, ClientError> {
        let removed = self.entries.remove(email).is_some();
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<(), ClientError> {
        self.entries.clear();
        self.flush()
    }

    fn flush(&self) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempbox_core::ProviderKind;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("tempbox-client-{}", uuid::Uuid::new_v4()))
    }

    fn credentials(token: &str) -> AccountCredentials {
        AccountCredentials {
            id: Some("acc-1".to_string()),
            password: Some("pw".to_string()),
            token: Some(token.to_string()),
            provider: Some(ProviderKind::MailTm),
            email: Some("box@example.test".to_string()),
            created_at: None,
        }
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = scratch_dir();
        let store = CredentialStore::in_dir(&dir).expect("open");
        assert!(store.all().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn saved_credentials_survive_reopen() {
        let dir = scratch_dir();
        let mut store = CredentialStore::in_dir(&dir).expect("open");
        store
            .save("box@example.test", credentials("t1"))
            .expect("save");
        store
            .save("box@example.test", credentials("t2"))
            .expect("overwrite");

        let reopened = CredentialStore::in_dir(&dir).expect("reopen");
        assert_eq!(reopened.all().len(), 1);
        assert_eq!(
            reopened
                .get("box@example.test")
                .and_then(|c| c.token.as_deref()),
            Some("t2")
        );

        let raw = fs::read_to_string(dir.join(CREDENTIALS_FILE)).expect("read file");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert!(value["box@example.test"]["savedAt"].is_i64());
        assert_eq!(value["box@example.test"]["credentials"]["provider"], "mail.tm");
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn delete_and_clear() {
        let dir = scratch_dir();
        let mut store = CredentialStore::in_dir(&dir).expect("open");
        store.save("a@example.test", credentials("a")).expect("save a");
        store.save("b@example.test", credentials("b")).expect("save b");

        assert!(store.delete("a@example.test").expect("delete"));
        assert!(!store.delete("a@example.test").expect("delete again"));
        assert!(store.get("a@example.test").is_none());

        store.clear().expect("clear");
        let reopened = CredentialStore::in_dir(&dir).expect("reopen");
        assert!(reopened.all().is_empty());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn corrupt_file_is_discarded() {
        let dir = scratch_dir();
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(CREDENTIALS_FILE), "{not json").expect("write");
        let store = CredentialStore::in_dir(&dir).expect("open");
        assert!(store.all().is_empty());
        fs::remove_dir_all(dir).ok();
    }
}
