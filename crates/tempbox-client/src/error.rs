use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api returned {status}: {message}")]
    Api {
        status: u16,
        error: String,
        message: String,
        needs_restore: bool,
    },
    #[error("invalid api url: {0}")]
    InvalidUrl(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// True when the server lost the account and needs the credential blob.
    pub fn needs_restore(&self) -> bool {
        matches!(self, Self::Api { needs_restore: true, .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}
