use tempbox_core::ProviderKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{provider} rejected the stored credentials")]
    Unauthorized { provider: ProviderKind },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("{provider} returned {status}: {message}")]
    Upstream {
        provider: ProviderKind,
        status: u16,
        message: String,
    },
    #[error("{provider} unavailable: {message}")]
    ProviderUnavailable {
        provider: ProviderKind,
        message: String,
    },
    #[error("provider {0} is not enabled")]
    ProviderDisabled(ProviderKind),
    #[error("all email providers failed: {0}")]
    AllProvidersFailed(String),
    #[error("invalid data: {0}")]
    Data(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl EmailError {
    /// Errors caused by the provider rather than by what the caller asked for.
    pub fn is_provider_fault(&self) -> bool {
        match self {
            Self::Http(_)
            | Self::Unauthorized { .. }
            | Self::ProviderUnavailable { .. }
            | Self::AllProvidersFailed(_)
            | Self::Data(_) => true,
            Self::Upstream { status, .. } => *status >= 500 || *status == 429,
            Self::NotFound(_)
            | Self::AccountNotFound(_)
            | Self::ProviderDisabled(_)
            | Self::InvalidInput(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::AccountNotFound(_))
    }
}
