use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tempbox_email::EmailError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid email address")]
    InvalidAddress,
    #[error("invalid message id")]
    InvalidMessageId,
    #[error("unknown provider '{0}'")]
    InvalidProvider(String),
    #[error("no account for {0}")]
    NeedsRestore(String),
    #[error(transparent)]
    Email(#[from] EmailError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidAddress | Self::InvalidMessageId | Self::InvalidProvider(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NeedsRestore(_) => StatusCode::NOT_FOUND,
            Self::Email(err) => match err {
                EmailError::NotFound(_) | EmailError::AccountNotFound(_) => StatusCode::NOT_FOUND,
                EmailError::ProviderDisabled(_) | EmailError::InvalidInput(_) => {
                    StatusCode::BAD_REQUEST
                }
                EmailError::AllProvidersFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
                EmailError::Unauthorized { .. }
                | EmailError::Upstream { .. }
                | EmailError::ProviderUnavailable { .. }
                | EmailError::Http(_)
                | EmailError::Data(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::InvalidAddress => "Invalid email address",
            Self::InvalidMessageId => "Invalid message id",
            Self::InvalidProvider(_) => "Invalid provider",
            Self::NeedsRestore(_) => "Account not found",
            Self::Email(EmailError::NotFound(_)) => "Message not found",
            Self::Email(EmailError::AccountNotFound(_)) => "Account not found",
            Self::Email(EmailError::ProviderDisabled(_)) => "Provider not available",
            Self::Email(EmailError::InvalidInput(_)) => "Invalid request",
            Self::Email(EmailError::AllProvidersFailed(_)) => "Failed to generate email",
            Self::Email(_) => "Email provider error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "request failed: {self}");
        } else {
            tracing::debug!(status = status.as_u16(), "request rejected: {self}");
        }

        let body = match &self {
            Self::NeedsRestore(_) => json!({
                "error": self.title(),
                "message": self.to_string(),
                "needsRestore": true,
            }),
            _ => json!({ "error": self.title(), "message": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempbox_core::ProviderKind;

    #[test]
    fn maps_errors_to_status_codes() {
        assert_eq!(ApiError::InvalidAddress.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::NeedsRestore("a@b.co".to_string()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(EmailError::Unauthorized {
                provider: ProviderKind::MailTm
            })
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(EmailError::AllProvidersFailed("x".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(EmailError::NotFound("/messages/1".to_string())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(EmailError::InvalidInput("path segment '..'".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
