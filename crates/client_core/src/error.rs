use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("backend rejected request ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("malformed backend payload: {0}")]
    Decode(String),
    #[error("subscription closed by backend")]
    SubscriptionClosed,
}

impl BackendError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Rejected {
            code: ErrorCode::NotFound,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                code: ErrorCode::NotFound,
                ..
            }
        )
    }
}

impl From<ApiError> for BackendError {
    fn from(value: ApiError) -> Self {
        Self::Rejected {
            code: value.code,
            message: value.message,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no task at row {0}")]
    UnknownRow(usize),
    #[error("task list controller has been shut down")]
    ShutDown,
}
