use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use thiserror::Error;

use aircast_core::{channels::ChannelError, store::StoreError};
use aircast_station::{
    db::DatabaseError, AuthError, InputError, LivestreamError, QueueError, RecordingError,
    WebhookError,
};

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    TemporarilyUnavailable(String),
    #[error("Unknown internal error: {0}")]
    Unknown(String),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TemporarilyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.as_status_code();

        // Log server errors when they happen
        if status.as_u16() >= 500 {
            error!("Request failed: {self}");
            return (status, "Internal Server Error".to_string()).into_response();
        }

        (status, self.to_string()).into_response()
    }
}

impl From<AuthError> for ServerError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::WrongKind => Self::Forbidden(value.to_string()),
            e => Self::Unauthenticated(e.to_string()),
        }
    }
}

impl From<QueueError> for ServerError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::QuotaExhausted { .. }
            | QueueError::QueueFull { .. }
            | QueueError::Duplicate(_)
            | QueueError::NotOwner(_) => Self::Forbidden(value.to_string()),
            QueueError::TooLong { .. } | QueueError::BadInput(_) => {
                Self::BadInput(value.to_string())
            }
            QueueError::NotFound(_) => Self::NotFound(value.to_string()),
            QueueError::Input(e) => e.into(),
            QueueError::Store(e) => e.into(),
            QueueError::Channel(e) => e.into(),
        }
    }
}

impl From<InputError> for ServerError {
    fn from(value: InputError) -> Self {
        match value {
            InputError::Invalid(_) | InputError::ParseError(_) => {
                Self::BadInput(value.to_string())
            }
            InputError::FetchError(_) | InputError::Timeout => {
                Self::TemporarilyUnavailable(value.to_string())
            }
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(value: StoreError) -> Self {
        Self::TemporarilyUnavailable(value.to_string())
    }
}

impl From<ChannelError> for ServerError {
    fn from(value: ChannelError) -> Self {
        match value {
            ChannelError::Protocol(_) => Self::NotFound(value.to_string()),
            e => Self::TemporarilyUnavailable(e.to_string()),
        }
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound { .. } => Self::NotFound(value.to_string()),
            DatabaseError::Conflict { .. } => Self::Conflict(value.to_string()),
            DatabaseError::Internal(_) => Self::TemporarilyUnavailable(value.to_string()),
        }
    }
}

impl From<LivestreamError> for ServerError {
    fn from(value: LivestreamError) -> Self {
        match value {
            LivestreamError::Auth(e) => e.into(),
            LivestreamError::Store(e) => e.into(),
        }
    }
}

impl From<WebhookError> for ServerError {
    fn from(value: WebhookError) -> Self {
        match value {
            WebhookError::WeakSigningKey
            | WebhookError::UnknownEvent(_)
            | WebhookError::NoEvents
            | WebhookError::InvalidUrl(_) => Self::BadInput(value.to_string()),
            WebhookError::Database(e) => e.into(),
            WebhookError::Store(e) => e.into(),
        }
    }
}

impl From<RecordingError> for ServerError {
    fn from(value: RecordingError) -> Self {
        match value {
            RecordingError::Database(e) => e.into(),
            RecordingError::Store(e) => e.into(),
            RecordingError::Storage(e) => Self::Unknown(e.to_string()),
        }
    }
}
