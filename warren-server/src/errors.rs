use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use thiserror::Error;
use warren_lobby::{AuthError, DatabaseError, RoomError};

use crate::serialized::Envelope;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unknown(String),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound { resource, .. } => Self::NotFound(format!("{resource} not found")),
            conflict @ DatabaseError::Conflict { .. } => Self::Conflict(conflict.to_string()),
            DatabaseError::Internal(e) => Self::Unknown(e.to_string()),
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidCredentials => Self::InvalidCredentials,
            taken @ (AuthError::EmailTaken | AuthError::UsernameTaken) => {
                Self::Conflict(taken.to_string())
            }
            AuthError::Db(e) => e.into(),
            e => Self::Unknown(e.to_string()),
        }
    }
}

impl From<RoomError> for ServerError {
    fn from(value: RoomError) -> Self {
        match value {
            RoomError::NotFound => Self::NotFound("Room not found".to_string()),
            RoomError::Db(e) => e.into(),
            e => Self::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.as_status_code();

        // Internal details are logged, never surfaced as the message
        let envelope = if status.is_server_error() {
            error!("Internal server error: {self}");
            Envelope::failure("Internal server error", Some(self.to_string()))
        } else {
            Envelope::failure(self.to_string(), None)
        };

        (status, Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn room_errors_map_to_client_statuses() {
        let full: ServerError = RoomError::Full.into();
        let missing: ServerError = RoomError::NotFound.into();
        let not_host: ServerError = RoomError::NotHost.into();

        assert_eq!(full.as_status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(missing.as_status_code(), StatusCode::NOT_FOUND);
        assert_eq!(not_host.as_status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn auth_errors_map_to_conflict_and_unauthorized() {
        let email: ServerError = AuthError::EmailTaken.into();
        let credentials: ServerError = AuthError::InvalidCredentials.into();

        assert_eq!(email.as_status_code(), StatusCode::CONFLICT);
        assert_eq!(credentials.as_status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        let error: ServerError = DatabaseError::Internal("connection reset".into()).into();

        assert_eq!(error.as_status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
