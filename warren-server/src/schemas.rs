use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use validator::{Validate, ValidationError};

use crate::errors::ServerError;

fn alphanumeric(value: &str) -> Result<(), ValidationError> {
    if value.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ValidationError::new("alphanumeric"))
    }
}

#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterSchema {
    #[validate(length(min = 3, max = 30), custom(function = "alphanumeric"))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 64))]
    pub password: String,
}

#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoginSchema {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 64))]
    pub password: String,
}

#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewRoomSchema {
    #[validate(length(min = 1, max = 64))]
    pub name: Option<String>,
    /// Capacity limits are enforced by the room engine, not here
    pub max_players: Option<i32>,
}

#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JoinByCodeSchema {
    #[validate(length(min = 1, max = 16))]
    pub code: String,
}

/// Wrapper over [Json] that validates the body
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value): Json<T> = Json::from_request(req, state)
            .await
            .map_err(|e| ServerError::BadRequest(e.to_string()))?;

        value
            .validate()
            .map_err(|e| ServerError::BadRequest(e.to_string()))?;

        Ok(Self(value))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_schema_is_validated() {
        let valid = RegisterSchema {
            username: "wombat".to_string(),
            email: "wombat@example.com".to_string(),
            password: "hunter2hunter2".to_string(),
        };

        let bad_email = RegisterSchema {
            username: "wombat".to_string(),
            email: "not-an-email".to_string(),
            password: "hunter2hunter2".to_string(),
        };

        let short_password = RegisterSchema {
            username: "wombat".to_string(),
            email: "wombat@example.com".to_string(),
            password: "short".to_string(),
        };

        let symbols = RegisterSchema {
            username: "wom bat!".to_string(),
            email: "wombat@example.com".to_string(),
            password: "hunter2hunter2".to_string(),
        };

        assert!(valid.validate().is_ok());
        assert!(bad_email.validate().is_err());
        assert!(short_password.validate().is_err());
        assert!(symbols.validate().is_err());
    }

    #[test]
    fn room_name_may_be_omitted_but_not_blank() {
        let omitted = NewRoomSchema {
            name: None,
            max_players: Some(4),
        };

        let blank = NewRoomSchema {
            name: Some(String::new()),
            max_players: None,
        };

        assert!(omitted.validate().is_ok());
        assert!(blank.validate().is_err());
    }
}
