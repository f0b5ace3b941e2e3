use argon2::{
    password_hash::{Encoding, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use std::sync::Arc;
use thiserror::Error;

use crate::{
    util::random_string, Database, DatabaseError, NewSession, NewUser, PrimaryKey, SessionData,
    UserData, UserRole,
};

pub struct Auth<Db> {
    db: Arc<Db>,
    argon: Argon2<'static>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Email or password is incorrect. Unknown accounts and wrong
    /// passwords are indistinguishable on purpose.
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Email is already registered")]
    EmailTaken,
    #[error("Username is already taken")]
    UsernameTaken,
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(DatabaseError),
    #[error("HashError: {0}")]
    HashError(String),
}

impl<Db> Auth<Db>
where
    Db: Database,
{
    const SESSION_DURATION_IN_DAYS: usize = 7;

    pub fn new(db: &Arc<Db>) -> Self {
        Self {
            db: db.clone(),
            argon: Argon2::default(),
        }
    }

    /// Registers a new account, returning a logged-in session.
    /// Every account is created with the `user` role.
    pub async fn register(&self, new_account: NewAccount) -> Result<SessionData, AuthError> {
        // Email conflicts take precedence over username conflicts
        match self.db.user_by_email(&new_account.email).await {
            Ok(_) => return Err(AuthError::EmailTaken),
            Err(DatabaseError::NotFound { .. }) => {}
            Err(e) => return Err(AuthError::Db(e)),
        }

        match self.db.user_by_username(&new_account.username).await {
            Ok(_) => return Err(AuthError::UsernameTaken),
            Err(DatabaseError::NotFound { .. }) => {}
            Err(e) => return Err(AuthError::Db(e)),
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = self
            .argon
            .hash_password(new_account.password.as_bytes(), &salt)
            .map_err(|e| AuthError::HashError(e.to_string()))?
            .to_string();

        let user = self
            .db
            .create_user(NewUser {
                username: new_account.username,
                email: new_account.email,
                password_hash,
                role: UserRole::User,
            })
            .await
            .map_err(AuthError::Db)?;

        self.issue_session(user.id).await
    }

    /// Logs in a user, returning a new session
    pub async fn login(&self, credentials: Credentials) -> Result<SessionData, AuthError> {
        self.clear_expired().await?;

        let user = self
            .db
            .user_by_email(&credentials.email)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => AuthError::InvalidCredentials,
                err => AuthError::Db(err),
            })?;

        let stored_password = PasswordHash::parse(&user.password_hash, Encoding::default())
            .map_err(|e| AuthError::HashError(e.to_string()))?;

        self.argon
            .verify_password(credentials.password.as_bytes(), &stored_password)
            .map_err(|_| AuthError::InvalidCredentials)?;

        self.db.record_login(user.id).await.map_err(AuthError::Db)?;

        self.issue_session(user.id).await
    }

    /// Deletes the associated session, if it exists
    pub async fn logout(&self, token: &str) -> Result<(), DatabaseError> {
        self.db.delete_session_by_token(token).await
    }

    /// Returns a live session if the token resolves to one
    pub async fn session(&self, token: &str) -> Result<SessionData, DatabaseError> {
        let session = self.db.session_by_token(token).await?;

        if session.expires_at < Utc::now() {
            return Err(DatabaseError::NotFound {
                resource: "session",
                identifier: "token",
            });
        }

        Ok(session)
    }

    /// Looks up a user by id. The id may no longer resolve if the account
    /// was deleted after the session was issued.
    pub async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData, DatabaseError> {
        self.db.user_by_id(user_id).await
    }

    async fn issue_session(&self, user_id: PrimaryKey) -> Result<SessionData, AuthError> {
        let expires_at = Utc::now() + Duration::days(Self::SESSION_DURATION_IN_DAYS as i64);

        let new_session = NewSession {
            token: random_string(32),
            user_id,
            expires_at,
        };

        self.db
            .create_session(new_session)
            .await
            .map_err(AuthError::Db)
    }

    async fn clear_expired(&self) -> Result<(), AuthError> {
        self.db
            .clear_expired_sessions()
            .await
            .map_err(AuthError::Db)
    }
}

#[derive(Debug)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: String,
}
