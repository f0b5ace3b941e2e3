use async_trait::async_trait;
use thiserror::Error;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

mod pg;
pub use pg::*;

use crate::rooms::RoomError;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult {
    /// Turns the Result into a conflict error if it's Ok()
    fn conflict_or_ok(self, resource: &'static str, field: &'static str, value: &str)
        -> Result<()>;
}

impl<T> DatabaseResult for Result<T> {
    fn conflict_or_ok(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<()> {
        match self {
            Ok(_) => Err(DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            }),
            Err(e) => match e {
                DatabaseError::NotFound { .. } => Ok(()),
                e => Err(e),
            },
        }
    }
}

/// Represents a type that can store and fetch warren data.
///
/// The room mutations at the bottom are composite operations: each one runs
/// as a single atomic unit against the store, so concurrent requests cannot
/// violate the capacity or host invariants. Their precondition failures are
/// reported as [RoomError].
#[async_trait]
pub trait Database: Send + Sync + 'static {
    async fn ping(&self) -> Result<()>;

    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData>;
    async fn user_by_email(&self, email: &str) -> Result<UserData>;
    async fn user_by_username(&self, username: &str) -> Result<UserData>;
    async fn create_user(&self, new_user: NewUser) -> Result<UserData>;
    async fn record_login(&self, user_id: PrimaryKey) -> Result<()>;

    async fn session_by_token(&self, token: &str) -> Result<SessionData>;
    async fn create_session(&self, new_session: NewSession) -> Result<SessionData>;
    async fn delete_session_by_token(&self, token: &str) -> Result<()>;
    async fn clear_expired_sessions(&self) -> Result<()>;

    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData>;
    async fn room_by_code(&self, code: &str) -> Result<RoomData>;
    /// Rooms that are waiting and still have a free slot, newest first
    async fn available_rooms(&self) -> Result<Vec<RoomData>>;
    async fn room_players(&self, room_id: PrimaryKey) -> Result<Vec<RoomPlayerData>>;
    /// The single room in which the user currently holds a membership, if any
    async fn user_current_room(&self, user_id: PrimaryKey) -> Result<Option<RoomData>>;
    async fn is_room_member(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Result<bool>;

    async fn create_room(&self, new_room: NewRoom) -> std::result::Result<RoomData, RoomError>;
    async fn add_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> std::result::Result<RoomData, RoomError>;
    async fn remove_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> std::result::Result<RoomLeave, RoomError>;
    async fn start_room(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> std::result::Result<RoomData, RoomError>;
}
