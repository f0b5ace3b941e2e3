use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// The type used for primary keys in the database.
pub type PrimaryKey = i32;

/// A value in an enumerated column that no variant matches.
#[derive(Debug, Error)]
#[error("unknown value: {0}")]
pub struct UnknownVariant(pub String);

/// A warren account
#[derive(Debug, Clone)]
pub struct UserData {
    pub id: PrimaryKey,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// The role of an account. Every account is registered as [UserRole::User].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for UserRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Login session data for authentication
#[derive(Debug, Clone)]
pub struct SessionData {
    pub id: PrimaryKey,
    /// The session token, or key if you will
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// The user that is logged in
    pub user: UserData,
}

/// A game room, as stored in the `game_sessions` table
#[derive(Debug, Clone)]
pub struct RoomData {
    pub id: PrimaryKey,
    /// The 6 character join code used to enter the room
    pub code: String,
    pub name: String,
    pub host_id: PrimaryKey,
    pub host_username: String,
    pub min_players: i32,
    pub max_players: i32,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
    /// Live member count, aggregated over `room_players` at query time
    pub current_players: i64,
}

/// The lifecycle state of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Playing => "playing",
            Self::Finished => "finished",
        }
    }

    /// A room only holds members while waiting or playing
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Waiting | Self::Playing)
    }
}

impl FromStr for RoomStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "playing" => Ok(Self::Playing),
            "finished" => Ok(Self::Finished),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A member of a room, joined with the user's display fields
#[derive(Debug, Clone)]
pub struct RoomPlayerData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub username: String,
    pub avatar_url: Option<String>,
    pub is_host: bool,
    pub joined_at: DateTime<Utc>,
}

/// The outcome of removing a member from a room
#[derive(Debug, Clone, Copy)]
pub struct RoomLeave {
    /// Set when host privilege moved to the earliest remaining member
    pub new_host_id: Option<PrimaryKey>,
    /// Set when the leaving user was the last member
    pub room_deleted: bool,
}

#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
}

#[derive(Debug)]
pub struct NewSession {
    pub token: String,
    pub user_id: PrimaryKey,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewRoom {
    pub code: String,
    pub name: String,
    /// The host of the new room, inserted as its first member
    pub host_id: PrimaryKey,
    pub max_players: i32,
}
