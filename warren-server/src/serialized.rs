//! All schemas that are exposed from endpoints are defined here
//! along with the conversion impls

use chrono::{DateTime, Utc};
use serde::Serialize;
use warren_lobby::{
    PrimaryKey, RoomData, RoomLeave, RoomPlayerData, RoomStatus, SessionData, UserData, UserRole,
};

/// The response body every endpoint replies with
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T>
where
    T: Serialize,
{
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
            error: None,
        }
    }
}

impl Envelope<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            error,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    id: PrimaryKey,
    username: String,
    email: String,
    role: UserRole,
    avatar_url: Option<String>,
    created_at: DateTime<Utc>,
    last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct AuthResult {
    token: String,
    user: User,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: PrimaryKey,
    pub code: String,
    pub name: String,
    pub host_id: PrimaryKey,
    pub host_username: String,
    pub min_players: i32,
    pub max_players: i32,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
    pub current_players: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlayer {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub username: String,
    pub avatar_url: Option<String>,
    pub is_host: bool,
    pub joined_at: DateTime<Utc>,
}

/// A room summary together with its member list
#[derive(Debug, Serialize)]
pub struct RoomDetail {
    #[serde(flatten)]
    pub room: Room,
    pub players: Vec<RoomPlayer>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveResult {
    new_host_id: Option<PrimaryKey>,
    room_deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct UserPayload {
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct RoomPayload {
    pub room: RoomDetail,
}

#[derive(Debug, Serialize)]
pub struct CurrentRoomPayload {
    pub room: Option<RoomDetail>,
}

#[derive(Debug, Serialize)]
pub struct RoomsPayload {
    pub rooms: Vec<Room>,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<User> for UserData {
    fn to_serialized(&self) -> User {
        User {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            avatar_url: self.avatar_url.clone(),
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

impl ToSerialized<AuthResult> for SessionData {
    fn to_serialized(&self) -> AuthResult {
        AuthResult {
            token: self.token.clone(),
            user: self.user.to_serialized(),
        }
    }
}

impl ToSerialized<Room> for RoomData {
    fn to_serialized(&self) -> Room {
        Room {
            id: self.id,
            code: self.code.clone(),
            name: self.name.clone(),
            host_id: self.host_id,
            host_username: self.host_username.clone(),
            min_players: self.min_players,
            max_players: self.max_players,
            status: self.status,
            created_at: self.created_at,
            current_players: self.current_players,
        }
    }
}

impl ToSerialized<RoomPlayer> for RoomPlayerData {
    fn to_serialized(&self) -> RoomPlayer {
        RoomPlayer {
            id: self.id,
            user_id: self.user_id,
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
            is_host: self.is_host,
            joined_at: self.joined_at,
        }
    }
}

impl ToSerialized<RoomDetail> for (RoomData, Vec<RoomPlayerData>) {
    fn to_serialized(&self) -> RoomDetail {
        RoomDetail {
            room: self.0.to_serialized(),
            players: self.1.to_serialized(),
        }
    }
}

impl ToSerialized<LeaveResult> for RoomLeave {
    fn to_serialized(&self) -> LeaveResult {
        LeaveResult {
            new_host_id: self.new_host_id,
            room_deleted: self.room_deleted,
        }
    }
}
