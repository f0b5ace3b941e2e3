use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::rooms::RoomError;

use super::{
    Database, DatabaseError, DatabaseResult, NewRoom, NewSession, NewUser, PrimaryKey, Result,
    RoomData, RoomLeave, RoomPlayerData, RoomStatus, SessionData, UserData,
};

/// An in-memory database implementation, used by tests and local
/// development. All operations take the single state lock, which is also
/// what makes the room mutations atomic.
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: PrimaryKey,
    users: Vec<UserData>,
    sessions: Vec<SessionRecord>,
    rooms: Vec<RoomRecord>,
    players: Vec<PlayerRecord>,
}

struct SessionRecord {
    id: PrimaryKey,
    token: String,
    user_id: PrimaryKey,
    expires_at: chrono::DateTime<Utc>,
}

struct RoomRecord {
    id: PrimaryKey,
    code: String,
    name: String,
    host_id: PrimaryKey,
    min_players: i32,
    max_players: i32,
    status: RoomStatus,
    created_at: chrono::DateTime<Utc>,
}

struct PlayerRecord {
    id: PrimaryKey,
    room_id: PrimaryKey,
    user_id: PrimaryKey,
    is_host: bool,
    joined_at: chrono::DateTime<Utc>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    fn next_id(&mut self) -> PrimaryKey {
        self.next_id += 1;
        self.next_id
    }

    fn user(&self, user_id: PrimaryKey) -> Result<&UserData> {
        self.users
            .iter()
            .find(|u| u.id == user_id)
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            })
    }

    fn room(&self, room_id: PrimaryKey) -> Result<&RoomRecord> {
        self.rooms
            .iter()
            .find(|r| r.id == room_id)
            .ok_or(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            })
    }

    fn member_count(&self, room_id: PrimaryKey) -> i64 {
        self.players.iter().filter(|p| p.room_id == room_id).count() as i64
    }

    fn is_member(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> bool {
        self.players
            .iter()
            .any(|p| p.room_id == room_id && p.user_id == user_id)
    }

    fn active_room_of(&self, user_id: PrimaryKey) -> Option<PrimaryKey> {
        self.players
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.room_id)
            .find(|room_id| {
                self.rooms
                    .iter()
                    .any(|r| r.id == *room_id && r.status.is_active())
            })
    }

    fn room_data(&self, record: &RoomRecord) -> Result<RoomData> {
        let host = self.user(record.host_id)?;

        Ok(RoomData {
            id: record.id,
            code: record.code.clone(),
            name: record.name.clone(),
            host_id: record.host_id,
            host_username: host.username.clone(),
            min_players: record.min_players,
            max_players: record.max_players,
            status: record.status,
            created_at: record.created_at,
            current_players: self.member_count(record.id),
        })
    }

    fn player_data(&self, record: &PlayerRecord) -> Result<RoomPlayerData> {
        let user = self.user(record.user_id)?;

        Ok(RoomPlayerData {
            id: record.id,
            user_id: record.user_id,
            username: user.username.clone(),
            avatar_url: user.avatar_url.clone(),
            is_host: record.is_host,
            joined_at: record.joined_at,
        })
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        self.state.lock().user(user_id).cloned()
    }

    async fn user_by_email(&self, email: &str) -> Result<UserData> {
        self.state
            .lock()
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "email",
            })
    }

    async fn user_by_username(&self, username: &str) -> Result<UserData> {
        self.state
            .lock()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "username",
            })
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        self.user_by_email(&new_user.email)
            .await
            .conflict_or_ok("user", "email", &new_user.email)?;

        self.user_by_username(&new_user.username)
            .await
            .conflict_or_ok("user", "username", &new_user.username)?;

        let mut state = self.state.lock();
        let user = UserData {
            id: state.next_id(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: new_user.role,
            avatar_url: None,
            created_at: Utc::now(),
            last_login: None,
        };

        state.users.push(user.clone());
        Ok(user)
    }

    async fn record_login(&self, user_id: PrimaryKey) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.last_login = Some(Utc::now());
        }

        Ok(())
    }

    async fn session_by_token(&self, token: &str) -> Result<SessionData> {
        let state = self.state.lock();

        let record = state
            .sessions
            .iter()
            .find(|s| s.token == token)
            .ok_or(DatabaseError::NotFound {
                resource: "session",
                identifier: "token",
            })?;

        Ok(SessionData {
            id: record.id,
            token: record.token.clone(),
            expires_at: record.expires_at,
            user: state.user(record.user_id)?.clone(),
        })
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        self.session_by_token(&new_session.token)
            .await
            .conflict_or_ok("session", "token", &new_session.token)?;

        let mut state = self.state.lock();
        let record = SessionRecord {
            id: state.next_id(),
            token: new_session.token,
            user_id: new_session.user_id,
            expires_at: new_session.expires_at,
        };

        let session = SessionData {
            id: record.id,
            token: record.token.clone(),
            expires_at: record.expires_at,
            user: state.user(record.user_id)?.clone(),
        };

        state.sessions.push(record);
        Ok(session)
    }

    async fn delete_session_by_token(&self, token: &str) -> Result<()> {
        let _ = self.session_by_token(token).await?;

        self.state.lock().sessions.retain(|s| s.token != token);
        Ok(())
    }

    async fn clear_expired_sessions(&self) -> Result<()> {
        let now = Utc::now();
        self.state.lock().sessions.retain(|s| s.expires_at >= now);
        Ok(())
    }

    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData> {
        let state = self.state.lock();
        let record = state.room(room_id)?;

        state.room_data(record)
    }

    async fn room_by_code(&self, code: &str) -> Result<RoomData> {
        let state = self.state.lock();

        let record = state
            .rooms
            .iter()
            .find(|r| r.code == code)
            .ok_or(DatabaseError::NotFound {
                resource: "room",
                identifier: "code",
            })?;

        state.room_data(record)
    }

    async fn available_rooms(&self) -> Result<Vec<RoomData>> {
        let state = self.state.lock();

        let mut rooms: Vec<_> = state
            .rooms
            .iter()
            .filter(|r| {
                r.status == RoomStatus::Waiting && state.member_count(r.id) < r.max_players as i64
            })
            .map(|r| state.room_data(r))
            .collect::<Result<_>>()?;

        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rooms)
    }

    async fn room_players(&self, room_id: PrimaryKey) -> Result<Vec<RoomPlayerData>> {
        let state = self.state.lock();

        let mut players: Vec<_> = state
            .players
            .iter()
            .filter(|p| p.room_id == room_id)
            .map(|p| state.player_data(p))
            .collect::<Result<_>>()?;

        players.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        Ok(players)
    }

    async fn user_current_room(&self, user_id: PrimaryKey) -> Result<Option<RoomData>> {
        let state = self.state.lock();

        match state.active_room_of(user_id) {
            Some(room_id) => {
                let record = state.room(room_id)?;
                state.room_data(record).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn is_room_member(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Result<bool> {
        Ok(self.state.lock().is_member(room_id, user_id))
    }

    async fn create_room(&self, new_room: NewRoom) -> std::result::Result<RoomData, RoomError> {
        let mut state = self.state.lock();

        if state.active_room_of(new_room.host_id).is_some() {
            return Err(RoomError::AlreadyInRoom);
        }

        if state.rooms.iter().any(|r| r.code == new_room.code) {
            return Err(DatabaseError::Conflict {
                resource: "room",
                field: "code",
                value: new_room.code,
            }
            .into());
        }

        let room_id = state.next_id();
        let record = RoomRecord {
            id: room_id,
            code: new_room.code,
            name: new_room.name,
            host_id: new_room.host_id,
            min_players: 2,
            max_players: new_room.max_players,
            status: RoomStatus::Waiting,
            created_at: Utc::now(),
        };

        state.rooms.push(record);

        let member_id = state.next_id();
        state.players.push(PlayerRecord {
            id: member_id,
            room_id,
            user_id: new_room.host_id,
            is_host: true,
            joined_at: Utc::now(),
        });

        let record = state.room(room_id)?;
        Ok(state.room_data(record)?)
    }

    async fn add_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> std::result::Result<RoomData, RoomError> {
        let mut state = self.state.lock();

        let room = state
            .rooms
            .iter()
            .find(|r| r.id == room_id)
            .ok_or(RoomError::NotFound)?;

        let (status, max_players) = (room.status, room.max_players);

        if state.is_member(room_id, user_id) {
            return Err(RoomError::AlreadyMember);
        }

        if state.active_room_of(user_id).is_some() {
            return Err(RoomError::AlreadyInRoom);
        }

        if status != RoomStatus::Waiting {
            return Err(RoomError::NotWaiting);
        }

        if state.member_count(room_id) >= max_players as i64 {
            return Err(RoomError::Full);
        }

        let member_id = state.next_id();
        state.players.push(PlayerRecord {
            id: member_id,
            room_id,
            user_id,
            is_host: false,
            joined_at: Utc::now(),
        });

        let record = state.room(room_id)?;
        Ok(state.room_data(record)?)
    }

    async fn remove_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> std::result::Result<RoomLeave, RoomError> {
        let mut state = self.state.lock();

        let host_id = state
            .rooms
            .iter()
            .find(|r| r.id == room_id)
            .map(|r| r.host_id)
            .ok_or(RoomError::NotFound)?;

        // Removing a non-member is a silent no-op
        state
            .players
            .retain(|p| !(p.room_id == room_id && p.user_id == user_id));

        if host_id != user_id {
            return Ok(RoomLeave {
                new_host_id: None,
                room_deleted: false,
            });
        }

        let mut remaining: Vec<_> = state
            .players
            .iter()
            .filter(|p| p.room_id == room_id)
            .map(|p| (p.joined_at, p.id, p.user_id))
            .collect();

        remaining.sort();

        match remaining.first() {
            Some(&(_, _, new_host_id)) => {
                if let Some(room) = state.rooms.iter_mut().find(|r| r.id == room_id) {
                    room.host_id = new_host_id;
                }

                if let Some(player) = state
                    .players
                    .iter_mut()
                    .find(|p| p.room_id == room_id && p.user_id == new_host_id)
                {
                    player.is_host = true;
                }

                Ok(RoomLeave {
                    new_host_id: Some(new_host_id),
                    room_deleted: false,
                })
            }
            None => {
                state.rooms.retain(|r| r.id != room_id);
                state.players.retain(|p| p.room_id != room_id);

                Ok(RoomLeave {
                    new_host_id: None,
                    room_deleted: true,
                })
            }
        }
    }

    async fn start_room(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> std::result::Result<RoomData, RoomError> {
        let mut state = self.state.lock();

        let room = state
            .rooms
            .iter()
            .find(|r| r.id == room_id)
            .ok_or(RoomError::NotFound)?;

        if room.host_id != user_id {
            return Err(RoomError::NotHost);
        }

        let min_players = room.min_players;

        if state.member_count(room_id) < min_players as i64 {
            return Err(RoomError::NotEnoughPlayers(min_players));
        }

        if let Some(room) = state.rooms.iter_mut().find(|r| r.id == room_id) {
            room.status = RoomStatus::Playing;
        }

        let record = state.room(room_id)?;
        Ok(state.room_data(record)?)
    }
}
