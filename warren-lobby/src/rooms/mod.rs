use log::info;
use thiserror::Error;

use crate::{
    events::LobbyEvent, util::random_code, Database, DatabaseError, LobbyContext, NewRoom,
    PrimaryKey, RoomData, RoomLeave, RoomPlayerData,
};

pub struct RoomManager<Db> {
    context: LobbyContext<Db>,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room not found")]
    NotFound,
    #[error("The number of players must be between 2 and 4")]
    InvalidCapacity,
    #[error("You are already in a room, leave it first")]
    AlreadyInRoom,
    #[error("You are already in this room")]
    AlreadyMember,
    #[error("Room is full")]
    Full,
    #[error("Room is already playing or has finished")]
    NotWaiting,
    #[error("Only the host can start the game")]
    NotHost,
    #[error("At least {0} players are required to start")]
    NotEnoughPlayers(i32),
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

impl<Db> RoomManager<Db>
where
    Db: Database,
{
    pub const MIN_PLAYERS: i32 = 2;
    pub const MAX_PLAYERS: i32 = 4;

    const CODE_LENGTH: usize = 6;
    /// Join codes are re-rolled a few times on the off chance of a collision
    const CODE_ATTEMPTS: usize = 3;

    pub fn new(context: &LobbyContext<Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Creates a new room with the creator as host and sole member
    pub async fn create_room(
        &self,
        host_id: PrimaryKey,
        name: String,
        max_players: i32,
    ) -> Result<(RoomData, Vec<RoomPlayerData>), RoomError> {
        if !(Self::MIN_PLAYERS..=Self::MAX_PLAYERS).contains(&max_players) {
            return Err(RoomError::InvalidCapacity);
        }

        let mut attempts = 0;
        let room = loop {
            let new_room = NewRoom {
                code: random_code(Self::CODE_LENGTH),
                name: name.clone(),
                host_id,
                max_players,
            };

            match self.context.database.create_room(new_room).await {
                Err(RoomError::Db(DatabaseError::Conflict { field: "code", .. }))
                    if attempts + 1 < Self::CODE_ATTEMPTS =>
                {
                    attempts += 1;
                }
                other => break other?,
            }
        };

        let players = self.context.database.room_players(room.id).await?;

        info!("Room {} created by user {}", room.code, host_id);
        self.context.emit(LobbyEvent::RoomCreated { room: room.clone() });

        Ok((room, players))
    }

    /// Adds the user as a member of the room
    pub async fn join_room(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<(RoomData, Vec<RoomPlayerData>), RoomError> {
        let room = self.context.database.add_room_member(room_id, user_id).await?;
        let players = self.context.database.room_players(room.id).await?;

        if let Some(player) = players.iter().find(|p| p.user_id == user_id) {
            self.context.emit(LobbyEvent::PlayerJoined {
                room_id: room.id,
                player: player.clone(),
                players: players.clone(),
            });
        }

        self.context.emit(LobbyEvent::RoomUpdated { room: room.clone() });

        Ok((room, players))
    }

    /// Joins by the 6 character code, case-insensitively
    pub async fn join_room_by_code(
        &self,
        code: &str,
        user_id: PrimaryKey,
    ) -> Result<(RoomData, Vec<RoomPlayerData>), RoomError> {
        let code = code.trim().to_ascii_uppercase();

        let room = self
            .context
            .database
            .room_by_code(&code)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => RoomError::NotFound,
                e => e.into(),
            })?;

        self.join_room(room.id, user_id).await
    }

    /// Removes the user from the room. If the host leaves, the earliest
    /// joined member is promoted; an emptied room is deleted.
    pub async fn leave_room(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<RoomLeave, RoomError> {
        let result = self
            .context
            .database
            .remove_room_member(room_id, user_id)
            .await?;

        if result.room_deleted {
            info!("Room {} deleted, last member left", room_id);
            self.context.emit(LobbyEvent::RoomDeleted { room_id });

            return Ok(result);
        }

        if let Some(new_host_id) = result.new_host_id {
            info!("Room {} host transferred to user {}", room_id, new_host_id);
        }

        let room = self.context.database.room_by_id(room_id).await?;
        let players = self.context.database.room_players(room_id).await?;

        self.context.emit(LobbyEvent::PlayerLeft {
            room_id,
            user_id,
            new_host_id: result.new_host_id,
            players,
        });

        self.context.emit(LobbyEvent::RoomUpdated { room });

        Ok(result)
    }

    /// Transitions the room to playing. Only the host may start, and only
    /// once the minimum player count is met.
    pub async fn start_game(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<(RoomData, Vec<RoomPlayerData>), RoomError> {
        let room = self.context.database.start_room(room_id, user_id).await?;
        let players = self.context.database.room_players(room_id).await?;

        info!("Room {} started with {} players", room.code, players.len());

        self.context.emit(LobbyEvent::GameStarted {
            room: room.clone(),
            players: players.clone(),
        });

        self.context.emit(LobbyEvent::RoomUpdated { room: room.clone() });

        Ok((room, players))
    }

    /// Rooms that are waiting and still have a free slot, newest first
    pub async fn available_rooms(&self) -> Result<Vec<RoomData>, DatabaseError> {
        self.context.database.available_rooms().await
    }

    /// A room along with its current members
    pub async fn room_with_players(
        &self,
        room_id: PrimaryKey,
    ) -> Result<(RoomData, Vec<RoomPlayerData>), RoomError> {
        let room = self
            .context
            .database
            .room_by_id(room_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => RoomError::NotFound,
                e => e.into(),
            })?;

        let players = self.context.database.room_players(room_id).await?;

        Ok((room, players))
    }

    /// The active room the user is currently a member of, if any
    pub async fn user_current_room(
        &self,
        user_id: PrimaryKey,
    ) -> Result<Option<(RoomData, Vec<RoomPlayerData>)>, DatabaseError> {
        let room = match self.context.database.user_current_room(user_id).await? {
            Some(room) => room,
            None => return Ok(None),
        };

        let players = self.context.database.room_players(room.id).await?;

        Ok(Some((room, players)))
    }

    /// Whether the user holds a persisted membership in the room
    pub async fn is_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<bool, DatabaseError> {
        self.context.database.is_room_member(room_id, user_id).await
    }
}
