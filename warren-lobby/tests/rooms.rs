use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use warren_lobby::{
    Database, DatabaseError, Lobby, LobbyEvent, MemoryDatabase, NewAccount, NewRoom, NewSession,
    NewUser, PrimaryKey, RoomData, RoomError, RoomLeave, RoomPlayerData, RoomStatus, SessionData,
    UserData,
};

fn lobby() -> Lobby<MemoryDatabase> {
    Lobby::new(MemoryDatabase::new())
}

async fn user<Db: Database>(lobby: &Lobby<Db>, name: &str) -> PrimaryKey {
    lobby
        .auth
        .register(NewAccount {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            password: format!("{name}-hunter2"),
        })
        .await
        .expect("registers")
        .user
        .id
}

#[tokio::test]
async fn creating_a_room_makes_the_creator_host_and_sole_member() {
    let lobby = lobby();
    let host = user(&lobby, "ada").await;

    let (room, players) = lobby
        .rooms
        .create_room(host, "Test room".to_string(), 4)
        .await
        .expect("creates");

    assert_eq!(room.code.len(), 6);
    assert!(room.code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    assert_eq!(room.status, RoomStatus::Waiting);
    assert_eq!(room.host_id, host);
    assert_eq!(room.current_players, 1);

    assert_eq!(players.len(), 1);
    assert!(players[0].is_host);
    assert_eq!(players[0].user_id, host);
}

#[tokio::test]
async fn capacity_outside_the_allowed_range_is_refused() {
    let lobby = lobby();
    let host = user(&lobby, "ada").await;

    let too_small = lobby.rooms.create_room(host, "Tiny".to_string(), 1).await;
    let too_large = lobby.rooms.create_room(host, "Huge".to_string(), 5).await;

    assert!(matches!(too_small, Err(RoomError::InvalidCapacity)));
    assert!(matches!(too_large, Err(RoomError::InvalidCapacity)));
}

#[tokio::test]
async fn a_user_can_only_be_in_one_active_room() {
    let lobby = lobby();
    let ada = user(&lobby, "ada").await;
    let brian = user(&lobby, "brian").await;

    let (first, _) = lobby
        .rooms
        .create_room(ada, "First".to_string(), 4)
        .await
        .expect("creates");

    let second_create = lobby.rooms.create_room(ada, "Second".to_string(), 4).await;
    assert!(matches!(second_create, Err(RoomError::AlreadyInRoom)));

    let (other, _) = lobby
        .rooms
        .create_room(brian, "Other".to_string(), 4)
        .await
        .expect("creates");

    let cross_join = lobby.rooms.join_room(first.id, brian).await;
    assert!(matches!(cross_join, Err(RoomError::AlreadyInRoom)));

    let repeat_join = lobby.rooms.join_room(other.id, brian).await;
    assert!(matches!(repeat_join, Err(RoomError::AlreadyMember)));
}

#[tokio::test]
async fn join_codes_are_case_insensitive() {
    let lobby = lobby();
    let ada = user(&lobby, "ada").await;
    let brian = user(&lobby, "brian").await;

    let (room, _) = lobby
        .rooms
        .create_room(ada, "Test room".to_string(), 4)
        .await
        .expect("creates");

    let (joined, players) = lobby
        .rooms
        .join_room_by_code(&format!(" {} ", room.code.to_ascii_lowercase()), brian)
        .await
        .expect("joins");

    assert_eq!(joined.id, room.id);
    assert_eq!(players.len(), 2);
}

#[tokio::test]
async fn unknown_codes_are_not_found() {
    let lobby = lobby();
    let ada = user(&lobby, "ada").await;

    let result = lobby.rooms.join_room_by_code("ZZZZZZ", ada).await;
    assert!(matches!(result, Err(RoomError::NotFound)));
}

#[tokio::test]
async fn a_full_room_refuses_joins_and_is_not_listed() {
    let lobby = lobby();
    let ada = user(&lobby, "ada").await;
    let brian = user(&lobby, "brian").await;
    let clara = user(&lobby, "clara").await;

    let (room, _) = lobby
        .rooms
        .create_room(ada, "Duel".to_string(), 2)
        .await
        .expect("creates");

    lobby.rooms.join_room(room.id, brian).await.expect("joins");

    let result = lobby.rooms.join_room(room.id, clara).await;
    assert!(matches!(result, Err(RoomError::Full)));

    let listed = lobby.rooms.available_rooms().await.expect("lists");
    assert!(listed.iter().all(|r| r.id != room.id));
}

#[tokio::test]
async fn available_rooms_are_waiting_with_space_newest_first() {
    let lobby = lobby();
    let ada = user(&lobby, "ada").await;
    let brian = user(&lobby, "brian").await;
    let clara = user(&lobby, "clara").await;

    let (started, _) = lobby
        .rooms
        .create_room(ada, "Started".to_string(), 4)
        .await
        .expect("creates");

    lobby.rooms.join_room(started.id, brian).await.expect("joins");
    lobby.rooms.start_game(started.id, ada).await.expect("starts");

    let (older, _) = lobby
        .rooms
        .create_room(clara, "Older".to_string(), 4)
        .await
        .expect("creates");

    let dan = user(&lobby, "dan").await;
    let (newer, _) = lobby
        .rooms
        .create_room(dan, "Newer".to_string(), 4)
        .await
        .expect("creates");

    let listed = lobby.rooms.available_rooms().await.expect("lists");
    let ids: Vec<_> = listed.iter().map(|r| r.id).collect();

    assert_eq!(ids, vec![newer.id, older.id]);
}

#[tokio::test]
async fn the_host_leaving_promotes_the_earliest_remaining_member() {
    let lobby = lobby();
    let ada = user(&lobby, "ada").await;
    let brian = user(&lobby, "brian").await;
    let clara = user(&lobby, "clara").await;

    let (room, _) = lobby
        .rooms
        .create_room(ada, "Test room".to_string(), 4)
        .await
        .expect("creates");

    lobby.rooms.join_room(room.id, brian).await.expect("joins");
    lobby.rooms.join_room(room.id, clara).await.expect("joins");

    let result = lobby.rooms.leave_room(room.id, ada).await.expect("leaves");

    assert_eq!(result.new_host_id, Some(brian));
    assert!(!result.room_deleted);

    let (updated, players) = lobby.rooms.room_with_players(room.id).await.expect("exists");

    assert_eq!(updated.host_id, brian);
    assert_eq!(players.iter().filter(|p| p.is_host).count(), 1);
    assert!(players.iter().any(|p| p.user_id == brian && p.is_host));
}

#[tokio::test]
async fn the_last_member_leaving_deletes_the_room() {
    let lobby = lobby();
    let ada = user(&lobby, "ada").await;

    let (room, _) = lobby
        .rooms
        .create_room(ada, "Test room".to_string(), 4)
        .await
        .expect("creates");

    let result = lobby.rooms.leave_room(room.id, ada).await.expect("leaves");

    assert!(result.room_deleted);
    assert_eq!(result.new_host_id, None);

    let lookup = lobby.rooms.room_with_players(room.id).await;
    assert!(matches!(lookup, Err(RoomError::NotFound)));
}

#[tokio::test]
async fn leaving_a_room_you_are_not_in_is_a_no_op() {
    let lobby = lobby();
    let ada = user(&lobby, "ada").await;
    let brian = user(&lobby, "brian").await;

    let (room, _) = lobby
        .rooms
        .create_room(ada, "Test room".to_string(), 4)
        .await
        .expect("creates");

    let result = lobby.rooms.leave_room(room.id, brian).await.expect("no-op");

    assert_eq!(result.new_host_id, None);
    assert!(!result.room_deleted);

    let (unchanged, players) = lobby.rooms.room_with_players(room.id).await.expect("exists");
    assert_eq!(unchanged.host_id, ada);
    assert_eq!(players.len(), 1);
}

#[tokio::test]
async fn only_the_host_can_start_and_only_with_enough_players() {
    let lobby = lobby();
    let ada = user(&lobby, "ada").await;
    let brian = user(&lobby, "brian").await;

    let (room, _) = lobby
        .rooms
        .create_room(ada, "Test room".to_string(), 4)
        .await
        .expect("creates");

    let alone = lobby.rooms.start_game(room.id, ada).await;
    assert!(matches!(alone, Err(RoomError::NotEnoughPlayers(2))));

    lobby.rooms.join_room(room.id, brian).await.expect("joins");

    let not_host = lobby.rooms.start_game(room.id, brian).await;
    assert!(matches!(not_host, Err(RoomError::NotHost)));

    let (started, _) = lobby.rooms.start_game(room.id, ada).await.expect("starts");
    assert_eq!(started.status, RoomStatus::Playing);
}

#[tokio::test]
async fn a_playing_room_refuses_new_members() {
    let lobby = lobby();
    let ada = user(&lobby, "ada").await;
    let brian = user(&lobby, "brian").await;
    let clara = user(&lobby, "clara").await;

    let (room, _) = lobby
        .rooms
        .create_room(ada, "Test room".to_string(), 4)
        .await
        .expect("creates");

    lobby.rooms.join_room(room.id, brian).await.expect("joins");
    lobby.rooms.start_game(room.id, ada).await.expect("starts");

    let result = lobby.rooms.join_room(room.id, clara).await;
    assert!(matches!(result, Err(RoomError::NotWaiting)));
}

#[tokio::test]
async fn the_current_room_follows_membership() {
    let lobby = lobby();
    let ada = user(&lobby, "ada").await;

    assert!(lobby.rooms.user_current_room(ada).await.expect("queries").is_none());

    let (room, _) = lobby
        .rooms
        .create_room(ada, "Test room".to_string(), 4)
        .await
        .expect("creates");

    let current = lobby
        .rooms
        .user_current_room(ada)
        .await
        .expect("queries")
        .expect("is in a room");

    assert_eq!(current.0.id, room.id);

    lobby.rooms.leave_room(room.id, ada).await.expect("leaves");

    assert!(lobby.rooms.user_current_room(ada).await.expect("queries").is_none());
}

#[tokio::test]
async fn room_mutations_emit_events() {
    let lobby = lobby();
    let events = lobby.events();

    let ada = user(&lobby, "ada").await;
    let brian = user(&lobby, "brian").await;

    let (room, _) = lobby
        .rooms
        .create_room(ada, "Test room".to_string(), 4)
        .await
        .expect("creates");

    assert!(matches!(
        events.try_recv(),
        Ok(LobbyEvent::RoomCreated { room: created }) if created.id == room.id
    ));

    lobby.rooms.join_room(room.id, brian).await.expect("joins");

    assert!(matches!(
        events.try_recv(),
        Ok(LobbyEvent::PlayerJoined { room_id, ref player, ref players })
            if room_id == room.id && player.user_id == brian && players.len() == 2
    ));
    assert!(matches!(events.try_recv(), Ok(LobbyEvent::RoomUpdated { .. })));

    lobby.rooms.start_game(room.id, ada).await.expect("starts");

    assert!(matches!(events.try_recv(), Ok(LobbyEvent::GameStarted { .. })));
    assert!(matches!(events.try_recv(), Ok(LobbyEvent::RoomUpdated { .. })));

    lobby.rooms.leave_room(room.id, brian).await.expect("leaves");

    assert!(matches!(
        events.try_recv(),
        Ok(LobbyEvent::PlayerLeft { user_id, new_host_id: None, .. }) if user_id == brian
    ));
    assert!(matches!(events.try_recv(), Ok(LobbyEvent::RoomUpdated { .. })));

    lobby.rooms.leave_room(room.id, ada).await.expect("leaves");

    assert!(matches!(
        events.try_recv(),
        Ok(LobbyEvent::RoomDeleted { room_id }) if room_id == room.id
    ));
}

/// Wraps [MemoryDatabase] so the first few room inserts report a join
/// code collision, which the random generator cannot be made to produce.
struct CollidingDatabase {
    inner: MemoryDatabase,
    collisions: AtomicUsize,
}

impl CollidingDatabase {
    fn new(collisions: usize) -> Self {
        Self {
            inner: MemoryDatabase::new(),
            collisions: AtomicUsize::new(collisions),
        }
    }
}

#[async_trait]
impl Database for CollidingDatabase {
    async fn ping(&self) -> Result<(), DatabaseError> {
        self.inner.ping().await
    }

    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData, DatabaseError> {
        self.inner.user_by_id(user_id).await
    }

    async fn user_by_email(&self, email: &str) -> Result<UserData, DatabaseError> {
        self.inner.user_by_email(email).await
    }

    async fn user_by_username(&self, username: &str) -> Result<UserData, DatabaseError> {
        self.inner.user_by_username(username).await
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData, DatabaseError> {
        self.inner.create_user(new_user).await
    }

    async fn record_login(&self, user_id: PrimaryKey) -> Result<(), DatabaseError> {
        self.inner.record_login(user_id).await
    }

    async fn session_by_token(&self, token: &str) -> Result<SessionData, DatabaseError> {
        self.inner.session_by_token(token).await
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData, DatabaseError> {
        self.inner.create_session(new_session).await
    }

    async fn delete_session_by_token(&self, token: &str) -> Result<(), DatabaseError> {
        self.inner.delete_session_by_token(token).await
    }

    async fn clear_expired_sessions(&self) -> Result<(), DatabaseError> {
        self.inner.clear_expired_sessions().await
    }

    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData, DatabaseError> {
        self.inner.room_by_id(room_id).await
    }

    async fn room_by_code(&self, code: &str) -> Result<RoomData, DatabaseError> {
        self.inner.room_by_code(code).await
    }

    async fn available_rooms(&self) -> Result<Vec<RoomData>, DatabaseError> {
        self.inner.available_rooms().await
    }

    async fn room_players(&self, room_id: PrimaryKey) -> Result<Vec<RoomPlayerData>, DatabaseError> {
        self.inner.room_players(room_id).await
    }

    async fn user_current_room(&self, user_id: PrimaryKey) -> Result<Option<RoomData>, DatabaseError> {
        self.inner.user_current_room(user_id).await
    }

    async fn is_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<bool, DatabaseError> {
        self.inner.is_room_member(room_id, user_id).await
    }

    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData, RoomError> {
        let remaining = self.collisions.load(Ordering::SeqCst);

        if remaining > 0 {
            self.collisions.store(remaining - 1, Ordering::SeqCst);

            return Err(DatabaseError::Conflict {
                resource: "room",
                field: "code",
                value: new_room.code,
            }
            .into());
        }

        self.inner.create_room(new_room).await
    }

    async fn add_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<RoomData, RoomError> {
        self.inner.add_room_member(room_id, user_id).await
    }

    async fn remove_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<RoomLeave, RoomError> {
        self.inner.remove_room_member(room_id, user_id).await
    }

    async fn start_room(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<RoomData, RoomError> {
        self.inner.start_room(room_id, user_id).await
    }
}

#[tokio::test]
async fn code_collisions_are_retried() {
    let lobby = Lobby::new(CollidingDatabase::new(2));
    let ada = user(&lobby, "ada").await;

    let (room, players) = lobby
        .rooms
        .create_room(ada, "Test room".to_string(), 4)
        .await
        .expect("re-rolls past the collisions");

    assert_eq!(room.host_id, ada);
    assert_eq!(players.len(), 1);
}

#[tokio::test]
async fn exhausted_code_retries_surface_the_conflict() {
    let lobby = Lobby::new(CollidingDatabase::new(3));
    let ada = user(&lobby, "ada").await;

    let result = lobby.rooms.create_room(ada, "Test room".to_string(), 4).await;

    assert!(matches!(
        result,
        Err(RoomError::Db(DatabaseError::Conflict { field: "code", .. }))
    ));
}
