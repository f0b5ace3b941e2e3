use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    query, Error as SqlxError, PgPool, Postgres, Row, Transaction,
};

use crate::rooms::RoomError;

use super::{
    Database, DatabaseError, DatabaseResult, IntoDatabaseError, NewRoom, NewSession, NewUser,
    PrimaryKey, Result, RoomData, RoomLeave, RoomPlayerData, RoomStatus, SessionData, UserData,
};

/// Embedded schema migrations, applied on connect
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// A postgres database implementation for warren
pub struct PgDatabase {
    pool: PgPool,
}

const ROOM_PROJECTION: &str = "
    SELECT
        gs.id,
        gs.code,
        gs.name,
        gs.host_id,
        u.username AS host_username,
        gs.min_players,
        gs.max_players,
        gs.status,
        gs.created_at,
        (SELECT COUNT(*) FROM room_players rp WHERE rp.room_id = gs.id) AS current_players
    FROM game_sessions gs
        INNER JOIN users u ON gs.host_id = u.id
";

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        Ok(Self { pool })
    }
}

fn map_user(row: &PgRow) -> std::result::Result<UserData, SqlxError> {
    let role: String = row.try_get("role")?;

    Ok(UserData {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role: role.parse().map_err(|e| SqlxError::Decode(Box::new(e)))?,
        avatar_url: row.try_get("avatar_url")?,
        created_at: row.try_get("created_at")?,
        last_login: row.try_get("last_login")?,
    })
}

fn map_room(row: &PgRow) -> std::result::Result<RoomData, SqlxError> {
    let status: String = row.try_get("status")?;

    Ok(RoomData {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        host_id: row.try_get("host_id")?,
        host_username: row.try_get("host_username")?,
        min_players: row.try_get("min_players")?,
        max_players: row.try_get("max_players")?,
        status: status.parse().map_err(|e| SqlxError::Decode(Box::new(e)))?,
        created_at: row.try_get("created_at")?,
        current_players: row.try_get("current_players")?,
    })
}

fn map_player(row: &PgRow) -> std::result::Result<RoomPlayerData, SqlxError> {
    Ok(RoomPlayerData {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        avatar_url: row.try_get("avatar_url")?,
        is_host: row.try_get("is_host")?,
        joined_at: row.try_get("joined_at")?,
    })
}

/// Locks the user's row so concurrent room mutations by the same user
/// serialize, keeping the one-active-room check race free.
async fn lock_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: PrimaryKey,
) -> std::result::Result<(), SqlxError> {
    query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map(|_| ())
}

/// The violated unique constraint, if the error is a unique violation
fn unique_violation(e: &SqlxError) -> Option<&str> {
    match e {
        SqlxError::Database(db) if db.is_unique_violation() => db.constraint(),
        _ => None,
    }
}

/// The room the user is currently a member of, scoped to a transaction so
/// the one-active-room invariant can be checked atomically.
async fn current_room_id(
    tx: &mut Transaction<'_, Postgres>,
    user_id: PrimaryKey,
) -> std::result::Result<Option<PrimaryKey>, SqlxError> {
    let row = query(
        "SELECT gs.id
         FROM game_sessions gs
            INNER JOIN room_players rp ON rp.room_id = gs.id
         WHERE rp.user_id = $1 AND gs.status IN ('waiting', 'playing')
         LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|r| r.try_get("id")).transpose()
}

#[async_trait]
impl Database for PgDatabase {
    async fn ping(&self) -> Result<()> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        let row = query("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "id"))?;

        map_user(&row).map_err(|e| e.any())
    }

    async fn user_by_email(&self, email: &str) -> Result<UserData> {
        let row = query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "email"))?;

        map_user(&row).map_err(|e| e.any())
    }

    async fn user_by_username(&self, username: &str) -> Result<UserData> {
        let row = query("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "username"))?;

        map_user(&row).map_err(|e| e.any())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        self.user_by_email(&new_user.email)
            .await
            .conflict_or_ok("user", "email", &new_user.email)?;

        self.user_by_username(&new_user.username)
            .await
            .conflict_or_ok("user", "username", &new_user.username)?;

        // The pre-checks race with concurrent inserts, so a unique
        // violation here is still reported as a conflict
        let row = query(
            "INSERT INTO users (username, email, password_hash, role)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(new_user.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(constraint) if constraint.contains("email") => DatabaseError::Conflict {
                resource: "user",
                field: "email",
                value: new_user.email.clone(),
            },
            Some(constraint) if constraint.contains("username") => DatabaseError::Conflict {
                resource: "user",
                field: "username",
                value: new_user.username.clone(),
            },
            _ => e.any(),
        })?;

        map_user(&row).map_err(|e| e.any())
    }

    async fn record_login(&self, user_id: PrimaryKey) -> Result<()> {
        query("UPDATE users SET last_login = now() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn session_by_token(&self, token: &str) -> Result<SessionData> {
        let row = query(
            "SELECT
                sessions.id AS session_id,
                sessions.token,
                sessions.expires_at,
                users.*
            FROM sessions
                INNER JOIN users ON sessions.user_id = users.id
            WHERE token = $1",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("session", "token"))?;

        let result = SessionData {
            id: row.try_get("session_id").map_err(|e| e.any())?,
            token: row.try_get("token").map_err(|e| e.any())?,
            expires_at: row.try_get("expires_at").map_err(|e| e.any())?,
            user: map_user(&row).map_err(|e| e.any())?,
        };

        Ok(result)
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        self.session_by_token(&new_session.token)
            .await
            .conflict_or_ok("session", "token", &new_session.token)?;

        let row = query(
            "INSERT INTO sessions (token, user_id, expires_at)
             VALUES ($1, $2, $3)
             RETURNING token",
        )
        .bind(&new_session.token)
        .bind(new_session.user_id)
        .bind(new_session.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        let token: String = row.try_get("token").map_err(|e| e.any())?;
        self.session_by_token(&token).await
    }

    async fn delete_session_by_token(&self, token: &str) -> Result<()> {
        // Ensure session exists
        let _ = self.session_by_token(token).await?;

        query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn clear_expired_sessions(&self) -> Result<()> {
        query("DELETE FROM sessions WHERE expires_at < now()")
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn room_by_id(&self, room_id: PrimaryKey) -> Result<RoomData> {
        let row = query(&format!("{ROOM_PROJECTION} WHERE gs.id = $1"))
            .bind(room_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room", "id"))?;

        map_room(&row).map_err(|e| e.any())
    }

    async fn room_by_code(&self, code: &str) -> Result<RoomData> {
        let row = query(&format!("{ROOM_PROJECTION} WHERE gs.code = $1"))
            .bind(code)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room", "code"))?;

        map_room(&row).map_err(|e| e.any())
    }

    async fn available_rooms(&self) -> Result<Vec<RoomData>> {
        let rows = query(&format!(
            "{ROOM_PROJECTION}
             WHERE gs.status = 'waiting'
                AND (SELECT COUNT(*) FROM room_players rp WHERE rp.room_id = gs.id)
                    < gs.max_players
             ORDER BY gs.created_at DESC, gs.id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        rows.iter()
            .map(|r| map_room(r).map_err(|e| e.any()))
            .collect()
    }

    async fn room_players(&self, room_id: PrimaryKey) -> Result<Vec<RoomPlayerData>> {
        let rows = query(
            "SELECT
                rp.id,
                rp.user_id,
                rp.is_host,
                rp.joined_at,
                u.username,
                u.avatar_url
            FROM room_players rp
                INNER JOIN users u ON rp.user_id = u.id
            WHERE rp.room_id = $1
            ORDER BY rp.joined_at ASC, rp.id ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        rows.iter()
            .map(|r| map_player(r).map_err(|e| e.any()))
            .collect()
    }

    async fn user_current_room(&self, user_id: PrimaryKey) -> Result<Option<RoomData>> {
        let row = query(&format!(
            "{ROOM_PROJECTION}
                INNER JOIN room_players rp ON rp.room_id = gs.id
             WHERE rp.user_id = $1 AND gs.status IN ('waiting', 'playing')
             LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.any())?;

        row.map(|r| map_room(&r).map_err(|e| e.any())).transpose()
    }

    async fn is_room_member(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> Result<bool> {
        let row = query("SELECT id FROM room_players WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.any())?;

        Ok(row.is_some())
    }

    async fn create_room(&self, new_room: NewRoom) -> std::result::Result<RoomData, RoomError> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        lock_user(&mut tx, new_room.host_id)
            .await
            .map_err(|e| e.any())?;

        let current = current_room_id(&mut tx, new_room.host_id)
            .await
            .map_err(|e| e.any())?;

        if current.is_some() {
            return Err(RoomError::AlreadyInRoom);
        }

        let existing = query("SELECT id FROM game_sessions WHERE code = $1")
            .bind(&new_room.code)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        if existing.is_some() {
            return Err(DatabaseError::Conflict {
                resource: "room",
                field: "code",
                value: new_room.code,
            }
            .into());
        }

        // A code collision that slips past the pre-check still has to come
        // out as a conflict so the caller can re-roll
        let row = query(
            "INSERT INTO game_sessions (code, name, host_id, min_players, max_players, status)
             VALUES ($1, $2, $3, 2, $4, 'waiting')
             RETURNING id",
        )
        .bind(&new_room.code)
        .bind(&new_room.name)
        .bind(new_room.host_id)
        .bind(new_room.max_players)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(constraint) if constraint.contains("code") => DatabaseError::Conflict {
                resource: "room",
                field: "code",
                value: new_room.code.clone(),
            }
            .into(),
            _ => RoomError::Db(e.any()),
        })?;

        let room_id: PrimaryKey = row.try_get("id").map_err(|e| e.any())?;

        query("INSERT INTO room_players (room_id, user_id, is_host) VALUES ($1, $2, TRUE)")
            .bind(room_id)
            .bind(new_room.host_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(self.room_by_id(room_id).await?)
    }

    async fn add_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> std::result::Result<RoomData, RoomError> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        lock_user(&mut tx, user_id).await.map_err(|e| e.any())?;

        // Lock the room row so concurrent joins serialize on the capacity check
        let room = query("SELECT max_players, status FROM game_sessions WHERE id = $1 FOR UPDATE")
            .bind(room_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| e.any())?
            .ok_or(RoomError::NotFound)?;

        let member = query("SELECT id FROM room_players WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        if member.is_some() {
            return Err(RoomError::AlreadyMember);
        }

        let current = current_room_id(&mut tx, user_id).await.map_err(|e| e.any())?;

        if current.is_some() {
            return Err(RoomError::AlreadyInRoom);
        }

        let status: String = room.try_get("status").map_err(|e| e.any())?;
        let status: RoomStatus = status
            .parse()
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        if status != RoomStatus::Waiting {
            return Err(RoomError::NotWaiting);
        }

        let max_players: i32 = room.try_get("max_players").map_err(|e| e.any())?;
        let count: i64 = query("SELECT COUNT(*) AS count FROM room_players WHERE room_id = $1")
            .bind(room_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| e.any())?
            .try_get("count")
            .map_err(|e| e.any())?;

        if count >= max_players as i64 {
            return Err(RoomError::Full);
        }

        query("INSERT INTO room_players (room_id, user_id, is_host) VALUES ($1, $2, FALSE)")
            .bind(room_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(self.room_by_id(room_id).await?)
    }

    async fn remove_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> std::result::Result<RoomLeave, RoomError> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        // Lock the room row so the removal and host transfer commit as one unit
        let room = query("SELECT host_id FROM game_sessions WHERE id = $1 FOR UPDATE")
            .bind(room_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| e.any())?
            .ok_or(RoomError::NotFound)?;

        // Removing a non-member is a silent no-op
        query("DELETE FROM room_players WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        let host_id: PrimaryKey = room.try_get("host_id").map_err(|e| e.any())?;

        if host_id != user_id {
            tx.commit().await.map_err(|e| e.any())?;

            return Ok(RoomLeave {
                new_host_id: None,
                room_deleted: false,
            });
        }

        let next_host = query(
            "SELECT user_id FROM room_players
             WHERE room_id = $1
             ORDER BY joined_at ASC, id ASC
             LIMIT 1",
        )
        .bind(room_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        let result = match next_host {
            Some(row) => {
                let new_host_id: PrimaryKey = row.try_get("user_id").map_err(|e| e.any())?;

                query("UPDATE game_sessions SET host_id = $1 WHERE id = $2")
                    .bind(new_host_id)
                    .bind(room_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| e.any())?;

                query("UPDATE room_players SET is_host = TRUE WHERE room_id = $1 AND user_id = $2")
                    .bind(room_id)
                    .bind(new_host_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| e.any())?;

                RoomLeave {
                    new_host_id: Some(new_host_id),
                    room_deleted: false,
                }
            }
            None => {
                // Members cascade, though there are none left at this point
                query("DELETE FROM game_sessions WHERE id = $1")
                    .bind(room_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| e.any())?;

                RoomLeave {
                    new_host_id: None,
                    room_deleted: true,
                }
            }
        };

        tx.commit().await.map_err(|e| e.any())?;

        Ok(result)
    }

    async fn start_room(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> std::result::Result<RoomData, RoomError> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let room = query("SELECT host_id, min_players FROM game_sessions WHERE id = $1 FOR UPDATE")
            .bind(room_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| e.any())?
            .ok_or(RoomError::NotFound)?;

        let host_id: PrimaryKey = room.try_get("host_id").map_err(|e| e.any())?;

        if host_id != user_id {
            return Err(RoomError::NotHost);
        }

        let min_players: i32 = room.try_get("min_players").map_err(|e| e.any())?;
        let count: i64 = query("SELECT COUNT(*) AS count FROM room_players WHERE room_id = $1")
            .bind(room_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| e.any())?
            .try_get("count")
            .map_err(|e| e.any())?;

        if count < min_players as i64 {
            return Err(RoomError::NotEnoughPlayers(min_players));
        }

        query("UPDATE game_sessions SET status = 'playing' WHERE id = $1")
            .bind(room_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(self.room_by_id(room_id).await?)
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }
}
