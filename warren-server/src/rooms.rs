use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json,
};
use warren_lobby::{Database, PrimaryKey};

use crate::{
    auth::Session,
    errors::ServerResult,
    schemas::{JoinByCodeSchema, NewRoomSchema, ValidatedJson},
    serialized::{
        CurrentRoomPayload, Envelope, LeaveResult, RoomPayload, RoomsPayload, ToSerialized,
    },
    Router, ServerContext,
};

const DEFAULT_ROOM_NAME: &str = "New game";
const DEFAULT_MAX_PLAYERS: i32 = 4;

async fn create_room<Db>(
    session: Session,
    State(context): State<ServerContext<Db>>,
    ValidatedJson(body): ValidatedJson<NewRoomSchema>,
) -> ServerResult<impl IntoResponse>
where
    Db: Database,
{
    let name = body.name.unwrap_or_else(|| DEFAULT_ROOM_NAME.to_string());
    let max_players = body.max_players.unwrap_or(DEFAULT_MAX_PLAYERS);

    let room = context
        .lobby
        .rooms
        .create_room(session.user().id, name, max_players)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::with_message(
            "Room created successfully",
            RoomPayload {
                room: room.to_serialized(),
            },
        )),
    ))
}

/// Lists rooms that can still be joined
async fn list_rooms<Db>(
    _session: Session,
    State(context): State<ServerContext<Db>>,
) -> ServerResult<Json<Envelope<RoomsPayload>>>
where
    Db: Database,
{
    let rooms = context.lobby.rooms.available_rooms().await?;

    Ok(Json(Envelope::data(RoomsPayload {
        rooms: rooms.to_serialized(),
    })))
}

/// The room the user is currently in, or null
async fn current_room<Db>(
    session: Session,
    State(context): State<ServerContext<Db>>,
) -> ServerResult<Json<Envelope<CurrentRoomPayload>>>
where
    Db: Database,
{
    let room = context
        .lobby
        .rooms
        .user_current_room(session.user().id)
        .await?;

    Ok(Json(Envelope::data(CurrentRoomPayload {
        room: room.as_ref().map(|x| x.to_serialized()),
    })))
}

async fn room_detail<Db>(
    _session: Session,
    State(context): State<ServerContext<Db>>,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<Json<Envelope<RoomPayload>>>
where
    Db: Database,
{
    let room = context.lobby.rooms.room_with_players(room_id).await?;

    Ok(Json(Envelope::data(RoomPayload {
        room: room.to_serialized(),
    })))
}

async fn join_room<Db>(
    session: Session,
    State(context): State<ServerContext<Db>>,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<Json<Envelope<RoomPayload>>>
where
    Db: Database,
{
    let room = context
        .lobby
        .rooms
        .join_room(room_id, session.user().id)
        .await?;

    Ok(Json(Envelope::with_message(
        "Joined the room",
        RoomPayload {
            room: room.to_serialized(),
        },
    )))
}

async fn join_by_code<Db>(
    session: Session,
    State(context): State<ServerContext<Db>>,
    ValidatedJson(body): ValidatedJson<JoinByCodeSchema>,
) -> ServerResult<Json<Envelope<RoomPayload>>>
where
    Db: Database,
{
    let room = context
        .lobby
        .rooms
        .join_room_by_code(&body.code, session.user().id)
        .await?;

    Ok(Json(Envelope::with_message(
        "Joined the room",
        RoomPayload {
            room: room.to_serialized(),
        },
    )))
}

async fn leave_room<Db>(
    session: Session,
    State(context): State<ServerContext<Db>>,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<Json<Envelope<LeaveResult>>>
where
    Db: Database,
{
    let result = context
        .lobby
        .rooms
        .leave_room(room_id, session.user().id)
        .await?;

    let message = if result.room_deleted {
        "Room deleted, you were the last player"
    } else {
        "You have left the room"
    };

    Ok(Json(Envelope::with_message(message, result.to_serialized())))
}

async fn start_game<Db>(
    session: Session,
    State(context): State<ServerContext<Db>>,
    Path(room_id): Path<PrimaryKey>,
) -> ServerResult<Json<Envelope<RoomPayload>>>
where
    Db: Database,
{
    let room = context
        .lobby
        .rooms
        .start_game(room_id, session.user().id)
        .await?;

    Ok(Json(Envelope::with_message(
        "Game started",
        RoomPayload {
            room: room.to_serialized(),
        },
    )))
}

pub fn router<Db>() -> Router<Db>
where
    Db: Database,
{
    Router::new()
        .route("/", post(create_room::<Db>).get(list_rooms::<Db>))
        .route("/current", get(current_room::<Db>))
        .route("/join", post(join_by_code::<Db>))
        .route("/:id", get(room_detail::<Db>))
        .route("/:id/join", post(join_room::<Db>))
        .route("/:id/leave", post(leave_room::<Db>))
        .route("/:id/start", post(start_game::<Db>))
}
