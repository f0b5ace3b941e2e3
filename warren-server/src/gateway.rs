use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;
use warren_lobby::{Database, EventReceiver, LobbyEvent, PrimaryKey, RoomError, UserData};

use crate::{
    context::ServerContext,
    errors::ServerError,
    serialized::{Room, RoomPlayer, ToSerialized},
};

type ConnectionId = u64;

/// An event pushed to connected clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// A joinable room appeared. Sent to every connection.
    #[serde(rename = "room:created")]
    RoomCreated { room: Room },
    /// A room's summary changed. Sent to every connection.
    #[serde(rename = "room:updated")]
    RoomUpdated { room: Room },
    /// A room ceased to exist. Sent to every connection.
    #[serde(rename = "room:deleted")]
    RoomDeleted { room_id: PrimaryKey },
    /// A user became a member of the room
    #[serde(rename = "room:playerJoined")]
    PlayerJoined {
        room_id: PrimaryKey,
        user_id: PrimaryKey,
        username: String,
        players: Vec<RoomPlayer>,
    },
    /// A user gave up their membership of the room
    #[serde(rename = "room:playerLeft")]
    PlayerLeft {
        room_id: PrimaryKey,
        user_id: PrimaryKey,
        new_host_id: Option<PrimaryKey>,
        players: Vec<RoomPlayer>,
    },
    #[serde(rename = "room:gameStarted")]
    GameStarted {
        room_id: PrimaryKey,
        room: Room,
        players: Vec<RoomPlayer>,
    },
    /// A member's gateway connection entered the room channel
    #[serde(rename = "room:playerConnected")]
    PlayerConnected {
        user_id: PrimaryKey,
        username: String,
    },
    /// A member's gateway connection left the room channel. `temporary`
    /// is set when the socket dropped without an explicit leave.
    #[serde(rename = "room:playerDisconnected")]
    PlayerDisconnected {
        user_id: PrimaryKey,
        username: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        temporary: Option<bool>,
    },
    #[serde(rename = "chat:message")]
    Chat {
        user_id: PrimaryKey,
        username: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "player:position")]
    Position {
        user_id: PrimaryKey,
        position: Value,
    },
    #[serde(rename = "player:action")]
    Action {
        user_id: PrimaryKey,
        action: Value,
        data: Value,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// An event sent by a connected client
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter the room channel, after joining the room over HTTP
    #[serde(rename = "room:join")]
    RoomJoin { room_id: PrimaryKey },
    #[serde(rename = "room:leave")]
    RoomLeave { room_id: PrimaryKey },
    #[serde(rename = "chat:message")]
    Chat {
        room_id: PrimaryKey,
        message: String,
    },
    /// Relayed to the other members as-is
    #[serde(rename = "player:position")]
    Position {
        room_id: PrimaryKey,
        position: Value,
    },
    /// Relayed to the other members as-is
    #[serde(rename = "player:action")]
    Action {
        room_id: PrimaryKey,
        action: Value,
        #[serde(default)]
        data: Value,
    },
}

/// Manages gateway connections and their room channel subscriptions
pub struct Gateway {
    connections: Mutex<Vec<Connection>>,
    next_id: AtomicU64,
}

struct Connection {
    id: ConnectionId,
    rooms: HashSet<PrimaryKey>,
    outgoing: mpsc::UnboundedSender<ServerMessage>,
}

impl Gateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Default::default(),
            next_id: AtomicU64::new(0),
        })
    }

    fn connect(&self, outgoing: mpsc::UnboundedSender<ServerMessage>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.connections.lock().push(Connection {
            id,
            rooms: Default::default(),
            outgoing,
        });

        id
    }

    fn disconnect(&self, id: ConnectionId) {
        self.connections.lock().retain(|c| c.id != id)
    }

    fn subscribe(&self, id: ConnectionId, room_id: PrimaryKey) {
        let mut connections = self.connections.lock();

        if let Some(connection) = connections.iter_mut().find(|c| c.id == id) {
            connection.rooms.insert(room_id);
        }
    }

    fn unsubscribe(&self, id: ConnectionId, room_id: PrimaryKey) {
        let mut connections = self.connections.lock();

        if let Some(connection) = connections.iter_mut().find(|c| c.id == id) {
            connection.rooms.remove(&room_id);
        }
    }

    /// Sends an event to every connection
    pub fn broadcast(&self, message: ServerMessage) {
        let connections = self.connections.lock();

        for connection in connections.iter() {
            connection.send(message.clone())
        }
    }

    /// Sends an event to the connections subscribed to the room channel,
    /// optionally excluding the originating connection
    pub fn broadcast_room(
        &self,
        room_id: PrimaryKey,
        message: ServerMessage,
        except: Option<ConnectionId>,
    ) {
        let connections = self.connections.lock();

        for connection in connections
            .iter()
            .filter(|c| c.rooms.contains(&room_id) && Some(c.id) != except)
        {
            connection.send(message.clone())
        }
    }

    fn send_to(&self, id: ConnectionId, message: ServerMessage) {
        let connections = self.connections.lock();

        if let Some(connection) = connections.iter().find(|c| c.id == id) {
            connection.send(message)
        }
    }
}

impl Connection {
    fn send(&self, message: ServerMessage) {
        self.outgoing.send(message).ok();
    }
}

/// Forwards lobby events to the gateway for as long as the lobby exists
pub fn run_event_forwarder(events: EventReceiver, gateway: Arc<Gateway>) {
    tokio::task::spawn_blocking(move || {
        while let Ok(event) = events.recv() {
            match event {
                LobbyEvent::RoomCreated { room } => gateway.broadcast(ServerMessage::RoomCreated {
                    room: room.to_serialized(),
                }),
                LobbyEvent::RoomUpdated { room } => gateway.broadcast(ServerMessage::RoomUpdated {
                    room: room.to_serialized(),
                }),
                LobbyEvent::RoomDeleted { room_id } => {
                    gateway.broadcast(ServerMessage::RoomDeleted { room_id })
                }
                LobbyEvent::PlayerJoined {
                    room_id,
                    player,
                    players,
                } => gateway.broadcast_room(
                    room_id,
                    ServerMessage::PlayerJoined {
                        room_id,
                        user_id: player.user_id,
                        username: player.username,
                        players: players.to_serialized(),
                    },
                    None,
                ),
                LobbyEvent::PlayerLeft {
                    room_id,
                    user_id,
                    new_host_id,
                    players,
                } => gateway.broadcast_room(
                    room_id,
                    ServerMessage::PlayerLeft {
                        room_id,
                        user_id,
                        new_host_id,
                        players: players.to_serialized(),
                    },
                    None,
                ),
                LobbyEvent::GameStarted { room, players } => gateway.broadcast_room(
                    room.id,
                    ServerMessage::GameStarted {
                        room_id: room.id,
                        room: room.to_serialized(),
                        players: players.to_serialized(),
                    },
                    None,
                ),
            }
        }
    });
}

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    token: Option<String>,
}

/// Upgrades to a websocket connection, refusing before the upgrade if the
/// token does not resolve to a live session
pub async fn gateway<Db>(
    ws: WebSocketUpgrade,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    State(context): State<ServerContext<Db>>,
) -> Result<Response, ServerError>
where
    Db: Database,
{
    let token = query
        .token
        .or_else(|| bearer_token(&headers))
        .ok_or(ServerError::Unauthorized("Missing authentication token"))?;

    let session = context
        .lobby
        .auth
        .session(&token)
        .await
        .map_err(|_| ServerError::Unauthorized("Session does not exist"))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session.user, context)))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|x| x.to_str().ok())
        .and_then(|x| x.strip_prefix("Bearer "))
        .map(|x| x.to_string())
}

async fn handle_socket<Db>(socket: WebSocket, user: UserData, context: ServerContext<Db>)
where
    Db: Database,
{
    let (mut sink, mut stream) = socket.split();
    let (outgoing, mut pending) = mpsc::unbounded_channel();

    let id = context.gateway.connect(outgoing);
    info!("User {} connected to the gateway", user.username);

    let writer = tokio::spawn(async move {
        while let Some(message) = pending.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(_) => continue,
            };

            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(_) => break,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match serde_json::from_str(&text) {
            Ok(event) => handle_event(id, &user, event, &context).await,
            Err(_) => context.gateway.send_to(
                id,
                ServerMessage::Error {
                    message: "Unrecognized event".to_string(),
                },
            ),
        }
    }

    context.gateway.disconnect(id);
    writer.abort();

    notify_disconnect(&user, &context).await;
    info!("User {} disconnected from the gateway", user.username);
}

async fn handle_event<Db>(
    id: ConnectionId,
    user: &UserData,
    event: ClientMessage,
    context: &ServerContext<Db>,
) where
    Db: Database,
{
    let gateway = &context.gateway;

    match event {
        ClientMessage::RoomJoin { room_id } => {
            match check_membership(room_id, user.id, context).await {
                Ok(()) => {
                    gateway.subscribe(id, room_id);

                    gateway.broadcast_room(
                        room_id,
                        ServerMessage::PlayerConnected {
                            user_id: user.id,
                            username: user.username.clone(),
                        },
                        Some(id),
                    );
                }
                Err(message) => gateway.send_to(id, ServerMessage::Error { message }),
            }
        }
        ClientMessage::RoomLeave { room_id } => {
            gateway.unsubscribe(id, room_id);

            gateway.broadcast_room(
                room_id,
                ServerMessage::PlayerDisconnected {
                    user_id: user.id,
                    username: user.username.clone(),
                    temporary: None,
                },
                Some(id),
            );
        }
        ClientMessage::Chat { room_id, message } => {
            let message = message.trim().to_string();

            // Blank messages are dropped without a reply
            if message.is_empty() {
                return;
            }

            match check_membership(room_id, user.id, context).await {
                Ok(()) => gateway.broadcast_room(
                    room_id,
                    ServerMessage::Chat {
                        user_id: user.id,
                        username: user.username.clone(),
                        message,
                        timestamp: Utc::now(),
                    },
                    None,
                ),
                Err(message) => gateway.send_to(id, ServerMessage::Error { message }),
            }
        }
        ClientMessage::Position { room_id, position } => gateway.broadcast_room(
            room_id,
            ServerMessage::Position {
                user_id: user.id,
                position,
            },
            Some(id),
        ),
        ClientMessage::Action {
            room_id,
            action,
            data,
        } => gateway.broadcast_room(
            room_id,
            ServerMessage::Action {
                user_id: user.id,
                action,
                data,
            },
            Some(id),
        ),
    }
}

/// Revalidates room channel access against the persisted membership
async fn check_membership<Db>(
    room_id: PrimaryKey,
    user_id: PrimaryKey,
    context: &ServerContext<Db>,
) -> Result<(), String>
where
    Db: Database,
{
    match context.lobby.rooms.room_with_players(room_id).await {
        Ok(_) => {}
        Err(RoomError::NotFound) => return Err("Room not found".to_string()),
        Err(_) => return Err("Could not verify room membership".to_string()),
    }

    match context.lobby.rooms.is_member(room_id, user_id).await {
        Ok(true) => Ok(()),
        Ok(false) => Err("You are not in this room".to_string()),
        Err(_) => Err("Could not verify room membership".to_string()),
    }
}

/// Tells the other members that the user dropped off, without removing
/// their membership. They may reconnect and resume.
async fn notify_disconnect<Db>(user: &UserData, context: &ServerContext<Db>)
where
    Db: Database,
{
    match context.lobby.rooms.user_current_room(user.id).await {
        Ok(Some((room, _))) => context.gateway.broadcast_room(
            room.id,
            ServerMessage::PlayerDisconnected {
                user_id: user.id,
                username: user.username.clone(),
                temporary: Some(true),
            },
            None,
        ),
        Ok(None) => {}
        Err(e) => warn!("Failed to look up current room on disconnect: {e}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use warren_lobby::{Lobby, MemoryDatabase, NewAccount, RoomData};

    fn context() -> ServerContext<MemoryDatabase> {
        ServerContext {
            lobby: Arc::new(Lobby::new(MemoryDatabase::new())),
            gateway: Gateway::new(),
        }
    }

    async fn register(context: &ServerContext<MemoryDatabase>, name: &str) -> UserData {
        context
            .lobby
            .auth
            .register(NewAccount {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                password: format!("{name}-hunter2"),
            })
            .await
            .expect("registers")
            .user
    }

    async fn create_room(context: &ServerContext<MemoryDatabase>, host: &UserData) -> RoomData {
        context
            .lobby
            .rooms
            .create_room(host.id, "Test room".to_string(), 4)
            .await
            .expect("creates")
            .0
    }

    #[tokio::test]
    async fn room_channel_access_requires_persisted_membership() {
        let context = context();
        let host = register(&context, "ada").await;
        let outsider = register(&context, "brian").await;

        let room = create_room(&context, &host).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = context.gateway.connect(tx);

        let join = ClientMessage::RoomJoin { room_id: room.id };
        handle_event(id, &outsider, join, &context).await;

        match rx.try_recv().expect("replies") {
            ServerMessage::Error { message } => assert_eq!(message, "You are not in this room"),
            other => panic!("unexpected message: {other:?}"),
        }

        let unknown = ClientMessage::RoomJoin { room_id: room.id + 999 };
        handle_event(id, &outsider, unknown, &context).await;

        match rx.try_recv().expect("replies") {
            ServerMessage::Error { message } => assert_eq!(message, "Room not found"),
            other => panic!("unexpected message: {other:?}"),
        }

        // The refused connection must not receive room traffic
        context
            .gateway
            .broadcast_room(room.id, ServerMessage::RoomDeleted { room_id: room.id }, None);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn blank_chat_messages_are_dropped_and_the_rest_are_trimmed() {
        let context = context();
        let host = register(&context, "ada").await;
        let room = create_room(&context, &host).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = context.gateway.connect(tx);
        context.gateway.subscribe(id, room.id);

        let blank = ClientMessage::Chat {
            room_id: room.id,
            message: "   \n  ".to_string(),
        };
        handle_event(id, &host, blank, &context).await;

        assert!(rx.try_recv().is_err());

        let chat = ClientMessage::Chat {
            room_id: room.id,
            message: "  hello  ".to_string(),
        };
        handle_event(id, &host, chat, &context).await;

        // Chat reaches the whole room, the sender included
        match rx.try_recv().expect("replies") {
            ServerMessage::Chat {
                user_id, message, ..
            } => {
                assert_eq!(user_id, host.id);
                assert_eq!(message, "hello");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn an_abrupt_disconnect_notifies_the_current_room() {
        let context = context();
        let host = register(&context, "ada").await;
        let member = register(&context, "brian").await;

        let room = create_room(&context, &host).await;

        context
            .lobby
            .rooms
            .join_room(room.id, member.id)
            .await
            .expect("joins");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = context.gateway.connect(tx);
        context.gateway.subscribe(id, room.id);

        notify_disconnect(&member, &context).await;

        match rx.try_recv().expect("replies") {
            ServerMessage::PlayerDisconnected {
                user_id, temporary, ..
            } => {
                assert_eq!(user_id, member.id);
                assert_eq!(temporary, Some(true));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        // A user without a current room produces no notice
        let drifter = register(&context, "clara").await;
        notify_disconnect(&drifter, &context).await;

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn client_messages_deserialize_from_the_wire_format() {
        let join: ClientMessage =
            serde_json::from_value(json!({ "event": "room:join", "data": { "roomId": 7 } }))
                .unwrap();

        let chat: ClientMessage = serde_json::from_value(json!({
            "event": "chat:message",
            "data": { "roomId": 7, "message": "hello" }
        }))
        .unwrap();

        assert!(matches!(join, ClientMessage::RoomJoin { room_id: 7 }));
        assert!(matches!(chat, ClientMessage::Chat { room_id: 7, .. }));
    }

    #[test]
    fn action_data_defaults_to_null() {
        let action: ClientMessage = serde_json::from_value(json!({
            "event": "player:action",
            "data": { "roomId": 3, "action": "roll" }
        }))
        .unwrap();

        match action {
            ClientMessage::Action { data, .. } => assert_eq!(data, Value::Null),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn server_messages_serialize_with_event_and_data() {
        let message = ServerMessage::PlayerConnected {
            user_id: 4,
            username: "ferris".to_string(),
        };

        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["event"], "room:playerConnected");
        assert_eq!(value["data"]["userId"], 4);
        assert_eq!(value["data"]["username"], "ferris");
    }

    #[test]
    fn deleted_room_events_use_camel_case_fields() {
        let message = ServerMessage::RoomDeleted { room_id: 12 };
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["event"], "room:deleted");
        assert_eq!(value["data"]["roomId"], 12);
    }
}
