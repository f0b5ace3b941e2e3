use crossbeam::channel::{Receiver, Sender};

use crate::{PrimaryKey, RoomData, RoomPlayerData};

pub type EventSender = Sender<LobbyEvent>;
pub type EventReceiver = Receiver<LobbyEvent>;

/// Events emitted by the lobby after a successful mutation.
///
/// The detailed player events target the room's channel; the coarse
/// room events keep lobby browsers current without a room subscription.
#[derive(Debug, Clone)]
pub enum LobbyEvent {
    /// A new room is open for players
    RoomCreated { room: RoomData },
    /// Summary fields of a room changed (member count or status)
    RoomUpdated { room: RoomData },
    /// A room lost its last member and was removed
    RoomDeleted { room_id: PrimaryKey },
    /// A user became a member of a room
    PlayerJoined {
        room_id: PrimaryKey,
        player: RoomPlayerData,
        players: Vec<RoomPlayerData>,
    },
    /// A user left a room, possibly promoting a new host
    PlayerLeft {
        room_id: PrimaryKey,
        user_id: PrimaryKey,
        new_host_id: Option<PrimaryKey>,
        players: Vec<RoomPlayerData>,
    },
    /// The host started the game and the room is now playing
    GameStarted {
        room: RoomData,
        players: Vec<RoomPlayerData>,
    },
}
