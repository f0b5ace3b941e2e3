mod auth;
mod db;
mod events;
mod rooms;
mod util;

use std::sync::Arc;

pub use auth::*;
pub use db::*;
pub use events::*;
pub use rooms::*;

use crossbeam::channel::unbounded;

/// The warren lobby system, facilitating accounts, sessions, and the
/// room lifecycle engine.
pub struct Lobby<Db> {
    database: Arc<Db>,
    events: EventReceiver,

    pub auth: Auth<Db>,
    pub rooms: RoomManager<Db>,
}

/// A type passed to various components of the lobby system, to access the
/// database and emit events.
pub struct LobbyContext<Db> {
    pub database: Arc<Db>,
    events: EventSender,
}

impl<Db> Lobby<Db>
where
    Db: Database,
{
    pub fn new(database: Db) -> Self {
        let database = Arc::new(database);
        let (sender, receiver) = unbounded();

        let context = LobbyContext {
            database: database.clone(),
            events: sender,
        };

        Self {
            auth: Auth::new(&database),
            rooms: RoomManager::new(&context),
            database,
            events: receiver,
        }
    }

    /// A receiver of events emitted by lobby mutations
    pub fn events(&self) -> EventReceiver {
        self.events.clone()
    }

    pub fn database(&self) -> &Arc<Db> {
        &self.database
    }
}

impl<Db> LobbyContext<Db>
where
    Db: Database,
{
    pub fn emit(&self, event: LobbyEvent) {
        self.events.send(event).ok();
    }
}

impl<Db> Clone for LobbyContext<Db>
where
    Db: Database,
{
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            events: self.events.clone(),
        }
    }
}
