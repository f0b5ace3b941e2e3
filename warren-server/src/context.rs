use std::sync::Arc;

use warren_lobby::{Database, Lobby};

use crate::gateway::Gateway;

/// State shared by every route, generic over the datastore so the
/// handlers can also run against the in-memory implementation
pub struct ServerContext<Db> {
    pub lobby: Arc<Lobby<Db>>,
    pub gateway: Arc<Gateway>,
}

impl<Db> Clone for ServerContext<Db>
where
    Db: Database,
{
    fn clone(&self) -> Self {
        Self {
            lobby: self.lobby.clone(),
            gateway: self.gateway.clone(),
        }
    }
}
