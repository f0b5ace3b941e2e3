use axum::{extract::State, routing::get, Json};
use chrono::Utc;
use log::info;
use serde_json::{json, Value};
use std::{
    env,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use warren_lobby::{Database, Lobby};

mod auth;
mod context;
mod errors;
mod gateway;
pub mod logging;
mod rooms;
mod schemas;
mod serialized;

pub use context::ServerContext;
pub use errors::{ServerError, ServerResult};

use gateway::Gateway;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;

pub type Router<Db> = axum::Router<ServerContext<Db>>;

/// Starts the warren server
pub async fn run_server<Db>(lobby: Lobby<Db>)
where
    Db: Database,
{
    let port = env::var("WARREN_SERVER_PORT")
        .map(|x| x.parse::<u16>().expect("Port must be a number"))
        .unwrap_or(DEFAULT_PORT);

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let lobby = Arc::new(lobby);
    let gateway = Gateway::new();

    gateway::run_event_forwarder(lobby.events(), gateway.clone());

    let context = ServerContext { lobby, gateway };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::<Db>::new()
        .route("/", get(index))
        .route("/health", get(health::<Db>))
        .route("/gateway", get(gateway::gateway::<Db>))
        .nest("/auth", auth::router())
        .nest("/rooms", rooms::router())
        .layer(cors)
        .with_state(context);

    let listener = TcpListener::bind(&addr).await.expect("listens on address");

    info!("Listening on port {port}");

    axum::serve(listener, router.into_make_service())
        .await
        .unwrap();
}

async fn index() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "warren API",
            "version": env!("CARGO_PKG_VERSION"),
            "status": "running",
        }
    }))
}

async fn health<Db>(State(context): State<ServerContext<Db>>) -> Json<Value>
where
    Db: Database,
{
    let database = match context.lobby.database().ping().await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "success": true,
        "data": {
            "status": "ok",
            "database": database,
            "timestamp": Utc::now(),
        }
    }))
}
