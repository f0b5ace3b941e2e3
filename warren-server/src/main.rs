use std::env;

use log::{error, info};
use thiserror::Error;
use warren_lobby::{DatabaseError, Lobby, PgDatabase};

#[derive(Debug, Error)]
enum StartupError {
    #[error("DATABASE_URL must be set")]
    MissingDatabaseUrl,
    #[error("Could not initialize database: {0}")]
    Database(#[from] DatabaseError),
}

impl StartupError {
    fn hint(&self) -> &'static str {
        match self {
            StartupError::MissingDatabaseUrl => {
                "Set DATABASE_URL to a postgres connection string, then try again."
            }
            StartupError::Database(_) => {
                "Make sure the postgres instance is running and reachable, then try again."
            }
        }
    }
}

async fn init() -> Result<(), StartupError> {
    let database_url = env::var("DATABASE_URL").map_err(|_| StartupError::MissingDatabaseUrl)?;

    info!("Connecting to database...");
    let database = PgDatabase::new(&database_url).await?;

    let lobby = Lobby::new(database);

    info!("Initialized successfully.");
    warren_server::run_server(lobby).await;

    Ok(())
}

#[tokio::main]
async fn main() {
    warren_server::logging::init_logger();

    if let Err(error) = init().await {
        error!("warren failed to start! {error}");
        error!("Hint: {}", error.hint());
    }
}
