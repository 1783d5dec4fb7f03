use std::sync::Arc;

use colored::Colorize;
use log::{error, info};
use thiserror::Error;

use aircast_core::{
    channels::{TcpQueueChannel, TelnetLiveControl},
    store::{RedisStore, StoreError},
    Config,
};
use aircast_server::run_server;
use aircast_station::{
    db::{DatabaseError, PgDatabase},
    ExternalMediaTools, LiveStation, Station,
};

mod logging;

struct Aircast {
    station: Arc<LiveStation>,
}

#[derive(Debug, Error)]
enum AircastError {
    #[error("Could not reach the state store: {0}")]
    StateStore(StoreError),

    #[error("Could not initialize the catalog store: {0}")]
    CatalogStore(DatabaseError),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Aircast {
    async fn new() -> Result<Self, AircastError> {
        let config = Config::from_env();

        for dir in [
            config.songs_dir.join("tmp"),
            config.songs_dir.join("user"),
            config.songs_dir.join("fallback"),
            config.recordings_dir.join("tmp"),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| AircastError::Fatal(format!("cannot create {dir:?}: {e}")))?;
        }

        info!("Connecting to the state store...");
        let store = RedisStore::connect(&config.state_store_url)
            .await
            .map_err(AircastError::StateStore)?;

        info!("Connecting to the catalog store...");
        let database = PgDatabase::connect(&config.catalog_store_url)
            .await
            .map_err(AircastError::CatalogStore)?;

        let user_queue = Arc::new(TcpQueueChannel::new(config.user_queue_addr.clone()));
        let fallback_queue = Arc::new(TcpQueueChannel::new(config.fallback_queue_addr.clone()));
        let live_control = Arc::new(TelnetLiveControl::new(config.live_control_addr.clone()));
        let media = Arc::new(ExternalMediaTools::new(config.download_timeout));

        let station = Station::new(
            config,
            store,
            database,
            user_queue,
            fallback_queue,
            live_control,
            media,
        );

        Ok(Self {
            station: Arc::new(station),
        })
    }

    async fn run(self) {
        self.station.queues.resume_on_startup().await;

        let watchdog_station = self.station.clone();
        tokio::spawn(async move { watchdog_station.livestream.run_watchdog().await });

        tokio::spawn(self.station.observer().run());
        tokio::spawn(self.station.dispatcher().run());
        tokio::spawn(self.station.recording_worker().run());

        run_server(self.station).await
    }
}

impl AircastError {
    fn hint(&self) -> String {
        match self {
            AircastError::StateStore(_) => {
                "This is a state store error. Make sure the Redis instance is running and STATE_STORE_URL points at it, then try again.".to_string()
            }
            AircastError::CatalogStore(_) => {
                "This is a catalog store error. Make sure the Postgres instance is running and CATALOG_STORE_URL points at it, then try again.".to_string()
            }
            AircastError::Fatal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

#[tokio::main]
async fn main() {
    logging::init_logger();

    match Aircast::new().await {
        Ok(aircast) => {
            info!("Initialized successfully.");
            aircast.run().await;
        }
        Err(error) => {
            error!(
                "{} Read the error below to troubleshoot the issue.",
                "Aircast failed to start!".bold().red()
            );
            error!("{error}");
            error!("{}", format!("Hint: {}", error.hint()).dimmed().italic());
        }
    }
}
