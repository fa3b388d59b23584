use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agri_monitor_service::{
    api::{self, handlers::AppState},
    config::Config,
    db,
    source::HttpSensorSource,
    store::{MemoryStore, PgStore, ReadingStore, SystemStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present; variables may also come from the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    // Both store handles point at the same backing storage
    let (readings, systems): (Arc<dyn ReadingStore>, Arc<dyn SystemStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = db::create_pool(url, config.database_max_connections).await?;
                db::run_migrations(&pool).await?;
                info!("Database ready");
                let store = Arc::new(PgStore::new(pool));
                let readings: Arc<dyn ReadingStore> = store.clone();
                let systems: Arc<dyn SystemStore> = store;
                (readings, systems)
            }
            None => {
                warn!("DATABASE_URL not set; readings and systems are kept in memory only");
                let store = Arc::new(MemoryStore::new());
                let readings: Arc<dyn ReadingStore> = store.clone();
                let systems: Arc<dyn SystemStore> = store;
                (readings, systems)
            }
        };

    let source = HttpSensorSource::new(
        &config.sensor_source_url,
        config.sensor_source_api_key.clone(),
        config.fetch_timeout(),
    )?;
    info!(url = %config.sensor_source_url, "Sensor source configured");

    let state = AppState::new(readings, systems, Arc::new(source), config.collection_settings());

    // Periodic sweep over every registered system
    tokio::spawn(state.collector.clone().run(config.collection_interval()));

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
