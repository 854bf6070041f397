use std::process;
use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use conference_server::config::Config;
use conference_server::routes::create_routes;
use conference_server::services::{
    install_prometheus_recorder, LogNotifier, MetricsObserver, SystemClock,
};
use conference_server::store::PgStore;
use conference_server::{AppState, EngineDeps};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "server exited with an error");
        process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    tracing::info!("Successfully connected to database");

    let store = Arc::new(PgStore::new(pool));
    store.migrate().await?;
    tracing::info!("Migrations run successfully");

    let deps = EngineDeps {
        clock: Arc::new(SystemClock),
        observer: Arc::new(MetricsObserver),
        notifier: Arc::new(LogNotifier),
    };
    let metrics = install_prometheus_recorder()?;
    tracing::info!("Metrics available at /metrics");

    let state = AppState::build(store, &config.ticket, &config.admission, deps)?;
    let app: Router = create_routes(state, &config, Some(metrics));

    tracing::info!("Server running at http://{}", config.bind_addr);
    let listener = TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
