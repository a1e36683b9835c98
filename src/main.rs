use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinema_booking::{
    app,
    config::{Config, LogFormat, StorageBackend},
    services::seeder::seed_catalog,
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "cinema_booking", about = "Cinema ticket booking API")]
struct Args {
    /// Load the sample catalog; exits afterwards unless the store is in-memory
    #[arg(long)]
    seed: bool,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    let registry = tracing_subscriber::registry().with(filter);
    match config.app.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config);

    info!("Starting Cinema Booking API ({})", config.app.environment);

    let state = AppState::new(config.clone())
        .await
        .context("failed to initialise application state")?;

    if args.seed {
        let day = chrono::Utc::now().date_naive() + chrono::Duration::days(1);
        let report = seed_catalog(state.store.as_ref(), day)
            .await
            .context("seeding failed")?;
        if report.movies > 0 {
            state.cache.invalidate_catalog().await;
        }
        // An in-memory catalog only lives as long as this process
        if config.storage.backend == StorageBackend::Postgres {
            return Ok(());
        }
    }

    state.cache.warmup_cache().await;

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("invalid HOST/PORT")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}
