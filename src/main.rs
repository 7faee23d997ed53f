use playlink::{config::Config, metrics, server, server::state::AppState};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting playlink {}", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!("Running in {} mode", if config.is_dev { "DEV" } else { "PROD" });

    // Install the recorder before anything records
    metrics::handle();

    let scheduler_enabled = config.scheduler_enabled;
    let interval = config.refresh_interval;
    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialise: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let scheduler = scheduler_enabled
        .then(|| state.scanner.clone().spawn_periodic(interval, shutdown.clone()));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let result = server::start(state, shutdown.clone()).await;
    shutdown.cancel();
    if let Some(scheduler) = scheduler {
        let _ = scheduler.await;
    }

    if let Err(e) = result {
        error!("Failed to start server: {}", e);
        std::process::exit(1);
    }
}
