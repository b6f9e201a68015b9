//! craftline - Serve the launcher's command gateway over stdin/stdout
//!
//! Requests are read one JSON object per line from stdin and answered on
//! stdout. Logs go to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use single_instance::SingleInstance;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use craftline::core::AppState;
use craftline::gateway::{self, CommandGateway};
use craftline::persistence::Database;
use craftline::{APP_NAME, APP_VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // Ensure only one launcher owns the catalog
    let instance =
        SingleInstance::new(APP_NAME).context("Failed to create single instance lock")?;
    if !instance.is_single() {
        eprintln!("Another instance of {} is already running", APP_NAME);
        std::process::exit(1);
    }

    // Initialize database
    let db = Database::new()?;
    db.initialize()?;

    let debug_logging = db
        .load_settings()
        .ok()
        .flatten()
        .map(|s| s.debug_logging)
        .unwrap_or(false);
    init_logging(debug_logging);
    info!("{} v{} starting...", APP_NAME, APP_VERSION);
    info!("Database at {:?}", db.path());

    // Create application state
    let state = Arc::new(AppState::new(db).await?);
    info!("Application state initialized");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted");
                shutdown.cancel();
            }
        });
    }

    let gateway = Arc::new(CommandGateway::new(Arc::clone(&state)));
    let served = gateway::serve(
        gateway,
        tokio::io::stdin(),
        tokio::io::stdout(),
        shutdown,
    )
    .await;
    if let Err(e) = &served {
        error!("Gateway stopped: {:#}", e);
    }

    state.shutdown().await;
    info!("{} shutting down", APP_NAME);
    served
}

/// Initialize the logging system; stdout is reserved for responses
fn init_logging(debug: bool) {
    let default = if debug {
        "craftline=debug"
    } else {
        "craftline=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
