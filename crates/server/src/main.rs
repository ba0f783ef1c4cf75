use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tierflow_core::{
    config::{LogFormat, LoggingConfig},
    events::{create_event_system, DomainEvent, EventStore, SqliteEventStore},
    finalizer::DocumentFinalizer,
    identity::PlanRegistrar,
    invoker::HttpTaskInvoker,
    load_config,
    progress::BroadcastProgressPublisher,
    sequencer::{PlanLayout, PlanSequencer},
    status::{SqliteStatusStore, StatusStore},
    validate_config, RunOrchestrator, RunService,
};
use tierflow_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("TIERFLOW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Logging comes from the config, so load it first
    let loaded = load_config(&config_path);
    init_logging(
        &loaded
            .as_ref()
            .map(|c| c.logging.clone())
            .unwrap_or_default(),
    );

    info!("Loading configuration from {:?}", config_path);
    let config =
        loaded.with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Plan root: {:?}", config.plan.root);
    info!("Task endpoint: {}", config.invoker.url);

    // Compute config hash for the ServiceStarted event
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Create SQLite stores
    let status_store: Arc<dyn StatusStore> = Arc::new(
        SqliteStatusStore::new(&config.database.path).context("Failed to create status store")?,
    );
    info!("Status store initialized");

    let event_store: Arc<dyn EventStore> = Arc::new(
        SqliteEventStore::new(&config.database.path).context("Failed to create event store")?,
    );
    info!("Event store initialized");

    // Create event system
    let (event_handle, event_writer) =
        create_event_system(Arc::clone(&event_store), config.orchestrator.event_buffer);
    let writer_handle = tokio::spawn(event_writer.run());

    event_handle
        .emit(DomainEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted event");

    let progress = Arc::new(BroadcastProgressPublisher::new(
        config.orchestrator.progress_buffer,
    ));

    // Collaborators
    let layout = PlanLayout::new(&config.plan.root);
    let invoker =
        HttpTaskInvoker::new(&config.invoker).context("Failed to create task invoker")?;
    let sequencer = PlanSequencer::new(layout.clone(), Arc::clone(&status_store));
    let finalizer = DocumentFinalizer::new(&config.finalizer.output_dir);

    let orchestrator = RunOrchestrator::new(
        config.orchestrator.clone(),
        config.retry.clone(),
        Arc::new(sequencer),
        Arc::new(invoker),
        Arc::new(finalizer),
        Arc::clone(&status_store),
        Arc::new(event_handle.clone()),
    )
    .with_registrar(Arc::new(PlanRegistrar::new(layout)))
    .with_progress(progress.clone());

    let service = Arc::new(RunService::new(
        Arc::new(orchestrator),
        config.orchestrator.max_concurrent_runs,
    ));
    info!(
        "Run service ready (max {} items in flight per run)",
        config.orchestrator.max_concurrent_items
    );

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&service),
        event_store,
        progress,
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Cancel active runs and wait for them to record their outcome
    info!("Server shutting down...");
    service.shutdown().await;

    event_handle
        .emit(DomainEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The orchestrator owns a handle clone; every holder must go before
    // the writer's channel closes.
    drop(service);
    drop(event_handle);

    let _ = writer_handle.await;
    info!("Event writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
}
