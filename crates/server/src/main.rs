use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archivist_core::{
    build_notifiers, load_config, validate_config, AdmissionController, AsyncDecisionController,
    BulkOperationWorkflow, ContinuationRegistry, FsBundler, FsSourceStore, JobService, JobStore,
    MonitorHub, PipelineRegistry, ProcessingWorkflow, SqliteJobStore, WorkflowHost,
};

use archivist_server::api::create_router;
use archivist_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on waiting for workflow compensation at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "archivist=info,archivist_server=info,archivist_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Archivist {}", VERSION);

    // Determine config path
    let config_path = std::env::var("ARCHIVIST_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    // Create SQLite job store
    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    // Pipelines and their admission slots
    let registry =
        PipelineRegistry::from_config(&config.pipelines).context("Failed to create pipelines")?;
    let admission = Arc::new(AdmissionController::new(&registry));
    for pipeline in registry.iter() {
        info!(
            pipeline = pipeline.name(),
            capacity = pipeline.capacity(),
            "Pipeline registered"
        );
    }

    let notifiers =
        build_notifiers(&config.notifications).context("Failed to create notifiers")?;
    info!("{} notifier(s) enabled", notifiers.len());

    let monitor = MonitorHub::default();
    let decisions = AsyncDecisionController::new(
        Arc::clone(&store),
        ContinuationRegistry::new(),
        monitor.clone(),
        Duration::from_secs(config.engine.decision_ceiling_secs),
    );

    let processing = ProcessingWorkflow::new(
        Arc::clone(&store),
        Arc::new(registry),
        admission,
        Arc::new(FsSourceStore::new(&config.watchers)),
        Arc::new(FsBundler::new()),
        decisions,
        monitor,
    )
    .with_notifiers(notifiers)
    .with_admission_heartbeat(Duration::from_secs(config.engine.admission_heartbeat_secs));

    let bulk = BulkOperationWorkflow::new(Arc::clone(&store))
        .with_page_size(config.engine.bulk_page_size)
        .with_pause(Duration::from_millis(config.engine.bulk_pause_ms));

    let service = JobService::new(
        Arc::new(WorkflowHost::new()),
        Arc::new(processing),
        Arc::new(bulk),
    );

    // Jobs left mid-flight by a previous process can only be retried
    service
        .recover()
        .context("Failed to recover interrupted jobs")?;

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), service.clone()));

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

    info!("Server shutting down, cancelling running workflows...");
    service.shutdown(SHUTDOWN_TIMEOUT).await;
    info!("Workflows stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
