//! AI analysis worker - main entry point
//!
//! Startup order: logging, configuration, health server, result store,
//! condensation chain, broker link. SIGINT or SIGTERM stops intake; the
//! in-flight task finishes before the link is closed.

use ai_analysis_worker::analysis::AnalysisEngine;
use ai_analysis_worker::config::{QueueRole, WorkerConfig};
use ai_analysis_worker::error::{WorkerError, WorkerResult};
use ai_analysis_worker::llm::ProviderFallbackChain;
use ai_analysis_worker::observability::{init_default_logging, metrics::metrics, HealthServer};
use ai_analysis_worker::persistence::{AnalysisStore, MemoryStore, PostgresStore};
use ai_analysis_worker::transport::amqp::ConnectionSupervisor;
use ai_analysis_worker::worker::{QueuePlan, RedeliveryPolicy, TaskDispatcher, WorkerLifecycle};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Queue-driven syllabus analysis worker
#[derive(Parser)]
#[command(name = "ai-worker")]
#[command(about = "Consumes analysis tasks from RabbitMQ and publishes their outcomes")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume tasks until interrupted
    Run {
        /// Task queue to consume, overriding `worker.queue`
        #[arg(long, value_name = "ROLE")]
        queue: Option<QueueRole>,
    },
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose > 0);

    info!("Starting AI analysis worker v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e.sanitized());
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { queue } => {
            let role = queue.unwrap_or(config.worker.queue);
            run_worker(config, role).await
        }
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e.sanitized());
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&PathBuf>) -> WorkerResult<WorkerConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(WorkerConfig::load_from_file(path)?);
    }

    let default_paths = ["worker.toml", "config/worker.toml"];
    for path_str in default_paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(WorkerConfig::load_from_file(&path)?);
        }
    }

    Err(WorkerError::startup(
        "no configuration file found; pass one with -c/--config or create worker.toml",
    ))
}

async fn run_worker(config: WorkerConfig, role: QueueRole) -> WorkerResult<()> {
    info!(
        worker_id = %config.worker.id,
        queue_role = %role,
        "Worker starting"
    );

    let collector = metrics();
    collector.set_worker_state("initializing");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let health_server = Arc::new(HealthServer::new(
        config.worker.id.clone(),
        HealthServer::port_from_env(),
    ));
    let health_task = {
        let server = Arc::clone(&health_server);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = server.start(rx).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let store = build_store(&config).await?;

    let chain = ProviderFallbackChain::from_config(
        &config.providers,
        config.get_remote_api_key(),
    )
    .await;
    let engine = AnalysisEngine::new(Arc::new(chain), config.providers.summary_max_chars);

    let supervisor = ConnectionSupervisor::from_config(&config, shutdown_rx.clone())?;
    let tracker = health_server.track_connection_state(supervisor.state_receiver());

    let dispatcher = TaskDispatcher::new(
        Arc::new(engine),
        store,
        supervisor.publisher(),
        config.queues.result.clone(),
        RedeliveryPolicy::new(config.worker.max_redeliveries),
    );

    let plan = QueuePlan::from_config(&config, role);
    let mut lifecycle = WorkerLifecycle::new(supervisor, plan, config.broker.prefetch);

    let signals = tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    let result = lifecycle.run(&dispatcher).await;

    signals.abort();
    tracker.abort();
    // The health server only stops on the shutdown signal; stop it on a
    // fatal broker error too.
    health_task.abort();

    match &result {
        Ok(()) => collector.set_worker_state("stopped"),
        Err(e) => {
            collector.set_worker_state("error");
            error!(error = %e.sanitized(), "Worker stopped on error");
        }
    }
    result
}

async fn build_store(config: &WorkerConfig) -> WorkerResult<Arc<dyn AnalysisStore>> {
    if !config.database.enabled {
        warn!("Database disabled, results are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let url = config.get_database_url()?;
    let store = PostgresStore::connect(&url, &config.database).await?;
    if config.database.run_migrations {
        store.run_migrations().await?;
        info!("Database migrations applied");
    }
    Ok(Arc::new(store))
}

/// Flip the shutdown flag on the first SIGINT or SIGTERM
async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let (mut sigint, mut sigterm) = match (
        signal::unix::signal(signal::unix::SignalKind::interrupt()),
        signal::unix::signal(signal::unix::SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to install signal handlers: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }

    metrics().set_worker_state("stopping");
    let _ = shutdown_tx.send(true);
}

fn handle_config_command(config: &WorkerConfig, show: bool) -> WorkerResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| WorkerError::internal(format!("failed to render configuration: {e}")))?;
        println!("Current configuration:");
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}
