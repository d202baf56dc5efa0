//! TaskFlow — persistent, priority-ordered, retry-aware task execution queue.
//!
//! Usage:
//!   taskflow serve                 # start the HTTP gateway (default)
//!   taskflow migrate               # run schema migrations and exit
//!   taskflow stats                 # print queue stats and exit

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taskflow_core::TaskFlowConfig;
use taskflow_core::traits::{ExecutionContext, ExecutionOutcome, Executor};
use taskflow_core::types::TaskStatus;
use taskflow_executor::AiExecutor;
use taskflow_gateway::AppState;
use taskflow_health::HealthMonitor;
use taskflow_queue::TaskQueue;
use taskflow_store::{SqliteStore, TaskStore};
use taskflow_triggers::TriggerEngine;

#[derive(Parser)]
#[command(
    name = "taskflow",
    version,
    about = "Persistent, priority-ordered, retry-aware task execution queue"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (defaults to <data-dir>/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway and background loops (default)
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run schema migrations and exit
    Migrate,
    /// Print queue stats and exit
    Stats,
}

/// Placeholder model call: the AI model invocation itself is out of scope
/// (spec §1). Echoes the prompt so the rest of the pipeline is exercisable
/// end to end without a real provider wired in.
struct EchoExecutor;

#[async_trait::async_trait]
impl Executor for EchoExecutor {
    async fn execute(&self, context: ExecutionContext) -> ExecutionOutcome {
        ExecutionOutcome::ok(format!("echo: {}", context.prompt))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "taskflow=debug,taskflow_queue=debug,taskflow_store=debug,taskflow_triggers=debug"
    } else {
        "taskflow=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = if let Some(path) = &cli.config {
        TaskFlowConfig::load_from(std::path::Path::new(path))?
    } else {
        TaskFlowConfig::load()?
    };
    config = config.apply_env_overrides();

    match cli.command.unwrap_or(Commands::Serve { host: None, port: None }) {
        Commands::Migrate => run_migrate(&config).await,
        Commands::Stats => run_stats(&config).await,
        Commands::Serve { host, port } => {
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            run_serve(config).await
        }
    }
}

fn open_store(config: &TaskFlowConfig) -> Result<Arc<dyn TaskStore>> {
    std::fs::create_dir_all(&config.store.data_dir)?;
    let store = SqliteStore::open(&config.db_path())?;
    Ok(Arc::new(store))
}

async fn run_migrate(config: &TaskFlowConfig) -> Result<()> {
    let store = open_store(config)?;
    store.migrate().await?;
    tracing::info!(path = %config.db_path().display(), "migrations applied");
    Ok(())
}

async fn run_stats(config: &TaskFlowConfig) -> Result<()> {
    let store = open_store(config)?;
    store.migrate().await?;
    let stats = store.get_queue_stats(None).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn run_serve(config: TaskFlowConfig) -> Result<()> {
    let store = open_store(&config)?;
    store.migrate().await?;

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let queue = TaskQueue::new(
        Arc::clone(&store),
        config.queue.max_concurrent,
        config.queue.workers,
        events_tx,
    );
    let ai_executor: Arc<dyn Executor> = Arc::new(AiExecutor::new(Arc::new(EchoExecutor)));
    queue.set_executor(ai_executor).await;

    recover_crashed_sessions(&store, &queue).await?;

    let triggers = TriggerEngine::new(Arc::clone(&store), Arc::clone(&queue));
    triggers.spawn(events_rx);

    let health = HealthMonitor::new(Arc::clone(&store), Arc::clone(&queue), config.queue.stall_timeout_ms);
    health.spawn(std::time::Duration::from_secs(60));

    spawn_retention_sweeper(Arc::clone(&store), config.store.retention_days);

    let state = Arc::new(AppState {
        store,
        queue,
        triggers,
        health,
        start_time: std::time::Instant::now(),
        accepting: AtomicBool::new(true),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(%addr, "starting taskflow gateway");

    tokio::select! {
        res = taskflow_gateway::start_server(state, addr) => res?,
        _ = shutdown_signal() => tracing::info!("shutdown signal received"),
    }
    Ok(())
}

/// Tasks found `running` at startup belong to a crashed process (spec §3
/// crash-recovery rule) — reset them to `pending` across every known session.
async fn recover_crashed_sessions(store: &Arc<dyn TaskStore>, queue: &Arc<TaskQueue>) -> Result<()> {
    let stats = store.get_queue_stats(None).await?;
    if stats.running_tasks == 0 {
        return Ok(());
    }
    tracing::warn!(count = stats.running_tasks, "found stale running tasks from a prior crash");
    let sessions = distinct_session_ids(store).await?;
    let recovered = queue.recover_crashed_tasks(&sessions).await?;
    tracing::info!(recovered, "reset crashed tasks to pending");
    Ok(())
}

async fn distinct_session_ids(store: &Arc<dyn TaskStore>) -> Result<Vec<String>> {
    let running = store.get_tasks_by_status(TaskStatus::Running).await?;
    let mut sessions: Vec<String> = running.into_iter().map(|t| t.session_id).collect();
    sessions.sort();
    sessions.dedup();
    Ok(sessions)
}

fn spawn_retention_sweeper(store: Arc<dyn TaskStore>, retention_days: u32) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            tick.tick().await;
            match store.cleanup_old(retention_days).await {
                Ok(removed) => {
                    if removed > 0 {
                        tracing::info!(removed, "retention sweep purged old tasks");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
