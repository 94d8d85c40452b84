//! Task dispatch server: registers callback servers, schedules parameterized
//! tasks against them, and runs a leader-gated health-check sweep over
//! registered routes.
//!
//! Responsible for:
//! - Initializing logging and configuration.
//! - Wiring up storage, the callback executor, the registry, scheduler, and
//!   worker pool.
//! - Starting the HTTP API and handling graceful shutdown.

#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod api;
mod config;
mod db;
mod election;
mod executor;
mod registry;
mod scheduler;
mod worker;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use taskcore::config::AppConfig;
use tokio::sync::Mutex;
use tracing::{error, info};

use config::ConfigManager;
use db::{Database, SqliteTaskCallbackSrvRepo, SqliteTaskLogRepo, SqliteTaskRepo};
use election::{AlwaysMaster, Elector};
use executor::HttpCallbackExecutor;
use registry::Registry;
use scheduler::Scheduler;
use worker::WorkerEngine;

#[derive(Parser, Debug)]
#[command(name = "taskd")]
#[command(about = "Distributed task dispatch service", long_about = None)]
struct CliArgs {
    /// Path to the server configuration file (server.toml)
    #[arg(short = 'c', long = "config", value_name = "CONFIG_FILE")]
    config_file: PathBuf,
}

fn build_elector(config: &AppConfig) -> Arc<dyn Elector> {
    match config.election_driver.as_str() {
        "none" => Arc::new(AlwaysMaster),
        other => {
            // Real etcd/redis electors are external collaborators (spec §2
            // "Out of scope"); falling back to single-node behavior here
            // rather than failing startup keeps a misconfigured cluster node
            // from taking itself offline entirely.
            error!(driver = other, "election driver not wired in this binary, defaulting to always-master");
            Arc::new(AlwaysMaster)
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let mut database = Database::new(&config.sqlite_path).context("failed to create database manager")?;
    database.initialize().context("failed to initialize database")?;
    let database = Arc::new(Mutex::new(database));

    let srv_repo: Arc<dyn taskcore::repo::TaskCallbackSrvRepo> =
        Arc::new(SqliteTaskCallbackSrvRepo::new(database.clone()));
    let task_repo: Arc<dyn taskcore::repo::TaskRepo> =
        Arc::new(SqliteTaskRepo::new(database.clone(), srv_repo.clone()));
    let log_repo: Arc<dyn taskcore::repo::TaskLogRepo> = Arc::new(SqliteTaskLogRepo::new(database.clone()));

    let callback_exec: Arc<dyn taskcore::model::CallbackExecutor> = Arc::new(HttpCallbackExecutor::new());
    let elector = build_elector(&config);

    let registry = Arc::new(Registry::new(
        config.health_worker_pool_size,
        srv_repo.clone(),
        callback_exec.clone(),
        elector.clone(),
        config.check_health_interval_sec,
    ));

    let scheduler = Arc::new(Scheduler::new(
        task_repo.clone(),
        elector.clone(),
        config.sweep_page_size,
        config.task_worker_pool_size,
    ));

    let worker_engine = Arc::new(WorkerEngine::new(
        task_repo.clone(),
        log_repo.clone(),
        callback_exec.clone(),
        config.task_worker_pool_size,
    ));

    let lifecycle = Arc::new(api::Lifecycle::new());

    let app_state = api::AppState {
        task_repo: task_repo.clone(),
        log_repo: log_repo.clone(),
        registry: registry.clone(),
        confirmer: worker_engine.confirmer(),
        lifecycle: lifecycle.clone(),
    };
    let app = api::create_router(app_state);

    let listen_address: SocketAddr = format!("{}:{}", config.http_host, config.http_port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.http_host, config.http_port))?;

    let listener = tokio::net::TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("failed to bind TCP listener to {listen_address}"))?;

    info!(addr = %listen_address, "starting task dispatch server");

    let registry_for_run = registry.clone();
    tokio::spawn(async move { registry_for_run.run().await });

    let scheduler_for_run = scheduler.clone();
    tokio::spawn(async move { scheduler_for_run.run().await });

    worker_engine.clone().run(scheduler.worker_slot_sender());

    lifecycle.mark_started();

    let shutdown_signal = {
        let lifecycle = lifecycle.clone();
        async move {
            setup_shutdown_signal().await;
            info!("shutdown signal received, draining in-flight requests");
            lifecycle.mark_stopped();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    info!("stopping scheduler and worker pool");
    scheduler.stop().await;
    worker_engine.stop().await;
    registry.stop().await;

    Ok(())
}

async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "failed to register signal handlers, falling back to Ctrl+C only");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "taskd.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("server=info,taskcore=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!(config_file = %cli_args.config_file.display(), "task dispatch server starting up");

    let config_manager = match ConfigManager::new(cli_args.config_file) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    let config = config_manager
        .app_config
        .expect("configuration must be loaded after ConfigManager::new succeeds");

    if let Err(e) = run(config).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("server shutdown complete");
    Ok(())
}
