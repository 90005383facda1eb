// crates/draftgate-cli/src/main.rs
// ============================================================================
// Module: Draftgate CLI
// Description: Entry point for the API server and the worker loop.
// Purpose: Run one deployment role per process.
// Dependencies: clap, tokio, draftgate-server, draftgate-pipeline
// ============================================================================

//! ## Overview
//! One binary, three roles: `serve` runs the HTTP API, `worker` runs the
//! claim-process loop, and `init-db` initializes the schema and exits. The
//! worker installs a ctrl-c handler and exits 0 only when asked to stop;
//! any startup failure exits non-zero.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    reason = "The CLI reports status and errors on the terminal."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use draftgate_config::AppConfig;
use draftgate_pipeline::Coordinator;
use draftgate_pipeline::NoopTelemetry;
use draftgate_pipeline::ProductionClients;
use draftgate_pipeline::Worker;
use draftgate_server::AppState;
use draftgate_server::build_router;
use draftgate_store_sqlite::SqliteEventSink;
use draftgate_store_sqlite::SqliteStore;
use draftgate_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Arguments
// ============================================================================

/// Draftgate research-report orchestration platform.
#[derive(Debug, Parser)]
#[command(name = "draftgate", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Role to run.
    #[command(subcommand)]
    command: Command,
}

/// Deployment roles.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API server.
    Serve,
    /// Run the job-queue worker loop.
    Worker,
    /// Initialize the database schema and exit.
    InitDb,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let store_config = SqliteStoreConfig {
        path: config.database.path.clone(),
        busy_timeout_ms: config.database.busy_timeout_ms,
    };
    let store = match SqliteStore::open(store_config) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("store error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::InitDb => {
            println!("database initialized at {}", config.database.path.display());
            ExitCode::SUCCESS
        }
        Command::Serve => serve(config, store),
        Command::Worker => worker(config, store),
    }
}

// ============================================================================
// SECTION: Roles
// ============================================================================

/// Runs the HTTP API until interrupted.
fn serve(config: Arc<AppConfig>, store: SqliteStore) -> ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("runtime error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let bind_addr = config.server.bind_addr.clone();
    let router = build_router(AppState {
        store,
        config,
    });
    let outcome = runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|err| format!("cannot bind {bind_addr}: {err}"))?;
        println!("serving on {bind_addr}");
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                // Serve until ctrl-c; a failed signal hook serves forever.
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            })
            .await
            .map_err(|err| err.to_string())
    });
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("server error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the worker loop; exits 0 only when asked to stop.
fn worker(config: Arc<AppConfig>, store: SqliteStore) -> ExitCode {
    let clients = match ProductionClients::from_config(&config) {
        Ok(clients) => Arc::new(clients),
        Err(err) => {
            eprintln!("client setup error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let events = Arc::new(SqliteEventSink::new(&store));
    let coordinator =
        Coordinator::new(store.clone(), events, clients, Arc::clone(&config));
    let poll = Duration::from_secs_f64(config.worker.poll_seconds.max(0.1));
    let worker = Worker::new(store, coordinator, Arc::new(NoopTelemetry), poll);

    let stop = Arc::new(AtomicBool::new(false));
    let signal_stop = Arc::clone(&stop);
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("runtime error: {err}");
            return ExitCode::FAILURE;
        }
    };
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_stop.store(true, Ordering::Relaxed);
        }
    });

    println!("worker started; press ctrl-c to stop");
    worker.run_forever(&stop);
    println!("worker stopped");
    ExitCode::SUCCESS
}
