//! `fsald`: filesystem abstraction daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fsal::infrastructure::{Database, EventQueue, Scheduler};
use fsal::notifications::NotificationListener;
use fsal::server::Server;
use fsal::Config;
use fsal::Indexer;

#[derive(Parser)]
#[command(name = "fsald")]
#[command(about = "Filesystem abstraction daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground.
    Server {
        /// Path to the TOML configuration file.
        #[arg(long)]
        conf: PathBuf,
    },
    /// Run the daemon, writing its pid to a file for supervisors.
    Daemon {
        #[arg(long)]
        conf: PathBuf,
        #[arg(long)]
        pid_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Server { conf } => run(conf, None).await,
        Commands::Daemon { conf, pid_file } => run(conf, Some(pid_file)).await,
    }
}

async fn run(conf_path: PathBuf, pid_file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load(&conf_path)?;
    init_tracing(&config.logging.level);

    if let Some(pid_file) = &pid_file {
        std::fs::write(pid_file, std::process::id().to_string())?;
    }

    let db = Database::connect(&config.database.path).await?;
    let events = EventQueue::new(db.clone());
    let scheduler = Scheduler::start();
    let indexer = Indexer::new(&config, db, events, scheduler)?;

    let cancel = CancellationToken::new();

    let notifications = NotificationListener::new(config.ondd.socket.clone(), indexer.clone());
    let notifications_cancel = cancel.clone();
    let notifications_task = tokio::spawn(async move { notifications.run(notifications_cancel).await });

    let server = Arc::new(Server::new(config.fsal.socket.clone(), indexer));
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run(server_cancel).await {
            error!(error = %e, "server exited with an error");
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received");
    cancel.cancel();

    let _ = tokio::join!(notifications_task, server_task);

    if let Some(pid_file) = pid_file {
        let _ = std::fs::remove_file(pid_file);
    }
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
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
