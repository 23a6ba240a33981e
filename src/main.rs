use clap::Parser;
use std::path::PathBuf;
use syslog_importer::config::AppConfig;
use syslog_importer::{database, init_logger};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "syslog-importer",
    about = "Import rotated syslog files into PostgreSQL"
)]
struct Args {
    /// Do not apply pending database migrations at startup.
    #[arg(long)]
    skip_migrations: bool,

    /// Directory to watch. Overrides `SYSLOG_DIRECTORY`.
    #[arg(long)]
    syslog_directory: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let args = Args::parse();

    let mut config = AppConfig::from_lookup(|key| std::env::var(key).ok())?;
    if let Some(directory) = args.syslog_directory {
        config.watcher.directory = directory;
    }
    config.validate()?;

    log::info!("starting syslog importer");

    let pool = database::connect(&config.database).await?;
    if args.skip_migrations {
        log::info!("skipping database migrations");
    } else {
        database::run_migrations(&pool).await?;
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    syslog_importer::run(config, pool.clone(), cancel).await?;

    pool.close().await;
    log::info!("syslog importer stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                log::error!("failed to listen for SIGTERM: {}", err);
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

    log::info!("shutdown requested");
    cancel.cancel();
}
