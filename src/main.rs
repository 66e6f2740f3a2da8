use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;

use tickvault::archive::ArchiveWriter;
use tickvault::candle_store::CandleStore;
use tickvault::config::Config;
use tickvault::supervisor::FeedSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required by rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!(
                "Make sure config/default.toml exists; when archive.enabled = true, \
                 set ARCHIVE_ACCESS_KEY and ARCHIVE_SECRET_KEY in .env or the environment"
            );
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                config
                    .logging
                    .level
                    .parse()
                    .unwrap_or_else(|_| "info".parse().unwrap())
            }),
        )
        .init();

    tracing::info!(
        symbols = ?config.feed.subscribed_symbols(),
        ws_url = %config.feed.ws_base_url,
        data_dir = %config.storage.data_dir,
        bucket_interval = %config.feed.bucket_interval,
        "Starting tickvault"
    );

    let store = CandleStore::open(config.storage.db_path())?;
    let archive = ArchiveWriter::new(&config.storage.data_dir)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = FeedSupervisor::new(config, store, archive);
    let mut supervisor_task = tokio::spawn(supervisor.run(shutdown_rx));

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, draining finalized candles");
            let _ = shutdown_tx.send(true);
            report(supervisor_task.await);
        }
        result = &mut supervisor_task => {
            // The supervisor only returns on its own if something went wrong
            // during startup wiring.
            report(result);
        }
    }
    Ok(())
}

fn report(result: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => tracing::info!("Shutdown complete"),
        Ok(Err(e)) => tracing::error!(error = %e, "supervisor exited with error"),
        Err(e) => tracing::error!(error = %e, "supervisor task failed"),
    }
}
