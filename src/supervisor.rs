use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::aggregator::BucketAggregator;
use crate::archive::ArchiveWriter;
use crate::binance::ws::BinanceWsClient;
use crate::candle_store::CandleStore;
use crate::config::Config;
use crate::model::candle::Candle;
use crate::model::tick::Tick;
use crate::uploader::DataUploader;

const TICK_CHANNEL_CAPACITY: usize = 256;
const CANDLE_CHANNEL_CAPACITY: usize = 256;

/// Owns one tick source + bucket aggregator pair per configured symbol and
/// routes finalized candles to the sinks.
///
/// Every symbol's connection and aggregation state is independent; a failure
/// in one never touches another. All durable writes happen on a single sink
/// loop, so writes for any `(datetime, symbol)` key are serialized by
/// construction.
pub struct FeedSupervisor {
    config: Config,
    store: CandleStore,
    archive: ArchiveWriter,
}

impl FeedSupervisor {
    pub fn new(config: Config, store: CandleStore, archive: ArchiveWriter) -> Self {
        Self {
            config,
            store,
            archive,
        }
    }

    /// Run until `shutdown` flips. On shutdown the symbol tasks stop and drop
    /// their candle senders; the sink loop drains what was already finalized
    /// before returning, so no finalized candle is lost. A still-open bucket
    /// is dropped: at most one bucket per symbol per shutdown.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let interval_ms = self.config.feed.bucket_interval_ms()?;
        let (candle_tx, candle_rx) = mpsc::channel::<Candle>(CANDLE_CHANNEL_CAPACITY);

        let mut symbol_tasks = Vec::new();
        for symbol in self.config.feed.subscribed_symbols() {
            let (tick_tx, tick_rx) = mpsc::channel::<Tick>(TICK_CHANNEL_CAPACITY);
            let malformed = Arc::new(AtomicU64::new(0));

            let client = BinanceWsClient::new(&self.config.feed.ws_base_url, &symbol);
            let source_symbol = symbol.clone();
            let source_malformed = malformed.clone();
            let source_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = client
                    .connect_and_run(tick_tx, source_malformed, source_shutdown)
                    .await
                {
                    tracing::error!(symbol = %source_symbol, error = %e, "feed task exited with error");
                }
            });

            symbol_tasks.push(tokio::spawn(run_symbol(
                symbol,
                interval_ms,
                tick_rx,
                candle_tx.clone(),
                malformed,
                shutdown_rx.clone(),
            )));
        }
        // The sink loop ends when every symbol task has dropped its sender.
        drop(candle_tx);

        if self.config.archive.enabled {
            let uploader = DataUploader::from_config(&self.config.archive)?;
            let data_dir = self.config.storage.data_dir.clone();
            let sweep_interval = Duration::from_secs(self.config.archive.upload_interval_secs);
            let mut sweep_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut sweep = tokio::time::interval(sweep_interval);
                sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately; skip it so the sweep
                // runs on the cadence, not at startup.
                sweep.tick().await;
                loop {
                    tokio::select! {
                        _ = sweep.tick() => {
                            uploader.upload_and_cleanup(Path::new(&data_dir)).await;
                        }
                        _ = sweep_shutdown.changed() => break,
                    }
                }
            });
        }

        self.sink_loop(candle_rx).await;

        for task in symbol_tasks {
            let _ = task.await;
        }
        Ok(())
    }

    /// Single owner of all durable writes. Sink failures are logged and the
    /// candle is not re-buffered: persistence is best effort, and the SQLite
    /// and CSV sinks fail independently of each other.
    async fn sink_loop(&self, mut candle_rx: mpsc::Receiver<Candle>) {
        while let Some(candle) = candle_rx.recv().await {
            tracing::info!(
                symbol = %candle.symbol,
                datetime = %candle.datetime(),
                open = %candle.open,
                close = %candle.close,
                volume = %candle.volume,
                trades = candle.trade_count,
                "candle finalized"
            );
            if let Err(e) = self.store.upsert(&candle) {
                tracing::error!(symbol = %candle.symbol, error = %e, "candle upsert failed");
            }
            if let Err(e) = self.archive.append(&candle) {
                tracing::error!(symbol = %candle.symbol, error = %e, "archive append failed");
            }
        }
    }
}

/// Per-symbol receive-and-aggregate loop.
///
/// A single task owns the bucket and multiplexes tick arrival against the
/// flush cadence, so no lock guards the aggregation state. The bucket lives
/// here, not in the source task — a feed reconnect does not reset it, which
/// is what lets a window interrupted mid-way by a disconnect finalize
/// correctly once trading resumes.
async fn run_symbol(
    symbol: String,
    interval_ms: u64,
    mut tick_rx: mpsc::Receiver<Tick>,
    candle_tx: mpsc::Sender<Candle>,
    malformed: Arc<AtomicU64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut aggregator = BucketAggregator::new(symbol.clone(), interval_ms);
    // The flush cadence starts one full interval in; an immediate first tick
    // would have nothing to finalize.
    let period = Duration::from_millis(interval_ms);
    let mut flush = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_tick = tick_rx.recv() => {
                match maybe_tick {
                    Some(tick) => {
                        if let Some(candle) = aggregator.process_tick(&tick) {
                            if candle_tx.send(candle).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
            _ = flush.tick() => {
                let now_ms = chrono::Utc::now().timestamp_millis() as u64;
                if let Some(candle) = aggregator.flush_idle(now_ms) {
                    if candle_tx.send(candle).await.is_err() {
                        break;
                    }
                }
                let late = aggregator.late_drops();
                let bad = malformed.load(Ordering::Relaxed);
                if late > 0 || bad > 0 {
                    tracing::debug!(
                        symbol = %symbol,
                        late_drops = late,
                        malformed = bad,
                        "dropped tick counters"
                    );
                }
            }
            _ = shutdown.changed() => {
                tracing::info!(symbol = %symbol, "aggregator task stopping");
                break;
            }
        }
    }
    // Dropping candle_tx here lets the sink drain and exit. The still-open
    // bucket (if any) is lost with the task.
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn tick(ms: u64, price: &str, qty: &str) -> Tick {
        Tick {
            symbol: "BTCUSDT".to_string(),
            price: price.parse::<Decimal>().unwrap(),
            qty: qty.parse::<Decimal>().unwrap(),
            event_time_ms: ms,
        }
    }

    #[tokio::test]
    async fn symbol_task_emits_on_rollover_and_stops_on_shutdown() {
        let (tick_tx, tick_rx) = mpsc::channel(16);
        let (candle_tx, mut candle_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let malformed = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run_symbol(
            "BTCUSDT".to_string(),
            1_000,
            tick_rx,
            candle_tx,
            malformed,
            shutdown_rx,
        ));

        tick_tx.send(tick(1_000, "100", "1")).await.unwrap();
        tick_tx.send(tick(2_000, "101", "2")).await.unwrap();

        let candle = candle_rx.recv().await.unwrap();
        assert_eq!(candle.open_time_ms, 1_000);
        assert_eq!(candle.close, "100".parse::<Decimal>().unwrap());
        assert_eq!(candle.volume, "1".parse::<Decimal>().unwrap());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        // Channel closes once the task drops its sender.
        while candle_rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn aggregation_continues_across_reconnect_gap() {
        // A reconnect gives the source a fresh connection but the same
        // sender; the bucket must keep accumulating across the gap.
        let (tick_tx, tick_rx) = mpsc::channel(16);
        let (candle_tx, mut candle_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let malformed = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run_symbol(
            "BTCUSDT".to_string(),
            1_000,
            tick_rx,
            candle_tx,
            malformed,
            shutdown_rx,
        ));

        tick_tx.send(tick(5_100, "100", "0.5")).await.unwrap();
        // Simulated disconnect/reconnect gap, then more trades in the same
        // window.
        tick_tx.send(tick(5_900, "102", "0.5")).await.unwrap();
        tick_tx.send(tick(6_050, "101", "1")).await.unwrap();

        let candle = candle_rx.recv().await.unwrap();
        assert_eq!(candle.open_time_ms, 5_000);
        assert_eq!(candle.open, "100".parse::<Decimal>().unwrap());
        assert_eq!(candle.close, "102".parse::<Decimal>().unwrap());
        assert_eq!(candle.volume, "1.0".parse::<Decimal>().unwrap());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        while candle_rx.recv().await.is_some() {}
    }
}
