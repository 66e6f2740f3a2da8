use crate::model::candle::{Bucket, Candle};
use crate::model::tick::Tick;

/// Folds a per-symbol tick stream into finalized candles, one per window.
///
/// Each aggregator is owned exclusively by its symbol's task, so there is no
/// interior locking. Rollover happens when a tick lands past the open window
/// or when [`BucketAggregator::flush_idle`] finds the window fully elapsed.
#[derive(Debug)]
pub struct BucketAggregator {
    symbol: String,
    interval_ms: u64,
    bucket: Option<Bucket>,
    late_drops: u64,
}

impl BucketAggregator {
    pub fn new(symbol: impl Into<String>, interval_ms: u64) -> Self {
        assert!(interval_ms > 0, "interval_ms must be > 0");
        Self {
            symbol: symbol.into(),
            interval_ms,
            bucket: None,
            late_drops: 0,
        }
    }

    /// Fold one tick. Returns the finalized candle when the tick's window is
    /// strictly newer than the open one.
    ///
    /// A tick older than the open window arrives after its candle was already
    /// emitted; it is dropped and counted, never merged back. A tick exactly
    /// on a window boundary belongs to the new window.
    pub fn process_tick(&mut self, tick: &Tick) -> Option<Candle> {
        let bucket_start = tick.event_time_ms - tick.event_time_ms % self.interval_ms;

        let Some(bucket) = self.bucket.as_mut() else {
            self.bucket = Some(Bucket::open(
                tick.price,
                tick.qty,
                tick.event_time_ms,
                self.interval_ms,
            ));
            return None;
        };

        if bucket_start == bucket.open_time_ms {
            bucket.apply(tick.price, tick.qty);
            return None;
        }

        if bucket_start < bucket.open_time_ms {
            self.late_drops += 1;
            tracing::debug!(
                symbol = %self.symbol,
                tick_window_ms = bucket_start,
                open_window_ms = bucket.open_time_ms,
                "dropping late tick for already-finalized window"
            );
            return None;
        }

        let finished = bucket.finish(&self.symbol);
        self.bucket = Some(Bucket::open(
            tick.price,
            tick.qty,
            tick.event_time_ms,
            self.interval_ms,
        ));
        Some(finished)
    }

    /// Timer-driven finalization for quiet feeds: closes the open window once
    /// it has fully elapsed even though no newer tick arrived to roll it over.
    ///
    /// A window that received no ticks at all produces nothing — absence of
    /// trades is absence of a candle, never a zero-volume candle.
    pub fn flush_idle(&mut self, now_ms: u64) -> Option<Candle> {
        match &self.bucket {
            Some(bucket) if now_ms >= bucket.open_time_ms + self.interval_ms => {
                self.bucket.take().map(|b| b.finish(&self.symbol))
            }
            _ => None,
        }
    }

    /// Ticks dropped because they arrived after their window was finalized.
    pub fn late_drops(&self) -> u64 {
        self.late_drops
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn has_open_bucket(&self) -> bool {
        self.bucket.is_some()
    }
}
