use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

/// An immutable finalized OHLCV record for one symbol and one time window.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub open_time_ms: u64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
}

impl Candle {
    /// Window start rendered as `YYYY-MM-DD HH:MM:SS` in UTC.
    pub fn datetime(&self) -> String {
        format_datetime_ms(self.open_time_ms)
    }

    /// Archive row: prices at 2 decimals, volume at 8.
    pub fn csv_row(&self) -> String {
        format!(
            "{},{:.2},{:.2},{:.2},{:.2},{:.8}",
            self.datetime(),
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume
        )
    }
}

/// Render an epoch-millisecond timestamp as `YYYY-MM-DD HH:MM:SS` UTC.
pub fn format_datetime_ms(timestamp_ms: u64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms as i64)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

/// Mutable aggregation state for one symbol over a single time window.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub open_time_ms: u64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
}

impl Bucket {
    /// Open a new window seeded with its first trade. The window is aligned
    /// to the interval.
    pub fn open(price: Decimal, qty: Decimal, timestamp_ms: u64, interval_ms: u64) -> Self {
        assert!(interval_ms > 0, "interval_ms must be > 0");
        let open_time_ms = timestamp_ms - timestamp_ms % interval_ms;
        Self {
            open_time_ms,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: qty,
            trade_count: 1,
        }
    }

    /// Fold one more trade into the window.
    pub fn apply(&mut self, price: Decimal, qty: Decimal) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += qty;
        self.trade_count += 1;
    }

    /// Check if a timestamp belongs to this window.
    pub fn contains(&self, timestamp_ms: u64, interval_ms: u64) -> bool {
        timestamp_ms >= self.open_time_ms && timestamp_ms < self.open_time_ms + interval_ms
    }

    /// Finalize into an immutable Candle.
    pub fn finish(&self, symbol: &str) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            open_time_ms: self.open_time_ms,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            trade_count: self.trade_count,
        }
    }
}
