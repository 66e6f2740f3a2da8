use rust_decimal::Decimal;

/// A single trade event from the feed.
///
/// Price and quantity stay in `Decimal` for the whole aggregation path so
/// long-running volume accumulation never drifts.
#[derive(Debug, Clone)]
pub struct Tick {
    pub symbol: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub event_time_ms: u64,
}
