use chrono::TimeZone;
use rust_decimal::Decimal;

use tickvault::aggregator::BucketAggregator;
use tickvault::model::tick::Tick;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn tick(ms: u64, price: &str, qty: &str) -> Tick {
    Tick {
        symbol: "BTCUSDT".to_string(),
        price: dec(price),
        qty: dec(qty),
        event_time_ms: ms,
    }
}

fn ms_at(h: u32, m: u32, s: u32) -> u64 {
    chrono::Utc
        .with_ymd_and_hms(2024, 1, 2, h, m, s)
        .unwrap()
        .timestamp_millis() as u64
}

#[test]
fn in_window_ohlcv_matches_tick_stream() {
    let mut agg = BucketAggregator::new("BTCUSDT", 1_000);
    agg.process_tick(&tick(10_000, "101.5", "0.1"));
    agg.process_tick(&tick(10_250, "103.0", "0.2"));
    agg.process_tick(&tick(10_500, "99.25", "0.3"));
    agg.process_tick(&tick(10_900, "100.0", "0.4"));

    let candle = agg.process_tick(&tick(11_000, "100.5", "1")).unwrap();
    assert_eq!(candle.open, dec("101.5"));
    assert_eq!(candle.high, dec("103.0"));
    assert_eq!(candle.low, dec("99.25"));
    assert_eq!(candle.close, dec("100.0"));
    assert_eq!(candle.volume, dec("1.0"));
    assert_eq!(candle.trade_count, 4);
    // Invariants hold on the emitted candle.
    assert!(candle.low <= candle.open && candle.open <= candle.high);
    assert!(candle.low <= candle.close && candle.close <= candle.high);
}

#[test]
fn end_to_end_example_single_candle() {
    // Ticks at 08:00:00.100, 08:00:00.400, 08:00:01.050 produce exactly one
    // finalized candle for second 08:00:00, emitted on the third tick.
    let base = ms_at(8, 0, 0);
    let mut agg = BucketAggregator::new("BTCUSDT", 1_000);

    assert!(agg.process_tick(&tick(base + 100, "50000.00", "0.01")).is_none());
    assert!(agg.process_tick(&tick(base + 400, "50010.00", "0.02")).is_none());

    let candle = agg
        .process_tick(&tick(base + 1_050, "50005.00", "0.05"))
        .unwrap();
    assert_eq!(candle.datetime(), "2024-01-02 08:00:00");
    assert_eq!(candle.open, dec("50000.00"));
    assert_eq!(candle.high, dec("50010.00"));
    assert_eq!(candle.low, dec("50000.00"));
    assert_eq!(candle.close, dec("50010.00"));
    assert_eq!(candle.volume, dec("0.03"));
    assert_eq!(
        candle.csv_row(),
        "2024-01-02 08:00:00,50000.00,50010.00,50000.00,50010.00,0.03000000"
    );
}

#[test]
fn boundary_tick_belongs_to_new_bucket() {
    let mut agg = BucketAggregator::new("BTCUSDT", 1_000);
    agg.process_tick(&tick(1_999, "100", "1"));

    // Exactly on the boundary: rolls the old window over and seeds the new.
    let candle = agg.process_tick(&tick(2_000, "200", "2")).unwrap();
    assert_eq!(candle.open_time_ms, 1_000);
    assert_eq!(candle.close, dec("100"));
    assert_eq!(candle.volume, dec("1"));

    let next = agg.process_tick(&tick(3_000, "201", "1")).unwrap();
    assert_eq!(next.open_time_ms, 2_000);
    assert_eq!(next.open, dec("200"));
    assert_eq!(next.volume, dec("2"));
}

#[test]
fn late_tick_is_dropped_and_does_not_mutate_emitted_candle() {
    let mut agg = BucketAggregator::new("BTCUSDT", 1_000);
    agg.process_tick(&tick(1_100, "100", "1"));
    let emitted = agg.process_tick(&tick(2_100, "105", "1")).unwrap();
    assert_eq!(emitted.close, dec("100"));

    // Arrives after its window was finalized: dropped, counted, gone.
    assert!(agg.process_tick(&tick(1_800, "1", "100")).is_none());
    assert_eq!(agg.late_drops(), 1);

    let next = agg.process_tick(&tick(3_000, "106", "1")).unwrap();
    assert_eq!(next.open_time_ms, 2_000);
    assert_eq!(next.open, dec("105"));
    assert_eq!(next.low, dec("105"));
    assert_eq!(next.volume, dec("1"));
}

#[test]
fn aggregation_survives_reconnect_gap() {
    // t1 at second S, disconnect, reconnect, t2 at second S: one combined
    // candle for S. The aggregator state is untouched by connection churn,
    // so this is simply two ticks in the same window.
    let base = ms_at(9, 30, 15);
    let mut agg = BucketAggregator::new("BTCUSDT", 1_000);

    assert!(agg.process_tick(&tick(base + 50, "50000", "0.40")).is_none());
    assert!(agg.process_tick(&tick(base + 800, "50020", "0.10")).is_none());

    let candle = agg.process_tick(&tick(base + 1_100, "50010", "1")).unwrap();
    assert_eq!(candle.open, dec("50000"));
    assert_eq!(candle.close, dec("50020"));
    assert_eq!(candle.high, dec("50020"));
    assert_eq!(candle.low, dec("50000"));
    assert_eq!(candle.volume, dec("0.50"));
}

#[test]
fn idle_window_emits_nothing() {
    let mut agg = BucketAggregator::new("BTCUSDT", 1_000);

    // No bucket open: the flush timer has nothing to finalize, ever.
    assert!(agg.flush_idle(10_000).is_none());
    assert!(agg.flush_idle(20_000).is_none());

    // One trade, then silence: exactly one candle, no zero-volume fillers
    // for the empty windows that follow.
    agg.process_tick(&tick(30_500, "100", "1"));
    let candle = agg.flush_idle(31_000).unwrap();
    assert_eq!(candle.open_time_ms, 30_000);
    assert!(agg.flush_idle(35_000).is_none());
}

#[test]
fn flush_respects_open_window_age() {
    let mut agg = BucketAggregator::new("BTCUSDT", 1_000);
    agg.process_tick(&tick(5_200, "100", "1"));

    // Window 5s has not fully elapsed yet.
    assert!(agg.flush_idle(5_900).is_none());
    assert!(agg.has_open_bucket());

    let candle = agg.flush_idle(6_000).unwrap();
    assert_eq!(candle.open_time_ms, 5_000);
    assert_eq!(candle.trade_count, 1);
}

#[test]
fn volume_accumulates_exactly_in_decimal() {
    // 0.1 + 0.2 is exact in Decimal; a float fold would drift.
    let mut agg = BucketAggregator::new("BTCUSDT", 1_000);
    agg.process_tick(&tick(0, "100", "0.1"));
    agg.process_tick(&tick(10, "100", "0.2"));
    agg.process_tick(&tick(20, "100", "0.00000001"));

    let candle = agg.process_tick(&tick(1_000, "100", "1")).unwrap();
    assert_eq!(candle.volume, dec("0.30000001"));
    assert_eq!(format!("{:.8}", candle.volume), "0.30000001");
}
