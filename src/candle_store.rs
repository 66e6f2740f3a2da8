use std::path::PathBuf;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;

use crate::model::candle::Candle;

/// Durable candle store backed by SQLite, keyed by `(datetime, symbol)`.
///
/// Upserts are idempotent: replaying a finalized candle overwrites the row
/// with identical values. Prices and volume are stored as TEXT at output
/// precision so they round-trip exactly through `Decimal`.
#[derive(Debug, Clone)]
pub struct CandleStore {
    db_path: PathBuf,
}

impl CandleStore {
    /// Open the store, creating the database file and schema if absent.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            db_path: db_path.into(),
        };
        if let Some(dir) = store.db_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
        }
        let conn = store.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS price_data (
                datetime TEXT NOT NULL,
                symbol TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                trade_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (datetime, symbol)
            );

            CREATE INDEX IF NOT EXISTS idx_symbol_datetime ON price_data(symbol, datetime);
            "#,
        )
        .context("failed to create price_data schema")?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .with_context(|| format!("failed to open {}", self.db_path.display()))
    }

    /// Insert or overwrite the row for `(datetime, symbol)`.
    pub fn upsert(&self, candle: &Candle) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO price_data (
                datetime, symbol, open, high, low, close, volume, trade_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(datetime, symbol) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                trade_count = excluded.trade_count
            "#,
            params![
                candle.datetime(),
                candle.symbol,
                format!("{:.2}", candle.open),
                format!("{:.2}", candle.high),
                format!("{:.2}", candle.low),
                format!("{:.2}", candle.close),
                format!("{:.8}", candle.volume),
                candle.trade_count as i64,
            ],
        )?;
        Ok(())
    }

    /// Candles for one symbol between two `YYYY-MM-DD HH:MM:SS` bounds
    /// (inclusive), ordered by datetime.
    pub fn select_range(&self, symbol: &str, start: &str, end: &str) -> Result<Vec<Candle>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT datetime, open, high, low, close, volume, trade_count
            FROM price_data
            WHERE symbol = ?1 AND datetime BETWEEN ?2 AND ?3
            ORDER BY datetime ASC
            "#,
        )?;

        let rows = stmt.query_map(params![symbol, start, end], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut candles = Vec::new();
        for row in rows {
            let (datetime, open, high, low, close, volume, trade_count) = row?;
            candles.push(stored_candle(
                symbol,
                &datetime,
                &open,
                &high,
                &low,
                &close,
                &volume,
                trade_count,
            )?);
        }
        Ok(candles)
    }

    /// Export a datetime range to CSV in the archive row format.
    pub fn export_csv(
        &self,
        symbol: &str,
        start: &str,
        end: &str,
        output: &std::path::Path,
    ) -> Result<usize> {
        use std::io::Write;

        let candles = self.select_range(symbol, start, end)?;
        let mut file = std::fs::File::create(output)
            .with_context(|| format!("failed to create {}", output.display()))?;
        writeln!(file, "{}", crate::archive::CSV_HEADER)?;
        for candle in &candles {
            writeln!(file, "{}", candle.csv_row())?;
        }
        Ok(candles.len())
    }
}

#[allow(clippy::too_many_arguments)]
fn stored_candle(
    symbol: &str,
    datetime: &str,
    open: &str,
    high: &str,
    low: &str,
    close: &str,
    volume: &str,
    trade_count: i64,
) -> Result<Candle> {
    let open_time_ms = chrono::NaiveDateTime::parse_from_str(datetime, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("invalid datetime in store: {}", datetime))?
        .and_utc()
        .timestamp_millis() as u64;

    Ok(Candle {
        symbol: symbol.to_string(),
        open_time_ms,
        open: parse_stored_decimal(open, "open")?,
        high: parse_stored_decimal(high, "high")?,
        low: parse_stored_decimal(low, "low")?,
        close: parse_stored_decimal(close, "close")?,
        volume: parse_stored_decimal(volume, "volume")?,
        trade_count: trade_count.max(0) as u64,
    })
}

fn parse_stored_decimal(value: &str, column: &str) -> Result<Decimal> {
    value
        .parse::<Decimal>()
        .with_context(|| format!("invalid {} in store: {}", column, value))
}
