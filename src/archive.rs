use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::model::candle::Candle;

pub const CSV_HEADER: &str = "datetime,open,high,low,close,volume";

/// Append-only CSV archive, one `{symbol}_1s_ohlcv.csv` file per symbol.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    dir: PathBuf,
}

impl ArchiveWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Archive file path for a symbol.
    pub fn file_path(&self, symbol: &str) -> PathBuf {
        self.dir
            .join(format!("{}_1s_ohlcv.csv", symbol.to_lowercase()))
    }

    /// Append one candle row, writing the header first when the file is new.
    pub fn append(&self, candle: &Candle) -> Result<()> {
        let path = self.file_path(&candle.symbol);
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if is_new {
            writeln!(file, "{}", CSV_HEADER)?;
        }
        writeln!(file, "{}", candle.csv_row())?;
        Ok(())
    }
}
