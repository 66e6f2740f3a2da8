use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    pub storage: StorageConfig,
    pub archive: ArchiveConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub ws_base_url: String,
    pub symbols: Vec<String>,
    pub bucket_interval: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    pub db_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    pub retention_days: u32,
    #[serde(default = "default_upload_interval_secs")]
    pub upload_interval_secs: u64,
    #[serde(skip)]
    pub access_key: String,
    #[serde(skip)]
    pub secret_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_upload_interval_secs() -> u64 {
    3600
}

/// Parse a bucket interval string (e.g. "1s", "1m", "1h", "1d") into
/// milliseconds.
pub fn parse_interval_ms(s: &str) -> Result<u64> {
    if s.len() < 2 {
        bail!("invalid interval '{}': expected format like '1s'", s);
    }

    let (num_str, suffix) = s.split_at(s.len() - 1);
    let n: u64 = num_str.parse().with_context(|| {
        format!(
            "invalid interval '{}': quantity must be a positive integer",
            s
        )
    })?;
    if n == 0 {
        bail!("invalid interval '{}': quantity must be > 0", s);
    }

    let unit_ms = match suffix {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => bail!(
            "invalid interval '{}': unsupported suffix '{}', expected one of s/m/h/d",
            s,
            suffix
        ),
    };

    n.checked_mul(unit_ms)
        .with_context(|| format!("invalid interval '{}': value is too large", s))
}

impl FeedConfig {
    pub fn bucket_interval_ms(&self) -> Result<u64> {
        parse_interval_ms(&self.bucket_interval)
    }

    /// Configured symbols, trimmed, uppercased, and deduplicated in order.
    pub fn subscribed_symbols(&self) -> Vec<String> {
        let mut out = Vec::new();
        for sym in &self.symbols {
            let s = sym.trim().to_ascii_uppercase();
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.db_file)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config/default.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        if config.archive.enabled {
            config.archive.access_key = std::env::var("ARCHIVE_ACCESS_KEY")
                .context("ARCHIVE_ACCESS_KEY not set in .env or environment")?;
            config.archive.secret_key = std::env::var("ARCHIVE_SECRET_KEY")
                .context("ARCHIVE_SECRET_KEY not set in .env or environment")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Startup validation: every failure here is fatal before any connection
    /// is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.feed.subscribed_symbols().is_empty() {
            bail!("feed.symbols must list at least one symbol");
        }
        self.feed
            .bucket_interval_ms()
            .context("feed.bucket_interval is invalid")?;
        if self.storage.data_dir.trim().is_empty() {
            bail!("storage.data_dir must be set");
        }
        if self.storage.db_file.trim().is_empty() {
            bail!("storage.db_file must be set");
        }
        if self.archive.enabled {
            if self.archive.endpoint.trim().is_empty() {
                bail!("archive.endpoint must be set when archive.enabled = true");
            }
            if self.archive.region.trim().is_empty() {
                bail!("archive.region must be set when archive.enabled = true");
            }
            if self.archive.bucket.trim().is_empty() {
                bail!("archive.bucket must be set when archive.enabled = true");
            }
            if self.archive.retention_days == 0 {
                bail!("archive.retention_days must be > 0");
            }
        }
        Ok(())
    }
}
