use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::ArchiveConfig;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Uploads archived CSV files to S3-compatible object storage and prunes
/// local files past the retention window.
///
/// Requests are signed with AWS Signature V4 (HMAC-SHA256 over a canonical
/// request). Every failure in this path is logged and swallowed — the sweep
/// must never take ingestion down.
pub struct DataUploader {
    http: reqwest::Client,
    endpoint: String,
    host: String,
    region: String,
    bucket: String,
    access_key: String,
    secret_key: String,
    retention_days: u32,
}

impl DataUploader {
    pub fn from_config(cfg: &ArchiveConfig) -> Result<Self> {
        let endpoint = cfg.endpoint.trim_end_matches('/').to_string();
        let host = endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"))
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::Config(format!("archive.endpoint is not a valid URL: {}", cfg.endpoint))
            })?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            host,
            region: cfg.region.clone(),
            bucket: cfg.bucket.clone(),
            access_key: cfg.access_key.clone(),
            secret_key: cfg.secret_key.clone(),
            retention_days: cfg.retention_days,
        })
    }

    /// One sweep: upload every CSV file in `data_dir`, then remove local
    /// files older than the retention window.
    pub async fn upload_and_cleanup(&self, data_dir: &Path) {
        match self.upload_dir(data_dir).await {
            Ok(count) => tracing::info!(count, bucket = %self.bucket, "archive upload sweep finished"),
            Err(e) => tracing::error!(error = %e, "archive upload sweep failed"),
        }
        if let Err(e) = self.cleanup_old_files(data_dir) {
            tracing::error!(error = %e, "archive cleanup failed");
        }
    }

    async fn upload_dir(&self, data_dir: &Path) -> Result<usize> {
        let date_prefix = Utc::now().format("%Y/%m/%d").to_string();
        let mut uploaded = 0;
        let entries = std::fs::read_dir(data_dir)
            .with_context(|| format!("failed to read {}", data_dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let key = format!("{}/{}", date_prefix, name);
            match self.put_object(&key, &path).await {
                Ok(()) => {
                    uploaded += 1;
                    tracing::info!(file = %name, key = %key, "uploaded archive file");
                }
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "archive upload failed");
                }
            }
        }
        Ok(uploaded)
    }

    async fn put_object(&self, key: &str, path: &Path) -> Result<()> {
        let body = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let uri = format!("/{}/{}", self.bucket, key);
        let payload_hash = hex::encode(Sha256::digest(&body));

        // Canonical headers must be lowercase and sorted by name.
        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            self.host, payload_hash, amz_date
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";
        let canonical_request = format!(
            "PUT\n{}\n\n{}\n{}\n{}",
            uri, canonical_headers, signed_headers, payload_hash
        );
        let scope = format!("{}/{}/s3/aws4_request", date, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let signature = hex::encode(sign(
            &self.secret_key,
            &date,
            &self.region,
            &string_to_sign,
        ));
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, scope, signed_headers, signature
        );

        let url = format!("{}{}", self.endpoint, uri);
        let resp = self
            .http
            .put(&url)
            .header("authorization", authorization)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .body(body)
            .send()
            .await
            .context("object store PUT failed")?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::ObjectStore { status, body }.into());
        }
        Ok(())
    }

    fn cleanup_old_files(&self, data_dir: &Path) -> Result<()> {
        let cutoff =
            SystemTime::now() - Duration::from_secs(u64::from(self.retention_days) * 86_400);
        let entries = std::fs::read_dir(data_dir)
            .with_context(|| format!("failed to read {}", data_dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if modified < cutoff {
                std::fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                tracing::info!(file = %path.display(), "removed expired archive file");
            }
        }
        Ok(())
    }
}

/// Signature V4 key derivation chain over the secret, date, region, and
/// service, finishing with the string to sign.
fn sign(secret: &str, date: &str, region: &str, string_to_sign: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    hmac_sha256(&k_signing, string_to_sign.as_bytes())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key error");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
