use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{Extraction, MediaExtractor, MediaInfo};

/// Extractor backed by the `yt-dlp` executable.
pub struct YtDlpExtractor {
    binary: String,
    playlist_limit: usize,
    // Limit concurrent yt-dlp processes to avoid rate limiting
    rate_limiter: Semaphore,
}

/// JSON document printed by `yt-dlp --dump-single-json`.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    entries: Option<Vec<Option<YtDlpInfo>>>,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>, playlist_limit: usize) -> Self {
        Self {
            binary: binary.into(),
            playlist_limit,
            rate_limiter: Semaphore::new(3),
        }
    }

    fn args(&self, query: &str) -> Vec<String> {
        vec![
            "--dump-single-json".to_string(),
            "--no-warnings".to_string(),
            "--quiet".to_string(),
            "--format".to_string(),
            "bestaudio/best".to_string(),
            "--default-search".to_string(),
            "auto".to_string(),
            "--ignore-errors".to_string(),
            "--no-check-certificate".to_string(),
            "--force-ipv4".to_string(),
            "--playlist-end".to_string(),
            self.playlist_limit.to_string(),
            "--".to_string(),
            query.to_string(),
        ]
    }

    /// Checks that the executable can be launched.
    pub async fn verify(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("{} is not installed or not in PATH", self.binary))?;

        if !output.status.success() {
            anyhow::bail!("{} --version exited with {}", self.binary, output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(&self, query: &str) -> Result<Option<Extraction>> {
        let _permit = self.rate_limiter.acquire().await?;

        debug!("📊 Running {} for: {}", self.binary, query);

        let output = Command::new(&self.binary)
            .args(self.args(query))
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary))?;

        let stdout = String::from_utf8_lossy(&output.stdout);

        // --ignore-errors exits non-zero when any playlist entry failed, but
        // the document for the rest is still printed
        if !output.status.success() {
            if stdout.trim().is_empty() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let reason = stderr
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or("yt-dlp exited without output");
                anyhow::bail!("{}", reason.trim());
            }
            warn!("⚠️ yt-dlp reported errors for {}, using partial output", query);
        }

        let extraction = parse_output(&stdout)?;
        if extraction.is_some() {
            info!("📥 Extraction finished for: {}", query);
        }
        Ok(extraction)
    }
}

/// Parses the single JSON document yt-dlp prints.
///
/// Empty output and a literal `null` both mean "no data".
pub fn parse_output(stdout: &str) -> Result<Option<Extraction>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let info: Option<YtDlpInfo> =
        serde_json::from_str(trimmed).context("Failed to parse yt-dlp output")?;

    Ok(info.map(|info| match info.entries {
        Some(entries) => Extraction::Collection(
            entries
                .into_iter()
                .map(|entry| entry.and_then(into_media))
                .collect(),
        ),
        None => Extraction::Single(into_media_unchecked(info)),
    }))
}

/// Playlist entries that are themselves collections are not playable.
fn into_media(info: YtDlpInfo) -> Option<MediaInfo> {
    if info.entries.is_some() {
        return None;
    }
    Some(into_media_unchecked(info))
}

fn into_media_unchecked(info: YtDlpInfo) -> MediaInfo {
    MediaInfo {
        title: info.title,
        stream_url: info.url,
        page_url: info.webpage_url,
        duration: info
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| Duration::from_secs(d.round() as u64)),
        thumbnail: info.thumbnail,
    }
}
