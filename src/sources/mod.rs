pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::UserId;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::error::{MusicError, MusicResult};

pub use youtube::YtDlpExtractor;

/// Metadata for one playable item as reported by the extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub stream_url: Option<String>,
    pub page_url: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
}

/// What an extraction produced: a single item or a collection (playlist,
/// search results). Collection entries the extractor could not load are `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Single(MediaInfo),
    Collection(Vec<Option<MediaInfo>>),
}

/// Extraction collaborator (yt-dlp in production).
///
/// `Ok(None)` means the extractor ran but produced no data.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(&self, query: &str) -> Result<Option<Extraction>>;
}

/// Represents a resolved, playable track.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    title: String,
    locator: String,
    page_url: Option<String>,
    duration: Option<Duration>,
    thumbnail: Option<String>,
    requested_by: UserId,
}

impl Track {
    pub fn new(title: impl Into<String>, locator: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            title: title.into(),
            locator: locator.into(),
            page_url: None,
            duration: None,
            thumbnail: None,
            requested_by,
        }
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn locator(&self) -> &str {
        &self.locator
    }
    pub fn page_url(&self) -> Option<&str> {
        self.page_url.as_deref()
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }

    // Builders
    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    fn from_media(info: MediaInfo, requested_by: UserId) -> Option<Self> {
        let locator = info.stream_url?;
        let title = info
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Unknown title".to_string());

        let mut track = Track::new(title, locator, requested_by);
        if let Some(page_url) = info.page_url {
            track = track.with_page_url(page_url);
        }
        if let Some(duration) = info.duration {
            track = track.with_duration(duration);
        }
        if let Some(thumbnail) = info.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }
        Some(track)
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub tracks: Vec<Track>,
    /// Playlist entries the extractor reported as unavailable.
    pub dropped: usize,
}

/// Turns user queries into playable tracks.
pub struct TrackResolver {
    extractor: Arc<dyn MediaExtractor>,
    timeout: Duration,
}

impl TrackResolver {
    pub fn new(extractor: Arc<dyn MediaExtractor>, timeout: Duration) -> Self {
        Self { extractor, timeout }
    }

    /// Resolves a URL or free-text search into one or more tracks.
    ///
    /// Free text is searched and only the first hit is kept. Playlists yield
    /// one track per available entry; unavailable entries are counted in
    /// [`Resolution::dropped`] instead of failing the whole request.
    pub async fn resolve(&self, query: &str, requested_by: UserId) -> MusicResult<Resolution> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MusicError::validation("Please provide a URL or search term!"));
        }

        let target = extraction_target(query);
        info!("🔍 Resolving: {}", target);

        let extraction = match tokio::time::timeout(self.timeout, self.extractor.extract(&target)).await {
            Ok(Ok(Some(extraction))) => extraction,
            Ok(Ok(None)) => {
                return Err(MusicError::Resolution("could not extract video data".to_string()))
            }
            Ok(Err(e)) => {
                warn!("❌ Extraction failed for {}: {:#}", target, e);
                return Err(MusicError::Resolution(format!("{:#}", e)));
            }
            Err(_) => {
                warn!("⏰ Extraction timed out after {:?} for {}", self.timeout, target);
                return Err(MusicError::Resolution(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        let resolution = match extraction {
            Extraction::Single(info) => {
                let track = Track::from_media(info, requested_by).ok_or_else(|| {
                    MusicError::Resolution("no playable audio stream found".to_string())
                })?;
                Resolution {
                    tracks: vec![track],
                    dropped: 0,
                }
            }
            Extraction::Collection(entries) => {
                let total = entries.len();
                let tracks: Vec<Track> = entries
                    .into_iter()
                    .flatten()
                    .filter_map(|info| Track::from_media(info, requested_by))
                    .collect();
                let dropped = total - tracks.len();
                if dropped > 0 {
                    debug!("Dropped {} unavailable entries out of {}", dropped, total);
                }
                Resolution { tracks, dropped }
            }
        };

        if resolution.tracks.is_empty() {
            return Err(MusicError::Resolution(
                "could not find any videos, please try another search".to_string(),
            ));
        }

        // Search results only contribute their best match
        let resolution = if is_url(query) {
            resolution
        } else {
            Resolution {
                tracks: resolution.tracks.into_iter().take(1).collect(),
                dropped: resolution.dropped,
            }
        };

        info!(
            "✅ Resolved {} track(s) ({} dropped)",
            resolution.tracks.len(),
            resolution.dropped
        );
        Ok(resolution)
    }
}

/// True for well-formed absolute http(s) URLs.
pub fn is_url(query: &str) -> bool {
    url::Url::parse(query)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// URLs go to the extractor untouched; anything else becomes a search.
pub fn extraction_target(query: &str) -> String {
    if is_url(query) {
        query.to_string()
    } else {
        format!("ytsearch:{}", query)
    }
}
