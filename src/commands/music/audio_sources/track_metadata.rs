//! Defines the `Track` struct, the resolved and immutable description of a playable
//! track, and the conversion from `yt-dlp` JSON output.

use crate::commands::music::utils::music_manager::{MusicError, MusicResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::process::Output;
use std::time::Duration;

/// A resolved, playable track. The queue stores and orders these but never looks inside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    /// Provider-specific identifier (the YouTube video id).
    pub id: String,
    /// The title of the track.
    pub title: String,
    /// Canonical URL the transport streams from.
    pub url: String,
    /// Name of the uploader or channel.
    pub author: Option<String>,
    /// Link to the uploader or channel page.
    pub author_url: Option<String>,
    /// Length in whole seconds, 0 when unknown (live streams).
    pub duration_secs: u64,
    /// URL to a thumbnail image for the track, if available.
    pub thumbnail: Option<String>,
    /// Date the track was published.
    pub published: Option<NaiveDate>,
    /// View count at resolution time.
    pub views: Option<u64>,
}

impl Track {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Parses a single JSON document as printed by `yt-dlp -j`.
    pub fn from_ytdlp_json(json: &str) -> MusicResult<Self> {
        let video: YtDlpVideo = serde_json::from_str(json).map_err(|e| {
            MusicError::AudioSourceError(format!("Failed to parse video metadata: {}", e))
        })?;

        Ok(video.into())
    }
}

/// The subset of `yt-dlp --dump-json` fields we care about.
#[derive(Debug, Deserialize)]
struct YtDlpVideo {
    id: String,
    title: Option<String>,
    webpage_url: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    uploader_url: Option<String>,
    channel_url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    upload_date: Option<String>,
    view_count: Option<u64>,
}

impl From<YtDlpVideo> for Track {
    fn from(video: YtDlpVideo) -> Self {
        let url = video
            .webpage_url
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", video.id));

        // yt-dlp reports upload dates as YYYYMMDD
        let published = video
            .upload_date
            .as_deref()
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y%m%d").ok());

        Track {
            id: video.id,
            title: video.title.unwrap_or_else(|| "Unknown Title".to_string()),
            url,
            author: video.uploader.or(video.channel),
            author_url: video.uploader_url.or(video.channel_url),
            duration_secs: video
                .duration
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(|secs| secs.round() as u64)
                .unwrap_or(0),
            thumbnail: video.thumbnail,
            published,
            views: video.view_count,
        }
    }
}

/// Converts the output of a single-video `yt-dlp -j` invocation into a `Track`.
impl TryFrom<Output> for Track {
    type Error = MusicError;

    fn try_from(value: Output) -> Result<Self, Self::Error> {
        if !value.status.success() {
            let stderr = String::from_utf8_lossy(&value.stderr);
            return Err(MusicError::NotFound(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&value.stdout);
        // Search queries with no hits exit cleanly with nothing on stdout
        let line = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| MusicError::NotFound("no matching video".to_string()))?;

        Track::from_ytdlp_json(line)
    }
}
