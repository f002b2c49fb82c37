//! Implements the `TrackResolver` trait for YouTube.
//! Uses the `yt-dlp` command-line tool for extracting information.

use crate::commands::music::utils::music_manager::{MusicError, MusicResult};
use futures::StreamExt;
use serde::Deserialize;
use serenity::async_trait;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use super::{TrackResolver, TrackStream, track_metadata::Track};

/// Resolves tracks by shelling out to `yt-dlp`.
#[derive(Debug, Clone)]
pub struct YoutubeApi {
    /// Path or name of the `yt-dlp` executable.
    program: String,
}

impl Default for YoutubeApi {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

/// One line of `yt-dlp --flat-playlist -j` output.
#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    id: String,
    url: Option<String>,
}

impl PlaylistEntry {
    fn video_url(&self) -> String {
        match &self.url {
            // Flat listings sometimes carry only the bare id
            Some(url) if Url::parse(url).is_ok() => url.clone(),
            _ => format!("https://www.youtube.com/watch?v={}", self.id),
        }
    }
}

impl YoutubeApi {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> MusicResult<Output> {
        debug!("Running {} {:?}", self.program, args);

        Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| MusicError::AudioSourceError(format!("Failed to run yt-dlp: {}", e)))
    }

    /// Extracts the video urls of a playlist without resolving each entry.
    fn playlist_urls(output: Output) -> MusicResult<Vec<String>> {
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MusicError::NotFound(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let urls = stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<PlaylistEntry>(line).ok())
            .map(|entry| entry.video_url())
            .collect::<Vec<_>>();

        Ok(urls)
    }
}

#[async_trait]
impl TrackResolver for YoutubeApi {
    async fn resolve_search(&self, term: &str) -> MusicResult<Track> {
        info!("Resolving search term: {}", term);
        let search_param = format!("ytsearch1:{}", term);

        let output = self
            .run(&["-j", "--no-playlist", "--", &search_param])
            .await?;

        Track::try_from(output)
    }

    async fn resolve_video_url(&self, url: &str) -> MusicResult<Track> {
        info!("Resolving video URL: {}", url);

        let output = self.run(&["-j", "--no-playlist", "--", url]).await?;

        Track::try_from(output)
    }

    async fn resolve_playlist(&self, url: &str) -> MusicResult<TrackStream> {
        info!("Listing playlist: {}", url);

        let output = self
            .run(&["-j", "--flat-playlist", "--yes-playlist", "--", url])
            .await?;
        let urls = Self::playlist_urls(output)?;

        if urls.is_empty() {
            return Err(MusicError::NotFound(format!("playlist {} is empty", url)));
        }

        debug!("Playlist {} lists {} entries", url, urls.len());

        let api = self.clone();
        let tracks = futures::stream::iter(urls)
            .then(move |video_url| {
                let api = api.clone();
                async move { api.resolve_video_url(&video_url).await }
            })
            .boxed();

        Ok(tracks)
    }
}
