//! This module defines the resolver interface the queue consumes tracks from, and the
//! rules deciding which resolution path a `play` argument takes.

/// Submodule defining the `Track` struct used across audio sources.
pub mod track_metadata;
/// Submodule implementing the `TrackResolver` trait on top of `yt-dlp`.
pub mod youtube;

use crate::commands::music::utils::music_manager::MusicResult;
use futures::stream::BoxStream;
use regex::Regex;
use serenity::async_trait;
use std::sync::LazyLock;
use track_metadata::Track;

/// A lazily resolved sequence of tracks, e.g. the entries of a playlist.
/// Entries that fail to resolve are yielded as errors so the consumer can skip them.
pub type TrackStream = BoxStream<'static, MusicResult<Track>>;

/// Matches any argument carrying a `list=` playlist parameter.
static PLAYLIST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"list=([^#&?\s]+)").expect("valid playlist regex"));

/// Matches youtube.com / youtu.be links.
static VIDEO_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(https?://)?(www\.)?(m\.)?(youtube\.com|youtu\.?be)/\S+$")
        .expect("valid video regex")
});

/// Turns user input into tracks. Implementations talk to the outside world;
/// the queue only ever sees the resulting `Track`s.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolves the best match for a free-text search term.
    async fn resolve_search(&self, term: &str) -> MusicResult<Track>;

    /// Resolves a single video link.
    async fn resolve_video_url(&self, url: &str) -> MusicResult<Track>;

    /// Lists a playlist and returns its entries as a lazy stream, so the first
    /// track can start before the rest is resolved.
    async fn resolve_playlist(&self, url: &str) -> MusicResult<TrackStream>;
}

/// The resolution path a `play` argument takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    Playlist(String),
    Video(String),
    Search(String),
}

impl QuerySource {
    /// Classifies the argument. Playlist links win over video links, which win
    /// over free-text search.
    pub fn classify(input: &str) -> Self {
        let input = input.trim();

        if PLAYLIST_REGEX.is_match(input) {
            QuerySource::Playlist(input.to_string())
        } else if VIDEO_REGEX.is_match(input) {
            QuerySource::Video(input.to_string())
        } else {
            QuerySource::Search(input.to_string())
        }
    }
}
