//! A Discord bot that keeps one music queue per guild, driven by prefix commands.

use std::sync::Arc;

pub mod commands;
pub mod config;
pub mod events;

pub use commands::music::audio_sources::track_metadata::Track;
pub use commands::music::audio_sources::{QuerySource, TrackResolver, TrackStream};
pub use commands::music::interpreter::{CallerContext, Command, CommandInterpreter, CommandOutcome};
pub use commands::music::utils::music_manager::{
    ErrorKind, MusicError, MusicManager, MusicResult, PlaybackNotice,
};

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// User data, which is stored and accessible in all framework callbacks
pub struct Data {
    pub interpreter: Arc<CommandInterpreter>,
    pub music_manager: Arc<MusicManager>,
}
