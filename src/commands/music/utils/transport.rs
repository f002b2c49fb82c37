//! The seam between the playback engine and whatever actually moves audio to a voice room.

use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use super::music_manager::MusicResult;
use crate::commands::music::audio_sources::track_metadata::Track;

/// Identifies one play-session of one track. Allocated by the engine, strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// The session ran to its end, or was ended on request.
    Finished,
    /// The session broke off while playing.
    Failed(String),
}

/// Reported by a transport once per play-session.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub guild_id: GuildId,
    pub session: SessionId,
    pub kind: TransportEventKind,
}

/// Where transports report session completion and failure.
pub type TransportEventSender = UnboundedSender<TransportEvent>;

/// Voice connection and playback for a guild.
///
/// Implementations must send exactly one `TransportEvent` tagged with the given
/// `SessionId` when a session started by `play` finishes or fails, including
/// when it finishes because `StreamControl::end` was called.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects to the voice room. May take a long time; the engine can abort it.
    async fn join(&self, guild_id: GuildId, room: ChannelId) -> MusicResult<()>;

    /// Disconnects from the guild's voice room.
    async fn leave(&self, guild_id: GuildId) -> MusicResult<()>;

    /// Starts streaming the track as a new session in the joined room.
    async fn play(
        &self,
        guild_id: GuildId,
        session: SessionId,
        track: &Track,
    ) -> MusicResult<Arc<dyn StreamControl>>;
}

/// Controls for a single live session.
#[async_trait]
pub trait StreamControl: Send + Sync {
    fn pause(&self) -> MusicResult<()>;

    fn resume(&self) -> MusicResult<()>;

    /// Ends the session. Completion is reported through the event channel.
    fn end(&self) -> MusicResult<()>;

    /// `volume` is linear, 0.0 to 1.0.
    fn set_volume(&self, volume: f32) -> MusicResult<()>;

    /// How far into the track playback is, if the transport knows.
    async fn position(&self) -> Option<Duration>;
}
