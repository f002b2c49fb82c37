//! Per-guild queue state and the store owning it.

use serenity::model::id::{ChannelId, GuildId};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::task::AbortHandle;

use super::music_manager::{MusicError, MusicResult};
use super::transport::{SessionId, StreamControl};
use crate::commands::music::audio_sources::track_metadata::Track;

/// Volume a new queue starts at.
pub const DEFAULT_VOLUME: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// The voice room join is still in flight.
    Joining,
    Playing,
    Paused,
}

/// The live transport session of a queue. Only the engine touches it.
pub(crate) struct ActiveSession {
    pub(crate) id: SessionId,
    pub(crate) control: Arc<dyn StreamControl>,
    /// Set once the session was told to end and its completion is pending.
    pub(crate) ending: bool,
}

/// Playback list plus playback state for one guild.
pub struct Queue {
    pub guild_id: GuildId,
    /// Index 0 is the track playing, or about to play.
    pub tracks: VecDeque<Track>,
    /// Linear volume, 0.0 to 1.0.
    pub volume: f32,
    /// False while paused.
    pub playing: bool,
    /// Voice room the queue is bound to.
    pub room: ChannelId,
    /// Text channel asynchronous notices are sent to.
    pub text_channel: ChannelId,
    pub(crate) generation: u64,
    pub(crate) session: Option<ActiveSession>,
    pub(crate) tasks: Vec<AbortHandle>,
}

impl Queue {
    pub fn new(
        guild_id: GuildId,
        room: ChannelId,
        text_channel: ChannelId,
        tracks: impl IntoIterator<Item = Track>,
    ) -> Self {
        Self {
            guild_id,
            tracks: tracks.into_iter().collect(),
            volume: DEFAULT_VOLUME,
            playing: true,
            room,
            text_channel,
            generation: 0,
            session: None,
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> PlayerState {
        match (&self.session, self.playing) {
            (None, _) => PlayerState::Joining,
            (Some(_), true) => PlayerState::Playing,
            (Some(_), false) => PlayerState::Paused,
        }
    }

    pub fn now_playing(&self) -> Option<&Track> {
        self.tracks.front()
    }

    pub(crate) fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|session| session.id)
    }

    /// Keeps track of a background task so teardown can abort it.
    pub(crate) fn attach_task(&mut self, task: AbortHandle) {
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(task);
    }

    /// Volume as a whole percentage.
    pub fn volume_percent(&self) -> u8 {
        (self.volume * 100.0).round().clamp(0.0, 100.0) as u8
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            guild_id: self.guild_id,
            tracks: self.tracks.iter().cloned().collect(),
            volume: self.volume,
            playing: self.playing,
            room: self.room,
            text_channel: self.text_channel,
            state: self.state(),
        }
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("guild_id", &self.guild_id)
            .field("tracks", &self.tracks.len())
            .field("volume", &self.volume)
            .field("playing", &self.playing)
            .field("room", &self.room)
            .field("generation", &self.generation)
            .field("session", &self.session_id())
            .finish()
    }
}

/// A read-only copy of a queue, safe to hand to callers and the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub guild_id: GuildId,
    pub tracks: Vec<Track>,
    pub volume: f32,
    pub playing: bool,
    pub room: ChannelId,
    pub text_channel: ChannelId,
    pub state: PlayerState,
}

impl QueueSnapshot {
    pub fn now_playing(&self) -> Option<&Track> {
        self.tracks.first()
    }

    /// Everything after the now-playing slot, numbered the way `remove` expects.
    pub fn upcoming(&self) -> impl Iterator<Item = (usize, &Track)> {
        self.tracks.iter().enumerate().skip(1)
    }
}

/// Maps guild ids to their queue. Not synchronized; the engine serializes access.
#[derive(Debug, Default)]
pub struct QueueStore {
    queues: HashMap<GuildId, Queue>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, guild_id: &GuildId) -> Option<&Queue> {
        self.queues.get(guild_id)
    }

    pub fn get_mut(&mut self, guild_id: &GuildId) -> Option<&mut Queue> {
        self.queues.get_mut(guild_id)
    }

    /// Stores a new queue. Fails if the guild already has one.
    pub fn create(&mut self, queue: Queue) -> MusicResult<&mut Queue> {
        use std::collections::hash_map::Entry;

        match self.queues.entry(queue.guild_id) {
            Entry::Occupied(_) => Err(MusicError::QueueExists),
            Entry::Vacant(slot) => Ok(slot.insert(queue)),
        }
    }

    pub fn delete(&mut self, guild_id: &GuildId) -> Option<Queue> {
        self.queues.remove(guild_id)
    }

    pub fn contains(&self, guild_id: &GuildId) -> bool {
        self.queues.contains_key(guild_id)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
