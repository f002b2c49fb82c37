//! The playback engine. Owns every guild's queue, decides what plays next, and is the
//! only thing that talks to the transport.
//!
//! Every operation touching a guild's queue runs while holding that guild's lock
//! (see [`MusicManager::lock_guild`]), so commands and completion events for one
//! guild never interleave. Different guilds only share the short store mutex.

use dashmap::DashMap;
use futures::StreamExt;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue_store::{ActiveSession, PlayerState, Queue, QueueSnapshot, QueueStore};
use super::transport::{SessionId, Transport, TransportEvent, TransportEventKind};
use crate::commands::music::audio_sources::TrackStream;
use crate::commands::music::audio_sources::track_metadata::Track;

/// Errors that can occur during music operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MusicError {
    #[error("Not in a guild")]
    NotInGuild,

    #[error("Unknown command `{0}`")]
    UnknownCommand(String),

    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),

    #[error("`{0}` does not take an argument")]
    UnexpectedArgument(&'static str),

    #[error("Volume must be a whole number from 0 to 100, got `{0}`")]
    InvalidVolume(String),

    #[error("Position must be a number from 1 to {max}, got `{given}`")]
    InvalidPosition { given: String, max: usize },

    #[error("User is not in a voice channel")]
    UserNotInVoiceChannel,

    #[error("I am not allowed to connect and speak in that voice channel")]
    MissingVoicePermissions,

    #[error("Nothing is playing")]
    NoQueue,

    #[error("You need to be in the same voice channel as the bot")]
    DifferentVoiceChannel,

    #[error("There are no more tracks in the queue")]
    NoMoreTracks,

    #[error("Playback is already paused")]
    AlreadyPaused,

    #[error("Playback is not paused")]
    NotPaused,

    #[error("Still connecting to the voice channel")]
    StillConnecting,

    #[error("Already skipping to the next track")]
    SkipPending,

    #[error("Nothing found: {0}")]
    NotFound(String),

    #[error("Audio source error: {0}")]
    AudioSourceError(String),

    #[error("Failed to join voice channel: {0}")]
    JoinError(String),

    #[error("Joining the voice channel was cancelled")]
    JoinCancelled,

    #[error("Not connected to a voice channel")]
    NotConnected,

    #[error("Playback error: {0}")]
    PlaybackError(String),

    #[error("A queue already exists for this guild")]
    QueueExists,
}

/// Broad classes of [`MusicError`], used to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing argument.
    Validation,
    /// The guild or caller is not in a state that allows the command.
    Precondition,
    /// The resolver found nothing or failed.
    Resolution,
    /// Joining or playing failed.
    Transport,
    Internal,
}

impl MusicError {
    pub fn kind(&self) -> ErrorKind {
        use MusicError::*;

        match self {
            UnknownCommand(_)
            | MissingArgument(_)
            | UnexpectedArgument(_)
            | InvalidVolume(_)
            | InvalidPosition { .. } => ErrorKind::Validation,
            NotInGuild
            | UserNotInVoiceChannel
            | MissingVoicePermissions
            | NoQueue
            | DifferentVoiceChannel
            | NoMoreTracks
            | AlreadyPaused
            | NotPaused
            | StillConnecting
            | SkipPending => ErrorKind::Precondition,
            NotFound(_) | AudioSourceError(_) => ErrorKind::Resolution,
            JoinError(_) | JoinCancelled | NotConnected | PlaybackError(_) => ErrorKind::Transport,
            QueueExists => ErrorKind::Internal,
        }
    }
}

/// Result type for music operations
pub type MusicResult<T> = Result<T, MusicError>;

/// Things that happen to a queue outside of any command, addressed to the
/// text channel the queue was started from.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackNotice {
    NowPlaying {
        guild_id: GuildId,
        text_channel: ChannelId,
        track: Track,
    },
    TrackFailed {
        guild_id: GuildId,
        text_channel: ChannelId,
        track: Track,
        reason: String,
    },
    QueueFinished {
        guild_id: GuildId,
        text_channel: ChannelId,
    },
    PlaylistLoaded {
        guild_id: GuildId,
        text_channel: ChannelId,
        added: usize,
        failed: usize,
    },
}

impl PlaybackNotice {
    pub fn guild_id(&self) -> GuildId {
        match self {
            PlaybackNotice::NowPlaying { guild_id, .. }
            | PlaybackNotice::TrackFailed { guild_id, .. }
            | PlaybackNotice::QueueFinished { guild_id, .. }
            | PlaybackNotice::PlaylistLoaded { guild_id, .. } => *guild_id,
        }
    }

    pub fn text_channel(&self) -> ChannelId {
        match self {
            PlaybackNotice::NowPlaying { text_channel, .. }
            | PlaybackNotice::TrackFailed { text_channel, .. }
            | PlaybackNotice::QueueFinished { text_channel, .. }
            | PlaybackNotice::PlaylistLoaded { text_channel, .. } => *text_channel,
        }
    }
}

/// What a skip ended and what the queue advances to once the transport confirms.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipOutcome {
    pub skipped: Track,
    pub next: Track,
}

/// Volume before and after a change, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeChange {
    pub previous: u8,
    pub current: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub track: Track,
    /// Playback position; `None` while still joining or when the transport can't tell.
    pub position: Option<Duration>,
    pub playing: bool,
    /// Volume in percent.
    pub volume: u8,
    /// Number of tracks after the current one.
    pub upcoming: usize,
}

/// Why `play_current` runs. A failing first track rolls the whole queue back,
/// a failing later track is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    Start,
    Natural,
}

/// Owns the queue store and drives playback for every guild.
pub struct MusicManager {
    store: Mutex<QueueStore>,
    guild_locks: DashMap<GuildId, Arc<AsyncMutex<()>>>,
    transport: Arc<dyn Transport>,
    notices: UnboundedSender<PlaybackNotice>,
    // Source of session ids and queue generations
    next_id: AtomicU64,
}

impl MusicManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        notices: UnboundedSender<PlaybackNotice>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(QueueStore::new()),
            guild_locks: DashMap::new(),
            transport,
            notices,
            next_id: AtomicU64::new(1),
        })
    }

    /// Waits for exclusive access to a guild's queue.
    pub async fn lock_guild(self: &Arc<Self>, guild_id: GuildId) -> GuildGuard {
        let lock = Arc::clone(&self.guild_locks.entry(guild_id).or_default());
        let lock = lock.lock_owned().await;

        GuildGuard {
            manager: Arc::clone(self),
            guild_id,
            _lock: lock,
        }
    }

    /// Current state of a guild's queue, without waiting for the guild lock.
    pub fn snapshot(&self, guild_id: GuildId) -> Option<QueueSnapshot> {
        self.store().get(&guild_id).map(Queue::snapshot)
    }

    pub fn has_queue(&self, guild_id: GuildId) -> bool {
        self.store().contains(&guild_id)
    }

    /// Number of guilds with a live queue.
    pub fn active_queues(&self) -> usize {
        self.store().len()
    }

    /// Reacts to a transport reporting the end of a session.
    pub async fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        let guard = self.lock_guild(event.guild_id).await;
        guard.complete_session(event).await;
    }

    /// Handles transport events until the sending side goes away.
    /// Each event gets its own task so a slow guild never holds up the others.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.handle_event(event).await });
            }
            info!("Transport event channel closed, event loop finished");
        })
    }

    /// The bot was removed from voice by someone else; drop the guild's queue
    /// without trying to leave again.
    pub async fn handle_disconnect(self: &Arc<Self>, guild_id: GuildId) {
        let guard = self.lock_guild(guild_id).await;
        guard.drop_after_disconnect().await;
    }

    fn store(&self) -> MutexGuard<'_, QueueStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_queue<R>(&self, guild_id: GuildId, f: impl FnOnce(&mut Queue) -> R) -> Option<R> {
        self.store().get_mut(&guild_id).map(f)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn notify(&self, notice: PlaybackNotice) {
        if self.notices.send(notice).is_err() {
            debug!("No one is listening for playback notices");
        }
    }

    /// Releases everything a deleted queue still holds.
    async fn teardown(&self, queue: Queue, leave: bool) {
        let guild_id = queue.guild_id;

        for task in &queue.tasks {
            task.abort();
        }

        if let Some(session) = &queue.session {
            if !queue.playing {
                // Some transports refuse to end a paused session
                if let Err(e) = session.control.resume() {
                    warn!("Failed to resume session {} for guild {}: {}", session.id, guild_id, e);
                }
            }
            if let Err(e) = session.control.end() {
                warn!("Failed to end session {} for guild {}: {}", session.id, guild_id, e);
            }
        }

        if leave {
            if let Err(e) = self.transport.leave(guild_id).await {
                warn!("Failed to leave voice channel for guild {}: {}", guild_id, e);
            }
        }
    }
}

/// Exclusive access to one guild's queue. Dropping it lets the next
/// command or event for that guild run.
pub struct GuildGuard {
    manager: Arc<MusicManager>,
    guild_id: GuildId,
    _lock: OwnedMutexGuard<()>,
}

impl GuildGuard {
    pub fn queue(&self) -> Option<QueueSnapshot> {
        self.manager.snapshot(self.guild_id)
    }

    fn with_queue<R>(&self, f: impl FnOnce(&mut Queue) -> R) -> MusicResult<R> {
        self.manager
            .with_queue(self.guild_id, f)
            .ok_or(MusicError::NoQueue)
    }

    /// Appends tracks and returns the queue position of the first one.
    pub fn enqueue(&self, tracks: Vec<Track>) -> MusicResult<usize> {
        self.with_queue(|queue| {
            let position = queue.tracks.len();
            queue.tracks.extend(tracks);
            position
        })
    }

    /// Stores a new queue, joins its voice room and starts the first track.
    ///
    /// The guild lock is released while the join is in flight so that `stop`
    /// can abort it. `rest` is appended in the background as it resolves.
    pub async fn start_queue(
        self,
        mut queue: Queue,
        rest: Option<TrackStream>,
    ) -> MusicResult<Track> {
        let guild_id = self.guild_id;
        let room = queue.room;
        let manager = Arc::clone(&self.manager);

        let first = queue
            .now_playing()
            .cloned()
            .ok_or_else(|| MusicError::NotFound("nothing to play".to_string()))?;
        let generation = manager.next_id();
        queue.generation = generation;

        let transport = Arc::clone(&manager.transport);
        let join = tokio::spawn(async move { transport.join(guild_id, room).await });
        queue.attach_task(join.abort_handle());

        let created = manager.store().create(queue).map(|_| ());
        if let Err(e) = created {
            join.abort();
            return Err(e);
        }

        if let Some(rest) = rest {
            self.spawn_producer(rest)?;
        }

        info!("Joining voice channel {} for guild {}", room, guild_id);
        drop(self);

        let joined = join.await;
        let guard = manager.lock_guild(guild_id).await;

        let current = manager.with_queue(guild_id, |queue| queue.generation);
        if current != Some(generation) {
            info!("Queue for guild {} was stopped while joining", guild_id);
            // The join may have landed after stop already left the room
            if current.is_none() && matches!(joined, Ok(Ok(()))) {
                if let Err(e) = manager.transport.leave(guild_id).await {
                    warn!("Failed to leave voice channel for guild {}: {}", guild_id, e);
                }
            }
            return Err(MusicError::JoinCancelled);
        }

        let joined = joined.unwrap_or_else(|e| Err(MusicError::JoinError(e.to_string())));
        if let Err(e) = joined {
            error!(
                "Failed to join voice channel {} for guild {}: {}",
                room, guild_id, e
            );
            guard.rollback().await;
            return Err(e);
        }

        guard.play_current(Advance::Start).await?;
        Ok(first)
    }

    /// Plays `tracks[0]`, or tears the queue down when nothing is left.
    /// Loops instead of recursing when a track can't be played.
    async fn play_current(&self, advance: Advance) -> MusicResult<()> {
        let guild_id = self.guild_id;
        let transport = Arc::clone(&self.manager.transport);

        loop {
            let next = self.manager.with_queue(guild_id, |queue| {
                queue.session = None;
                queue
                    .tracks
                    .front()
                    .cloned()
                    .map(|track| (track, queue.volume, queue.text_channel))
            });

            let (track, volume, text_channel) = match next {
                None => return Ok(()),
                Some(None) => {
                    self.finish().await;
                    return Ok(());
                }
                Some(Some(next)) => next,
            };

            let session = SessionId::new(self.manager.next_id());
            debug!(
                "Starting session {} for '{}' in guild {}",
                session, track.title, guild_id
            );

            match transport.play(guild_id, session, &track).await {
                Ok(control) => {
                    if let Err(e) = control.set_volume(volume) {
                        warn!("Failed to apply volume in guild {}: {}", guild_id, e);
                    }

                    self.manager.with_queue(guild_id, |queue| {
                        queue.session = Some(ActiveSession {
                            id: session,
                            control,
                            ending: false,
                        });
                        queue.playing = true;
                    });
                    info!("Now playing '{}' in guild {}", track.title, guild_id);

                    if advance == Advance::Natural {
                        self.manager.notify(PlaybackNotice::NowPlaying {
                            guild_id,
                            text_channel,
                            track,
                        });
                    }
                    return Ok(());
                }
                Err(e) if advance == Advance::Start => {
                    error!("Failed to play '{}' in guild {}: {}", track.title, guild_id, e);
                    self.rollback().await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "Failed to play '{}' in guild {}: {}, trying next track",
                        track.title, guild_id, e
                    );
                    self.manager.with_queue(guild_id, |queue| queue.tracks.pop_front());
                    self.manager.notify(PlaybackNotice::TrackFailed {
                        guild_id,
                        text_channel,
                        track,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Advances past a finished session. Events for any other session are stale.
    async fn complete_session(&self, event: TransportEvent) {
        let guild_id = self.guild_id;
        let current = self
            .manager
            .with_queue(guild_id, |queue| (queue.session_id(), queue.text_channel));

        let text_channel = match current {
            Some((Some(session), text_channel)) if session == event.session => text_channel,
            _ => {
                debug!(
                    "Discarding stale {:?} for session {} in guild {}",
                    event.kind, event.session, guild_id
                );
                return;
            }
        };

        let finished = self
            .manager
            .with_queue(guild_id, |queue| {
                queue.session = None;
                queue.tracks.pop_front()
            })
            .flatten();

        if let TransportEventKind::Failed(reason) = event.kind {
            warn!(
                "Session {} failed in guild {}: {}",
                event.session, guild_id, reason
            );
            if let Some(track) = finished {
                self.manager.notify(PlaybackNotice::TrackFailed {
                    guild_id,
                    text_channel,
                    track,
                    reason,
                });
            }
        }

        if let Err(e) = self.play_current(Advance::Natural).await {
            error!("Failed to advance queue for guild {}: {}", guild_id, e);
        }
    }

    /// Ends the queue: clears it, ends the session and leaves the room.
    pub async fn stop(&self) -> MusicResult<()> {
        let queue = self
            .manager
            .store()
            .delete(&self.guild_id)
            .ok_or(MusicError::NoQueue)?;

        info!("Stopping playback for guild {}", self.guild_id);
        self.manager.teardown(queue, true).await;

        Ok(())
    }

    /// Ends the current session. The queue itself advances when the transport
    /// reports the session finished, so the returned `next` is a preview.
    pub fn skip(&self) -> MusicResult<SkipOutcome> {
        self.with_queue(|queue| {
            if queue.tracks.len() < 2 {
                return Err(MusicError::NoMoreTracks);
            }
            let outcome = SkipOutcome {
                skipped: queue.tracks[0].clone(),
                next: queue.tracks[1].clone(),
            };

            let session = queue.session.as_mut().ok_or(MusicError::StillConnecting)?;
            if session.ending {
                return Err(MusicError::SkipPending);
            }

            if !queue.playing {
                session.control.resume()?;
            }
            session.control.end()?;
            session.ending = true;
            debug!("Ended session {} in guild {} on skip", session.id, queue.guild_id);

            Ok(outcome)
        })?
    }

    /// Sets the volume from a percentage. A live session gets it right away;
    /// one that is already ending leaves it for the next track.
    pub fn set_volume(&self, percent: i64) -> MusicResult<VolumeChange> {
        if !(0..=100).contains(&percent) {
            return Err(MusicError::InvalidVolume(percent.to_string()));
        }
        let volume = percent as f32 / 100.0;

        self.with_queue(|queue| {
            if let Some(session) = queue.session.as_ref().filter(|session| !session.ending) {
                session.control.set_volume(volume)?;
            }

            let previous = queue.volume_percent();
            queue.volume = volume;

            Ok(VolumeChange {
                previous,
                current: percent as u8,
            })
        })?
    }

    pub fn pause(&self) -> MusicResult<Track> {
        self.with_queue(|queue| {
            if !queue.playing {
                return Err(MusicError::AlreadyPaused);
            }
            let session = queue.session.as_ref().ok_or(MusicError::StillConnecting)?;
            if session.ending {
                return Err(MusicError::SkipPending);
            }

            session.control.pause()?;
            queue.playing = false;

            queue.tracks.front().cloned().ok_or(MusicError::NoQueue)
        })?
    }

    pub fn resume(&self) -> MusicResult<Track> {
        self.with_queue(|queue| {
            if queue.playing {
                return Err(MusicError::NotPaused);
            }
            let session = queue.session.as_ref().ok_or(MusicError::StillConnecting)?;
            if session.ending {
                return Err(MusicError::SkipPending);
            }

            session.control.resume()?;
            queue.playing = true;

            queue.tracks.front().cloned().ok_or(MusicError::NoQueue)
        })?
    }

    /// Removes the track at `index`, where 1 is the first track after the one playing.
    pub fn remove_at(&self, index: usize) -> MusicResult<Track> {
        self.with_queue(|queue| {
            let len = queue.tracks.len();
            if len < 2 {
                return Err(MusicError::NoMoreTracks);
            }
            if index < 1 || index >= len {
                return Err(MusicError::InvalidPosition {
                    given: index.to_string(),
                    max: len - 1,
                });
            }

            queue
                .tracks
                .remove(index)
                .ok_or(MusicError::InvalidPosition {
                    given: index.to_string(),
                    max: len - 1,
                })
        })?
    }

    pub async fn now_playing(&self) -> MusicResult<NowPlaying> {
        let (track, control, playing, volume, upcoming) = self.with_queue(|queue| {
            (
                queue.tracks.front().cloned(),
                queue
                    .session
                    .as_ref()
                    .map(|session| Arc::clone(&session.control)),
                queue.playing,
                queue.volume_percent(),
                queue.tracks.len().saturating_sub(1),
            )
        })?;
        let track = track.ok_or(MusicError::NoQueue)?;

        let position = match control {
            Some(control) => control.position().await,
            None => None,
        };

        Ok(NowPlaying {
            track,
            position,
            playing,
            volume,
            upcoming,
        })
    }

    /// Appends a lazily resolved track stream in the background. The producer
    /// stops on its own once the queue it was started for is gone.
    pub fn spawn_producer(&self, tracks: TrackStream) -> MusicResult<()> {
        let guild_id = self.guild_id;
        let manager = Arc::clone(&self.manager);
        let (generation, text_channel) =
            self.with_queue(|queue| (queue.generation, queue.text_channel))?;

        let task = tokio::spawn(async move {
            let mut tracks = tracks;
            let mut added = 0;
            let mut failed = 0;

            while let Some(item) = tracks.next().await {
                let track = match item {
                    Ok(track) => track,
                    Err(e) => {
                        warn!("Skipping playlist entry for guild {}: {}", guild_id, e);
                        failed += 1;
                        continue;
                    }
                };

                let _guard = manager.lock_guild(guild_id).await;
                let appended = manager.with_queue(guild_id, |queue| {
                    if queue.generation != generation {
                        return false;
                    }
                    queue.tracks.push_back(track);
                    true
                });

                if appended != Some(true) {
                    debug!(
                        "Queue for guild {} is gone, dropping the rest of the playlist",
                        guild_id
                    );
                    return;
                }
                added += 1;
            }

            info!(
                "Playlist for guild {} loaded: {} added, {} failed",
                guild_id, added, failed
            );
            manager.notify(PlaybackNotice::PlaylistLoaded {
                guild_id,
                text_channel,
                added,
                failed,
            });
        });

        self.with_queue(|queue| queue.attach_task(task.abort_handle()))
    }

    /// Deletes the queue and releases the room after a failed start.
    async fn rollback(&self) {
        let queue = self.manager.store().delete(&self.guild_id);

        if let Some(queue) = queue {
            warn!("Rolling back queue for guild {}", self.guild_id);
            self.manager.teardown(queue, true).await;
        }
    }

    /// Natural exhaustion: nothing left to play.
    async fn finish(&self) {
        let queue = self.manager.store().delete(&self.guild_id);

        if let Some(queue) = queue {
            info!("Queue finished for guild {}", self.guild_id);
            let text_channel = queue.text_channel;
            self.manager.teardown(queue, true).await;
            self.manager.notify(PlaybackNotice::QueueFinished {
                guild_id: self.guild_id,
                text_channel,
            });
        }
    }

    async fn drop_after_disconnect(&self) {
        let state = self.manager.with_queue(self.guild_id, |queue| queue.state());

        match state {
            None => {}
            // Voice state updates from the previous connection can arrive mid-join
            Some(PlayerState::Joining) => {
                debug!("Ignoring voice disconnect for guild {} while joining", self.guild_id);
            }
            Some(_) => {
                let queue = self.manager.store().delete(&self.guild_id);
                if let Some(queue) = queue {
                    warn!(
                        "Disconnected from voice in guild {}, dropping its queue",
                        self.guild_id
                    );
                    let text_channel = queue.text_channel;
                    self.manager.teardown(queue, false).await;
                    self.manager.notify(PlaybackNotice::QueueFinished {
                        guild_id: self.guild_id,
                        text_channel,
                    });
                }
            }
        }
    }
}
