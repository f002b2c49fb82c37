//! Turns chat messages into queue operations.
//!
//! Parsing is pure. Execution checks the caller against the guild's queue in a
//! fixed order (voice room, permissions, queue, same room, arguments) and only
//! then hands the command to the [`MusicManager`].

use futures::StreamExt;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::audio_sources::track_metadata::Track;
use super::audio_sources::{QuerySource, TrackResolver, TrackStream};
use super::utils::music_manager::{
    GuildGuard, MusicError, MusicManager, MusicResult, NowPlaying, SkipOutcome, VolumeChange,
};
use super::utils::queue_store::{Queue, QueueSnapshot};

/// A parsed command. Arguments are kept raw and validated on execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Stop,
    NowPlaying,
    Skip,
    Queue,
    Volume(String),
    Pause,
    Resume,
    Remove(String),
    Help,
}

impl Command {
    /// Parses one command out of a message.
    ///
    /// Returns `Ok(None)` when the message doesn't start with `prefix`. Only the
    /// first word after the prefix names the command; the rest is its argument.
    pub fn parse(prefix: &str, content: &str) -> MusicResult<Option<Command>> {
        let Some(body) = content.trim_start().strip_prefix(prefix) else {
            return Ok(None);
        };

        let body = body.trim();
        if body.is_empty() {
            return Ok(None);
        }

        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };

        let command = match name.to_lowercase().as_str() {
            "play" | "p" => Command::Play(args.to_string()),
            "volume" | "vol" => Command::Volume(args.to_string()),
            "remove" | "rm" => Command::Remove(args.to_string()),
            "stop" | "leave" => Self::without_args(Command::Stop, args)?,
            "nowplaying" | "np" => Self::without_args(Command::NowPlaying, args)?,
            "skip" | "next" => Self::without_args(Command::Skip, args)?,
            "queue" | "list" | "q" => Self::without_args(Command::Queue, args)?,
            "pause" => Self::without_args(Command::Pause, args)?,
            "resume" => Self::without_args(Command::Resume, args)?,
            "help" => Self::without_args(Command::Help, args)?,
            _ => return Err(MusicError::UnknownCommand(name.to_string())),
        };

        Ok(Some(command))
    }

    fn without_args(command: Command, args: &str) -> MusicResult<Command> {
        if args.is_empty() {
            Ok(command)
        } else {
            Err(MusicError::UnexpectedArgument(command.name()))
        }
    }

    /// Canonical name, as shown in help and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play(_) => "play",
            Command::Stop => "stop",
            Command::NowPlaying => "nowplaying",
            Command::Skip => "skip",
            Command::Queue => "queue",
            Command::Volume(_) => "volume",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Remove(_) => "remove",
            Command::Help => "help",
        }
    }
}

/// Who sent a command and where, as seen by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerContext {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// Text channel the message came from.
    pub text_channel: ChannelId,
    /// Voice channel the caller is in, if any.
    pub voice_channel: Option<ChannelId>,
    /// Whether the bot may connect and speak in `voice_channel`.
    pub can_join: bool,
}

/// What a successful command did, for the presentation layer to render.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Started { track: Track },
    Queued { track: Track, position: usize },
    PlaylistStarted { first: Track },
    PlaylistQueued { first: Track, position: usize },
    Stopped,
    NowPlaying(NowPlaying),
    Skipped(SkipOutcome),
    QueueListing(QueueSnapshot),
    VolumeChanged(VolumeChange),
    Paused(Track),
    Resumed(Track),
    Removed { track: Track, position: usize },
    Help { prefix: String },
}

pub struct CommandInterpreter {
    manager: Arc<MusicManager>,
    resolver: Arc<dyn TrackResolver>,
    prefix: String,
}

impl CommandInterpreter {
    pub fn new(
        manager: Arc<MusicManager>,
        resolver: Arc<dyn TrackResolver>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            resolver,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parses and runs a message. `None` means the message wasn't for us.
    pub async fn handle_message(
        &self,
        caller: &CallerContext,
        content: &str,
    ) -> Option<MusicResult<CommandOutcome>> {
        match Command::parse(&self.prefix, content) {
            Ok(None) => None,
            Ok(Some(command)) => Some(self.execute(caller, command).await),
            Err(e) => {
                debug!("Rejected message in guild {}: {}", caller.guild_id, e);
                Some(Err(e))
            }
        }
    }

    pub async fn execute(
        &self,
        caller: &CallerContext,
        command: Command,
    ) -> MusicResult<CommandOutcome> {
        debug!(
            "Executing {} for user {} in guild {}",
            command.name(),
            caller.user_id,
            caller.guild_id
        );

        match command {
            Command::Help => Ok(CommandOutcome::Help {
                prefix: self.prefix.clone(),
            }),
            Command::Play(query) => self.play(caller, &query).await,
            Command::Stop => {
                let (guard, _) = self.queue_for(caller).await?;
                guard.stop().await?;
                Ok(CommandOutcome::Stopped)
            }
            Command::NowPlaying => {
                let (guard, _) = self.queue_for(caller).await?;
                Ok(CommandOutcome::NowPlaying(guard.now_playing().await?))
            }
            Command::Skip => {
                let (guard, _) = self.queue_for(caller).await?;
                Ok(CommandOutcome::Skipped(guard.skip()?))
            }
            Command::Queue => {
                let (_, queue) = self.queue_for(caller).await?;
                Ok(CommandOutcome::QueueListing(queue))
            }
            Command::Volume(arg) => {
                let (guard, _) = self.queue_for(caller).await?;
                let percent = parse_volume(&arg)?;
                Ok(CommandOutcome::VolumeChanged(guard.set_volume(percent)?))
            }
            Command::Pause => {
                let (guard, _) = self.queue_for(caller).await?;
                Ok(CommandOutcome::Paused(guard.pause()?))
            }
            Command::Resume => {
                let (guard, _) = self.queue_for(caller).await?;
                Ok(CommandOutcome::Resumed(guard.resume()?))
            }
            Command::Remove(arg) => {
                let (guard, queue) = self.queue_for(caller).await?;
                let position = parse_position(&arg, queue.tracks.len())?;
                let track = guard.remove_at(position)?;
                Ok(CommandOutcome::Removed { track, position })
            }
        }
    }

    /// Locks the caller's guild and checks the caller shares the queue's room.
    async fn queue_for(&self, caller: &CallerContext) -> MusicResult<(GuildGuard, QueueSnapshot)> {
        let room = caller
            .voice_channel
            .ok_or(MusicError::UserNotInVoiceChannel)?;

        let guard = self.manager.lock_guild(caller.guild_id).await;
        let queue = guard.queue().ok_or(MusicError::NoQueue)?;

        if queue.room != room {
            return Err(MusicError::DifferentVoiceChannel);
        }

        Ok((guard, queue))
    }

    async fn play(&self, caller: &CallerContext, query: &str) -> MusicResult<CommandOutcome> {
        let room = caller
            .voice_channel
            .ok_or(MusicError::UserNotInVoiceChannel)?;

        if !caller.can_join {
            return Err(MusicError::MissingVoicePermissions);
        }

        if let Some(queue) = self.manager.snapshot(caller.guild_id) {
            if queue.room != room {
                return Err(MusicError::DifferentVoiceChannel);
            }
        }

        let query = query.trim();
        if query.is_empty() {
            return Err(MusicError::MissingArgument("play"));
        }

        // Resolving can take seconds; don't hold the guild up meanwhile
        let (first, rest) = self.resolve(QuerySource::classify(query)).await?;
        let playlist = rest.is_some();

        let guard = self.manager.lock_guild(caller.guild_id).await;

        match guard.queue() {
            Some(queue) => {
                if queue.room != room {
                    return Err(MusicError::DifferentVoiceChannel);
                }

                let position = guard.enqueue(vec![first.clone()])?;
                if let Some(rest) = rest {
                    guard.spawn_producer(rest)?;
                }
                info!(
                    "Queued '{}' at position {} in guild {}",
                    first.title, position, caller.guild_id
                );

                Ok(if playlist {
                    CommandOutcome::PlaylistQueued { first, position }
                } else {
                    CommandOutcome::Queued {
                        track: first,
                        position,
                    }
                })
            }
            None => {
                let queue = Queue::new(caller.guild_id, room, caller.text_channel, [first]);
                let track = guard.start_queue(queue, rest).await?;

                Ok(if playlist {
                    CommandOutcome::PlaylistStarted { first: track }
                } else {
                    CommandOutcome::Started { track }
                })
            }
        }
    }

    /// Resolves the first playable track, plus the unread rest of a playlist.
    async fn resolve(&self, source: QuerySource) -> MusicResult<(Track, Option<TrackStream>)> {
        match source {
            QuerySource::Search(term) => Ok((self.resolver.resolve_search(&term).await?, None)),
            QuerySource::Video(url) => Ok((self.resolver.resolve_video_url(&url).await?, None)),
            QuerySource::Playlist(url) => {
                let mut tracks = self.resolver.resolve_playlist(&url).await?;

                while let Some(item) = tracks.next().await {
                    match item {
                        Ok(track) => return Ok((track, Some(tracks))),
                        Err(e) => warn!("Skipping unplayable entry of {}: {}", url, e),
                    }
                }

                Err(MusicError::NotFound(format!(
                    "no playable entries in {}",
                    url
                )))
            }
        }
    }
}

fn parse_volume(arg: &str) -> MusicResult<i64> {
    if arg.is_empty() {
        return Err(MusicError::MissingArgument("volume"));
    }

    arg.parse::<i64>()
        .map_err(|_| MusicError::InvalidVolume(arg.to_string()))
}

/// Parses a 1-based position among the tracks after the one playing.
fn parse_position(arg: &str, queue_len: usize) -> MusicResult<usize> {
    if arg.is_empty() {
        return Err(MusicError::MissingArgument("remove"));
    }
    if queue_len < 2 {
        return Err(MusicError::NoMoreTracks);
    }

    arg.parse::<usize>().map_err(|_| MusicError::InvalidPosition {
        given: arg.to_string(),
        max: queue_len - 1,
    })
}
