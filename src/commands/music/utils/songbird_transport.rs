//! Songbird implementation of the playback transport.

use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::error::{ControlError, JoinError};
use songbird::input::YoutubeDl;
use songbird::tracks::TrackHandle;
use songbird::{Event, Songbird, TrackEvent};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{debug, info};

use super::event_handlers::SessionEndNotifier;
use super::music_manager::{MusicError, MusicResult};
use super::transport::{SessionId, StreamControl, Transport, TransportEventSender};
use crate::commands::music::audio_sources::track_metadata::Track;

/// Streams tracks into voice channels through songbird, using `yt-dlp` for audio.
pub struct SongbirdTransport {
    songbird: Arc<Songbird>,
    http: reqwest::Client,
    ytdlp: &'static str,
    events: TransportEventSender,
}

impl SongbirdTransport {
    pub fn new(songbird: Arc<Songbird>, ytdlp: &'static str, events: TransportEventSender) -> Self {
        Self {
            songbird,
            http: reqwest::Client::new(),
            ytdlp,
            events,
        }
    }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn join(&self, guild_id: GuildId, room: ChannelId) -> MusicResult<()> {
        self.songbird
            .join(guild_id, room)
            .await
            .map_err(|e| MusicError::JoinError(e.to_string()))?;

        info!("Joined voice channel {} in guild {}", room, guild_id);
        Ok(())
    }

    async fn leave(&self, guild_id: GuildId) -> MusicResult<()> {
        self.songbird.remove(guild_id).await.map_err(|e| match e {
            JoinError::NoCall => MusicError::NotConnected,
            e => MusicError::JoinError(e.to_string()),
        })?;

        info!("Left voice channel in guild {}", guild_id);
        Ok(())
    }

    async fn play(
        &self,
        guild_id: GuildId,
        session: SessionId,
        track: &Track,
    ) -> MusicResult<Arc<dyn StreamControl>> {
        let call = self
            .songbird
            .get(guild_id)
            .ok_or(MusicError::NotConnected)?;

        let input = YoutubeDl::new_ytdl_like(self.ytdlp, self.http.clone(), track.url.clone());
        let handle = {
            let mut call = call.lock().await;
            call.play_input(input.into())
        };
        debug!("Track handle created for session {} in guild {}", session, guild_id);

        let reported = Arc::new(AtomicBool::new(false));
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    SessionEndNotifier {
                        guild_id,
                        session,
                        events: self.events.clone(),
                        reported: Arc::clone(&reported),
                    },
                )
                .map_err(control_error)?;
        }

        Ok(Arc::new(SongbirdStream { handle }))
    }
}

/// Controls for one songbird track.
pub struct SongbirdStream {
    handle: TrackHandle,
}

fn control_error(e: ControlError) -> MusicError {
    MusicError::PlaybackError(e.to_string())
}

#[async_trait]
impl StreamControl for SongbirdStream {
    fn pause(&self) -> MusicResult<()> {
        self.handle.pause().map_err(control_error)
    }

    fn resume(&self) -> MusicResult<()> {
        self.handle.play().map_err(control_error)
    }

    fn end(&self) -> MusicResult<()> {
        self.handle.stop().map_err(control_error)
    }

    fn set_volume(&self, volume: f32) -> MusicResult<()> {
        self.handle.set_volume(volume).map_err(control_error)
    }

    async fn position(&self) -> Option<Duration> {
        self.handle.get_info().await.ok().map(|info| info.position)
    }
}
