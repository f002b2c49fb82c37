//! Mock implementations for the bot's collaborators
//! A recording fake for the voice transport and a mockall resolver

use async_trait::async_trait;
use jukebox::commands::music::utils::transport::{
    SessionId, StreamControl, Transport, TransportEvent, TransportEventKind, TransportEventSender,
};
use jukebox::{MusicError, MusicResult, Track, TrackResolver, TrackStream};
use mockall::mock;
use serenity::model::id::{ChannelId, GuildId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

mock! {
    pub Resolver {}

    #[async_trait]
    impl TrackResolver for Resolver {
        async fn resolve_search(&self, term: &str) -> MusicResult<Track>;
        async fn resolve_video_url(&self, url: &str) -> MusicResult<Track>;
        async fn resolve_playlist(&self, url: &str) -> MusicResult<TrackStream>;
    }
}

/// Every intent the engine sends to the transport, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Join(ChannelId),
    Leave,
    Play { session: SessionId, track_id: String },
    Pause(SessionId),
    Resume(SessionId),
    End(SessionId),
    SetVolume(SessionId, f32),
}

type CallLog = Arc<Mutex<Vec<(GuildId, Call)>>>;

/// Transport that records calls instead of touching a voice gateway.
pub struct FakeTransport {
    calls: CallLog,
    events: TransportEventSender,
    fail_join: AtomicBool,
    fail_controls: Arc<AtomicBool>,
    failing_tracks: Mutex<HashSet<String>>,
    join_gate: Mutex<Option<Arc<Notify>>>,
    /// Signalled whenever a join starts.
    pub join_entered: Notify,
}

impl FakeTransport {
    pub fn new(events: TransportEventSender) -> Self {
        Self {
            calls: Arc::default(),
            events,
            fail_join: AtomicBool::new(false),
            fail_controls: Arc::default(),
            failing_tracks: Mutex::default(),
            join_gate: Mutex::default(),
            join_entered: Notify::new(),
        }
    }

    pub fn fail_join(&self) {
        self.fail_join.store(true, Ordering::SeqCst);
    }

    /// Makes every control on every stream fail, like songbird does once a
    /// track has finished.
    pub fn fail_controls(&self) {
        self.fail_controls.store(true, Ordering::SeqCst);
    }

    pub fn fail_play(&self, track_id: &str) {
        self.failing_tracks.lock().unwrap().insert(track_id.to_string());
    }

    /// Makes joins wait until the returned `Notify` is signalled.
    pub fn hold_joins(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.join_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(_, call)| call.clone()).collect()
    }

    pub fn calls_for(&self, guild_id: GuildId) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(guild, _)| *guild == guild_id)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn sessions(&self, guild_id: GuildId) -> Vec<SessionId> {
        self.calls_for(guild_id)
            .into_iter()
            .filter_map(|call| match call {
                Call::Play { session, .. } => Some(session),
                _ => None,
            })
            .collect()
    }

    pub fn last_session(&self, guild_id: GuildId) -> SessionId {
        *self.sessions(guild_id).last().expect("nothing was played")
    }

    /// The current track runs out on its own.
    pub fn finish(&self, guild_id: GuildId) {
        self.report(guild_id, self.last_session(guild_id), TransportEventKind::Finished);
    }

    /// The current track breaks off mid-stream.
    pub fn break_off(&self, guild_id: GuildId, cause: &str) {
        self.report(
            guild_id,
            self.last_session(guild_id),
            TransportEventKind::Failed(cause.to_string()),
        );
    }

    pub fn report(&self, guild_id: GuildId, session: SessionId, kind: TransportEventKind) {
        let _ = self.events.send(TransportEvent {
            guild_id,
            session,
            kind,
        });
    }

    fn record(&self, guild_id: GuildId, call: Call) {
        self.calls.lock().unwrap().push((guild_id, call));
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn join(&self, guild_id: GuildId, room: ChannelId) -> MusicResult<()> {
        self.record(guild_id, Call::Join(room));
        self.join_entered.notify_one();

        let gate = self.join_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail_join.load(Ordering::SeqCst) {
            return Err(MusicError::JoinError("voice gateway timed out".to_string()));
        }
        Ok(())
    }

    async fn leave(&self, guild_id: GuildId) -> MusicResult<()> {
        self.record(guild_id, Call::Leave);
        Ok(())
    }

    async fn play(
        &self,
        guild_id: GuildId,
        session: SessionId,
        track: &Track,
    ) -> MusicResult<Arc<dyn StreamControl>> {
        if self.failing_tracks.lock().unwrap().contains(&track.id) {
            return Err(MusicError::PlaybackError(format!("{} is unavailable", track.id)));
        }

        self.record(
            guild_id,
            Call::Play {
                session,
                track_id: track.id.clone(),
            },
        );

        Ok(Arc::new(FakeStream {
            guild_id,
            session,
            calls: Arc::clone(&self.calls),
            events: self.events.clone(),
            ended: AtomicBool::new(false),
            failing: Arc::clone(&self.fail_controls),
        }))
    }
}

/// Records controls and reports `Finished` once when ended, like a real transport.
pub struct FakeStream {
    guild_id: GuildId,
    session: SessionId,
    calls: CallLog,
    events: TransportEventSender,
    ended: AtomicBool,
    failing: Arc<AtomicBool>,
}

impl FakeStream {
    /// Records `call`, or fails without recording it when controls are failing.
    fn record(&self, call: Call) -> MusicResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MusicError::PlaybackError("track has finished".to_string()));
        }
        self.calls.lock().unwrap().push((self.guild_id, call));
        Ok(())
    }
}

#[async_trait]
impl StreamControl for FakeStream {
    fn pause(&self) -> MusicResult<()> {
        self.record(Call::Pause(self.session))
    }

    fn resume(&self) -> MusicResult<()> {
        self.record(Call::Resume(self.session))
    }

    fn end(&self) -> MusicResult<()> {
        self.record(Call::End(self.session))?;
        if !self.ended.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent {
                guild_id: self.guild_id,
                session: self.session,
                kind: TransportEventKind::Finished,
            });
        }
        Ok(())
    }

    fn set_volume(&self, volume: f32) -> MusicResult<()> {
        self.record(Call::SetVolume(self.session, volume))
    }

    async fn position(&self) -> Option<Duration> {
        Some(Duration::from_secs(42))
    }
}
