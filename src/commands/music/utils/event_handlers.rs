use serenity::async_trait;
use serenity::model::id::GuildId;
use songbird::tracks::PlayMode;
use songbird::{Event, EventContext, EventHandler};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use super::transport::{SessionId, TransportEvent, TransportEventKind, TransportEventSender};

/// Event handler for when a session's track ends or errors.
///
/// Registered for both `TrackEvent::End` and `TrackEvent::Error`; the shared
/// `reported` flag makes sure only one of them reaches the engine.
pub struct SessionEndNotifier {
    pub guild_id: GuildId,
    pub session: SessionId,
    pub events: TransportEventSender,
    pub reported: Arc<AtomicBool>,
}

#[async_trait]
impl EventHandler for SessionEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            let kind = match tracks.first() {
                Some((state, _)) => match &state.playing {
                    PlayMode::Errored(e) => TransportEventKind::Failed(format!("{:?}", e)),
                    _ => TransportEventKind::Finished,
                },
                None => TransportEventKind::Finished,
            };
            self.report(kind);
        }
        None
    }
}

impl SessionEndNotifier {
    fn report(&self, kind: TransportEventKind) {
        if self.reported.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(
            "Session {} in guild {} ended: {:?}",
            self.session, self.guild_id, kind
        );

        let event = TransportEvent {
            guild_id: self.guild_id,
            session: self.session,
            kind,
        };
        if self.events.send(event).is_err() {
            warn!(
                "Event loop is gone, dropping end of session {} in guild {}",
                self.session, self.guild_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    #[test]
    fn only_the_first_report_is_sent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = SessionEndNotifier {
            guild_id: GuildId::new(1),
            session: SessionId::new(7),
            events: tx,
            reported: Arc::new(AtomicBool::new(false)),
        };

        notifier.report(TransportEventKind::Failed("decoder".to_string()));
        notifier.report(TransportEventKind::Finished);

        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent {
                guild_id: GuildId::new(1),
                session: SessionId::new(7),
                kind: TransportEventKind::Failed("decoder".to_string()),
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
