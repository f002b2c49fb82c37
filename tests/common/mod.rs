//! Common test utilities, fixtures, and mocks
//! This module contains shared functionality used across the integration tests
#![allow(dead_code)]

pub mod fixtures;
pub mod mocks;

use jukebox::commands::music::utils::transport::{Transport, TransportEvent};
use jukebox::{
    CallerContext, CommandInterpreter, CommandOutcome, MusicManager, MusicResult, PlaybackNotice,
};
use mocks::{FakeTransport, MockResolver};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

static INIT: Once = Once::new();

/// Initialize tracing for tests
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("jukebox=debug")
            .with_test_writer()
            .try_init();
    });
}

/// An engine and interpreter wired to a fake transport.
///
/// Transport events are not handled until `pump` is called, so tests decide
/// exactly when completions land.
pub struct Harness {
    pub manager: Arc<MusicManager>,
    pub interpreter: Arc<CommandInterpreter>,
    pub transport: Arc<FakeTransport>,
    events: UnboundedReceiver<TransportEvent>,
    notices: UnboundedReceiver<PlaybackNotice>,
}

impl Harness {
    pub fn new(resolver: MockResolver) -> Self {
        init_tracing();

        let (event_tx, events) = mpsc::unbounded_channel();
        let (notice_tx, notices) = mpsc::unbounded_channel();

        let transport = Arc::new(FakeTransport::new(event_tx));
        let manager = MusicManager::new(Arc::clone(&transport) as Arc<dyn Transport>, notice_tx);
        let interpreter = Arc::new(CommandInterpreter::new(
            Arc::clone(&manager),
            Arc::new(resolver),
            "!",
        ));

        Self {
            manager,
            interpreter,
            transport,
            events,
            notices,
        }
    }

    /// A harness whose resolver must not be called.
    pub fn without_resolver() -> Self {
        Self::new(MockResolver::new())
    }

    /// Runs a message that is expected to be a command.
    pub async fn run(&self, caller: &CallerContext, content: &str) -> MusicResult<CommandOutcome> {
        self.interpreter
            .handle_message(caller, content)
            .await
            .expect("message should be addressed to the bot")
    }

    /// Handles every transport event reported so far, in order.
    pub async fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.manager.handle_event(event).await;
        }
    }

    /// Hands the transport events to the engine's own event loop.
    pub fn start_event_loop(&mut self) {
        let (_, closed) = mpsc::unbounded_channel();
        let events = std::mem::replace(&mut self.events, closed);
        self.manager.spawn_event_loop(events);
    }

    /// Notices emitted so far.
    pub fn notices(&mut self) -> Vec<PlaybackNotice> {
        let mut notices = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            notices.push(notice);
        }
        notices
    }

    /// Waits for the next notice, failing the test after a second.
    pub async fn next_notice(&mut self) -> PlaybackNotice {
        tokio::time::timeout(Duration::from_secs(1), self.notices.recv())
            .await
            .expect("timed out waiting for a notice")
            .expect("notice channel closed")
    }
}

/// Polls `condition` until it holds, failing the test after a second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}
