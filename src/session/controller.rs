//! Session controller
//!
//! Owns one capture device, one speech channel and the playback scheduler,
//! and moves a live session through
//! `Idle -> Connecting -> Open -> Closed | Error`.
//!
//! Every input (captured frames, device readiness, channel events, finished
//! sources, UI commands) is an event handled to completion by
//! [`SessionController::handle`] or a command method. [`SessionController::run`]
//! feeds them in from their queues on a single task, so nothing here waits on
//! a device or the network.

use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use uuid::Uuid;

use crate::audio::capture::CaptureDevice;
use crate::audio::graph::{OutputGraph, SourceId};
use crate::audio::playback::{PlaybackScheduler, PlaybackStats};
use crate::codec::pcm;
use crate::config::AudioConfig;
use crate::error::{AudioError, Error, Result, SessionError};
use crate::profile::Profile;
use crate::session::channel::{ChannelEvent, ChannelSetup, SpeechChannel};

/// Connection state of the live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
}

impl SessionState {
    /// Connecting or open
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Open)
    }
}

/// Input to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One full frame from the capture pipeline
    Captured(Vec<f32>),
    /// Outcome of acquiring the microphone
    CaptureReady(std::result::Result<(), AudioError>),
    Channel(ChannelEvent),
    SourceEnded(SourceId),
}

/// Requests from the UI side
#[derive(Debug)]
pub enum Command {
    Start {
        profile: Profile,
        reply: oneshot::Sender<Result<Uuid>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    /// Queue synthesized PCM on the session timeline; replies with its start
    Play {
        pcm: Bytes,
        reply: oneshot::Sender<Option<f64>>,
    },
}

/// Per-session counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
}

/// The live session state machine
pub struct SessionController<C: CaptureDevice, R: SpeechChannel, G: OutputGraph> {
    capture: C,
    channel: R,
    scheduler: PlaybackScheduler<G>,
    audio: AudioConfig,

    session_id: Option<Uuid>,
    /// Frames and the readiness report of the current session's capture
    capture_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    channel_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    /// Setup to open the channel with once the microphone is ours
    awaiting_capture: Option<ChannelSetup>,
    pending_start: Option<oneshot::Sender<Result<Uuid>>>,
    ended_rx: mpsc::UnboundedReceiver<SourceId>,

    state_tx: watch::Sender<SessionState>,
    speaking_tx: watch::Sender<bool>,
    errors_tx: broadcast::Sender<String>,
    stats: SessionStats,
}

impl<C, R, G> SessionController<C, R, G>
where
    C: CaptureDevice,
    R: SpeechChannel,
    G: OutputGraph,
{
    pub fn new(capture: C, channel: R, mut graph: G, config: &AudioConfig) -> Self {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        graph.set_ended_sink(ended_tx);

        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (speaking_tx, _) = watch::channel(false);
        let (errors_tx, _) = broadcast::channel(16);

        Self {
            capture,
            channel,
            scheduler: PlaybackScheduler::new(graph, config.scheduler()),
            audio: config.clone(),
            session_id: None,
            capture_rx: None,
            channel_rx: None,
            awaiting_capture: None,
            pending_start: None,
            ended_rx,
            state_tx,
            speaking_tx,
            errors_tx,
            stats: SessionStats::default(),
        }
    }

    /// Begin acquiring the microphone and move to `Connecting`.
    ///
    /// Returns as soon as acquisition is under way. The channel opens when
    /// [`SessionEvent::CaptureReady`] reports success; on any failure
    /// everything acquired so far is released, one error notice goes out and
    /// the state returns to `Idle`.
    pub fn start(&mut self, profile: &Profile) -> Result<Uuid> {
        if self.state().is_active() {
            return Err(SessionError::AlreadyActive.into());
        }

        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.stats = SessionStats::default();
        self.set_state(SessionState::Connecting);

        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let frames_tx = capture_tx.clone();
        let on_frame = Box::new(move |frame: Vec<f32>| {
            // Receiver gone means the session ended; late frames are moot
            let _ = frames_tx.send(SessionEvent::Captured(frame));
        });
        let on_ready = Box::new(move |result: std::result::Result<(), AudioError>| {
            let _ = capture_tx.send(SessionEvent::CaptureReady(result));
        });
        if let Err(e) = self.capture.start(on_frame, on_ready) {
            return Err(self.abort_start(e.into()));
        }

        self.capture_rx = Some(capture_rx);
        self.awaiting_capture = Some(ChannelSetup::for_profile(profile, &self.audio));

        tracing::info!(
            session_id = %session_id,
            profile = %profile.id,
            voice = %profile.voice,
            "acquiring microphone"
        );
        Ok(session_id)
    }

    fn on_capture_ready(&mut self, result: std::result::Result<(), AudioError>) {
        let Some(setup) = self.awaiting_capture.take() else {
            tracing::debug!(?result, "ignoring capture result outside a start");
            return;
        };

        let opened = match result {
            Ok(()) => self.open_channel(&setup),
            Err(e) => Err(e.into()),
        };

        match opened {
            Ok(()) => {
                tracing::info!(session_id = ?self.session_id, "live session connecting");
                if let (Some(reply), Some(id)) = (self.pending_start.take(), self.session_id) {
                    let _ = reply.send(Ok(id));
                }
            }
            Err(err) => {
                self.capture.stop();
                let err = self.abort_start(err);
                if let Some(reply) = self.pending_start.take() {
                    let _ = reply.send(Err(err));
                }
            }
        }
    }

    fn open_channel(&mut self, setup: &ChannelSetup) -> Result<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.channel.open(setup, events_tx)?;
        self.channel_rx = Some(events_rx);
        Ok(())
    }

    fn abort_start(&mut self, err: Error) -> Error {
        tracing::error!(session_id = ?self.session_id, error = %err, "live session failed to start");
        self.notify(err.to_string());
        self.session_id = None;
        self.capture_rx = None;
        self.set_state(SessionState::Idle);
        err
    }

    /// End the session. No-op unless connecting or open.
    pub fn stop(&mut self) {
        if self.state().is_active() {
            self.shut_down(SessionState::Closed);
        }
    }

    /// Apply one event
    pub fn handle(&mut self, event: SessionEvent, now: Instant) {
        match event {
            SessionEvent::Captured(frame) => self.forward_frame(frame),
            SessionEvent::CaptureReady(result) => self.on_capture_ready(result),
            SessionEvent::Channel(event) => self.on_channel_event(event),
            SessionEvent::SourceEnded(id) => self.scheduler.on_source_ended(id, now),
        }
        self.publish_speaking();
    }

    /// Apply the speaking debounce
    pub fn tick(&mut self, now: Instant) {
        if self.scheduler.poll_speaking(now) {
            self.publish_speaking();
        }
    }

    fn forward_frame(&mut self, frame: Vec<f32>) {
        if self.state() != SessionState::Open {
            self.stats.frames_dropped += 1;
            return;
        }
        match self.channel.send(pcm::encode(&frame)) {
            Ok(()) => self.stats.frames_sent += 1,
            Err(e) => self.fail(e),
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        let state = self.state();
        match event {
            ChannelEvent::Opened if state == SessionState::Connecting => {
                tracing::info!(session_id = ?self.session_id, "live session open");
                self.set_state(SessionState::Open);
            }
            ChannelEvent::Chunk(bytes) if state == SessionState::Open => {
                self.scheduler.accept_chunk(&bytes);
            }
            ChannelEvent::Interrupted if state == SessionState::Open => {
                let stopped = self.scheduler.interrupt();
                tracing::debug!(session_id = ?self.session_id, stopped, "host interrupted");
            }
            ChannelEvent::TurnComplete => {
                tracing::debug!(session_id = ?self.session_id, "turn complete");
            }
            ChannelEvent::Closed if state.is_active() => {
                tracing::info!(session_id = ?self.session_id, "remote closed the session");
                self.shut_down(SessionState::Closed);
            }
            ChannelEvent::Error(message) if state.is_active() => {
                self.fail(SessionError::Transport(message));
            }
            other => {
                tracing::debug!(?state, event = ?other, "ignoring channel event");
            }
        }
    }

    fn fail(&mut self, err: SessionError) {
        if !self.state().is_active() {
            return;
        }
        tracing::error!(session_id = ?self.session_id, error = %err, "live session failed");
        self.notify(err.to_string());
        self.shut_down(SessionState::Error);
    }

    fn shut_down(&mut self, terminal: SessionState) {
        self.capture.stop();
        self.scheduler.teardown();
        self.channel.close();
        self.capture_rx = None;
        self.channel_rx = None;
        if self.awaiting_capture.take().is_some() {
            tracing::debug!(session_id = ?self.session_id, "start abandoned while acquiring microphone");
        }
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(SessionError::Cancelled.into()));
        }

        tracing::info!(
            session_id = ?self.session_id,
            state = ?terminal,
            frames_sent = self.stats.frames_sent,
            chunks_played = self.scheduler.stats().chunks_scheduled,
            "live session ended"
        );
        self.set_state(terminal);
        self.publish_speaking();
    }

    fn notify(&self, message: String) {
        // Nobody listening is fine
        let _ = self.errors_tx.send(message);
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    fn publish_speaking(&self) {
        let speaking = self.scheduler.is_speaking();
        self.speaking_tx.send_if_modified(|current| {
            let changed = *current != speaking;
            *current = speaking;
            changed
        });
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Start { profile, reply } => match self.start(&profile) {
                // Answered once the microphone reports in
                Ok(_) => self.pending_start = Some(reply),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            Command::Play { pcm, reply } => {
                let start = self.scheduler.accept_chunk(&pcm);
                self.publish_speaking();
                let _ = reply.send(start);
            }
        }
    }

    /// Drive the controller until the command queue closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let deadline = self.scheduler.speaking_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.execute(command),
                    None => break,
                },
                Some(event) = recv_next(&mut self.capture_rx) => {
                    self.handle(event, clock_now());
                }
                Some(event) = recv_next(&mut self.channel_rx) => {
                    self.handle(SessionEvent::Channel(event), clock_now());
                }
                Some(id) = self.ended_rx.recv() => {
                    self.handle(SessionEvent::SourceEnded(id), clock_now());
                }
                _ = wait_until(deadline) => self.tick(clock_now()),
            }
        }

        self.stop();
        tracing::debug!("session controller stopped");
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_speaking(&self) -> bool {
        self.scheduler.is_speaking()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn watch_speaking(&self) -> watch::Receiver<bool> {
        self.speaking_tx.subscribe()
    }

    /// Sender side of the error notices, for handing out subscriptions
    pub fn error_notices(&self) -> broadcast::Sender<String> {
        self.errors_tx.clone()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn playback_stats(&self) -> &PlaybackStats {
        self.scheduler.stats()
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<G> {
        &self.scheduler
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }
}

/// Paused-clock aware wall time
fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn recv_next<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::audio::capture::testing::FakeCapture;
    use crate::audio::graph::testing::ManualGraph;
    use crate::profile::ProfileCatalog;
    use crate::session::channel::testing::FakeChannel;

    type TestController = SessionController<FakeCapture, FakeChannel, ManualGraph>;

    fn controller_with(capture: FakeCapture, channel: FakeChannel) -> (TestController, ManualGraph) {
        let graph = ManualGraph::new();
        let controller = SessionController::new(capture, channel, graph.clone(), &AudioConfig::default());
        (controller, graph)
    }

    fn profile() -> Profile {
        ProfileCatalog::builtin().lookup("Calm").unwrap().clone()
    }

    /// Apply whatever the capture side has reported so far
    fn settle(controller: &mut TestController) {
        while let Some(event) = controller.capture_rx.as_mut().and_then(|rx| rx.try_recv().ok()) {
            controller.handle(event, Instant::now());
        }
    }

    fn open_session() -> (TestController, FakeCapture, FakeChannel, ManualGraph) {
        let capture = FakeCapture::new();
        let channel = FakeChannel::new();
        let (mut controller, graph) = controller_with(capture.clone(), channel.clone());
        controller.start(&profile()).unwrap();
        settle(&mut controller);
        controller.handle(SessionEvent::Channel(ChannelEvent::Opened), Instant::now());
        assert_eq!(controller.state(), SessionState::Open);
        (controller, capture, channel, graph)
    }

    fn chunk(seconds: f32) -> ChannelEvent {
        ChannelEvent::Chunk(pcm::encode(&vec![0.1; (seconds * 24000.0) as usize]))
    }

    #[test]
    fn test_device_unavailable_leaves_idle() {
        let capture = FakeCapture::failing(AudioError::DeviceUnavailable("permission denied".to_string()));
        let channel = FakeChannel::new();
        let (mut controller, _graph) = controller_with(capture, channel.clone());
        let mut errors = controller.error_notices().subscribe();

        controller.start(&profile()).unwrap();
        assert_eq!(controller.state(), SessionState::Connecting);
        settle(&mut controller);
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.session_id().is_none());
        assert!(channel.setups().is_empty());

        assert!(errors.try_recv().unwrap().contains("permission denied"));
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_channel_refusal_releases_microphone() {
        let capture = FakeCapture::new();
        let (mut controller, _graph) = controller_with(capture.clone(), FakeChannel::refusing("no route"));

        controller.start(&profile()).unwrap();
        settle(&mut controller);
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(capture.starts(), 1);
        assert!(!capture.running());
    }

    #[test]
    fn test_setup_carries_profile() {
        let (controller, _capture, channel, _graph) = open_session();
        let setups = channel.setups();
        assert_eq!(setups.len(), 1);
        assert_eq!(setups[0].voice, "Kore");
        assert_eq!(setups[0].input_sample_rate, 16000);
        assert_eq!(setups[0].output_sample_rate, 24000);
        assert_eq!(setups[0].mime_type, "audio/pcm;rate=16000");
        assert!(controller.session_id().is_some());
    }

    #[test]
    fn test_second_start_is_rejected() {
        let (mut controller, _capture, channel, _graph) = open_session();
        assert!(matches!(
            controller.start(&profile()),
            Err(Error::Session(SessionError::AlreadyActive))
        ));
        assert_eq!(controller.state(), SessionState::Open);
        assert_eq!(channel.setups().len(), 1);
    }

    #[test]
    fn test_frames_forwarded_only_when_open() {
        let capture = FakeCapture::new();
        let channel = FakeChannel::new();
        let (mut controller, _graph) = controller_with(capture, channel.clone());
        controller.start(&profile()).unwrap();
        settle(&mut controller);

        controller.handle(SessionEvent::Captured(vec![0.5; 4096]), Instant::now());
        assert!(channel.sent().is_empty());
        assert_eq!(controller.stats().frames_dropped, 1);

        controller.handle(SessionEvent::Channel(ChannelEvent::Opened), Instant::now());
        controller.handle(SessionEvent::Captured(vec![0.5; 4096]), Instant::now());

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 4096 * 2);
        assert_eq!(sent[0], pcm::encode(&[0.5; 4096]));
    }

    #[test]
    fn test_chunks_play_and_interrupt_stays_open() {
        let (mut controller, _capture, _channel, graph) = open_session();
        let speaking = controller.watch_speaking();

        controller.handle(SessionEvent::Channel(chunk(1.0)), Instant::now());
        controller.handle(SessionEvent::Channel(chunk(1.0)), Instant::now());
        assert_eq!(graph.started().len(), 2);
        assert!(*speaking.borrow());

        controller.handle(SessionEvent::Channel(ChannelEvent::Interrupted), Instant::now());
        assert_eq!(controller.state(), SessionState::Open);
        assert_eq!(controller.scheduler().pending_count(), 0);
        assert_eq!(controller.scheduler().next_start_time(), 0.0);
        assert_eq!(graph.stopped().len(), 2);
        assert!(!*speaking.borrow());
    }

    #[test]
    fn test_malformed_chunk_keeps_state() {
        let (mut controller, _capture, _channel, graph) = open_session();
        let state = controller.watch_state();

        controller.handle(SessionEvent::Channel(chunk(0.5)), Instant::now());
        controller.handle(
            SessionEvent::Channel(ChannelEvent::Chunk(Bytes::from_static(&[1, 2, 3]))),
            Instant::now(),
        );
        controller.handle(SessionEvent::Channel(chunk(0.5)), Instant::now());

        assert_eq!(*state.borrow(), SessionState::Open);
        let started = graph.started();
        assert_eq!(started.len(), 2);
        assert!((started[1].at - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_speaking_debounce_through_events() {
        let (mut controller, _capture, _channel, graph) = open_session();
        let t0 = Instant::now();

        controller.handle(SessionEvent::Channel(chunk(1.0)), t0);
        for id in graph.advance_to(1.0) {
            controller.handle(SessionEvent::SourceEnded(id), t0);
        }
        assert!(controller.is_speaking());

        controller.tick(t0 + Duration::from_millis(199));
        assert!(controller.is_speaking());
        controller.tick(t0 + Duration::from_millis(200));
        assert!(!controller.is_speaking());
    }

    #[test]
    fn test_stop_twice_is_idempotent() {
        let (mut controller, capture, channel, graph) = open_session();
        controller.handle(SessionEvent::Channel(chunk(1.0)), Instant::now());

        controller.stop();
        assert_eq!(controller.state(), SessionState::Closed);
        let stopped = graph.stopped();

        controller.stop();
        assert_eq!(controller.state(), SessionState::Closed);
        assert_eq!(graph.stopped(), stopped);
        assert_eq!(capture.stops(), 1);
        assert_eq!(channel.closes(), 1);
        assert!(!controller.is_speaking());
    }

    #[test]
    fn test_transport_error_tears_down_once() {
        let (mut controller, capture, channel, graph) = open_session();
        let mut errors = controller.error_notices().subscribe();
        controller.handle(SessionEvent::Channel(chunk(1.0)), Instant::now());

        controller.handle(
            SessionEvent::Channel(ChannelEvent::Error("socket reset".to_string())),
            Instant::now(),
        );
        assert_eq!(controller.state(), SessionState::Error);
        assert!(!capture.running());
        assert!(!channel.is_open());
        assert_eq!(graph.live_count(), 0);

        // Late events from the dead session change nothing
        controller.handle(SessionEvent::Channel(ChannelEvent::Closed), Instant::now());
        controller.handle(
            SessionEvent::Channel(ChannelEvent::Error("again".to_string())),
            Instant::now(),
        );
        assert_eq!(controller.state(), SessionState::Error);
        assert!(errors.try_recv().unwrap().contains("socket reset"));
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_send_failure_is_transport_error() {
        let (mut controller, _capture, channel, _graph) = open_session();
        channel.fail_sends();

        controller.handle(SessionEvent::Captured(vec![0.0; 16]), Instant::now());
        assert_eq!(controller.state(), SessionState::Error);
    }

    #[test]
    fn test_remote_close_then_fresh_session() {
        let (mut controller, capture, channel, _graph) = open_session();
        let first = controller.session_id().unwrap();

        controller.handle(SessionEvent::Channel(ChannelEvent::Closed), Instant::now());
        assert_eq!(controller.state(), SessionState::Closed);

        let second = controller.start(&profile()).unwrap();
        settle(&mut controller);
        assert_ne!(first, second);
        assert_eq!(controller.state(), SessionState::Connecting);
        assert_eq!(capture.starts(), 2);
        assert_eq!(channel.setups().len(), 2);
    }

    #[test]
    fn test_slow_acquisition_stays_connecting() {
        let capture = FakeCapture::slow();
        let channel = FakeChannel::new();
        let (mut controller, _graph) = controller_with(capture.clone(), channel.clone());

        controller.start(&profile()).unwrap();
        settle(&mut controller);
        assert_eq!(controller.state(), SessionState::Connecting);
        assert!(channel.setups().is_empty());

        // Frames ahead of the open channel are dropped
        assert!(capture.emit(vec![0.1; 4096]));
        settle(&mut controller);
        assert_eq!(controller.stats().frames_dropped, 1);

        assert!(capture.finish_start(Ok(())));
        settle(&mut controller);
        assert_eq!(controller.state(), SessionState::Connecting);
        assert_eq!(channel.setups().len(), 1);
        assert!(channel.is_open());
    }

    #[test]
    fn test_stop_while_acquiring_discards_late_ready() {
        let capture = FakeCapture::slow();
        let channel = FakeChannel::new();
        let (mut controller, _graph) = controller_with(capture.clone(), channel.clone());
        let mut errors = controller.error_notices().subscribe();

        controller.start(&profile()).unwrap();
        controller.stop();
        assert_eq!(controller.state(), SessionState::Closed);
        assert_eq!(capture.stops(), 1);

        assert!(capture.finish_start(Ok(())));
        settle(&mut controller);
        assert_eq!(controller.state(), SessionState::Closed);
        assert!(channel.setups().is_empty());
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_late_acquisition_failure_is_one_notice() {
        let capture = FakeCapture::slow();
        let (mut controller, _graph) = controller_with(capture.clone(), FakeChannel::new());
        let mut errors = controller.error_notices().subscribe();

        controller.start(&profile()).unwrap();
        assert!(capture.finish_start(Err(AudioError::DeviceUnavailable("unplugged".to_string()))));
        settle(&mut controller);

        assert_eq!(controller.state(), SessionState::Idle);
        assert!(!capture.running());
        assert!(errors.try_recv().unwrap().contains("unplugged"));
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_commands_handled_while_microphone_opens() {
        let capture = FakeCapture::slow();
        let channel = FakeChannel::new();
        let (controller, _graph) = controller_with(capture.clone(), channel.clone());
        let mut state = controller.watch_state();

        let (commands_tx, commands_rx) = mpsc::channel(8);
        let task = tokio::spawn(controller.run(commands_rx));

        let (reply, first_start) = oneshot::channel();
        commands_tx
            .send(Command::Start { profile: profile(), reply })
            .await
            .unwrap();
        state.wait_for(|s| *s == SessionState::Connecting).await.unwrap();

        // The loop is free: a stop goes through and cancels the start
        let (reply, stopped) = oneshot::channel();
        commands_tx.send(Command::Stop { reply }).await.unwrap();
        timeout(Duration::from_secs(5), stopped).await.unwrap().unwrap();
        assert_eq!(*state.borrow(), SessionState::Closed);
        assert!(matches!(
            first_start.await.unwrap(),
            Err(Error::Session(SessionError::Cancelled))
        ));

        // A second start answers once the device reports in
        let (reply, second_start) = oneshot::channel();
        commands_tx
            .send(Command::Start { profile: profile(), reply })
            .await
            .unwrap();
        state.wait_for(|s| *s == SessionState::Connecting).await.unwrap();
        assert!(capture.finish_start(Ok(())));
        let session_id = timeout(Duration::from_secs(5), second_start)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!session_id.is_nil());
        assert_eq!(channel.setups().len(), 1);

        drop(commands_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_play_command_uses_session_timeline() {
        let (controller, graph) = controller_with(FakeCapture::new(), FakeChannel::new());
        let speaking = controller.watch_speaking();
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let task = tokio::spawn(controller.run(commands_rx));

        let (reply, response) = oneshot::channel();
        commands_tx
            .send(Command::Play {
                pcm: pcm::encode(&[0.3; 12000]),
                reply,
            })
            .await
            .unwrap();
        assert_eq!(response.await.unwrap(), Some(0.0));

        let (reply, response) = oneshot::channel();
        commands_tx
            .send(Command::Play {
                pcm: Bytes::from_static(&[7]),
                reply,
            })
            .await
            .unwrap();
        assert_eq!(response.await.unwrap(), None);

        assert_eq!(graph.started().len(), 1);
        assert!(*speaking.borrow());

        drop(commands_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_end_to_end() {
        let capture = FakeCapture::new();
        let channel = FakeChannel::new();
        let (controller, _graph) = controller_with(capture.clone(), channel.clone());
        let mut state = controller.watch_state();

        let (commands_tx, commands_rx) = mpsc::channel(8);
        let task = tokio::spawn(controller.run(commands_rx));

        let (reply, response) = oneshot::channel();
        commands_tx
            .send(Command::Start { profile: profile(), reply })
            .await
            .unwrap();
        response.await.unwrap().unwrap();
        assert_eq!(*state.borrow_and_update(), SessionState::Connecting);

        assert!(channel.emit(ChannelEvent::Opened));
        state.wait_for(|s| *s == SessionState::Open).await.unwrap();

        assert!(capture.emit(vec![0.25; 4096]));
        tokio::time::timeout(Duration::from_secs(5), async {
            while channel.sent().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let (reply, response) = oneshot::channel();
        commands_tx.send(Command::Stop { reply }).await.unwrap();
        response.await.unwrap();
        assert_eq!(*state.borrow(), SessionState::Closed);

        drop(commands_tx);
        task.await.unwrap();
    }
}
