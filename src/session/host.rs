//! UI-facing handle on a running session controller

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::capture::CaptureDevice;
use crate::audio::graph::OutputGraph;
use crate::audio::visualizer::{Analyser, AnalyserSettings};
use crate::error::{Result, SessionError};
use crate::profile::{Profile, ProfileCatalog};
use crate::search::{AnswerPlayer, SearchFlow, SearchOutcome};
use crate::session::channel::SpeechChannel;
use crate::session::controller::{Command, SessionController, SessionState};

/// What a presentation layer talks to
///
/// Spawns the controller onto its own task and keeps the observables and
/// both analysers on this side.
pub struct LiveHost {
    commands: mpsc::Sender<Command>,
    catalog: ProfileCatalog,
    state: watch::Receiver<SessionState>,
    speaking: watch::Receiver<bool>,
    errors: broadcast::Sender<String>,
    input_analyser: Mutex<Analyser>,
    output_analyser: Mutex<Analyser>,
    search: Option<Arc<SearchFlow>>,
    task: JoinHandle<()>,
}

/// Plays answers on the controller's timeline
struct SessionPlayer {
    commands: mpsc::Sender<Command>,
}

impl AnswerPlayer for SessionPlayer {
    fn play(&mut self, pcm: Bytes) -> BoxFuture<'_, Option<f64>> {
        async move {
            let (reply, response) = oneshot::channel();
            self.commands.send(Command::Play { pcm, reply }).await.ok()?;
            response.await.ok().flatten()
        }
        .boxed()
    }
}

impl LiveHost {
    /// Move `controller` onto a tokio task. Must be called inside a runtime.
    pub fn spawn<C, R, G>(
        controller: SessionController<C, R, G>,
        catalog: ProfileCatalog,
        settings: AnalyserSettings,
    ) -> Self
    where
        C: CaptureDevice + Send + 'static,
        R: SpeechChannel + Send + 'static,
        G: OutputGraph + Send + 'static,
    {
        let input_analyser = Analyser::new(controller.capture().tap(), settings);
        let output_analyser = Analyser::new(controller.scheduler().graph().tap(), settings);
        let state = controller.watch_state();
        let speaking = controller.watch_speaking();
        let errors = controller.error_notices();

        let (commands, commands_rx) = mpsc::channel(16);
        let task = tokio::spawn(controller.run(commands_rx));

        Self {
            commands,
            catalog,
            state,
            speaking,
            errors,
            input_analyser: Mutex::new(input_analyser),
            output_analyser: Mutex::new(output_analyser),
            search: None,
            task,
        }
    }

    /// Enable [`ask`](Self::ask) with the given services
    pub fn with_search(mut self, flow: SearchFlow) -> Self {
        self.search = Some(Arc::new(flow));
        self
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    /// Answer `query` in the manner of `profile_id` and speak the answer
    /// through the session's playback. `None` for a blank query.
    pub async fn ask(&self, query: &str, profile_id: &str) -> Result<Option<SearchOutcome>> {
        let flow = self.search.clone().ok_or(SessionError::SearchDisabled)?;
        let profile = self
            .catalog
            .lookup(profile_id)
            .ok_or_else(|| SessionError::UnknownProfile(profile_id.to_string()))?;

        let mut player = SessionPlayer {
            commands: self.commands.clone(),
        };
        Ok(flow.ask(query, profile, &mut player).await)
    }

    /// Start a session with the profile `profile_id`
    pub async fn start_live_session(&self, profile_id: &str) -> Result<Uuid> {
        let profile = self
            .catalog
            .lookup(profile_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownProfile(profile_id.to_string()))?;

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Start { profile, reply })
            .await
            .map_err(|_| SessionError::NotRunning)?;
        response.await.map_err(|_| SessionError::NotRunning)?
    }

    pub async fn stop_live_session(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Stop { reply })
            .await
            .map_err(|_| SessionError::NotRunning)?;
        response.await.map_err(|_| SessionError::NotRunning)?;
        Ok(())
    }

    /// Observable connection state
    pub fn connection_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observable "host is talking" flag
    pub fn speaking(&self) -> watch::Receiver<bool> {
        self.speaking.clone()
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    /// One message per session failure
    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }

    /// Byte magnitudes of the microphone signal
    pub fn input_frequency_snapshot(&self) -> Vec<u8> {
        self.input_analyser.lock().frequency_snapshot()
    }

    /// Byte magnitudes of what the speakers play
    pub fn output_frequency_snapshot(&self) -> Vec<u8> {
        self.output_analyser.lock().frequency_snapshot()
    }

    pub fn profiles(&self) -> &[Profile] {
        self.catalog.list()
    }

    /// Stop any session and wait for the controller task to finish
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "session controller task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::testing::FakeCapture;
    use crate::audio::graph::testing::ManualGraph;
    use crate::config::AudioConfig;
    use crate::error::{AudioError, Error};
    use crate::search::testing::{FakeSearch, FakeSpeech};
    use crate::search::SEARCH_UNAVAILABLE;
    use crate::session::channel::testing::FakeChannel;
    use crate::session::channel::ChannelEvent;

    fn host() -> (LiveHost, FakeCapture, FakeChannel) {
        let capture = FakeCapture::new();
        let channel = FakeChannel::new();
        let config = AudioConfig::default();
        let controller = SessionController::new(capture.clone(), channel.clone(), ManualGraph::new(), &config);
        let host = LiveHost::spawn(controller, ProfileCatalog::builtin(), config.analyser());
        (host, capture, channel)
    }

    #[tokio::test]
    async fn test_unknown_profile() {
        let (host, capture, _channel) = host();
        let err = host.start_live_session("Nobody").await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::UnknownProfile(_))));
        assert_eq!(host.state(), SessionState::Idle);
        assert_eq!(capture.starts(), 0);
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_open_stop() {
        let (host, capture, channel) = host();
        let mut state = host.connection_state();

        host.start_live_session("Energetic").await.unwrap();
        assert_eq!(channel.setups()[0].voice, "Puck");

        channel.emit(ChannelEvent::Opened);
        state.wait_for(|s| *s == SessionState::Open).await.unwrap();

        host.stop_live_session().await.unwrap();
        assert_eq!(host.state(), SessionState::Closed);
        assert!(!capture.running());
        assert!(!host.is_speaking());

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_device_failure_answers_the_start() {
        let capture = FakeCapture::failing(AudioError::DeviceUnavailable("no microphone".to_string()));
        let config = AudioConfig::default();
        let controller = SessionController::new(capture, FakeChannel::new(), ManualGraph::new(), &config);
        let host = LiveHost::spawn(controller, ProfileCatalog::builtin(), config.analyser());
        let mut errors = host.errors();

        let err = host.start_live_session("Calm").await.unwrap_err();
        assert!(matches!(err, Error::Audio(AudioError::DeviceUnavailable(_))));
        assert_eq!(host.state(), SessionState::Idle);
        assert!(errors.recv().await.unwrap().contains("no microphone"));

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_ask_speaks_on_the_session_timeline() {
        let graph = ManualGraph::new();
        let config = AudioConfig::default();
        let controller = SessionController::new(FakeCapture::new(), FakeChannel::new(), graph.clone(), &config);
        let flow = SearchFlow::new(
            Arc::new(FakeSearch::answering("High tide is at noon.", 4)),
            Arc::new(FakeSpeech { works: true }),
        );
        let host = LiveHost::spawn(controller, ProfileCatalog::builtin(), config.analyser()).with_search(flow);
        let mut speaking = host.speaking();

        let outcome = host.ask("When is high tide?", "Calm").await.unwrap().unwrap();
        assert_eq!(outcome.answer.text, "High tide is at noon.");
        assert_eq!(outcome.start_time, Some(0.0));
        assert_eq!(graph.started().len(), 1);
        speaking.wait_for(|s| *s).await.unwrap();

        assert!(host.ask("  ", "Calm").await.unwrap().is_none());
        assert!(matches!(
            host.ask("tides", "Nobody").await,
            Err(Error::Session(SessionError::UnknownProfile(_)))
        ));

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_ask_without_search_is_refused() {
        let (host, _capture, _channel) = host();
        assert!(!host.has_search());
        assert!(matches!(
            host.ask("tides", "Calm").await,
            Err(Error::Session(SessionError::SearchDisabled))
        ));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_search_outage_still_answers() {
        let config = AudioConfig::default();
        let controller = SessionController::new(FakeCapture::new(), FakeChannel::new(), ManualGraph::new(), &config);
        let flow = SearchFlow::new(Arc::new(FakeSearch::failing()), Arc::new(FakeSpeech { works: true }));
        let host = LiveHost::spawn(controller, ProfileCatalog::builtin(), config.analyser()).with_search(flow);

        let outcome = host.ask("tides", "Helpful").await.unwrap().unwrap();
        assert_eq!(outcome.answer.text, SEARCH_UNAVAILABLE);
        assert!(outcome.start_time.is_some());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshots_have_bin_count() {
        let (host, _capture, _channel) = host();
        assert_eq!(host.input_frequency_snapshot().len(), 128);
        assert!(host.output_frequency_snapshot().iter().all(|&b| b == 0));
        assert_eq!(host.profiles().len(), 5);
        host.shutdown().await;
    }
}
