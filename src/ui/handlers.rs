//! HTTP API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::audio::device::{list_devices, AudioDeviceInfo};
use crate::error::{Error, SessionError};
use crate::profile::Profile;
use crate::search::SearchSource;
use crate::session::SessionState;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Live session status
#[derive(Debug, serde::Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub speaking: bool,
}

#[derive(Debug, serde::Deserialize)]
pub struct StartRequest {
    pub profile_id: String,
}

#[derive(Debug, serde::Serialize)]
pub struct StartedSession {
    pub session_id: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub profile_id: String,
}

#[derive(Debug, serde::Serialize)]
pub struct SearchReply {
    pub text: String,
    /// At most three, for display
    pub sources: Vec<SearchSource>,
    /// Playback timeline instant the spoken answer starts at
    pub start_time: Option<f64>,
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Session(SessionError::UnknownProfile(_)) => StatusCode::NOT_FOUND,
        Error::Session(SessionError::AlreadyActive | SessionError::Cancelled) => StatusCode::CONFLICT,
        Error::Session(SessionError::SearchDisabled) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Audio(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Get session state
pub async fn get_session(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionStatus>> {
    Json(ApiResponse::ok(SessionStatus {
        state: state.host.state(),
        speaking: state.host.is_speaking(),
    }))
}

/// Start a live session
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> (StatusCode, Json<ApiResponse<StartedSession>>) {
    match state.host.start_live_session(&req.profile_id).await {
        Ok(id) => (
            StatusCode::OK,
            Json(ApiResponse::ok(StartedSession {
                session_id: id.to_string(),
            })),
        ),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// Stop the live session
pub async fn stop_session(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ApiResponse<()>>) {
    match state.host.stop_live_session().await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// Ask a search-grounded question; the answer is also spoken
pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> (StatusCode, Json<ApiResponse<SearchReply>>) {
    match state.host.ask(&req.query, &req.profile_id).await {
        Ok(Some(outcome)) => (
            StatusCode::OK,
            Json(ApiResponse::ok(SearchReply {
                sources: outcome.answer.display_sources().to_vec(),
                text: outcome.answer.text,
                start_time: outcome.start_time,
            })),
        ),
        Ok(None) => (StatusCode::BAD_REQUEST, Json(ApiResponse::error("query is empty"))),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// Get host profiles
pub async fn get_profiles(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<Profile>>> {
    Json(ApiResponse::ok(state.host.profiles().to_vec()))
}

/// Get a frequency snapshot of `input` (microphone) or `output` (speakers)
pub async fn get_spectrum(
    State(state): State<Arc<AppState>>,
    Path(node): Path<String>,
) -> (StatusCode, Json<ApiResponse<Vec<u8>>>) {
    match node.as_str() {
        "input" => (StatusCode::OK, Json(ApiResponse::ok(state.host.input_frequency_snapshot()))),
        "output" => (StatusCode::OK, Json(ApiResponse::ok(state.host.output_frequency_snapshot()))),
        other => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("unknown audio node: {other}"))),
        ),
    }
}

/// Get available audio devices
pub async fn get_devices() -> Json<ApiResponse<Vec<AudioDeviceInfo>>> {
    Json(ApiResponse::ok(list_devices()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::testing::FakeCapture;
    use crate::audio::graph::testing::ManualGraph;
    use crate::config::AudioConfig;
    use crate::profile::ProfileCatalog;
    use crate::search::testing::{FakeSearch, FakeSpeech};
    use crate::search::SearchFlow;
    use crate::session::channel::testing::FakeChannel;
    use crate::session::{LiveHost, SessionController};

    fn spawn_host() -> LiveHost {
        let config = AudioConfig::default();
        let controller = SessionController::new(FakeCapture::new(), FakeChannel::new(), ManualGraph::new(), &config);
        LiveHost::spawn(controller, ProfileCatalog::builtin(), config.analyser())
    }

    fn app_state() -> Arc<AppState> {
        Arc::new(AppState {
            host: Arc::new(spawn_host()),
        })
    }

    fn search_request(query: &str) -> Json<SearchRequest> {
        Json(SearchRequest {
            query: query.to_string(),
            profile_id: "Energetic".to_string(),
        })
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let state = app_state();

        let Json(status) = get_session(State(state.clone())).await;
        assert_eq!(status.data.unwrap().state, SessionState::Idle);

        let (code, Json(body)) = start_session(
            State(state.clone()),
            Json(StartRequest {
                profile_id: "Helpful".to_string(),
            }),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.success);

        let (code, _) = start_session(
            State(state.clone()),
            Json(StartRequest {
                profile_id: "Helpful".to_string(),
            }),
        )
        .await;
        assert_eq!(code, StatusCode::CONFLICT);

        let (code, _) = stop_session(State(state.clone())).await;
        assert_eq!(code, StatusCode::OK);
        let Json(status) = get_session(State(state)).await;
        assert_eq!(status.data.unwrap().state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_unknown_profile_is_not_found() {
        let (code, Json(body)) = start_session(
            State(app_state()),
            Json(StartRequest {
                profile_id: "nope".to_string(),
            }),
        )
        .await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert!(!body.success);
        assert!(body.error.unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_spectrum_and_profiles() {
        let state = app_state();

        let (code, Json(body)) = get_spectrum(State(state.clone()), Path("output".to_string())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.data.unwrap().len(), 128);

        let (code, _) = get_spectrum(State(state.clone()), Path("left".to_string())).await;
        assert_eq!(code, StatusCode::NOT_FOUND);

        let Json(body) = get_profiles(State(state)).await;
        let names: Vec<String> = body.data.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["Aiden", "Marcus", "Sparky", "Serena", "Grimm"]);
    }

    #[tokio::test]
    async fn test_search_answers_and_trims_sources() {
        let flow = SearchFlow::new(
            Arc::new(FakeSearch::answering("Three moons.", 6)),
            Arc::new(FakeSpeech { works: true }),
        );
        let state = Arc::new(AppState {
            host: Arc::new(spawn_host().with_search(flow)),
        });

        let (code, Json(body)) = search(State(state.clone()), search_request("How many moons?")).await;
        assert_eq!(code, StatusCode::OK);
        let reply = body.data.unwrap();
        assert_eq!(reply.text, "Three moons.");
        assert_eq!(reply.sources.len(), 3);
        assert_eq!(reply.start_time, Some(0.0));

        let (code, _) = search(State(state), search_request(" ")).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_unconfigured_is_unavailable() {
        let (code, Json(body)) = search(State(app_state()), search_request("anything")).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.success);
    }
}
