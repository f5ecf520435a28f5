use crate::core::DaemonEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tuner_proto::protocol::{Command, PlaybackStatus};
use tuner_proto::state::StateManager;

#[derive(Clone)]
pub struct HttpState {
    pub state_manager: Arc<StateManager>,
    pub event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Serialize)]
struct ApiState {
    stations: Vec<StationInfo>,
    active_id: Option<String>,
    playing_id: Option<String>,
    only_favorites: bool,
    status: PlaybackStatus,
    volume: f32,
    last_error: Option<String>,
    sleep_remaining: Option<String>,
}

#[derive(Serialize)]
struct StationInfo {
    id: String,
    name: String,
    favorite: bool,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/play", get(play).post(play))
        .route("/api/play/:id", get(play_station).post(play_station))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/next", get(next_station).post(next_station))
        .route("/api/prev", get(prev_station).post(prev_station))
        .route("/api/volume/:volume", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/sleep/:minutes", post(set_sleep).get(set_sleep))
        .route("/api/sleep", axum::routing::delete(cancel_sleep))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState {
            state_manager,
            event_tx,
        });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state
        .event_tx
        .send(DaemonEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("Failed to send command to core");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let daemon_state = state.state_manager.get_state().await;
    let catalog = &daemon_state.catalog;

    let stations = catalog
        .displayed()
        .into_iter()
        .map(|s| StationInfo {
            id: s.id.clone(),
            name: s.name.clone(),
            favorite: catalog.is_favorite(&s.id),
        })
        .collect();

    Json(ApiState {
        stations,
        active_id: catalog.active_id.clone(),
        playing_id: catalog.playing_id.clone(),
        only_favorites: catalog.only_favorites,
        status: daemon_state.playback_status,
        volume: daemon_state.volume,
        last_error: daemon_state.last_error.clone(),
        sleep_remaining: daemon_state
            .sleep_timer
            .as_ref()
            .and_then(|t| t.remaining.clone()),
    })
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::PlayActive).await
}

async fn play_station(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    if state.state_manager.catalog().await.get(&id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    send(
        &state,
        Command::Play {
            station_id: Some(id),
            url: None,
        },
    )
    .await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Stop).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::TogglePlay).await
}

async fn next_station(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Next).await
}

async fn prev_station(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Prev).await
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> StatusCode {
    let value = (volume as f32 / 100.0).clamp(0.0, 1.0);
    send(&state, Command::Volume { value }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let daemon_state = state.state_manager.get_state().await;
    let volume = (daemon_state.volume * 100.0).round() as u8;
    Json(VolumeStatus { volume })
}

async fn set_sleep(State(state): State<HttpState>, Path(minutes): Path<u32>) -> StatusCode {
    send(&state, Command::SleepTimer { minutes }).await
}

async fn cancel_sleep(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::CancelSleepTimer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn setup() -> (Router, mpsc::Receiver<DaemonEvent>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state_manager = Arc::new(StateManager::new(
            dir.path().join("state.json"),
            dir.path().join("stations.json"),
            0.5,
        ));
        let (event_tx, event_rx) = mpsc::channel(8);
        let app = router(HttpState {
            state_manager,
            event_tx,
        });
        (app, event_rx, dir)
    }

    async fn call(app: Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_state_lists_default_stations() {
        let (app, _rx, _dir) = setup();
        let (status, body) = call(app, Method::GET, "/api/state").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["stations"].as_array().unwrap().len(), 3);
        assert_eq!(json["status"], "idle");
        assert_eq!(json["volume"], 0.5);
    }

    #[tokio::test]
    async fn test_volume_is_clamped_percent() {
        let (app, mut rx, _dir) = setup();
        let (status, _) = call(app, Method::POST, "/api/volume/150").await;
        assert_eq!(status, StatusCode::OK);
        match rx.recv().await {
            Some(DaemonEvent::ClientCommand(Command::Volume { value })) => assert_eq!(value, 1.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_play_unknown_station_is_not_found() {
        let (app, mut rx, _dir) = setup();
        let (status, _) = call(app.clone(), Method::POST, "/api/play/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(app, Method::POST, "/api/play/synthwave-radio").await;
        assert_eq!(status, StatusCode::OK);
        match rx.recv().await {
            Some(DaemonEvent::ClientCommand(Command::Play { station_id, url })) => {
                assert_eq!(station_id.as_deref(), Some("synthwave-radio"));
                assert!(url.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sleep_timer_routes() {
        let (app, mut rx, _dir) = setup();
        call(app.clone(), Method::POST, "/api/sleep/30").await;
        call(app, Method::DELETE, "/api/sleep").await;
        assert!(matches!(
            rx.recv().await,
            Some(DaemonEvent::ClientCommand(Command::SleepTimer { minutes: 30 }))
        ));
        assert!(matches!(
            rx.recv().await,
            Some(DaemonEvent::ClientCommand(Command::CancelSleepTimer))
        ));
    }
}
