use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use server_api::{
    cleanup_expired, create_lobby, get_assignment, get_game, get_lobby, get_progress,
    get_results, join_lobby, reorder_players, start_game, submit_entry, ApiContext,
};
use shared::{
    domain::{LobbyCode, PlayerId},
    error::{ApiError, ErrorCode},
    protocol::{
        AssignmentResponse, CreateLobbyRequest, CreateLobbyResponse, GameStateResponse,
        JoinLobbyRequest, JoinLobbyResponse, LobbyResponse, ProgressResponse, ReorderRequest,
        ResultsResponse, ServerEvent, StartGameRequest, SubmitEntryRequest, SubmitEntryResponse,
    },
};
use storage::open_store;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, normalize_database_url};

type HttpResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressQuery {
    player_id: Option<PlayerId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentQuery {
    player_id: PlayerId,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    code: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let database_url = normalize_database_url(&settings.database_url);
    let store = open_store(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open session store; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext::new(store, settings.game_rules());

    tokio::spawn(sweep_expired(
        api.clone(),
        Duration::from_secs(settings.cleanup_interval_seconds.max(1)),
    ));

    let state = AppState { api };
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, %database_url, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/lobby/create", post(http_create_lobby))
        .route("/lobby/join", post(http_join_lobby))
        .route("/lobby/:code", get(http_get_lobby))
        .route("/lobby/:code/order", post(http_reorder_players))
        .route("/lobby/:code/start", post(http_start_game))
        .route("/game/:code", get(http_get_game))
        .route("/game/:code/progress", get(http_get_progress))
        .route("/game/:code/assignment", get(http_get_assignment))
        .route("/game/:code/submit", post(http_submit_entry))
        .route("/game/:code/results", get(http_get_results))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = status_for(err.code);
    if status.is_server_error() {
        error!(message = %err.message, "request failed");
    } else {
        debug!(code = ?err.code, message = %err.message, "request rejected");
    }
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.store.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            warn!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn http_create_lobby(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateLobbyRequest>,
) -> HttpResult<CreateLobbyResponse> {
    let created = create_lobby(&state.api, &req.player_name)
        .await
        .map_err(reject)?;
    Ok(Json(created))
}

async fn http_join_lobby(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinLobbyRequest>,
) -> HttpResult<JoinLobbyResponse> {
    let joined = join_lobby(&state.api, &req.lobby_code, &req.player_name)
        .await
        .map_err(reject)?;
    Ok(Json(joined))
}

async fn http_get_lobby(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> HttpResult<LobbyResponse> {
    let lobby = get_lobby(&state.api, &code).await.map_err(reject)?;
    Ok(Json(LobbyResponse { lobby }))
}

async fn http_reorder_players(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(req): Json<ReorderRequest>,
) -> HttpResult<LobbyResponse> {
    let lobby = reorder_players(&state.api, &code, &req.player_id, req.player_order)
        .await
        .map_err(reject)?;
    Ok(Json(LobbyResponse { lobby }))
}

async fn http_start_game(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(req): Json<StartGameRequest>,
) -> HttpResult<GameStateResponse> {
    let game_state = start_game(&state.api, &code, &req.player_id)
        .await
        .map_err(reject)?;
    Ok(Json(GameStateResponse { game_state }))
}

async fn http_get_game(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> HttpResult<GameStateResponse> {
    let game_state = get_game(&state.api, &code).await.map_err(reject)?;
    Ok(Json(GameStateResponse { game_state }))
}

async fn http_get_progress(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(q): Query<ProgressQuery>,
) -> HttpResult<ProgressResponse> {
    let progress = get_progress(&state.api, &code, q.player_id.as_ref())
        .await
        .map_err(reject)?;
    Ok(Json(progress))
}

async fn http_get_assignment(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(q): Query<AssignmentQuery>,
) -> HttpResult<AssignmentResponse> {
    let assignment = get_assignment(&state.api, &code, &q.player_id)
        .await
        .map_err(reject)?;
    Ok(Json(assignment))
}

async fn http_submit_entry(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(req): Json<SubmitEntryRequest>,
) -> HttpResult<SubmitEntryResponse> {
    let submitted = submit_entry(&state.api, &code, &req.player_id, &req.content, req.kind)
        .await
        .map_err(reject)?;
    Ok(Json(submitted))
}

async fn http_get_results(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> HttpResult<ResultsResponse> {
    let results = get_results(&state.api, &code).await.map_err(reject)?;
    Ok(Json(results))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    let code = LobbyCode::normalized(&q.code);
    ws.on_upgrade(move |socket| ws_connection(state, socket, code))
}

/// Subscribes first so nothing published after the lobby check is missed.
async fn open_lobby_stream(
    api: &ApiContext,
    code: &LobbyCode,
) -> Result<broadcast::Receiver<ServerEvent>, ApiError> {
    let events_rx = api.subscribe();
    get_lobby(api, code.as_str()).await?;
    Ok(events_rx)
}

async fn ws_connection(
    state: Arc<AppState>,
    socket: axum::extract::ws::WebSocket,
    code: LobbyCode,
) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = match open_lobby_stream(&state.api, &code).await {
        Ok(events_rx) => events_rx,
        Err(err) => {
            if let Ok(text) = serde_json::to_string(&ServerEvent::Error(err)) {
                let _ = sender.send(Message::Text(text)).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events_rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(code = %code, skipped, "websocket subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if event.lobby_code() != Some(&code) {
                continue;
            }
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

async fn sweep_expired(api: ApiContext, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match cleanup_expired(&api, Utc::now()).await {
            Ok(removed) if !removed.is_empty() => {
                info!(count = removed.len(), "expired sessions swept")
            }
            Ok(_) => {}
            Err(err) => warn!(message = %err.message, "expired session sweep failed"),
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
