use super::*;
use axum::{body, body::Body, http::Request, response::Response};
use server_api::{ids::SequentialIds, GameRules};
use shared::domain::{EntryKind, GameStatus, LobbyStatus, RoundType};
use storage::MemoryStore;
use tower::ServiceExt;

const PIXEL: &str = "data:image/png;base64,iVBORw0KGgo=";

fn test_app() -> (Router, ApiContext) {
    let api = ApiContext::new(Arc::new(MemoryStore::new()), GameRules::default())
        .with_ids(Arc::new(SequentialIds::new()));
    let app = build_router(Arc::new(AppState { api: api.clone() }), 64 * 1024);
    (app, api)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

/// Creates a lobby over HTTP with `n` players and returns its code and ids.
async fn seated(app: &Router, n: usize) -> (String, Vec<String>) {
    let response = app
        .clone()
        .oneshot(post_json(
            "/lobby/create",
            serde_json::json!({ "playerName": "Ann" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let created: CreateLobbyResponse = read_json(response).await;
    let code = created.lobby_code.to_string();
    let mut ids = vec![created.player_id.to_string()];

    for i in 1..n {
        let response = app
            .clone()
            .oneshot(post_json(
                "/lobby/join",
                serde_json::json!({ "lobbyCode": code.to_lowercase(), "playerName": format!("Guest {i}") }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let joined: JoinLobbyResponse = read_json(response).await;
        ids.push(joined.player_id.to_string());
    }
    (code, ids)
}

async fn start(app: &Router, code: &str, caller: &str) -> Response {
    app.clone()
        .oneshot(post_json(
            &format!("/lobby/{code}/start"),
            serde_json::json!({ "playerId": caller }),
        ))
        .await
        .expect("response")
}

async fn submit(app: &Router, code: &str, player: &str, kind: &str, content: &str) -> Response {
    app.clone()
        .oneshot(post_json(
            &format!("/game/{code}/submit"),
            serde_json::json!({ "playerId": player, "content": content, "type": kind }),
        ))
        .await
        .expect("response")
}

#[tokio::test]
async fn healthz_reports_ok_when_store_is_ready() {
    let (app, _api) = test_app();
    let response = app.oneshot(get_request("/healthz")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn lobby_routes_create_join_and_reorder() {
    let (app, _api) = test_app();
    let (code, ids) = seated(&app, 3).await;

    let response = app
        .clone()
        .oneshot(get_request(&format!("/lobby/{}", code.to_lowercase())))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let lobby: LobbyResponse = read_json(response).await;
    assert_eq!(lobby.lobby.players.len(), 3);
    assert_eq!(lobby.lobby.status, LobbyStatus::Waiting);

    let reversed: Vec<&String> = ids.iter().rev().collect();
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/lobby/{code}/order"),
            serde_json::json!({ "playerId": ids[0], "playerOrder": reversed }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let lobby: LobbyResponse = read_json(response).await;
    let order: Vec<String> = lobby
        .lobby
        .player_order
        .iter()
        .map(|id| id.to_string())
        .collect();
    assert_eq!(order, ids.iter().rev().cloned().collect::<Vec<_>>());

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/lobby/{code}/order"),
            serde_json::json!({ "playerId": ids[1], "playerOrder": ids }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn error_codes_map_to_http_statuses() {
    let (app, _api) = test_app();

    let response = app
        .clone()
        .oneshot(get_request("/lobby/NOPE99"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(post_json(
            "/lobby/create",
            serde_json::json!({ "playerName": "   " }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (code, ids) = seated(&app, 2).await;
    let response = start(&app, &code, &ids[0]).await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::PreconditionFailed);
}

#[tokio::test]
async fn full_game_over_http_reaches_results() {
    let (app, _api) = test_app();
    let (code, ids) = seated(&app, 3).await;

    let response = start(&app, &code, &ids[1]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = start(&app, &code, &ids[0]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let started: GameStateResponse = read_json(response).await;
    assert_eq!(started.game_state.total_rounds, 3);
    assert_eq!(started.game_state.round_type, RoundType::Write);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/game/{code}/results")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    for round in 1..=3u32 {
        let (kind, content) = if round % 2 == 1 {
            ("text", "a cat on a bike")
        } else {
            ("drawing", PIXEL)
        };
        for (i, id) in ids.iter().enumerate() {
            let response = submit(&app, &code, id, kind, content).await;
            assert_eq!(response.status(), StatusCode::OK);
            let submitted: SubmitEntryResponse = read_json(response).await;
            assert_eq!(submitted.all_submitted, i == ids.len() - 1);
        }
    }

    let response = submit(&app, &code, &ids[0], "text", "too late").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/game/{code}")))
        .await
        .expect("response");
    let game: GameStateResponse = read_json(response).await;
    assert_eq!(game.game_state.status, GameStatus::Finished);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/game/{code}/results")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let results: ResultsResponse = read_json(response).await;
    assert_eq!(results.packs.len(), 3);
    assert_eq!(results.packs[0].starting_player_name, "Ann");
    assert!(results.packs.iter().all(|p| p.entries.len() == 3));
    assert_eq!(results.packs[0].entries[1].kind, EntryKind::Drawing);
}

#[tokio::test]
async fn progress_and_assignment_follow_the_rotation() {
    let (app, _api) = test_app();
    let (code, ids) = seated(&app, 3).await;
    assert_eq!(start(&app, &code, &ids[0]).await.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get_request(&format!(
            "/game/{code}/assignment?playerId={}",
            ids[0]
        )))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let first: AssignmentResponse = read_json(response).await;
    assert_eq!(first.current_round, 1);
    assert!(first.prompt.is_none());

    for id in &ids {
        let response = submit(&app, &code, id, "text", &format!("phrase by {id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(get_request(&format!("/game/{code}/progress?playerId={}", ids[0])))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let progress: ProgressResponse = read_json(response).await;
    assert_eq!(progress.progress.len(), 3);
    assert!(!progress.all_submitted);
    let mine = progress.player_progress.expect("own progress");
    assert_ne!(mine.current_pack_id, first.pack_id);
    assert!(!mine.has_submitted);

    let response = app
        .clone()
        .oneshot(get_request(&format!(
            "/game/{code}/assignment?playerId={}",
            ids[0]
        )))
        .await
        .expect("response");
    let second: AssignmentResponse = read_json(response).await;
    assert_eq!(second.round_type, RoundType::Draw);
    assert_eq!(second.pack_id, mine.current_pack_id);
    let prompt = second.prompt.expect("prompt from previous round");
    assert_eq!(prompt.kind, EntryKind::Text);
    assert_eq!(prompt.player_id.to_string(), ids[1]);
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let (app, _api) = test_app();
    let (code, ids) = seated(&app, 3).await;
    assert_eq!(start(&app, &code, &ids[0]).await.status(), StatusCode::OK);

    let huge = "x".repeat(128 * 1024);
    let response = submit(&app, &code, &ids[0], "text", &huge).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn sweeper_removes_expired_sessions() {
    let api = ApiContext::new(
        Arc::new(MemoryStore::new()),
        GameRules {
            lobby_ttl: chrono::Duration::seconds(-1),
            ..GameRules::default()
        },
    );
    let created = create_lobby(&api, "Ann").await.expect("create");

    let sweeper = tokio::spawn(sweep_expired(api.clone(), Duration::from_millis(10)));
    let mut gone = false;
    for _ in 0..50 {
        if get_lobby(&api, created.lobby_code.as_str()).await.is_err() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sweeper.abort();
    assert!(gone, "expired lobby should be swept");
}

#[tokio::test]
async fn lobby_stream_delivers_events_published_after_opening() {
    let (_app, api) = test_app();
    let created = create_lobby(&api, "Ann").await.expect("create");

    let mut events = open_lobby_stream(&api, &created.lobby_code)
        .await
        .expect("stream");
    join_lobby(&api, created.lobby_code.as_str(), "Bo")
        .await
        .expect("join");
    let event = events.try_recv().expect("event");
    assert!(matches!(event, ServerEvent::LobbyUpdated { .. }));

    let err = open_lobby_stream(&api, &LobbyCode::from("NOPE99"))
        .await
        .expect_err("unknown lobby");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn websocket_rejects_unknown_lobby_with_error_event() {
    use futures::StreamExt;

    let (app, _api) = test_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?code=nope99"))
        .await
        .expect("connect");
    let frame = socket.next().await.expect("frame").expect("message");
    let event: ServerEvent =
        serde_json::from_str(&frame.into_text().expect("text")).expect("event");
    match event {
        ServerEvent::Error(err) => assert_eq!(err.code, ErrorCode::NotFound),
        other => panic!("unexpected event {other:?}"),
    }

    server.abort();
}
