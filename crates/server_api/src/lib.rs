use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{
        all_submitted, Entry, EntryKind, GameState, Lobby, LobbyCode, LobbyStatus, Player,
        PlayerId,
    },
    error::{ApiError, ErrorCode},
    protocol::{
        AssignmentResponse, CreateLobbyResponse, JoinLobbyResponse, PackResult, ProgressResponse,
        ResultsResponse, ServerEvent, SubmitEntryResponse,
    },
};
use storage::{SessionSnapshot, SessionStore, SessionWrite};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub mod engine;
pub mod ids;
pub mod locks;
pub mod validate;

use engine::{NewGame, RoundOutcome};
use ids::{IdGenerator, RandomIds};
use locks::SessionLocks;

const MAX_CODE_ATTEMPTS: usize = 10;

#[derive(Debug, Clone)]
pub struct GameRules {
    pub min_players: usize,
    pub max_players: usize,
    pub lobby_ttl: Duration,
    pub max_entry_bytes: usize,
    pub max_name_chars: usize,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            min_players: 3,
            max_players: 16,
            lobby_ttl: Duration::hours(24),
            max_entry_bytes: 2 * 1024 * 1024,
            max_name_chars: 32,
        }
    }
}

#[derive(Clone)]
pub struct ApiContext {
    pub store: Arc<dyn SessionStore>,
    pub ids: Arc<dyn IdGenerator>,
    pub locks: SessionLocks,
    pub rules: GameRules,
    pub events: broadcast::Sender<ServerEvent>,
}

impl ApiContext {
    pub fn new(store: Arc<dyn SessionStore>, rules: GameRules) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            ids: Arc::new(RandomIds),
            locks: SessionLocks::new(),
            rules,
            events,
        }
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

pub async fn create_lobby(
    ctx: &ApiContext,
    player_name: &str,
) -> Result<CreateLobbyResponse, ApiError> {
    let name = validate::player_name(player_name, ctx.rules.max_name_chars)?;

    let mut attempts = 0;
    let (code, _guard) = loop {
        let code = ctx.ids.lobby_code();
        let guard = ctx.locks.acquire(&code).await;
        if ctx.store.get_lobby(&code).await.map_err(internal)?.is_none() {
            break (code, guard);
        }
        attempts += 1;
        if attempts >= MAX_CODE_ATTEMPTS {
            return Err(ApiError::new(
                ErrorCode::Internal,
                "could not allocate a free lobby code",
            ));
        }
    };

    let player_id = ctx.ids.player_id();
    let now = Utc::now();
    let expires_at = now
        .checked_add_signed(ctx.rules.lobby_ttl)
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "lobby ttl out of range"))?;
    let lobby = Lobby {
        code: code.clone(),
        players: vec![Player {
            id: player_id.clone(),
            name,
            is_leader: true,
        }],
        player_order: vec![player_id.clone()],
        leader_id: player_id.clone(),
        status: LobbyStatus::Waiting,
        created_at: now,
        expires_at,
    };
    ctx.store
        .commit(&code, SessionWrite::lobby(lobby.clone()))
        .await
        .map_err(internal)?;

    info!(code = %code, player_id = %player_id, "lobby created");
    Ok(CreateLobbyResponse {
        lobby_code: code,
        player_id,
        lobby,
    })
}

pub async fn join_lobby(
    ctx: &ApiContext,
    raw_code: &str,
    player_name: &str,
) -> Result<JoinLobbyResponse, ApiError> {
    let code = LobbyCode::normalized(raw_code);
    if code.as_str().is_empty() {
        return Err(ApiError::validation("lobby code is required"));
    }
    let _guard = ctx.locks.acquire(&code).await;
    let mut lobby = load_lobby(ctx, &code).await?;
    if lobby.status != LobbyStatus::Waiting {
        return Err(ApiError::conflict("game has already started"));
    }
    let name = validate::player_name(player_name, ctx.rules.max_name_chars)?;
    if lobby.has_player_named(&name) {
        return Err(ApiError::conflict("name already taken in this lobby"));
    }
    if lobby.players.len() >= ctx.rules.max_players {
        return Err(ApiError::precondition_failed(format!(
            "lobby is full ({} players)",
            ctx.rules.max_players
        )));
    }

    let player_id = ctx.ids.player_id();
    lobby.players.push(Player {
        id: player_id.clone(),
        name,
        is_leader: false,
    });
    lobby.player_order.push(player_id.clone());
    ctx.store
        .commit(&code, SessionWrite::lobby(lobby.clone()))
        .await
        .map_err(internal)?;

    info!(code = %code, player_id = %player_id, players = lobby.players.len(), "player joined");
    ctx.publish(ServerEvent::LobbyUpdated {
        lobby: lobby.clone(),
    });
    Ok(JoinLobbyResponse { player_id, lobby })
}

pub async fn get_lobby(ctx: &ApiContext, code: &str) -> Result<Lobby, ApiError> {
    load_lobby(ctx, &LobbyCode::normalized(code)).await
}

pub async fn reorder_players(
    ctx: &ApiContext,
    code: &str,
    caller: &PlayerId,
    new_order: Vec<PlayerId>,
) -> Result<Lobby, ApiError> {
    let code = LobbyCode::normalized(code);
    let _guard = ctx.locks.acquire(&code).await;
    let mut lobby = load_lobby(ctx, &code).await?;
    if !lobby.is_leader(caller) {
        return Err(ApiError::forbidden(
            "only the lobby leader can reorder players",
        ));
    }
    if lobby.status != LobbyStatus::Waiting {
        return Err(ApiError::conflict(
            "cannot reorder players after the game has started",
        ));
    }
    if !lobby.is_permutation(&new_order) {
        return Err(ApiError::validation("invalid player order"));
    }

    lobby.player_order = new_order;
    ctx.store
        .commit(&code, SessionWrite::lobby(lobby.clone()))
        .await
        .map_err(internal)?;

    debug!(code = %code, "player order updated");
    ctx.publish(ServerEvent::LobbyUpdated {
        lobby: lobby.clone(),
    });
    Ok(lobby)
}

pub async fn start_game(
    ctx: &ApiContext,
    code: &str,
    caller: &PlayerId,
) -> Result<GameState, ApiError> {
    let code = LobbyCode::normalized(code);
    let _guard = ctx.locks.acquire(&code).await;
    let mut lobby = load_lobby(ctx, &code).await?;
    if !lobby.is_leader(caller) {
        return Err(ApiError::forbidden(
            "only the lobby leader can start the game",
        ));
    }

    let pack_ids = lobby
        .player_order
        .iter()
        .map(|_| ctx.ids.pack_id())
        .collect();
    let NewGame { game, progress } =
        engine::initialize_game(&lobby, pack_ids, ctx.rules.min_players)?;
    lobby.status = LobbyStatus::Playing;

    ctx.store
        .commit(
            &code,
            SessionWrite {
                lobby: Some(lobby.clone()),
                game: Some(game.clone()),
                progress: Some(progress),
            },
        )
        .await
        .map_err(internal)?;

    info!(code = %code, total_rounds = game.total_rounds, "game started");
    ctx.publish(ServerEvent::LobbyUpdated { lobby });
    ctx.publish(ServerEvent::GameStarted {
        lobby_code: code,
        total_rounds: game.total_rounds,
    });
    Ok(game)
}

pub async fn submit_entry(
    ctx: &ApiContext,
    code: &str,
    player_id: &PlayerId,
    content: &str,
    kind: EntryKind,
) -> Result<SubmitEntryResponse, ApiError> {
    let code = LobbyCode::normalized(code);
    let _guard = ctx.locks.acquire(&code).await;
    let SessionSnapshot {
        lobby,
        game,
        mut progress,
    } = ctx.store.load_session(&code).await.map_err(internal)?;
    let (Some(mut lobby), Some(mut game)) = (lobby, game) else {
        return Err(ApiError::not_found("game not found"));
    };
    if progress.is_empty() {
        return Err(ApiError::not_found("game not found"));
    }
    engine::check_submission(&game, &progress, player_id)?;
    let content = validate::entry_content(kind, content, ctx.rules.max_entry_bytes)?;
    let player_name = lobby
        .player(player_id)
        .map(|p| p.name.clone())
        .ok_or_else(|| ApiError::not_found("player not found"))?;

    let round = game.current_round;
    let entry = Entry {
        kind,
        content,
        player_id: player_id.clone(),
        player_name,
        timestamp: Utc::now(),
    };
    let outcome = engine::submit_entry(&mut game, &mut progress, player_id, entry)?;
    debug_assert!(engine::assignments_are_bijective(&game, &progress));

    let mut write = SessionWrite {
        lobby: None,
        game: Some(game.clone()),
        progress: Some(progress),
    };
    if outcome == RoundOutcome::Finished {
        lobby.status = LobbyStatus::Finished;
        write.lobby = Some(lobby.clone());
    }
    ctx.store.commit(&code, write).await.map_err(internal)?;

    info!(code = %code, player_id = %player_id, round, ?outcome, "entry submitted");
    ctx.publish(ServerEvent::EntrySubmitted {
        lobby_code: code.clone(),
        player_id: player_id.clone(),
        round,
    });
    match outcome {
        RoundOutcome::Waiting { .. } => {}
        RoundOutcome::Advanced { round, round_type } => {
            ctx.publish(ServerEvent::RoundAdvanced {
                lobby_code: code,
                round,
                round_type,
            });
        }
        RoundOutcome::Finished => {
            ctx.publish(ServerEvent::LobbyUpdated { lobby });
            ctx.publish(ServerEvent::GameFinished { lobby_code: code });
        }
    }

    Ok(SubmitEntryResponse {
        game_state: game,
        all_submitted: outcome.all_submitted(),
    })
}

pub async fn get_game(ctx: &ApiContext, code: &str) -> Result<GameState, ApiError> {
    ctx.store
        .get_game(&LobbyCode::normalized(code))
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("game not found"))
}

pub async fn get_progress(
    ctx: &ApiContext,
    code: &str,
    player_id: Option<&PlayerId>,
) -> Result<ProgressResponse, ApiError> {
    let snapshot = ctx
        .store
        .load_session(&LobbyCode::normalized(code))
        .await
        .map_err(internal)?;
    if snapshot.game.is_none() || snapshot.progress.is_empty() {
        return Err(ApiError::not_found("progress not found"));
    }

    let player_progress =
        player_id.and_then(|id| snapshot.progress.iter().find(|p| &p.player_id == id).cloned());
    Ok(ProgressResponse {
        all_submitted: all_submitted(&snapshot.progress),
        player_progress,
        progress: snapshot.progress,
    })
}

pub async fn get_assignment(
    ctx: &ApiContext,
    code: &str,
    player_id: &PlayerId,
) -> Result<AssignmentResponse, ApiError> {
    let snapshot = ctx
        .store
        .load_session(&LobbyCode::normalized(code))
        .await
        .map_err(internal)?;
    let game = snapshot
        .game
        .ok_or_else(|| ApiError::not_found("game not found"))?;
    let progress = snapshot
        .progress
        .into_iter()
        .find(|p| &p.player_id == player_id)
        .ok_or_else(|| ApiError::not_found("player not in game"))?;
    let pack = game
        .pack(&progress.current_pack_id)
        .ok_or_else(|| ApiError::not_found("pack not found"))?;

    Ok(AssignmentResponse {
        current_round: game.current_round,
        total_rounds: game.total_rounds,
        round_type: game.round_type,
        pack_id: pack.id.clone(),
        has_submitted: progress.has_submitted,
        prompt: pack.last_entry().cloned(),
    })
}

pub async fn get_results(ctx: &ApiContext, code: &str) -> Result<ResultsResponse, ApiError> {
    let code = LobbyCode::normalized(code);
    let snapshot = ctx.store.load_session(&code).await.map_err(internal)?;
    let (Some(lobby), Some(game)) = (snapshot.lobby, snapshot.game) else {
        return Err(ApiError::not_found("game not found"));
    };
    if !game.is_finished() {
        return Err(ApiError::precondition_failed(
            "results are available once the game is finished",
        ));
    }

    let packs = game
        .packs
        .into_iter()
        .map(|pack| PackResult {
            starting_player_name: lobby
                .player(&pack.starting_player_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| pack.starting_player_id.to_string()),
            pack_id: pack.id,
            starting_player_id: pack.starting_player_id,
            entries: pack.entries,
        })
        .collect();
    Ok(ResultsResponse {
        lobby_code: code,
        packs,
    })
}

/// Deletes every session whose lobby expired before `now`.
pub async fn cleanup_expired(
    ctx: &ApiContext,
    now: DateTime<Utc>,
) -> Result<Vec<LobbyCode>, ApiError> {
    let expired = ctx.store.expired_codes(now).await.map_err(internal)?;
    for code in &expired {
        let _guard = ctx.locks.acquire(code).await;
        ctx.store.delete_session(code).await.map_err(internal)?;
        info!(code = %code, "expired session removed");
    }
    Ok(expired)
}

async fn load_lobby(ctx: &ApiContext, code: &LobbyCode) -> Result<Lobby, ApiError> {
    ctx.store
        .get_lobby(code)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("lobby not found"))
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
