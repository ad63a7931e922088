//! Round progression and pack rotation.
//!
//! Everything here is synchronous and works on owned copies of the session
//! records; callers commit the results only when a call returns `Ok`.

use std::collections::HashSet;

use shared::{
    domain::{
        Entry, GameState, GameStatus, Lobby, LobbyStatus, Pack, PackId, PlayerId, PlayerProgress,
        RoundType,
    },
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("player {0} is not in this game")]
    UnknownPlayer(PlayerId),
    #[error("pack {0} not found")]
    UnknownPack(PackId),
    #[error("already submitted for round {0}")]
    AlreadySubmitted(u32),
    #[error("game is already finished")]
    GameFinished,
    #[error("game has already started")]
    AlreadyStarted,
    #[error("need at least {required} players to start, have {actual}")]
    NotEnoughPlayers { required: usize, actual: usize },
    #[error("expected {expected} pack ids, got {actual}")]
    PackCountMismatch { expected: usize, actual: usize },
}

impl From<EngineError> for ApiError {
    fn from(value: EngineError) -> Self {
        let code = match &value {
            EngineError::UnknownPlayer(_) | EngineError::UnknownPack(_) => ErrorCode::NotFound,
            EngineError::AlreadySubmitted(_) | EngineError::GameFinished => ErrorCode::Conflict,
            EngineError::AlreadyStarted | EngineError::NotEnoughPlayers { .. } => {
                ErrorCode::PreconditionFailed
            }
            EngineError::PackCountMismatch { .. } => ErrorCode::Internal,
        };
        ApiError::new(code, value.to_string())
    }
}

/// Records created by the `waiting -> playing` transition.
#[derive(Debug, Clone)]
pub struct NewGame {
    pub game: GameState,
    pub progress: Vec<PlayerProgress>,
}

/// Result of the completion check that follows every accepted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Waiting { remaining: usize },
    Advanced { round: u32, round_type: RoundType },
    Finished,
}

impl RoundOutcome {
    pub fn all_submitted(&self) -> bool {
        !matches!(self, Self::Waiting { .. })
    }
}

/// Hands pack `i` to the `i`-th player of `lobby.player_order`.
pub fn initialize_game(
    lobby: &Lobby,
    pack_ids: Vec<PackId>,
    min_players: usize,
) -> Result<NewGame, EngineError> {
    if lobby.status != LobbyStatus::Waiting {
        return Err(EngineError::AlreadyStarted);
    }
    if lobby.players.len() < min_players {
        return Err(EngineError::NotEnoughPlayers {
            required: min_players,
            actual: lobby.players.len(),
        });
    }
    if pack_ids.len() != lobby.player_order.len() {
        return Err(EngineError::PackCountMismatch {
            expected: lobby.player_order.len(),
            actual: pack_ids.len(),
        });
    }

    let packs: Vec<Pack> = lobby
        .player_order
        .iter()
        .zip(pack_ids)
        .map(|(player_id, id)| Pack {
            id,
            entries: Vec::new(),
            starting_player_id: player_id.clone(),
        })
        .collect();

    let progress = packs
        .iter()
        .map(|pack| PlayerProgress {
            player_id: pack.starting_player_id.clone(),
            current_pack_id: pack.id.clone(),
            has_submitted: false,
        })
        .collect();

    let total_rounds = packs.len() as u32;
    Ok(NewGame {
        game: GameState {
            lobby_code: lobby.code.clone(),
            packs,
            current_round: 1,
            total_rounds,
            round_type: RoundType::for_round(1),
            status: GameStatus::Playing,
        },
        progress,
    })
}

/// Checks, in order, that the game is open, the player is seated, has not
/// submitted this round and holds a known pack.
pub fn check_submission(
    game: &GameState,
    progress: &[PlayerProgress],
    player_id: &PlayerId,
) -> Result<(), EngineError> {
    if game.is_finished() {
        return Err(EngineError::GameFinished);
    }
    let slot = progress
        .iter()
        .find(|p| &p.player_id == player_id)
        .ok_or_else(|| EngineError::UnknownPlayer(player_id.clone()))?;
    if slot.has_submitted {
        return Err(EngineError::AlreadySubmitted(game.current_round));
    }
    if game.pack(&slot.current_pack_id).is_none() {
        return Err(EngineError::UnknownPack(slot.current_pack_id.clone()));
    }
    Ok(())
}

/// Appends `entry` to the submitting player's current pack, marks the player
/// done and runs the completion check.
pub fn submit_entry(
    game: &mut GameState,
    progress: &mut [PlayerProgress],
    player_id: &PlayerId,
    entry: Entry,
) -> Result<RoundOutcome, EngineError> {
    check_submission(game, progress, player_id)?;
    let slot = progress
        .iter_mut()
        .find(|p| &p.player_id == player_id)
        .ok_or_else(|| EngineError::UnknownPlayer(player_id.clone()))?;
    let pack = game
        .packs
        .iter_mut()
        .find(|pack| pack.id == slot.current_pack_id)
        .ok_or_else(|| EngineError::UnknownPack(slot.current_pack_id.clone()))?;

    pack.entries.push(entry);
    slot.has_submitted = true;

    complete_round(game, progress)
}

pub fn complete_round(
    game: &mut GameState,
    progress: &mut [PlayerProgress],
) -> Result<RoundOutcome, EngineError> {
    let remaining = progress.iter().filter(|p| !p.has_submitted).count();
    if remaining > 0 {
        return Ok(RoundOutcome::Waiting { remaining });
    }

    if game.current_round >= game.total_rounds {
        game.status = GameStatus::Finished;
        return Ok(RoundOutcome::Finished);
    }

    rotate_packs(game, progress)?;
    game.current_round += 1;
    game.round_type = game.round_type.flipped();
    Ok(RoundOutcome::Advanced {
        round: game.current_round,
        round_type: game.round_type,
    })
}

/// Moves every player to the next pack in creation order and reopens the
/// round. Nothing is changed if any assignment points at an unknown pack.
pub fn rotate_packs(game: &GameState, progress: &mut [PlayerProgress]) -> Result<(), EngineError> {
    let packs = &game.packs;
    let next_ids = progress
        .iter()
        .map(|p| {
            let index = game
                .pack_index(&p.current_pack_id)
                .ok_or_else(|| EngineError::UnknownPack(p.current_pack_id.clone()))?;
            Ok(packs[(index + 1) % packs.len()].id.clone())
        })
        .collect::<Result<Vec<_>, EngineError>>()?;

    for (slot, next) in progress.iter_mut().zip(next_ids) {
        slot.current_pack_id = next;
        slot.has_submitted = false;
    }
    Ok(())
}

/// True when every pack is held by exactly one player.
pub fn assignments_are_bijective(game: &GameState, progress: &[PlayerProgress]) -> bool {
    if progress.len() != game.packs.len() {
        return false;
    }
    let assigned: HashSet<&PackId> = progress.iter().map(|p| &p.current_pack_id).collect();
    assigned.len() == progress.len() && game.packs.iter().all(|pack| assigned.contains(&pack.id))
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
