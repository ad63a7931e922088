use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        Entry, EntryKind, GameState, Lobby, LobbyCode, PackId, PlayerId, PlayerProgress, RoundType,
    },
    error::ApiError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLobbyRequest {
    pub player_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLobbyResponse {
    pub lobby_code: LobbyCode,
    pub player_id: PlayerId,
    pub lobby: Lobby,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobbyRequest {
    pub lobby_code: String,
    pub player_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobbyResponse {
    pub player_id: PlayerId,
    pub lobby: Lobby,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyResponse {
    pub lobby: Lobby,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    pub player_order: Vec<PlayerId>,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameRequest {
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateResponse {
    pub game_state: GameState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEntryRequest {
    pub player_id: PlayerId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEntryResponse {
    pub game_state: GameState,
    pub all_submitted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub progress: Vec<PlayerProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_progress: Option<PlayerProgress>,
    pub all_submitted: bool,
}

/// What a single player has to do in the current round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResponse {
    pub current_round: u32,
    pub total_rounds: u32,
    pub round_type: RoundType,
    pub pack_id: PackId,
    pub has_submitted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackResult {
    pub pack_id: PackId,
    pub starting_player_id: PlayerId,
    pub starting_player_name: String,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsResponse {
    pub lobby_code: LobbyCode,
    pub packs: Vec<PackResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    LobbyUpdated {
        lobby: Lobby,
    },
    GameStarted {
        lobby_code: LobbyCode,
        total_rounds: u32,
    },
    EntrySubmitted {
        lobby_code: LobbyCode,
        player_id: PlayerId,
        round: u32,
    },
    RoundAdvanced {
        lobby_code: LobbyCode,
        round: u32,
        round_type: RoundType,
    },
    GameFinished {
        lobby_code: LobbyCode,
    },
    Error(ApiError),
}

impl ServerEvent {
    /// Lobby the event belongs to; `None` for events not tied to a session.
    pub fn lobby_code(&self) -> Option<&LobbyCode> {
        match self {
            Self::LobbyUpdated { lobby } => Some(&lobby.code),
            Self::GameStarted { lobby_code, .. }
            | Self::EntrySubmitted { lobby_code, .. }
            | Self::RoundAdvanced { lobby_code, .. }
            | Self::GameFinished { lobby_code } => Some(lobby_code),
            Self::Error(_) => None,
        }
    }
}
