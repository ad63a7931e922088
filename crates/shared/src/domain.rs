use std::{collections::HashSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(LobbyCode);
id_newtype!(PlayerId);
id_newtype!(PackId);

impl LobbyCode {
    /// Join codes are typed by hand, so lookups ignore case.
    pub fn normalized(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Waiting,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundType {
    Write,
    Draw,
}

impl RoundType {
    /// Round 1 writes, round 2 draws, and so on.
    pub fn for_round(round: u32) -> Self {
        if round % 2 == 1 {
            Self::Write
        } else {
            Self::Draw
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::Write => Self::Draw,
            Self::Draw => Self::Write,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Text,
    Drawing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub is_leader: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lobby {
    pub code: LobbyCode,
    pub players: Vec<Player>,
    /// Fixed seating used to hand out packs at game start.
    pub player_order: Vec<PlayerId>,
    pub leader_id: PlayerId,
    pub status: LobbyStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lobby {
    pub fn player(&self, player_id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == player_id)
    }

    pub fn is_leader(&self, player_id: &PlayerId) -> bool {
        &self.leader_id == player_id
    }

    pub fn has_player_named(&self, name: &str) -> bool {
        self.players
            .iter()
            .any(|p| p.name.to_lowercase() == name.to_lowercase())
    }

    /// True when `order` names every player exactly once.
    pub fn is_permutation(&self, order: &[PlayerId]) -> bool {
        if order.len() != self.players.len() {
            return false;
        }
        let known: HashSet<&PlayerId> = self.players.iter().map(|p| &p.id).collect();
        let mut seen = HashSet::with_capacity(order.len());
        order.iter().all(|id| known.contains(id) && seen.insert(id))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub content: String,
    pub player_id: PlayerId,
    pub player_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pack {
    pub id: PackId,
    pub entries: Vec<Entry>,
    pub starting_player_id: PlayerId,
}

impl Pack {
    pub fn last_entry(&self) -> Option<&Entry> {
        self.entries.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub lobby_code: LobbyCode,
    pub packs: Vec<Pack>,
    pub current_round: u32,
    pub total_rounds: u32,
    pub round_type: RoundType,
    pub status: GameStatus,
}

impl GameState {
    pub fn pack(&self, pack_id: &PackId) -> Option<&Pack> {
        self.packs.iter().find(|p| &p.id == pack_id)
    }

    pub fn pack_index(&self, pack_id: &PackId) -> Option<usize> {
        self.packs.iter().position(|p| &p.id == pack_id)
    }

    pub fn is_finished(&self) -> bool {
        self.status == GameStatus::Finished
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProgress {
    pub player_id: PlayerId,
    pub current_pack_id: PackId,
    pub has_submitted: bool,
}

pub fn all_submitted(progress: &[PlayerProgress]) -> bool {
    progress.iter().all(|p| p.has_submitted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby(ids: &[&str]) -> Lobby {
        let now = Utc::now();
        Lobby {
            code: LobbyCode::from("ABC234"),
            players: ids
                .iter()
                .enumerate()
                .map(|(i, id)| Player {
                    id: PlayerId::from(*id),
                    name: id.to_uppercase(),
                    is_leader: i == 0,
                })
                .collect(),
            player_order: ids.iter().map(|id| PlayerId::from(*id)).collect(),
            leader_id: PlayerId::from(ids[0]),
            status: LobbyStatus::Waiting,
            created_at: now,
            expires_at: now,
        }
    }

    #[test]
    fn round_type_alternates_from_write() {
        assert_eq!(RoundType::for_round(1), RoundType::Write);
        assert_eq!(RoundType::for_round(2), RoundType::Draw);
        assert_eq!(RoundType::for_round(7), RoundType::Write);
        assert_eq!(RoundType::Write.flipped(), RoundType::Draw);
    }

    #[test]
    fn permutation_rejects_duplicates_and_strangers() {
        let lobby = lobby(&["a", "b", "c"]);
        let ids = |xs: &[&str]| xs.iter().map(|x| PlayerId::from(*x)).collect::<Vec<_>>();
        assert!(lobby.is_permutation(&ids(&["c", "a", "b"])));
        assert!(!lobby.is_permutation(&ids(&["a", "a", "b"])));
        assert!(!lobby.is_permutation(&ids(&["a", "b", "z"])));
        assert!(!lobby.is_permutation(&ids(&["a", "b"])));
    }

    #[test]
    fn player_names_compare_case_insensitively() {
        let lobby = lobby(&["ann", "bob", "cat"]);
        assert!(lobby.has_player_named("Bob"));
        assert!(!lobby.has_player_named("dan"));
    }

    #[test]
    fn wire_shape_uses_camel_case_and_type_tag() {
        let entry = Entry {
            kind: EntryKind::Drawing,
            content: "data:image/png;base64,AA==".into(),
            player_id: PlayerId::from("p1"),
            player_name: "Ann".into(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&entry).expect("json");
        assert_eq!(value["type"], "drawing");
        assert_eq!(value["playerId"], "p1");
        assert_eq!(value["playerName"], "Ann");
    }
}
