use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use shared::domain::{GameState, Lobby, LobbyCode, PlayerProgress};

use crate::{SessionSnapshot, SessionStore, SessionWrite};

#[derive(Default)]
struct Tables {
    lobbies: HashMap<LobbyCode, Lobby>,
    games: HashMap<LobbyCode, GameState>,
    progress: HashMap<LobbyCode, Vec<PlayerProgress>>,
}

/// In-process store. All three tables sit behind one lock so a commit is
/// never observed half-applied.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.tables.read().await.lobbies.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_lobby(&self, code: &LobbyCode) -> Result<Option<Lobby>> {
        Ok(self.tables.read().await.lobbies.get(code).cloned())
    }

    async fn put_lobby(&self, code: &LobbyCode, lobby: &Lobby) -> Result<()> {
        self.tables
            .write()
            .await
            .lobbies
            .insert(code.clone(), lobby.clone());
        Ok(())
    }

    async fn get_game(&self, code: &LobbyCode) -> Result<Option<GameState>> {
        Ok(self.tables.read().await.games.get(code).cloned())
    }

    async fn put_game(&self, code: &LobbyCode, game: &GameState) -> Result<()> {
        self.tables
            .write()
            .await
            .games
            .insert(code.clone(), game.clone());
        Ok(())
    }

    async fn get_progress(&self, code: &LobbyCode) -> Result<Vec<PlayerProgress>> {
        Ok(self
            .tables
            .read()
            .await
            .progress
            .get(code)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_progress(&self, code: &LobbyCode, progress: &[PlayerProgress]) -> Result<()> {
        self.tables
            .write()
            .await
            .progress
            .insert(code.clone(), progress.to_vec());
        Ok(())
    }

    async fn load_session(&self, code: &LobbyCode) -> Result<SessionSnapshot> {
        let tables = self.tables.read().await;
        Ok(SessionSnapshot {
            lobby: tables.lobbies.get(code).cloned(),
            game: tables.games.get(code).cloned(),
            progress: tables.progress.get(code).cloned().unwrap_or_default(),
        })
    }

    async fn commit(&self, code: &LobbyCode, write: SessionWrite) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(lobby) = write.lobby {
            tables.lobbies.insert(code.clone(), lobby);
        }
        if let Some(game) = write.game {
            tables.games.insert(code.clone(), game);
        }
        if let Some(progress) = write.progress {
            tables.progress.insert(code.clone(), progress);
        }
        Ok(())
    }

    async fn delete_session(&self, code: &LobbyCode) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.lobbies.remove(code);
        tables.games.remove(code);
        tables.progress.remove(code);
        Ok(())
    }

    async fn expired_codes(&self, now: DateTime<Utc>) -> Result<Vec<LobbyCode>> {
        let tables = self.tables.read().await;
        let mut codes: Vec<LobbyCode> = tables
            .lobbies
            .values()
            .filter(|lobby| lobby.is_expired(now))
            .map(|lobby| lobby.code.clone())
            .collect();
        codes.sort();
        Ok(codes)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
