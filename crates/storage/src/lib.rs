use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite, SqliteConnection,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use shared::domain::{GameState, Lobby, LobbyCode, PlayerProgress};

mod memory;

pub use memory::MemoryStore;

/// Everything stored for one lobby code, read at a single point in time.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub lobby: Option<Lobby>,
    pub game: Option<GameState>,
    pub progress: Vec<PlayerProgress>,
}

/// Records written together by one state transition. `None` leaves the
/// stored record untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionWrite {
    pub lobby: Option<Lobby>,
    pub game: Option<GameState>,
    pub progress: Option<Vec<PlayerProgress>>,
}

impl SessionWrite {
    pub fn lobby(lobby: Lobby) -> Self {
        Self {
            lobby: Some(lobby),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lobby.is_none() && self.game.is_none() && self.progress.is_none()
    }
}

/// Lobby directory, game session store and progress store for all sessions,
/// keyed by lobby code.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_lobby(&self, code: &LobbyCode) -> Result<Option<Lobby>>;
    async fn put_lobby(&self, code: &LobbyCode, lobby: &Lobby) -> Result<()>;
    async fn get_game(&self, code: &LobbyCode) -> Result<Option<GameState>>;
    async fn put_game(&self, code: &LobbyCode, game: &GameState) -> Result<()>;
    async fn get_progress(&self, code: &LobbyCode) -> Result<Vec<PlayerProgress>>;
    async fn put_progress(&self, code: &LobbyCode, progress: &[PlayerProgress]) -> Result<()>;
    /// Lobby, game and progress as one consistent read.
    async fn load_session(&self, code: &LobbyCode) -> Result<SessionSnapshot>;
    /// Applies every record in `write` or none of them.
    async fn commit(&self, code: &LobbyCode, write: SessionWrite) -> Result<()>;
    async fn delete_session(&self, code: &LobbyCode) -> Result<()>;
    async fn expired_codes(&self, now: DateTime<Utc>) -> Result<Vec<LobbyCode>>;
    async fn health_check(&self) -> Result<()>;
}

/// Opens the backend named by `database_url`: empty or `memory` keeps
/// everything in process, anything else is treated as a SQLite url.
pub async fn open_store(database_url: &str) -> Result<Arc<dyn SessionStore>> {
    let trimmed = database_url.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("memory") {
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(Storage::new(trimmed).await?))
}

/// SQLite-backed store. Records are kept as JSON bodies, one row per lobby
/// code in each table.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory url opens its own empty database.
        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for Storage {
    async fn get_lobby(&self, code: &LobbyCode) -> Result<Option<Lobby>> {
        let mut conn = self.pool.acquire().await?;
        select_body(&mut conn, "SELECT body FROM lobbies WHERE code = ?", code).await
    }

    async fn put_lobby(&self, code: &LobbyCode, lobby: &Lobby) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_lobby(&mut conn, code, lobby).await
    }

    async fn get_game(&self, code: &LobbyCode) -> Result<Option<GameState>> {
        let mut conn = self.pool.acquire().await?;
        select_body(&mut conn, "SELECT body FROM games WHERE code = ?", code).await
    }

    async fn put_game(&self, code: &LobbyCode, game: &GameState) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_body(&mut conn, UPSERT_GAME, code, game).await
    }

    async fn get_progress(&self, code: &LobbyCode) -> Result<Vec<PlayerProgress>> {
        let mut conn = self.pool.acquire().await?;
        let progress: Option<Vec<PlayerProgress>> = select_body(
            &mut conn,
            "SELECT body FROM player_progress WHERE code = ?",
            code,
        )
        .await?;
        Ok(progress.unwrap_or_default())
    }

    async fn put_progress(&self, code: &LobbyCode, progress: &[PlayerProgress]) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_body(&mut conn, UPSERT_PROGRESS, code, &progress).await
    }

    async fn load_session(&self, code: &LobbyCode) -> Result<SessionSnapshot> {
        let mut tx = self.pool.begin().await?;
        let lobby = select_body(&mut tx, "SELECT body FROM lobbies WHERE code = ?", code).await?;
        let game = select_body(&mut tx, "SELECT body FROM games WHERE code = ?", code).await?;
        let progress: Option<Vec<PlayerProgress>> = select_body(
            &mut tx,
            "SELECT body FROM player_progress WHERE code = ?",
            code,
        )
        .await?;
        tx.commit().await?;
        Ok(SessionSnapshot {
            lobby,
            game,
            progress: progress.unwrap_or_default(),
        })
    }

    async fn commit(&self, code: &LobbyCode, write: SessionWrite) -> Result<()> {
        if write.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        if let Some(lobby) = &write.lobby {
            upsert_lobby(&mut tx, code, lobby).await?;
        }
        if let Some(game) = &write.game {
            upsert_body(&mut tx, UPSERT_GAME, code, game).await?;
        }
        if let Some(progress) = &write.progress {
            upsert_body(&mut tx, UPSERT_PROGRESS, code, progress).await?;
        }
        tx.commit()
            .await
            .with_context(|| format!("failed to commit session '{code}'"))?;
        Ok(())
    }

    async fn delete_session(&self, code: &LobbyCode) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["lobbies", "games", "player_progress"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE code = ?"))
                .bind(code.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn expired_codes(&self, now: DateTime<Utc>) -> Result<Vec<LobbyCode>> {
        let rows = sqlx::query("SELECT code FROM lobbies WHERE expires_at_ms < ? ORDER BY code")
            .bind(now.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| LobbyCode(row.get::<String, _>(0)))
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }
}

const UPSERT_GAME: &str = "INSERT INTO games (code, body) VALUES (?1, ?2)
     ON CONFLICT(code) DO UPDATE SET body = excluded.body, updated_at = CURRENT_TIMESTAMP";

const UPSERT_PROGRESS: &str = "INSERT INTO player_progress (code, body) VALUES (?1, ?2)
     ON CONFLICT(code) DO UPDATE SET body = excluded.body, updated_at = CURRENT_TIMESTAMP";

async fn select_body<T>(conn: &mut SqliteConnection, sql: &str, code: &LobbyCode) -> Result<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    let row = sqlx::query(sql)
        .bind(code.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| {
        let body: String = r.get(0);
        serde_json::from_str(&body).with_context(|| format!("corrupt record for session '{code}'"))
    })
    .transpose()
}

async fn upsert_lobby(conn: &mut SqliteConnection, code: &LobbyCode, lobby: &Lobby) -> Result<()> {
    let body = serde_json::to_string(lobby)?;
    sqlx::query(
        "INSERT INTO lobbies (code, body, expires_at_ms) VALUES (?1, ?2, ?3)
         ON CONFLICT(code) DO UPDATE SET
            body = excluded.body,
            expires_at_ms = excluded.expires_at_ms,
            updated_at = CURRENT_TIMESTAMP",
    )
    .bind(code.as_str())
    .bind(body)
    .bind(lobby.expires_at.timestamp_millis())
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to store lobby '{code}'"))?;
    Ok(())
}

async fn upsert_body<T>(conn: &mut SqliteConnection, sql: &str, code: &LobbyCode, value: &T) -> Result<()>
where
    T: serde::Serialize + ?Sized,
{
    let body = serde_json::to_string(value)?;
    sqlx::query(sql)
        .bind(code.as_str())
        .bind(body)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to store session '{code}'"))?;
    Ok(())
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
