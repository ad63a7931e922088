use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use shared::domain::{LobbyCode, PackId, PlayerId};
use uuid::Uuid;

/// No 0/O or 1/I, which are easy to misread when a code is read aloud.
pub const LOBBY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const LOBBY_CODE_LEN: usize = 6;

pub trait IdGenerator: Send + Sync {
    fn lobby_code(&self) -> LobbyCode;
    fn player_id(&self) -> PlayerId;
    fn pack_id(&self) -> PackId;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn lobby_code(&self) -> LobbyCode {
        let mut rng = rand::thread_rng();
        let code: String = (0..LOBBY_CODE_LEN)
            .map(|_| LOBBY_CODE_ALPHABET[rng.gen_range(0..LOBBY_CODE_ALPHABET.len())] as char)
            .collect();
        LobbyCode(code)
    }

    fn player_id(&self) -> PlayerId {
        PlayerId(format!("player_{}", Uuid::new_v4().simple()))
    }

    fn pack_id(&self) -> PackId {
        PackId(format!("pack_{}", Uuid::new_v4().simple()))
    }
}

/// Predictable ids, for tests and simulations.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl IdGenerator for SequentialIds {
    fn lobby_code(&self) -> LobbyCode {
        LobbyCode(format!("GAME{:02}", self.bump() % 100))
    }

    fn player_id(&self) -> PlayerId {
        PlayerId(format!("player_{}", self.bump()))
    }

    fn pack_id(&self) -> PackId {
        PackId(format!("pack_{}", self.bump()))
    }
}
