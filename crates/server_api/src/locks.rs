use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use shared::domain::LobbyCode;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Registry = Arc<StdMutex<HashMap<LobbyCode, Arc<Mutex<()>>>>>;

/// One async mutex per lobby code. Holding the guard makes the caller the
/// only writer for that session. Entries live only while someone holds or
/// waits for them.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Registry,
}

/// Exclusive access to one session; releases and reclaims on drop.
pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    code: LobbyCode,
    registry: Registry,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, code: &LobbyCode) -> SessionGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(code.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        SessionGuard {
            guard: Some(lock.lock_owned().await),
            code: code.clone(),
            registry: self.inner.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut map = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        self.guard.take();
        // Waiters clone the Arc under the registry lock, so a count of one
        // means nobody else can reach this mutex.
        let idle = map
            .get(&self.code)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            map.remove(&self.code);
        }
    }
}
