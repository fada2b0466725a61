//! Per-image build locks
//!
//! Builds that target the same app image share volumes, so they are
//! serialized. Builds of different images never contend.

use crate::error::{PackError, PackResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// What a second build of the same image does while the first runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    Wait,
    Fail,
}

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Default, Clone)]
pub struct KeyedLock {
    locks: LockTable,
}

/// Held for the duration of a build
pub struct BuildGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
    key: String,
}

impl BuildGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Acquirers clone the entry under the table lock, so a count of one
        // means nobody holds or awaits it.
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        if locks
            .get(&self.key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str, mode: LockMode) -> PackResult<BuildGuard> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| PackError::Internal("build lock table poisoned".to_string()))?;
            locks.entry(key.to_string()).or_default().clone()
        };

        let guard = match mode {
            LockMode::Wait => lock.lock_owned().await,
            LockMode::Fail => lock
                .try_lock_owned()
                .map_err(|_| PackError::BuildInProgress(key.to_string()))?,
        };
        Ok(BuildGuard {
            guard: Some(guard),
            locks: self.locks.clone(),
            key: key.to_string(),
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}
