//! Active CLI process registry
//!
//! Maps a session id (or a provisional key used before the CLI reports its
//! session id) to the handle of the process serving it. The registry is
//! constructed once by whoever composes the bridge and the HTTP layer and is
//! shared by `Arc`.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle to a running CLI process.
///
/// The owning bridge invocation keeps the child itself; the handle only
/// carries what is needed to identify and terminate it.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    id: Uuid,
    pid: Option<u32>,
    cancel: CancellationToken,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pid,
            cancel: CancellationToken::new(),
        }
    }

    /// Unique id of this handle (distinguishes two runs on the same key)
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the owning run to terminate the process
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    pub fn is_terminating(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed by the owning run
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Session id → process handle
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: RwLock<HashMap<String, ProcessHandle>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle, replacing any previous one under the key
    pub async fn insert(&self, key: &str, handle: ProcessHandle) {
        self.processes.write().await.insert(key.to_string(), handle);
    }

    pub async fn get(&self, key: &str) -> Option<ProcessHandle> {
        self.processes.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.processes.read().await.contains_key(key)
    }

    pub async fn remove(&self, key: &str) -> Option<ProcessHandle> {
        self.processes.write().await.remove(key)
    }

    /// Remove the entry only if it still belongs to `handle_id`
    pub async fn remove_if_owned(&self, key: &str, handle_id: Uuid) -> bool {
        let mut processes = self.processes.write().await;
        match processes.get(key) {
            Some(handle) if handle.id == handle_id => {
                processes.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Register a handle under the first free key at or after `base`.
    ///
    /// Used for runs that have no session id yet; returns the key taken.
    pub async fn insert_provisional(&self, base: u64, handle: ProcessHandle) -> String {
        let mut processes = self.processes.write().await;
        let mut candidate = base;
        while processes.contains_key(&candidate.to_string()) {
            candidate += 1;
        }
        let key = candidate.to_string();
        processes.insert(key.clone(), handle);
        key
    }

    /// Move `handle` from `old_key` to `new_key` under a single lock.
    ///
    /// `old_key` is only removed while it still belongs to `handle`, and the
    /// handle is always the one registered under `new_key`. An aborted handle
    /// is not registered again. No-op when the keys are equal.
    pub async fn rekey(&self, old_key: &str, new_key: &str, handle: &ProcessHandle) {
        if old_key == new_key {
            return;
        }
        let mut processes = self.processes.write().await;
        if processes.get(old_key).is_some_and(|h| h.id == handle.id) {
            processes.remove(old_key);
        }
        if !handle.is_terminating() {
            processes.insert(new_key.to_string(), handle.clone());
        }
    }

    /// Snapshot of registered keys
    pub async fn keys(&self) -> Vec<String> {
        self.processes.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.processes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.processes.read().await.is_empty()
    }

    /// Terminate and remove the process registered under `key`.
    ///
    /// Returns `false` without touching the registry when nothing is registered.
    pub async fn abort(&self, key: &str) -> bool {
        let handle = self.processes.write().await.remove(key);
        match handle {
            Some(handle) => {
                tracing::info!(session_id = key, pid = ?handle.pid, "Aborting CLI session");
                handle.terminate();
                true
            }
            None => false,
        }
    }
}
