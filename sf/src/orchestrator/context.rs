//! Shared collaborators and per-session runtime state

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::AbortHandle;
use tracing::debug;

use super::error::{OrchestratorError, OrchestratorResult};
use super::gate::ApprovalGates;
use crate::events::{EventBus, EventEmitter};
use crate::generation::Generator;
use crate::state::StateManager;

/// Everything a run or regeneration needs besides the session itself
#[derive(Clone)]
pub(crate) struct Services {
    pub state: StateManager,
    pub generator: Arc<dyn Generator>,
    pub bus: Arc<EventBus>,
    /// Bounds concurrent generation calls across all sessions
    pub permits: Arc<Semaphore>,
}

impl Services {
    pub fn emitter(&self, session_id: &str) -> EventEmitter {
        self.bus.emitter_for(session_id)
    }
}

/// In-memory state of a session known to this process
pub(crate) struct ActiveSession {
    pub session_id: String,
    pub gates: ApprovalGates,
    /// Held while a wave executes and writes its checkpoints
    pub run_lock: AsyncMutex<()>,
    running: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
}

impl ActiveSession {
    pub fn new(session_id: impl Into<String>, gates: ApprovalGates) -> Self {
        Self {
            session_id: session_id.into(),
            gates,
            run_lock: AsyncMutex::new(()),
            running: AtomicBool::new(false),
            abort: Mutex::new(None),
        }
    }

    /// Claim the session for a run; the claim ends when the guard drops
    pub fn claim_run(self: &Arc<Self>) -> OrchestratorResult<RunGuard> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::SessionBusy(self.session_id.clone()));
        }
        Ok(RunGuard { session: self.clone() })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_abort(&self, handle: AbortHandle) {
        if let Ok(mut slot) = self.abort.lock() {
            *slot = Some(handle);
        }
    }

    /// Abort a background run; returns false if none was registered
    pub fn abort(&self) -> bool {
        let handle = self.abort.lock().ok().and_then(|mut slot| slot.take());
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

/// Sessions held in memory by this process, keyed by id
///
/// Clones of an entry are only handed out under the table lock, so an
/// entry whose only owner is the table has no caller and can be evicted.
#[derive(Default)]
pub(crate) struct SessionTable {
    sessions: Mutex<HashMap<String, Arc<ActiveSession>>>,
}

impl SessionTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<ActiveSession>>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<ActiveSession>> {
        self.lock().get(session_id).cloned()
    }

    /// Existing entry for the session, or `fresh` if there is none
    pub fn get_or_insert(&self, fresh: ActiveSession) -> Arc<ActiveSession> {
        let mut sessions = self.lock();
        evict_idle(&mut sessions);
        sessions
            .entry(fresh.session_id.clone())
            .or_insert_with(|| Arc::new(fresh))
            .clone()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    /// Drop every entry that is not running and has no other owner
    pub fn prune_idle(&self) -> usize {
        evict_idle(&mut self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

fn evict_idle(sessions: &mut HashMap<String, Arc<ActiveSession>>) -> usize {
    let before = sessions.len();
    sessions.retain(|_, session| session.is_running() || Arc::strong_count(session) > 1);
    let evicted = before - sessions.len();
    if evicted > 0 {
        debug!(evicted, remaining = sessions.len(), "evict_idle: dropped idle sessions");
    }
    evicted
}

pub(crate) struct RunGuard {
    session: Arc<ActiveSession>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.session.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_claim_run_is_exclusive() {
        let session = Arc::new(ActiveSession::new("s1", ApprovalGates::new(3, &BTreeSet::new())));
        let guard = session.claim_run().unwrap();
        assert!(session.is_running());
        assert!(matches!(session.claim_run(), Err(OrchestratorError::SessionBusy(_))));

        drop(guard);
        assert!(!session.is_running());
        assert!(session.claim_run().is_ok());
    }

    #[test]
    fn test_table_evicts_only_unowned_idle_sessions() {
        let table = SessionTable::default();
        let held = table.get_or_insert(ActiveSession::new("held", ApprovalGates::new(1, &BTreeSet::new())));
        let running = table.get_or_insert(ActiveSession::new("running", ApprovalGates::new(1, &BTreeSet::new())));
        let guard = running.claim_run().unwrap();
        drop(running);
        table.get_or_insert(ActiveSession::new("idle", ApprovalGates::new(1, &BTreeSet::new())));
        assert_eq!(table.len(), 3);

        assert_eq!(table.prune_idle(), 1);
        assert!(table.get("idle").is_none());
        assert!(table.get("running").is_some());

        // Same id returns the live entry, not the fresh one
        let again = table.get_or_insert(ActiveSession::new("held", ApprovalGates::new(1, &BTreeSet::new())));
        assert!(Arc::ptr_eq(&held, &again));

        drop(guard);
        drop(held);
        drop(again);
        assert_eq!(table.prune_idle(), 2);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_abort_without_handle() {
        let session = ActiveSession::new("s1", ApprovalGates::new(1, &BTreeSet::new()));
        assert!(!session.abort());
    }
}
