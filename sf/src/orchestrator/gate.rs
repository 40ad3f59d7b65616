//! Latched per-wave approval gates
//!
//! Each wave has one gate that moves from pending to signaled exactly once.
//! Signals are latched: signaling before anyone waits is fine, and waiting on
//! an already signaled gate returns immediately. Gates live only in memory;
//! they are rebuilt from `SessionMetadata::approved_waves` when a run starts.

use std::collections::BTreeSet;

use tokio::sync::watch;
use tracing::debug;

use super::error::{OrchestratorError, OrchestratorResult};

pub struct ApprovalGates {
    gates: Vec<watch::Sender<bool>>,
}

impl ApprovalGates {
    /// Build gates for `wave_count` waves, pre-signaling those in `approved`
    pub fn new(wave_count: u32, approved: &BTreeSet<u32>) -> Self {
        debug!(wave_count, ?approved, "ApprovalGates::new: called");
        let gates = (1..=wave_count)
            .map(|wave| watch::Sender::new(approved.contains(&wave)))
            .collect();
        Self { gates }
    }

    fn gate(&self, wave: u32) -> OrchestratorResult<&watch::Sender<bool>> {
        let idx = (wave as usize).checked_sub(1).ok_or(OrchestratorError::UnknownWave(wave))?;
        self.gates.get(idx).ok_or(OrchestratorError::UnknownWave(wave))
    }

    /// Signal a wave's gate; returns false if it was already signaled
    pub fn signal(&self, wave: u32) -> OrchestratorResult<bool> {
        debug!(wave, "ApprovalGates::signal: called");
        Ok(self.gate(wave)?.send_if_modified(|signaled| !std::mem::replace(signaled, true)))
    }

    pub fn is_signaled(&self, wave: u32) -> bool {
        self.gate(wave).map(|g| *g.borrow()).unwrap_or(false)
    }

    /// Suspend until the wave's gate is signaled; never times out
    pub async fn wait(&self, wave: u32) -> OrchestratorResult<()> {
        debug!(wave, "ApprovalGates::wait: called");
        let mut rx = self.gate(wave)?.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|signaled| *signaled).await;
        Ok(())
    }

    pub fn wave_count(&self) -> u32 {
        self.gates.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_presignaled_gate_returns_immediately() {
        let gates = ApprovalGates::new(3, &BTreeSet::from([2]));
        assert!(gates.is_signaled(2));
        assert!(!gates.is_signaled(1));
        tokio::time::timeout(Duration::from_millis(50), gates.wait(2))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_signal_is_latched_and_idempotent() {
        let gates = ApprovalGates::new(3, &BTreeSet::new());
        assert!(gates.signal(3).unwrap());
        assert!(!gates.signal(3).unwrap());
        gates.wait(3).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_blocks_until_signaled() {
        let gates = Arc::new(ApprovalGates::new(2, &BTreeSet::new()));
        let waiter = {
            let gates = gates.clone();
            tokio::spawn(async move { gates.wait(1).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gates.signal(1).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_wave() {
        let gates = ApprovalGates::new(3, &BTreeSet::new());
        assert!(matches!(gates.signal(0), Err(OrchestratorError::UnknownWave(0))));
        assert!(matches!(gates.signal(4), Err(OrchestratorError::UnknownWave(4))));
        assert!(gates.wait(4).await.is_err());
        assert!(!gates.is_signaled(4));
    }
}
