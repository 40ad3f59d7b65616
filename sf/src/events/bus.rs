//! Event Bus - pub/sub for session progress
//!
//! Built on a tokio broadcast channel. The orchestrator emits, the CLI and
//! the JSONL logger subscribe.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::ForgeEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus for session activity
pub struct EventBus {
    tx: broadcast::Sender<ForgeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped, and a full
    /// channel drops its oldest events.
    pub fn emit(&self, event: ForgeEvent) {
        debug!(
            event_type = event.event_type(),
            session_id = event.session_id(),
            "EventBus::emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ForgeEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter bound to one session
    pub fn emitter_for(&self, session_id: impl Into<String>) -> EventEmitter {
        let session_id = session_id.into();
        debug!(%session_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            session_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Cheap cloneable handle that stamps every event with its session id
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<ForgeEvent>,
    session_id: String,
}

impl EventEmitter {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&self, event: ForgeEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    // === Convenience methods ===

    pub fn wave_started(&self, wave: u32, tasks: Vec<String>) {
        self.emit(ForgeEvent::WaveStarted {
            session_id: self.session_id.clone(),
            wave,
            tasks,
        });
    }

    pub fn wave_complete(&self, wave: u32, tasks_completed: Vec<String>, tasks_failed: Vec<String>) {
        self.emit(ForgeEvent::WaveComplete {
            session_id: self.session_id.clone(),
            wave,
            tasks_completed,
            tasks_failed,
        });
    }

    pub fn awaiting_approval(&self, wave: u32, checkpoint_numbers: Vec<u32>, message: &str) {
        self.emit(ForgeEvent::AwaitingApproval {
            session_id: self.session_id.clone(),
            wave,
            checkpoint_numbers,
            message: message.to_string(),
        });
    }

    pub fn wave_approved(&self, wave: u32) {
        self.emit(ForgeEvent::WaveApproved {
            session_id: self.session_id.clone(),
            wave,
        });
    }

    pub fn task_started(&self, task: &str) {
        self.emit(ForgeEvent::TaskStarted {
            session_id: self.session_id.clone(),
            task: task.to_string(),
        });
    }

    pub fn task_completed(&self, task: &str, tokens_used: u64, elapsed_ms: u64) {
        self.emit(ForgeEvent::TaskCompleted {
            session_id: self.session_id.clone(),
            task: task.to_string(),
            tokens_used,
            elapsed_ms,
        });
    }

    pub fn task_failed(&self, task: &str, error: &str) {
        self.emit(ForgeEvent::TaskFailed {
            session_id: self.session_id.clone(),
            task: task.to_string(),
            error: error.to_string(),
        });
    }

    pub fn checkpoint_ready(&self, checkpoint_number: u32, task: &str) {
        self.emit(ForgeEvent::CheckpointReady {
            session_id: self.session_id.clone(),
            checkpoint_number,
            task: task.to_string(),
        });
    }

    pub fn checkpoint_regenerated(&self, checkpoint_number: u32, task: &str, revision: u32) {
        self.emit(ForgeEvent::CheckpointRegenerated {
            session_id: self.session_id.clone(),
            checkpoint_number,
            task: task.to_string(),
            revision,
        });
    }

    pub fn session_complete(&self) {
        self.emit(ForgeEvent::SessionComplete {
            session_id: self.session_id.clone(),
        });
    }

    pub fn error(&self, message: &str) {
        self.emit(ForgeEvent::Error {
            session_id: self.session_id.clone(),
            message: message.to_string(),
        });
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus(capacity: usize) -> Arc<EventBus> {
    Arc::new(EventBus::new(capacity))
}
