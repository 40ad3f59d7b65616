//! Event bus for live session progress
//!
//! The orchestrator emits an event for every observable step of a session.
//! Consumers (the CLI's live view, the JSONL logger) subscribe to the bus.
//!
//! # Architecture
//!
//! ```text
//!   Scheduler ─┐                          ┌─> CLI live output
//!   Regenerate ├──> EventBus (broadcast) ─┤
//!   Registry ──┘                          └─> EventLogger -> <runs>/<session>/events.jsonl
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use storyforge::events::{EventBus, ForgeEvent};
//!
//! let bus = EventBus::with_default_capacity();
//! let mut rx = bus.subscribe();
//! bus.emitter_for("session-1").wave_started(1, vec!["personality".into()]);
//! let event = rx.recv().await?;
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use logger::{EventLogger, read_session_events, spawn_event_logger};
pub use types::{EventLogEntry, ForgeEvent};
