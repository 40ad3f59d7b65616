//! Event Logger - persists events to JSONL files
//!
//! Subscribes to the EventBus and appends every event to
//! `<runs-dir>/<session-id>/events.jsonl` for history and replay.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, ForgeEvent};

const EVENTS_FILE: &str = "events.jsonl";

/// Writes events to one JSONL file per session
pub struct EventLogger {
    runs_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        debug!(?runs_dir, "EventLogger::new: creating logger");
        Self {
            runs_dir,
            writers: HashMap::new(),
        }
    }

    /// Append an event to its session's log file
    pub fn write_event(&mut self, event: &ForgeEvent) -> eyre::Result<()> {
        let session_id = event.session_id();
        debug!(%session_id, event_type = event.event_type(), "EventLogger::write_event");

        let writer = match self.writers.entry(session_id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let session_dir = self.runs_dir.join(session_id);
                fs::create_dir_all(&session_dir)?;

                let log_path = session_dir.join(EVENTS_FILE);
                debug!(?log_path, "EventLogger: opening log file");
                let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
                entry.insert(BufWriter::new(file))
            }
        };

        let json = serde_json::to_string(&EventLogEntry::new(event.clone()))?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Drop the writer for a session
    pub fn close_session(&mut self, session_id: &str) {
        debug!(%session_id, "EventLogger::close_session");
        if let Some(mut writer) = self.writers.remove(session_id) {
            let _ = writer.flush();
        }
    }

    /// Consume events from the bus until it closes
    pub async fn run(mut self, event_bus: Arc<EventBus>) {
        let rx = event_bus.subscribe();
        drop(event_bus);
        self.run_with(rx).await;
    }

    async fn run_with(&mut self, mut rx: broadcast::Receiver<ForgeEvent>) {
        debug!("EventLogger::run: starting event logger");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = self.write_event(&event) {
                        error!(session_id = event.session_id(), error = %e, "EventLogger: failed to write event");
                    }
                    if event.is_terminal() {
                        self.close_session(event.session_id());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (session_id, mut writer) in self.writers.drain() {
            debug!(%session_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read a session's logged events, skipping lines that fail to parse
pub fn read_session_events(runs_dir: impl AsRef<Path>, session_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = runs_dir.as_ref().join(session_id).join(EVENTS_FILE);
    debug!(?log_path, "read_session_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_session_events: failed to parse line"),
        }
    }

    debug!(count = entries.len(), "read_session_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
pub fn spawn_event_logger(
    event_bus: Arc<EventBus>,
    runs_dir: impl AsRef<Path>,
) -> eyre::Result<tokio::task::JoinHandle<()>> {
    fs::create_dir_all(runs_dir.as_ref())?;
    let mut logger = EventLogger::new(runs_dir);
    // Subscribe before returning so no early event is missed
    let rx = event_bus.subscribe();
    Ok(tokio::spawn(async move {
        logger.run_with(rx).await;
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn started(session_id: &str) -> ForgeEvent {
        ForgeEvent::WaveStarted {
            session_id: session_id.to_string(),
            wave: 1,
            tasks: vec!["personality".to_string()],
        }
    }

    #[test]
    fn test_write_event() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&started("s-1")).unwrap();

        let log_path = temp.path().join("s-1").join(EVENTS_FILE);
        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("wave_started"));
        assert!(content.contains("s-1"));
    }

    #[test]
    fn test_sessions_get_separate_files() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&started("a")).unwrap();
        logger.write_event(&started("b")).unwrap();
        logger.write_event(&started("a")).unwrap();

        assert_eq!(read_session_events(temp.path(), "a").unwrap().len(), 2);
        assert_eq!(read_session_events(temp.path(), "b").unwrap().len(), 1);
    }

    #[test]
    fn test_read_skips_bad_lines() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());
        logger.write_event(&started("s")).unwrap();

        let log_path = temp.path().join("s").join(EVENTS_FILE);
        let mut content = fs::read_to_string(&log_path).unwrap();
        content.push_str("not json\n\n");
        fs::write(&log_path, content).unwrap();

        let entries = read_session_events(temp.path(), "s").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.event_type(), "wave_started");
    }

    #[test]
    fn test_read_nonexistent_session() {
        let temp = tempdir().unwrap();
        assert!(read_session_events(temp.path(), "missing").unwrap().is_empty());
    }

    #[test]
    fn test_close_session() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());
        logger.write_event(&started("s")).unwrap();
        assert!(logger.writers.contains_key("s"));
        logger.close_session("s");
        assert!(!logger.writers.contains_key("s"));
    }

    #[tokio::test]
    async fn test_spawned_logger_persists_until_bus_drops() {
        let temp = tempdir().unwrap();
        let bus = Arc::new(EventBus::new(16));
        let handle = spawn_event_logger(bus.clone(), temp.path()).unwrap();

        let emitter = bus.emitter_for("s");
        emitter.wave_started(1, vec![]);
        emitter.session_complete();
        drop(emitter);
        drop(bus);

        handle.await.unwrap();
        let entries = read_session_events(temp.path(), "s").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[1].event.is_terminal());
    }
}
