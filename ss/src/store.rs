//! Core SessionStore implementation

use eyre::{Context, Result};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Identifier of a session directory
pub type SessionId = String;

/// File-backed key-value store with one directory per session
pub struct SessionStore {
    /// Base path for storage
    base_path: PathBuf,
    /// Held open so the exclusive lock lives as long as the store
    _lock: fs::File,
}

impl SessionStore {
    /// Open or create a store at the given path
    ///
    /// Fails if another process (or another handle) already holds the store lock.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).context("Failed to create store directory")?;

        let lock_path = base_path.join(crate::LOCK_FILE);
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context(format!("Failed to open lock file: {}", lock_path.display()))?;
        lock.try_lock_exclusive()
            .context(format!("Session store is locked by another process: {}", base_path.display()))?;

        debug!(?base_path, "Opened session store");
        Ok(Self { base_path, _lock: lock })
    }

    /// Root directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Create the directory for a new session
    pub fn create_session(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        if dir.exists() {
            return Err(eyre::eyre!("Session already exists: {}", session_id));
        }
        fs::create_dir_all(&dir).context(format!("Failed to create session directory: {}", dir.display()))?;
        info!(session_id, "Session directory created");
        Ok(())
    }

    /// Check whether a session directory exists
    pub fn session_exists(&self, session_id: &str) -> bool {
        self.session_dir(session_id).map(|d| d.is_dir()).unwrap_or(false)
    }

    /// List all session IDs, sorted
    pub fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                sessions.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// Remove a session and everything under it
    ///
    /// Returns false if the session did not exist.
    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let dir = self.session_dir(session_id)?;
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).context(format!("Failed to delete session: {}", session_id))?;
        info!(session_id, "Session deleted");
        Ok(true)
    }

    /// Serialize a value to `{session}/{key}`, replacing any previous value atomically
    pub fn write_json<T: Serialize>(&self, session_id: &str, key: &str, value: &T) -> Result<()> {
        let path = self.record_path(session_id, key)?;
        let content = serde_json::to_vec_pretty(value)?;
        write_atomic(&path, &content)?;
        debug!(session_id, key, bytes = content.len(), "write_json");
        Ok(())
    }

    /// Read `{session}/{key}`, returning None if it does not exist
    pub fn read_json<T: DeserializeOwned>(&self, session_id: &str, key: &str) -> Result<Option<T>> {
        let path = self.record_path(session_id, key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read(&path).context(format!("Failed to read record: {}", path.display()))?;
        let value = serde_json::from_slice(&content).context(format!("Failed to parse record: {}", path.display()))?;
        Ok(Some(value))
    }

    /// Read every JSON record in `{session}/{dir}`, ordered by file name
    pub fn list_json<T: DeserializeOwned>(&self, session_id: &str, dir: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for name in self.json_file_names(session_id, dir)? {
            if let Some(record) = self.read_json(session_id, &format!("{}/{}", dir, name))? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Read the first record in `{session}/{dir}` whose file name starts with `prefix`
    pub fn find_json<T: DeserializeOwned>(&self, session_id: &str, dir: &str, prefix: &str) -> Result<Option<T>> {
        match self
            .json_file_names(session_id, dir)?
            .into_iter()
            .find(|name| name.starts_with(prefix))
        {
            Some(name) => self.read_json(session_id, &format!("{}/{}", dir, name)),
            None => Ok(None),
        }
    }

    /// Remove a single record; returns false if it did not exist
    pub fn remove(&self, session_id: &str, key: &str) -> Result<bool> {
        let path = self.record_path(session_id, key)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    /// Write raw bytes to `{session}/{key}` and return the absolute path
    pub fn write_bytes(&self, session_id: &str, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.record_path(session_id, key)?;
        write_atomic(&path, bytes)?;
        debug!(session_id, key, bytes = bytes.len(), "write_bytes");
        Ok(path)
    }

    /// Read raw bytes from `{session}/{key}`
    pub fn read_bytes(&self, session_id: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(session_id, key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&path)?))
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(eyre::eyre!("Invalid session id: {:?}", session_id));
        }
        Ok(self.base_path.join(session_id))
    }

    fn record_path(&self, session_id: &str, key: &str) -> Result<PathBuf> {
        let dir = self.session_dir(session_id)?;
        if !dir.is_dir() {
            return Err(eyre::eyre!("Session not found: {}", session_id));
        }
        let relative = Path::new(key);
        let escapes = key.is_empty() || relative.components().any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(eyre::eyre!("Invalid record key: {:?}", key));
        }
        Ok(dir.join(relative))
    }

    fn json_file_names(&self, session_id: &str, dir: &str) -> Result<Vec<String>> {
        let path = self.record_path(session_id, dir)?;
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let entry_path = entry.path();
            if entry_path.extension().map(|e| e == "json").unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Write via a sibling temp file and rename so readers never see a torn record
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).context(format!("Failed to write: {}", tmp.display()))?;
    fs::rename(&tmp, path).context(format!("Failed to commit: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        number: u32,
        text: String,
    }

    fn note(number: u32, text: &str) -> Note {
        Note {
            number,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_write_and_read_json() {
        let temp = tempdir().unwrap();
        let store = SessionStore::open(temp.path()).unwrap();
        store.create_session("s1").unwrap();

        store.write_json("s1", "metadata.json", &note(1, "hello")).unwrap();
        let loaded: Option<Note> = store.read_json("s1", "metadata.json").unwrap();
        assert_eq!(loaded, Some(note(1, "hello")));

        let missing: Option<Note> = store.read_json("s1", "nope.json").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_overwrite_replaces_record() {
        let temp = tempdir().unwrap();
        let store = SessionStore::open(temp.path()).unwrap();
        store.create_session("s1").unwrap();

        store.write_json("s1", "checkpoints/01_a.json", &note(1, "old")).unwrap();
        store.write_json("s1", "checkpoints/01_a.json", &note(1, "new")).unwrap();

        let all: Vec<Note> = store.list_json("s1", "checkpoints").unwrap();
        assert_eq!(all, vec![note(1, "new")]);
        assert!(!temp.path().join("s1/checkpoints/01_a.json.tmp").exists());
    }

    #[test]
    fn test_list_and_find_by_prefix() {
        let temp = tempdir().unwrap();
        let store = SessionStore::open(temp.path()).unwrap();
        store.create_session("s1").unwrap();

        store.write_json("s1", "checkpoints/02_b.json", &note(2, "b")).unwrap();
        store.write_json("s1", "checkpoints/01_a.json", &note(1, "a")).unwrap();
        store.write_json("s1", "checkpoints/10_c.json", &note(10, "c")).unwrap();

        let all: Vec<Note> = store.list_json("s1", "checkpoints").unwrap();
        assert_eq!(all.iter().map(|n| n.number).collect::<Vec<_>>(), vec![1, 2, 10]);

        let found: Option<Note> = store.find_json("s1", "checkpoints", "02_").unwrap();
        assert_eq!(found, Some(note(2, "b")));

        let none: Option<Note> = store.find_json("s1", "checkpoints", "03_").unwrap();
        assert!(none.is_none());

        let empty: Vec<Note> = store.list_json("s1", "missing-dir").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_sessions_listing_and_delete() {
        let temp = tempdir().unwrap();
        let store = SessionStore::open(temp.path()).unwrap();
        store.create_session("b").unwrap();
        store.create_session("a").unwrap();

        assert_eq!(store.list_sessions().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert!(store.create_session("a").is_err());

        assert!(store.delete_session("a").unwrap());
        assert!(!store.delete_session("a").unwrap());
        assert!(!store.session_exists("a"));
        assert!(store.session_exists("b"));
    }

    #[test]
    fn test_rejects_escaping_keys_and_bad_ids() {
        let temp = tempdir().unwrap();
        let store = SessionStore::open(temp.path()).unwrap();
        store.create_session("s1").unwrap();

        assert!(store.write_json("s1", "../escape.json", &note(1, "x")).is_err());
        assert!(store.write_json("s1", "/etc/passwd", &note(1, "x")).is_err());
        assert!(store.create_session("../up").is_err());
        assert!(store.write_json("ghost", "metadata.json", &note(1, "x")).is_err());
    }

    #[test]
    fn test_bytes_roundtrip_returns_path() {
        let temp = tempdir().unwrap();
        let store = SessionStore::open(temp.path()).unwrap();
        store.create_session("s1").unwrap();

        let path = store.write_bytes("s1", "assets/portrait.png", &[1, 2, 3]).unwrap();
        assert!(path.ends_with("s1/assets/portrait.png"));
        assert_eq!(store.read_bytes("s1", "assets/portrait.png").unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let temp = tempdir().unwrap();
        let _store = SessionStore::open(temp.path()).unwrap();
        assert!(SessionStore::open(temp.path()).is_err());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp = tempdir().unwrap();
        {
            let _store = SessionStore::open(temp.path()).unwrap();
        }
        assert!(SessionStore::open(temp.path()).is_ok());
    }
}
