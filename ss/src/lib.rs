//! SessionStore - directory-per-session JSON persistence
//!
//! Each session owns one directory under the store root. Records are plain
//! JSON files addressed by a relative key, binary assets sit next to them.
//!
//! # Architecture
//!
//! ```text
//! <store>/
//! ├── .lock                        # exclusive process lock
//! └── {session_id}/
//!     ├── metadata.json
//!     ├── knowledge_base.json
//!     ├── final_artifact.json
//!     ├── checkpoints/
//!     │   ├── 01_personality.json
//!     │   └── ...
//!     └── assets/
//!         └── portrait.png
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sessionstore::SessionStore;
//!
//! let store = SessionStore::open(".storyforge")?;
//! store.create_session("0190f3c2")?;
//! store.write_json("0190f3c2", "metadata.json", &metadata)?;
//! let loaded: Option<Metadata> = store.read_json("0190f3c2", "metadata.json")?;
//! ```

mod store;

pub use store::{SessionId, SessionStore};

/// Name of the lock file held for the lifetime of an open store
pub const LOCK_FILE: &str = ".lock";
