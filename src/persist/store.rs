//! Session storage-state records
//!
//! One JSON record per worker index holding the opaque driver storage state
//! (cookies and local storage). Loaded at worker start, overwritten at worker
//! end. Saves go through a temp file plus rename so a crash mid-write never
//! corrupts the previous record.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

/// Per-worker storage-state records on disk.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, worker: usize) -> PathBuf {
        self.dir.join(format!("instance_{}_session.json", worker + 1))
    }

    /// Load the record for a worker. A missing file or a decode failure both
    /// yield `None`, so the caller falls back to a fresh session.
    pub fn load(&self, worker: usize) -> Option<Value> {
        let path = self.record_path(worker);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("worker {} has no saved session at {}", worker, path.display());
                return None;
            }
            Err(e) => {
                warn!("worker {} session read failed ({}), starting fresh: {}", worker, path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("worker {} session record is corrupt, starting fresh: {}", worker, e);
                None
            }
        }
    }

    /// Overwrite the record for a worker. Creates the backing directory if
    /// absent. The write lands in a temp file first and is renamed into
    /// place, so readers only ever see a complete record.
    pub fn save(&self, worker: usize, state: &Value) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.record_path(worker);
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_string_pretty(state).map_err(io::Error::from)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;

        debug!("worker {} session saved to {}", worker, path.display());
        Ok(())
    }
}

impl SessionStore {
    /// Base directory the records live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
