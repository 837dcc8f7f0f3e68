//! Durable scan progress, one snapshot per `(length, identifier type)`.
//!
//! Snapshots are plain JSON with the field names
//! `current_number`, `length`, `username_type`, `available_usernames` and
//! `check_count`. A snapshot is only handed back if it deserializes with the
//! expected types *and* names the requested key; anything else is treated
//! as if no snapshot existed.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::generate::IdentifierKind;
use crate::scan::ScanState;

/// Identifies one resumable scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressKey {
    /// Identifier length.
    pub length: usize,
    /// Identifier alphabet.
    pub kind: IdentifierKind,
}

impl ProgressKey {
    /// Key for `length`-character identifiers of `kind`.
    #[must_use]
    pub const fn new(length: usize, kind: IdentifierKind) -> Self {
        Self { length, kind }
    }

    /// File name of this key's snapshot.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("username_cache_{}_{}.json", self.length, self.kind)
    }

    fn matches(&self, state: &ScanState) -> bool {
        state.length == self.length && state.kind == self.kind
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-character {}", self.length, self.kind)
    }
}

/// Errors raised while writing a snapshot.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    /// The snapshot could not be serialized.
    #[error("failed to serialize progress: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The snapshot could not be written.
    #[error("failed to write progress to {}: {source}", .path.display())]
    Io {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Keyed snapshot storage with overwrite semantics.
pub trait ProgressStore {
    /// Replace the snapshot stored under `key` with `state`.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] if the snapshot cannot be serialized or
    /// written. The previous snapshot, if any, is left intact.
    fn save(&self, key: ProgressKey, state: &ScanState) -> Result<(), ProgressError>;

    /// The snapshot for `key`, if one exists and validates.
    fn load(&self, key: ProgressKey) -> Option<ScanState>;
}

impl<T: ProgressStore + ?Sized> ProgressStore for &T {
    fn save(&self, key: ProgressKey, state: &ScanState) -> Result<(), ProgressError> {
        (**self).save(key, state)
    }

    fn load(&self, key: ProgressKey) -> Option<ScanState> {
        (**self).load(key)
    }
}

fn decode(key: ProgressKey, bytes: &[u8]) -> Option<ScanState> {
    let state: ScanState = match serde_json::from_slice(bytes) {
        Ok(state) => state,
        Err(e) => {
            warn!(%key, error = %e, "ignoring malformed progress snapshot");
            return None;
        }
    };
    if !key.matches(&state) {
        warn!(
            %key,
            stored_length = state.length,
            stored_kind = %state.kind,
            "ignoring progress snapshot for a different scan"
        );
        return None;
    }
    Some(state)
}

/// Snapshots stored as JSON files in one directory.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    dir: PathBuf,
}

impl FileProgressStore {
    /// Store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the snapshot for `key`.
    #[must_use]
    pub fn path_for(&self, key: ProgressKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl ProgressStore for FileProgressStore {
    fn save(&self, key: ProgressKey, state: &ScanState) -> Result<(), ProgressError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let path = self.path_for(key);
        fs::create_dir_all(&self.dir).map_err(|source| ProgressError::Io {
            path: self.dir.clone(),
            source,
        })?;
        write_atomic(&path, &bytes).map_err(|source| ProgressError::Io {
            path: path.clone(),
            source,
        })?;
        info!(
            path = %path.display(),
            position = state.position,
            found = state.found.len(),
            "progress saved"
        );
        Ok(())
    }

    fn load(&self, key: ProgressKey) -> Option<ScanState> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no progress snapshot");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable progress snapshot");
                return None;
            }
        };
        let state = decode(key, &bytes)?;
        info!(
            path = %path.display(),
            position = state.position,
            found = state.found.len(),
            checks = state.total_checks,
            "found progress snapshot"
        );
        Some(state)
    }
}

/// Write to a sibling temp file, flush it to disk, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp_path = parent.join(format!(
        ".{}.tmp.{}.{}",
        path.file_name().and_then(|v| v.to_str()).unwrap_or("progress"),
        std::process::id(),
        nanos
    ));

    let result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// In-memory store holding serialized snapshots. Counts saves so callers
/// can observe persistence cadence.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    snapshots: RefCell<HashMap<ProgressKey, Vec<u8>>>,
    saves: Cell<usize>,
}

impl MemoryProgressStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.get()
    }

    /// Store raw bytes under `key`, bypassing serialization.
    pub fn insert_raw(&self, key: ProgressKey, bytes: impl Into<Vec<u8>>) {
        self.snapshots.borrow_mut().insert(key, bytes.into());
    }
}

impl ProgressStore for MemoryProgressStore {
    fn save(&self, key: ProgressKey, state: &ScanState) -> Result<(), ProgressError> {
        let bytes = serde_json::to_vec(state)?;
        self.snapshots.borrow_mut().insert(key, bytes);
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }

    fn load(&self, key: ProgressKey) -> Option<ScanState> {
        let snapshots = self.snapshots.borrow();
        decode(key, snapshots.get(&key)?)
    }
}

/// Store that keeps nothing, for runs that must not touch saved progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgressStore;

impl ProgressStore for NoProgressStore {
    fn save(&self, _key: ProgressKey, _state: &ScanState) -> Result<(), ProgressError> {
        Ok(())
    }

    fn load(&self, _key: ProgressKey) -> Option<ScanState> {
        None
    }
}
