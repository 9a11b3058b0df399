//! Crash-consistent JSON state files
//!
//! Each state file (regions, membership snapshot, delivery cursor) is
//! replaced atomically: serialize to a sibling temp file, fsync, rename
//! over the target. A crash at any point leaves either the old or the
//! new file, never a torn one. The three files are independently
//! consistent; ordering guarantees live in the callers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("state io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("state decode error at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("state encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.display().to_string(), source }
    }
}

/// Durable state directory handle
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open (and create if needed) the state directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Atomically replace `file` with the JSON encoding of `value`.
    /// The write is durable (fsynced) before this returns Ok.
    pub fn save<T: Serialize>(&self, file: &str, value: &T) -> Result<(), StorageError> {
        let target = self.path(file);
        let tmp = self.dir.join(format!("{file}.tmp"));

        let json = serde_json::to_vec_pretty(value).map_err(StorageError::Encode)?;

        let mut f = File::create(&tmp).map_err(|e| StorageError::io(&tmp, e))?;
        f.write_all(&json).map_err(|e| StorageError::io(&tmp, e))?;
        f.sync_all().map_err(|e| StorageError::io(&tmp, e))?;
        fs::rename(&tmp, &target).map_err(|e| StorageError::io(&target, e))?;

        debug!(file = %target.display(), bytes = %json.len(), "state_saved");
        Ok(())
    }

    /// Load `file`, returning None when it does not exist yet
    pub fn load<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>, StorageError> {
        let target = self.path(file);
        let content = match fs::read(&target) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&target, e)),
        };

        let value = serde_json::from_slice(&content)
            .map_err(|e| StorageError::Decode { path: target.display().to_string(), source: e })?;
        Ok(Some(value))
    }

    /// Append one JSON line to `file` and fsync.
    /// Used for the outbound event queue.
    pub fn append_line<T: Serialize>(&self, file: &str, value: &T) -> Result<(), StorageError> {
        let target = self.path(file);
        let json = serde_json::to_string(value).map_err(StorageError::Encode)?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .map_err(|e| StorageError::io(&target, e))?;
        writeln!(f, "{json}").map_err(|e| StorageError::io(&target, e))?;
        f.sync_all().map_err(|e| StorageError::io(&target, e))?;

        debug!(file = %target.display(), bytes = %json.len(), "state_appended");
        Ok(())
    }

    /// Read every JSON line of `file`; missing file yields an empty vec.
    /// A trailing torn line (crash mid-append) is skipped.
    pub fn read_lines<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>, StorageError> {
        let target = self.path(file);
        let content = match fs::read_to_string(&target) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&target, e)),
        };

        let mut out = Vec::new();
        let lines: Vec<&str> = content.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(v) => out.push(v),
                Err(e) if i == lines.len() - 1 => {
                    debug!(file = %target.display(), error = %e, "torn_tail_line_skipped");
                }
                Err(e) => {
                    return Err(StorageError::Decode {
                        path: target.display().to_string(),
                        source: e,
                    })
                }
            }
        }
        Ok(out)
    }
}
