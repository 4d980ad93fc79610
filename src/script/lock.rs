//! Per-fingerprint build locks.
//!
//! One lock file per fingerprint under `<cache root>/locks/`. The lock is an
//! advisory exclusive file lock, so it is shared between independent
//! processes and dropped by the kernel if the holder dies mid-build.

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use super::error::{ScriptError, ScriptResult};
use super::fingerprint::Fingerprint;

/// Written into the lock file by the holder, for diagnostics only
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
    pub version: u32,
    pub pid: u32,
    pub started_at_unix: u64,
    pub fingerprint: String,
}

/// Exclusive build lock, released on drop
#[derive(Debug)]
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Block until the lock for `fingerprint` is ours
    pub fn acquire(path: &Path, fingerprint: &Fingerprint) -> ScriptResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ScriptError::cache_io(
                    format!("failed to create lock directory {}", parent.display()),
                    e,
                )
            })?;
        }

        let file = loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)
                .map_err(|e| {
                    ScriptError::cache_io(format!("failed to open build lock {}", path.display()), e)
                })?;

            debug!(
                operation = "lock",
                fingerprint = %fingerprint.short(),
                "waiting for build lock"
            );
            FileExt::lock_exclusive(&file).map_err(|e| {
                ScriptError::cache_io(format!("failed to lock {}", path.display()), e)
            })?;

            // The file may have been unlinked by eviction while we waited
            if still_linked(&file, path) {
                break file;
            }
            debug!(operation = "lock", fingerprint = %fingerprint.short(), "lock file replaced, retrying");
        };
        debug!(operation = "lock", fingerprint = %fingerprint.short(), status = "success", "build lock acquired");

        let lock = BuildLock {
            file,
            path: path.to_path_buf(),
        };
        if let Err(e) = lock.write_metadata(fingerprint) {
            warn!(path = %path.display(), error = %e, "failed to record lock holder");
        }
        Ok(lock)
    }

    fn write_metadata(&self, fingerprint: &Fingerprint) -> io::Result<()> {
        let metadata = LockMetadata {
            version: 1,
            pid: std::process::id(),
            started_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            fingerprint: fingerprint.to_string(),
        };

        let mut file = &self.file;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        serde_json::to_writer(&mut file, &metadata).map_err(io::Error::other)?;
        file.flush()
    }

    /// Read the holder metadata through the held handle
    pub fn read_metadata(&self) -> io::Result<LockMetadata> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        serde_json::from_str(&contents).map_err(io::Error::other)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlink the lock file while still holding the lock
    ///
    /// Waiters that opened the old file notice the unlink and reopen.
    pub fn remove_file(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release build lock");
        }
    }
}
