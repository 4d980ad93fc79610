/// Build cache storage and retrieval
///
/// Maps a fingerprint to a committed build directory. Layout of one entry:
///
/// ```text
/// entries/<fingerprint>/
///     scriptbin.metadata.json     points at the current build
///     <build id>/                 one directory per committed build
/// ```
///
/// A build is renamed into its own directory first, then the metadata file is
/// replaced by rename. The entry path never disappears during a rebuild, and a
/// reader that resolved the previous build keeps a complete directory.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

use super::error::{ScriptError, ScriptResult};
use super::fingerprint::Fingerprint;
use super::lock::BuildLock;

pub const METADATA_FILE: &str = "scriptbin.metadata.json";

const METADATA_VERSION: u32 = 2;

const ENTRIES_DIR: &str = "entries";
const STAGING_DIR: &str = "staging";
const LOCKS_DIR: &str = "locks";

/// Staging directories untouched for this long are considered abandoned
const STAGING_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

/// Metadata stored alongside a committed build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: u32,
    pub fingerprint: String,
    /// Directory of the current build inside the entry
    pub build_id: String,
    pub built_at: DateTime<Utc>,
    /// Executable inside the build directory, `None` when `target_bin`
    /// points outside it and is resolved per invocation
    #[serde(default)]
    pub artifact: Option<PathBuf>,
    /// Script that triggered the build (informational)
    pub script_path: String,
    pub build_ms: u64,
    #[serde(default)]
    pub docker_image: Option<String>,
}

/// A committed, ready-to-run build
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    /// Executable inside [`CacheEntry::dir`], if the build produced one there
    pub artifact_path: Option<PathBuf>,
    pub built_at: DateTime<Utc>,
    /// Build directory of the current build
    pub dir: PathBuf,
    pub metadata: CacheMetadata,
}

/// A finished build waiting to be committed
#[derive(Debug)]
pub struct StagedBuild {
    pub dir: TempDir,
    /// Where `dir` is moved on commit, see [`ScriptCache::build_dir_for`]
    pub build_dir: PathBuf,
    /// In-build artifact path once committed
    pub artifact: Option<PathBuf>,
    pub script_path: PathBuf,
    pub build_duration: Duration,
    pub docker_image: Option<String>,
}

/// Result of a retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcSummary {
    pub removed_entries: usize,
    pub removed_staging: usize,
    pub freed_bytes: u64,
}

/// Build cache rooted at one directory
#[derive(Debug, Clone)]
pub struct ScriptCache {
    root: PathBuf,
}

impl ScriptCache {
    /// Open (creating if needed) the cache at `root`
    pub fn new(root: impl AsRef<Path>) -> ScriptResult<Self> {
        let root = root.as_ref();
        for sub in [ENTRIES_DIR, STAGING_DIR, LOCKS_DIR] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).map_err(|e| {
                ScriptError::cache_io(
                    format!("failed to create cache directory {}", dir.display()),
                    e,
                )
            })?;
        }

        // Absolute root: staging dirs are bind-mounted into containers
        let root = root.canonicalize().map_err(|e| {
            ScriptError::cache_io(format!("failed to resolve cache root {}", root.display()), e)
        })?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(ENTRIES_DIR).join(fingerprint.as_str())
    }

    /// Committed location of a build staged in `staging`
    ///
    /// Known before the build runs, so `{build_dir}` can be expanded up front.
    pub fn build_dir_for(&self, fingerprint: &Fingerprint, staging: &Path) -> PathBuf {
        let id = staging.file_name().unwrap_or(OsStr::new("build"));
        self.entry_dir(fingerprint).join(id)
    }

    pub fn lock_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(LOCKS_DIR)
            .join(format!("{}.lock", fingerprint.as_str()))
    }

    /// Committed entry for `fingerprint`, if its build is still on disk
    pub fn lookup(&self, fingerprint: &Fingerprint) -> ScriptResult<Option<CacheEntry>> {
        let Some(entry) = self.read_entry(fingerprint)? else {
            debug!(operation = "cache.lookup", status = "miss", fingerprint = %fingerprint.short(), "no entry");
            return Ok(None);
        };

        let missing = if !entry.dir.is_dir() {
            Some(entry.dir.as_path())
        } else {
            entry.artifact_path.as_deref().filter(|artifact| !artifact.exists())
        };
        if let Some(missing) = missing {
            info!(
                operation = "cache.lookup",
                status = "miss",
                fingerprint = %fingerprint.short(),
                path = %missing.display(),
                "build output missing, treating as miss"
            );
            return Ok(None);
        }

        debug!(operation = "cache.lookup", status = "hit", fingerprint = %fingerprint.short(), "cache hit");
        Ok(Some(entry))
    }

    /// Entry metadata without checking the build directory
    fn read_entry(&self, fingerprint: &Fingerprint) -> ScriptResult<Option<CacheEntry>> {
        let entry_dir = self.entry_dir(fingerprint);
        let metadata_path = entry_dir.join(METADATA_FILE);

        let json = match fs::read_to_string(&metadata_path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ScriptError::cache_io(
                    format!("failed to read {}", metadata_path.display()),
                    e,
                ))
            }
        };

        let metadata: CacheMetadata = match serde_json::from_str(&json) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %metadata_path.display(), error = %e, "unreadable cache metadata, ignoring entry");
                return Ok(None);
            }
        };

        if metadata.fingerprint != fingerprint.as_str() {
            warn!(path = %metadata_path.display(), "cache metadata belongs to another fingerprint, ignoring entry");
            return Ok(None);
        }
        if !is_plain_name(&metadata.build_id) {
            warn!(path = %metadata_path.display(), build_id = %metadata.build_id, "invalid build id, ignoring entry");
            return Ok(None);
        }

        Ok(Some(CacheEntry {
            fingerprint: fingerprint.clone(),
            artifact_path: metadata.artifact.clone(),
            built_at: metadata.built_at,
            dir: entry_dir.join(&metadata.build_id),
            metadata,
        }))
    }

    /// Private directory for a new build of `fingerprint`
    pub fn stage(&self, fingerprint: &Fingerprint) -> ScriptResult<TempDir> {
        let staging = self.root.join(STAGING_DIR);
        tempfile::Builder::new()
            .prefix(&format!("{}.", fingerprint.short()))
            .tempdir_in(&staging)
            .map_err(|e| {
                ScriptError::cache_io(
                    format!("failed to create staging directory in {}", staging.display()),
                    e,
                )
            })
    }

    /// Atomically publish a staged build as the current build of `fingerprint`
    pub fn commit(&self, fingerprint: &Fingerprint, staged: StagedBuild) -> ScriptResult<CacheEntry> {
        let entry_dir = self.entry_dir(fingerprint);
        let build_id = staged
            .build_dir
            .strip_prefix(&entry_dir)
            .ok()
            .and_then(Path::to_str)
            .filter(|id| is_plain_name(id))
            .map(str::to_string)
            .ok_or_else(|| {
                ScriptError::cache_io(
                    format!("build directory {} is not inside its entry", staged.build_dir.display()),
                    io::Error::from(io::ErrorKind::InvalidInput),
                )
            })?;

        fs::create_dir_all(&entry_dir).map_err(|e| {
            ScriptError::cache_io(format!("failed to create {}", entry_dir.display()), e)
        })?;
        let previous = self.read_entry(fingerprint)?.map(|e| e.metadata.build_id);

        fs::rename(staged.dir.path(), &staged.build_dir).map_err(|e| {
            ScriptError::cache_io(
                format!(
                    "failed to move build into place ({} -> {})",
                    staged.dir.path().display(),
                    staged.build_dir.display()
                ),
                e,
            )
        })?;
        // The TempDir now points at a path that no longer exists; its drop is a no-op
        drop(staged.dir);

        let metadata = CacheMetadata {
            version: METADATA_VERSION,
            fingerprint: fingerprint.to_string(),
            build_id: build_id.clone(),
            built_at: Utc::now(),
            artifact: staged.artifact.clone(),
            script_path: staged.script_path.display().to_string(),
            build_ms: staged.build_duration.as_millis() as u64,
            docker_image: staged.docker_image.clone(),
        };
        if let Err(e) = write_metadata(&entry_dir, &metadata) {
            // Not published; the previous build (if any) stays current
            let _ = fs::remove_dir_all(&staged.build_dir);
            return Err(e);
        }

        self.prune_builds(&entry_dir, &[Some(build_id.as_str()), previous.as_deref()]);

        info!(
            operation = "cache.commit",
            status = "success",
            fingerprint = %fingerprint.short(),
            build_id = %build_id,
            "build committed"
        );

        Ok(CacheEntry {
            fingerprint: fingerprint.clone(),
            artifact_path: metadata.artifact.clone(),
            built_at: metadata.built_at,
            dir: staged.build_dir,
            metadata,
        })
    }

    /// Delete superseded builds of an entry
    ///
    /// The build that was current before this commit is kept, since a
    /// launcher may have looked it up just before the switch.
    fn prune_builds(&self, entry_dir: &Path, keep: &[Option<&str>]) {
        let Ok(read_dir) = fs::read_dir(entry_dir) else {
            return;
        };
        for item in read_dir.flatten() {
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };
            if keep.contains(&Some(name)) || !item.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let path = item.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => debug!(path = %path.display(), "removed superseded build"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove superseded build"),
            }
        }
    }

    /// Serialize builds of `fingerprint` across processes
    pub fn acquire_build_lock(&self, fingerprint: &Fingerprint) -> ScriptResult<BuildLock> {
        BuildLock::acquire(&self.lock_path(fingerprint), fingerprint)
    }

    /// Remove the entry for `fingerprint`; returns whether one existed
    pub fn remove(&self, fingerprint: &Fingerprint) -> ScriptResult<bool> {
        let dir = self.entry_dir(fingerprint);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ScriptError::cache_io(
                format!("failed to remove cache entry {}", dir.display()),
                e,
            )),
        }
    }

    /// Remove the entry and its lock file; `lock` must be the entry's held lock
    pub fn evict(&self, fingerprint: &Fingerprint, lock: &BuildLock) -> ScriptResult<bool> {
        let removed = self.remove(fingerprint)?;
        lock.remove_file().map_err(|e| {
            ScriptError::cache_io(format!("failed to remove {}", lock.path().display()), e)
        })?;
        Ok(removed)
    }

    /// All committed entries, sorted by fingerprint
    pub fn list(&self) -> ScriptResult<Vec<CacheEntry>> {
        let entries_dir = self.root.join(ENTRIES_DIR);
        let read_dir = fs::read_dir(&entries_dir).map_err(|e| {
            ScriptError::cache_io(format!("failed to read {}", entries_dir.display()), e)
        })?;

        let mut entries = Vec::new();
        for item in read_dir {
            let item = item.map_err(|e| {
                ScriptError::cache_io(format!("failed to read {}", entries_dir.display()), e)
            })?;
            let name = item.file_name();
            let Some(fingerprint) = name.to_str().and_then(Fingerprint::parse) else {
                continue;
            };
            if let Some(entry) = self.read_entry(&fingerprint)? {
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(entries)
    }

    /// Committed entries other than `except` whose build used `image`
    pub fn image_users(&self, image: &str, except: &Fingerprint) -> ScriptResult<Vec<Fingerprint>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|entry| &entry.fingerprint != except)
            .filter(|entry| entry.metadata.docker_image.as_deref() == Some(image))
            .map(|entry| entry.fingerprint)
            .collect())
    }

    /// Remove entries built more than `max_age` ago, plus abandoned staging dirs
    pub fn gc(&self, max_age: Duration) -> ScriptResult<GcSummary> {
        let mut summary = GcSummary::default();
        // An age too large to represent keeps every entry
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));

        for entry in self.list()? {
            let Some(cutoff) = cutoff else { break };
            if entry.built_at >= cutoff {
                continue;
            }
            let lock = self.acquire_build_lock(&entry.fingerprint)?;
            // Re-read under the lock: a concurrent rebuild may have refreshed it
            let Some(current) = self.read_entry(&entry.fingerprint)? else {
                continue;
            };
            if current.built_at >= cutoff {
                continue;
            }
            let size = dir_size(&self.entry_dir(&current.fingerprint));
            if self.evict(&current.fingerprint, &lock)? {
                debug!(fingerprint = %current.fingerprint.short(), "removed stale entry");
                summary.removed_entries += 1;
                summary.freed_bytes += size;
            }
        }

        let staging = self.root.join(STAGING_DIR);
        let read_dir = fs::read_dir(&staging).map_err(|e| {
            ScriptError::cache_io(format!("failed to read {}", staging.display()), e)
        })?;
        let now = SystemTime::now();
        for item in read_dir.flatten() {
            let path = item.path();
            let age = item
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if age.is_some_and(|age| age > STAGING_MAX_AGE) {
                let size = dir_size(&path);
                match fs::remove_dir_all(&path) {
                    Ok(()) => {
                        summary.removed_staging += 1;
                        summary.freed_bytes += size;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staging directory"),
                }
            }
        }

        info!(
            operation = "cache.gc",
            removed_entries = summary.removed_entries,
            removed_staging = summary.removed_staging,
            freed_bytes = summary.freed_bytes,
            "garbage collection finished"
        );
        Ok(summary)
    }
}

/// Replace the entry's metadata file in one rename
fn write_metadata(entry_dir: &Path, metadata: &CacheMetadata) -> ScriptResult<()> {
    let metadata_path = entry_dir.join(METADATA_FILE);
    let write_err = |e: io::Error| {
        ScriptError::cache_io(format!("failed to write {}", metadata_path.display()), e)
    };

    let json = serde_json::to_vec_pretty(metadata).map_err(|e| write_err(io::Error::other(e)))?;
    let mut tmp = NamedTempFile::new_in(entry_dir).map_err(write_err)?;
    tmp.write_all(&json).map_err(write_err)?;
    tmp.persist(&metadata_path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// A single normal path component (no separators, no `..`)
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Total size of the files below `path`; unreadable files count as zero
pub fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
