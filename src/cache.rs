//! Diagnosis cache keyed by the failure fingerprint.
//!
//! Each entry is a single file `<digest>.txt` holding the raw diagnosis text.
//! The file's modification time is the entry's write time; entries older than
//! the TTL are pruned lazily, once per invocation.
//!
//! All I/O failures other than those of [`DiagnosticCache::clear`] are logged
//! and treated as "no entry", since the cache only saves remote calls.
//!
//! The directory is private to the current user (0700, entries 0600). On unix a
//! directory owned by someone else, or writable by others, is never read from.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, SystemTime};

/// Default retention window for cached diagnoses
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const ENTRY_EXTENSION: &str = "txt";

/// Infix of in-flight writes: `<digest>.tmp.<pid>`
const TEMP_MARKER: &str = ".tmp.";

#[cfg(unix)]
const DIR_PERMISSIONS: u32 = 0o700;
#[cfg(unix)]
const FILE_PERMISSIONS: u32 = 0o600;

/// Hex-encoded SHA-256 digest identifying a cache slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a failed command and its captured output.
///
/// Both parts are length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
pub fn cache_key(command: &str, output: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    for part in [command, output] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    CacheKey(hex::encode(hasher.finalize()))
}

/// Default cache location under the platform temp directory
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("shellpilot-cache")
}

/// File-per-entry diagnosis store
#[derive(Debug, Clone)]
pub struct DiagnosticCache {
    dir: PathBuf,
}

impl DiagnosticCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.as_str(), ENTRY_EXTENSION))
    }

    /// Create the directory owner-only, tightening one that already exists.
    fn ensure_dir(&self) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(DIR_PERMISSIONS);
        builder.create(&self.dir)?;

        #[cfg(unix)]
        {
            verify_owner(&self.dir, &fs::metadata(&self.dir)?)?;
            fs::set_permissions(&self.dir, fs::Permissions::from_mode(DIR_PERMISSIONS))?;
        }
        Ok(())
    }

    /// Fails unless the directory belongs to us and nobody else can write to it.
    fn verify_private(&self) -> io::Result<()> {
        let meta = fs::metadata(&self.dir)?;
        #[cfg(unix)]
        {
            verify_owner(&self.dir, &meta)?;
            if meta.mode() & 0o022 != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("{} is writable by other users", self.dir.display()),
                ));
            }
        }
        #[cfg(not(unix))]
        let _ = meta;
        Ok(())
    }

    /// Cached diagnosis for `key`, if one exists and is readable.
    pub fn lookup(&self, key: &CacheKey) -> Option<String> {
        match self.verify_private() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(%key, "cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    dir = %self.dir.display(),
                    error = %e,
                    "ignoring untrusted cache directory"
                );
                return None;
            }
        }

        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!(%key, "cache hit");
                Some(text)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(%key, "cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable cache entry");
                None
            }
        }
    }

    /// Persist a diagnosis. The entry is synced and renamed into place before
    /// this returns, so readers never observe a partial file.
    pub fn store(&self, key: &CacheKey, text: &str) -> io::Result<()> {
        self.ensure_dir()?;

        let final_path = self.entry_path(key);
        let temp_path = self
            .dir
            .join(format!("{}{TEMP_MARKER}{}", key.as_str(), process::id()));

        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        opts.mode(FILE_PERMISSIONS);

        let written = opts.open(&temp_path).and_then(|mut file| {
            file.write_all(text.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|_| fs::rename(&temp_path, &final_path)) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        tracing::debug!(%key, "cached diagnosis");
        Ok(())
    }

    /// Remove entries, and writes abandoned midway, whose age at `now` exceeds
    /// `ttl`. Returns how many files were removed.
    ///
    /// Unreadable entries and a missing directory are skipped, never fatal.
    pub fn prune(&self, now: SystemTime, ttl: Duration) -> usize {
        let Ok(entries) = self.files(true) else {
            return 0;
        };

        let mut removed = 0;
        for path in entries {
            let written_at = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping cache entry");
                    continue;
                }
            };

            // Entries stamped in the future have age zero.
            let age = now.duration_since(written_at).unwrap_or(Duration::ZERO);
            if age > ttl {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to evict cache entry")
                    }
                }
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "pruned expired cache entries");
        }
        removed
    }

    /// Remove every entry and leftover temp file. A missing cache directory
    /// counts as already clear.
    pub fn clear(&self) -> io::Result<usize> {
        let entries = match self.files(true) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let count = entries.len();
        for path in entries {
            fs::remove_file(&path)?;
        }
        Ok(count)
    }

    /// Paths of all stored entries
    pub fn entries(&self) -> io::Result<Vec<PathBuf>> {
        self.files(false)
    }

    fn files(&self, include_temp: bool) -> io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if is_entry(&path) || (include_temp && is_temp(&path)) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

fn is_entry(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION)
}

fn is_temp(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains(TEMP_MARKER))
}

#[cfg(unix)]
fn verify_owner(dir: &Path, meta: &fs::Metadata) -> io::Result<()> {
    let uid = unsafe { libc::geteuid() };
    if meta.uid() != uid {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} is owned by uid {}", dir.display(), meta.uid()),
        ));
    }
    Ok(())
}
