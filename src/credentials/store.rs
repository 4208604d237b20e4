//! Plaintext key file with owner-only permissions.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

/// Permission mode for the key file (owner read/write only)
#[cfg(unix)]
const KEY_FILE_PERMISSIONS: u32 = 0o600;

#[derive(Debug, Serialize, Deserialize)]
struct StoredKey {
    #[serde(rename = "openaiKey")]
    openai_key: Option<String>,
}

/// Single-key credential file, `{"openaiKey": "..."}`
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `~/.shellpilot/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".shellpilot").join("config.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored key, if any. Missing or unparsable files read as `None`.
    pub fn load(&self) -> Option<String> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "cannot read credential store");
                }
                return None;
            }
        };

        match serde_json::from_str::<StoredKey>(&contents) {
            Ok(stored) => stored
                .openai_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring malformed credential store");
                None
            }
        }
    }

    /// Write the key, creating the parent directory if needed.
    pub fn save(&self, key: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let body = serde_json::to_string_pretty(&StoredKey {
            openai_key: Some(key.to_string()),
        })?;

        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        opts.mode(KEY_FILE_PERMISSIONS);

        let mut file = opts
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        // `mode` only applies on creation; tighten a pre-existing file too.
        #[cfg(unix)]
        fs::set_permissions(&self.path, fs::Permissions::from_mode(KEY_FILE_PERMISSIONS))
            .with_context(|| format!("Failed to restrict {}", self.path.display()))?;

        file.write_all(body.as_bytes())
            .and_then(|_| file.sync_all())
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, CredentialStore) {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join(".shellpilot").join("config.json"));
        (dir, store)
    }

    #[test]
    fn test_load_missing_file() {
        let (_dir, store) = store();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let (_dir, store) = store();
        store.save("sk-test-123").unwrap();
        assert_eq!(store.load().as_deref(), Some("sk-test-123"));
    }

    #[test]
    fn test_saved_file_format() {
        let (_dir, store) = store();
        store.save("sk-abc").unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["openaiKey"], "sk-abc");
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        let (_dir, store) = store();
        store.save("sk-abc").unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_save_tightens_existing_permissions() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{}").unwrap();
        fs::set_permissions(store.path(), fs::Permissions::from_mode(0o644)).unwrap();

        store.save("sk-abc").unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_malformed_file() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "not json {").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_load_empty_or_missing_field() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();

        fs::write(store.path(), r#"{"openaiKey": "  "}"#).unwrap();
        assert!(store.load().is_none());

        fs::write(store.path(), r#"{"other": "value"}"#).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_overwrites_previous_key() {
        let (_dir, store) = store();
        store.save("sk-old-key-that-is-longer").unwrap();
        store.save("sk-new").unwrap();
        assert_eq!(store.load().as_deref(), Some("sk-new"));
    }
}
