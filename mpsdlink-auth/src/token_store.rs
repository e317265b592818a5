use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::identity::Title;

/// On-disk token bundle for one identity key, written after every successful
/// auth flow and read back on startup to attempt a silent refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenCacheEntry {
    pub email: String,
    pub title: Option<Title>,
    pub msa_refresh_token: Option<String>,
    pub msa_access_token: Option<String>,
    pub msa_access_expiry: Option<DateTime<Utc>>,
    pub xbl_token: Option<String>,
    pub xbl_expiry: Option<DateTime<Utc>>,
    pub device_token: Option<String>,
    pub device_expiry: Option<DateTime<Utc>>,
    pub title_token: Option<String>,
    pub title_expiry: Option<DateTime<Utc>>,
    pub xsts_token: Option<String>,
    pub xsts_expiry: Option<DateTime<Utc>>,
    pub user_hash: Option<String>,
    pub xuid: Option<String>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl TokenCacheEntry {
    pub fn has_usable_xsts(&self) -> bool {
        match (&self.xsts_token, self.xsts_expiry) {
            (Some(token), Some(expiry)) => !token.is_empty() && expiry > Utc::now(),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub enum TokenStoreError {
    Io(std::io::Error),
}

impl std::fmt::Display for TokenStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenStoreError::Io(e) => write!(f, "token store io error: {}", e),
        }
    }
}

impl From<std::io::Error> for TokenStoreError {
    fn from(e: std::io::Error) -> Self {
        TokenStoreError::Io(e)
    }
}

/// Persists per-identity token bundles under a shared directory, keyed by a
/// stable hash of (email, title). Safe to share across supervisors since
/// each identity key only ever has one writer.
#[derive(Debug, Clone)]
pub struct TokenStore {
    base_dir: PathBuf,
}

impl TokenStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, TokenStoreError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        set_dir_mode(&base_dir, 0o700)?;
        Ok(Self { base_dir })
    }

    /// Stable hash of (email, title), used as the on-disk file name so the
    /// same identity always round-trips to the same cache entry.
    pub fn key_for(&self, email: &str, title: Title) -> String {
        let mut hasher = Sha1::new();
        hasher.update(email.as_bytes());
        hasher.update(b"|");
        hasher.update(title.to_string().as_bytes());
        let digest = hasher.finalize();
        hex_encode(&digest)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", key))
    }

    /// Returns the last stored bundle if present and parseable. Absence and
    /// parse failure are both treated as "no cached token" rather than a
    /// hard error — a corrupt cache file must never block authentication.
    pub fn load(&self, key: &str) -> Option<TokenCacheEntry> {
        let path = self.path_for(key);
        let contents = fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Atomic write-temp-then-rename at file mode 0600.
    pub fn save(&self, key: &str, entry: &TokenCacheEntry) -> Result<(), TokenStoreError> {
        let mut entry = entry.clone();
        entry.saved_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(&entry).map_err(|e| {
            TokenStoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let final_path = self.path_for(key);
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", key));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        set_file_mode(&tmp_path, 0o600)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Removes every cache entry matching `key`, including the sub-caches
    /// (the plain entry plus any `.tmp` left behind by an interrupted save),
    /// tolerating files that are already missing.
    pub fn invalidate(&self, key: &str) {
        for suffix in [".json", ".json.tmp"] {
            let path = self.base_dir.join(format!("{}{}", key, suffix));
            let _ = fs::remove_file(path);
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(unix)]
fn set_dir_mode(path: &Path, mode: u32) -> Result<(), TokenStoreError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path, _mode: u32) -> Result<(), TokenStoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> Result<(), TokenStoreError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> Result<(), TokenStoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips_byte_identical_fields() {
        let dir = tempdir();
        let store = TokenStore::new(&dir).unwrap();
        let key = store.key_for("bot@example.test", Title::default());

        let mut entry = TokenCacheEntry::default();
        entry.email = "bot@example.test".into();
        entry.title = Some(Title::default());
        entry.xsts_token = Some("t".repeat(120));
        entry.xsts_expiry = Some(Utc::now() + chrono::Duration::hours(1));
        entry.user_hash = Some("userhash123".into());
        entry.xuid = Some("1234567890".into());

        store.save(&key, &entry).unwrap();
        let loaded = store.load(&key).expect("entry should load");

        assert_eq!(loaded.email, entry.email);
        assert_eq!(loaded.xsts_token, entry.xsts_token);
        assert_eq!(loaded.user_hash, entry.user_hash);
        assert_eq!(loaded.xuid, entry.xuid);
        assert!(loaded.has_usable_xsts());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_tolerates_missing_and_corrupt_files() {
        let dir = tempdir();
        let store = TokenStore::new(&dir).unwrap();
        assert!(store.load("does-not-exist").is_none());

        fs::write(dir.join("corrupt.json"), b"{not json").unwrap();
        assert!(store.load("corrupt").is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalidate_removes_entry_and_tolerates_missing() {
        let dir = tempdir();
        let store = TokenStore::new(&dir).unwrap();
        let key = "some-key";
        store.save(key, &TokenCacheEntry::default()).unwrap();
        assert!(store.load(key).is_some());

        store.invalidate(key);
        assert!(store.load(key).is_none());
        // Second call on an already-missing entry must not panic or error.
        store.invalidate(key);

        let _ = fs::remove_dir_all(&dir);
    }

    fn tempdir() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "mpsdlink-token-store-test-{}-{}",
            std::process::id(),
            fastrand_like()
        ));
        path
    }

    // Avoids pulling in a dev-dependency just to generate a unique suffix.
    fn fastrand_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }
}
