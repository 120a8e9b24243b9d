//! On-disk token storage: one JSON record per normalized endpoint.
//!
//! The directory is created `0o700` on first use and every record is written
//! `0o600` via a temp file + rename, so a concurrent reader never observes a
//! partial record.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use sha1::Digest;
use sha1::Sha1;
use tracing::warn;

use crate::endpoint::normalize_endpoint;
use crate::error::AuthError;
use crate::tokens::StoredToken;

pub struct TokenStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the record for `endpoint`, or `None` when it is missing,
    /// expired, or unreadable.
    pub fn get(&self, endpoint: &str) -> Result<Option<StoredToken>, AuthError> {
        let token = self.get_including_expiring(endpoint)?;
        Ok(token.filter(|token| !token.is_expired(Utc::now())))
    }

    /// Returns the record even past its expiry. The refresh path needs the
    /// stale record for its `refresh_token`.
    pub fn get_including_expiring(
        &self,
        endpoint: &str,
    ) -> Result<Option<StoredToken>, AuthError> {
        let path = self.record_path(endpoint)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str::<StoredToken>(&contents) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                warn!("malformed token record at {}: {err}", path.display());
                Ok(None)
            }
        }
    }

    /// Atomically replaces the record for `endpoint`.
    pub fn put(&self, endpoint: &str, token: &StoredToken) -> Result<(), AuthError> {
        let path = self.record_path(endpoint)?;
        let json = serde_json::to_vec_pretty(token)
            .map_err(|err| AuthError::Storage(err.to_string()))?;

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.ensure_dir()?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        set_file_mode(tmp.path())?;
        tmp.persist(&path)
            .map_err(|err| AuthError::Storage(err.to_string()))?;
        Ok(())
    }

    pub fn delete(&self, endpoint: &str) -> Result<(), AuthError> {
        let path = self.record_path(endpoint)?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes every stored record.
    pub fn clear(&self) -> Result<(), AuthError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// All readable records, expired ones included.
    pub fn list(&self) -> Result<Vec<StoredToken>, AuthError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut tokens = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(AuthError::from)
                .and_then(|contents| {
                    serde_json::from_str::<StoredToken>(&contents)
                        .map_err(|err| AuthError::Storage(err.to_string()))
                }) {
                Ok(token) => tokens.push(token),
                Err(err) => warn!("skipping unreadable token record {}: {err}", path.display()),
            }
        }
        tokens.sort_by(|a, b| a.server_url.cmp(&b.server_url));
        Ok(tokens)
    }

    fn record_path(&self, endpoint: &str) -> Result<PathBuf, AuthError> {
        let normalized = normalize_endpoint(endpoint)?;
        let mut hasher = Sha1::new();
        hasher.update(normalized.as_bytes());
        let digest = hasher.finalize();
        Ok(self.dir.join(format!("{digest:x}.json")))
    }

    fn ensure_dir(&self) -> Result<(), AuthError> {
        fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_file_mode(path: &Path) -> Result<(), AuthError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path) -> Result<(), AuthError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::TokenStore;
    use crate::tokens::StoredToken;

    fn token(server_url: &str, expires_in_secs: i64) -> StoredToken {
        StoredToken {
            access_token: "AT".to_string(),
            refresh_token: Some("RT".to_string()),
            id_token: None,
            token_type: "Bearer".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            issuer_url: "https://issuer.example.com".to_string(),
            server_url: server_url.to_string(),
            scopes: None,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let stored = token("https://api.example.com", 3600);

        store.put("https://api.example.com/mcp", &stored).unwrap();
        let loaded = store.get("https://api.example.com").unwrap().unwrap();
        assert_eq!(loaded, stored);
    }

    #[test]
    fn get_filters_expired_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store
            .put("https://api.example.com", &token("https://api.example.com", -10))
            .unwrap();

        assert!(store.get("https://api.example.com").unwrap().is_none());
        assert!(
            store
                .get_including_expiring("https://api.example.com")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn endpoint_variants_share_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store
            .put("https://api.example.com/mcp/", &token("https://api.example.com", 3600))
            .unwrap();

        assert!(store.get("https://api.example.com/sse").unwrap().is_some());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn malformed_records_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store
            .put("https://api.example.com", &token("https://api.example.com", 3600))
            .unwrap();

        for entry in std::fs::read_dir(dir.path()).unwrap() {
            std::fs::write(entry.unwrap().path(), b"{ not json").unwrap();
        }
        assert!(store.get("https://api.example.com").unwrap().is_none());
    }

    #[test]
    fn delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store
            .put("https://a.example.com", &token("https://a.example.com", 3600))
            .unwrap();
        store
            .put("https://b.example.com", &token("https://b.example.com", 3600))
            .unwrap();

        store.delete("https://a.example.com").unwrap();
        assert!(store.get("https://a.example.com").unwrap().is_none());
        assert_eq!(store.list().unwrap().len(), 1);

        store.clear().unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn concurrent_readers_never_observe_partial_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(TokenStore::new(dir.path()));
        let endpoint = "https://api.example.com";
        store.put(endpoint, &token(endpoint, 3600)).unwrap();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    let mut next = token(endpoint, 3600);
                    next.access_token = format!("AT{i}");
                    store.put(endpoint, &next).unwrap();
                }
            })
        };

        for _ in 0..200 {
            // Every read parses cleanly: either the old record or the new one.
            let loaded = store.get(endpoint).unwrap().unwrap();
            assert!(loaded.access_token.starts_with("AT"));
        }
        writer.join().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn records_are_private_to_the_user() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens"));
        store
            .put("https://api.example.com", &token("https://api.example.com", 3600))
            .unwrap();

        let dir_mode = std::fs::metadata(dir.path().join("tokens"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        for entry in std::fs::read_dir(dir.path().join("tokens")).unwrap() {
            let mode = entry.unwrap().metadata().unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
