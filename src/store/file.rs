//! File-backed secret store.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::SecretStore;
use crate::error::{Error, Result};

/// File permissions for secret files (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// File-based [`SecretStore`].
///
/// Each key becomes one file under the store directory; key characters
/// that are hostile to file names (record keys may embed start URLs) are
/// percent-encoded. This is the fallback backend on platforms without a
/// usable system keychain.
///
/// # Security
/// - Files are created 0600 (owner read/write only) on Unix
/// - The store directory is created 0700
/// - Writes go to a temp file first, then rename, so readers never see a
///   torn record
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", urlencoding::encode(key)))
    }

    fn ensure_dir(&self) -> Result<()> {
        if self.dir.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::storage_io(&self.dir, format!("create directory: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(DIR_MODE);
            std::fs::set_permissions(&self.dir, perms)
                .map_err(|e| Error::storage_io(&self.dir, format!("set permissions: {e}")))?;
        }
        Ok(())
    }
}

impl SecretStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_io(&path, format!("read: {e}"))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_dir()?;

        let path = self.key_path(key);
        let temp_path = path.with_extension("tmp");

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(&temp_path)
                .map_err(|e| Error::storage_io(&temp_path, format!("create: {e}")))?;
            file.write_all(value.as_bytes())
                .map_err(|e| Error::storage_io(&temp_path, format!("write: {e}")))?;
            file.sync_all()
                .map_err(|e| Error::storage_io(&temp_path, format!("sync: {e}")))?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&temp_path, value)
                .map_err(|e| Error::storage_io(&temp_path, format!("write: {e}")))?;
        }

        if let Err(e) = std::fs::rename(&temp_path, &path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(Error::storage_io(&path, format!("rename: {e}")));
        }
        Ok(())
    }

    fn request_consent(&self, reason: &str) -> Result<()> {
        // No user-presence primitive for plain files; the 0600 permissions
        // are the only gate.
        debug!(reason, "consent implied (file store)");
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.get("auth-tokens:corp").unwrap().is_none());
    }

    #[test]
    fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("secrets"));
        store.set("auth-tokens:corp", "{\"a\":1}").unwrap();
        assert_eq!(
            store.get("auth-tokens:corp").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
    }

    #[test]
    fn test_keys_with_url_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let key = "oauth-client:https://corp.awsapps.com/start";
        store.set(key, "v").unwrap();
        assert_eq!(store.get(key).unwrap().as_deref(), Some("v"));
        // nothing escaped the store directory
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("secrets"));
        store.set("k", "v").unwrap();

        let dir_mode = std::fs::metadata(store.dir()).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        let entry = std::fs::read_dir(store.dir()).unwrap().next().unwrap().unwrap();
        let file_mode = entry.metadata().unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }

    #[test]
    fn test_unwritable_dir_is_distinguishable_from_missing() {
        let store = FileStore::new("/proc/definitely-not-writable");
        assert!(store.set("k", "v").is_err());
    }
}
