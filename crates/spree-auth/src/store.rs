//! On-disk persistence of the client credential.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::credential::ClientCredential;
use crate::error::{AuthError, Result};

/// Directory under the user's config dir that holds the credential file.
const APP_DIR: &str = "spreectl";
const FILE_NAME: &str = "config.json";

/// JSON file holding a single [`ClientCredential`].
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// The per-user location, `<config dir>/spreectl/config.json`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the platform has no config directory.
    pub fn default_location() -> Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| AuthError::Storage("no user config directory".to_string()))?;
        Ok(Self::at(base.join(APP_DIR).join(FILE_NAME)))
    }

    /// A store backed by an explicit file path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored credential. A missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the file cannot be read or parsed.
    pub fn load(&self) -> Result<Option<ClientCredential>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthError::Storage(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let credential = serde_json::from_slice(&bytes).map_err(|e| {
            AuthError::Storage(format!("invalid credential file {}: {e}", self.path.display()))
        })?;
        Ok(Some(credential))
    }

    /// Write `credential`, creating the parent directory if needed.
    ///
    /// The file is written beside the target and renamed into place.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] on any filesystem failure.
    pub fn store(&self, credential: &ClientCredential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuthError::Storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let json = serde_json::to_vec_pretty(credential)
            .map_err(|e| AuthError::Storage(format!("failed to encode credential: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        write_private(&tmp, &json)
            .map_err(|e| AuthError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(AuthError::Storage(format!(
                "failed to replace {}: {e}",
                self.path.display()
            )));
        }

        tracing::debug!(path = %self.path.display(), "Stored client credential");
        Ok(())
    }
}

/// Write `bytes` to a freshly created file readable only by the owner.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    // A leftover file would keep its old mode.
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            return Err(e);
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::credential::{ClientJwt, OAuthToken};

    fn credential(id_token: &str) -> ClientCredential {
        ClientCredential::new(
            OAuthToken {
                access_token: "ya29.access".into(),
                token_type: "Bearer".into(),
                refresh_token: "1//refresh".into(),
                expiry: None,
                id_token: Some(id_token.into()),
            },
            ClientJwt::new(id_token),
        )
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join("spreectl").join("config.json"));

        store.store(&credential("a.b.c")).unwrap();
        assert_eq!(store.load().unwrap(), Some(credential("a.b.c")));

        store.store(&credential("d.e.f")).unwrap();
        assert_eq!(store.load().unwrap().unwrap().jwt.token(), "d.e.f");
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn stored_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join("config.json"));
        store.store(&credential("a.b.c")).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = CredentialStore::at(path).load().unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));
    }

    #[cfg(unix)]
    #[test]
    fn leftover_temp_file_does_not_leak_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join("config.json"));
        let tmp = store.path().with_extension("json.tmp");
        std::fs::write(&tmp, b"stale").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        store.store(&credential("a.b.c")).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.load().unwrap(), Some(credential("a.b.c")));
    }

    #[test]
    fn failed_replace_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::create_dir(&path).unwrap();
        let store = CredentialStore::at(&path);

        let err = store.store(&credential("a.b.c")).unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn reads_document_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"oauth_token":{"access_token":"ya29","token_type":"Bearer","refresh_token":"1//r","id_token":"x.y.z"},"jwt":{"token":"x.y.z"}}"#,
        )
        .unwrap();

        let loaded = CredentialStore::at(path).load().unwrap().unwrap();
        assert_eq!(loaded.jwt.token(), "x.y.z");
        assert_eq!(loaded.oauth_token.refresh_token, "1//r");
    }
}
