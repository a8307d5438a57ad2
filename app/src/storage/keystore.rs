use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use super::AppPaths;
use crate::crypto::AccountKey;
use crate::errors::{WalletError, WalletResult};

/// Environment variable that overrides the stored local wallet key.
pub const PRIVATE_KEY_ENV: &str = "DAPP_CONNECT_PRIVATE_KEY";

/// Plain hex keystore for the local development wallet.
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn from_paths(paths: &AppPaths) -> Self {
        Self::new(paths.keystore_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the account key, generating and persisting one on first use.
    pub fn load_or_create(&self) -> WalletResult<AccountKey> {
        if let Ok(secret) = std::env::var(PRIVATE_KEY_ENV) {
            let secret = SecretString::from(secret);
            if !secret.expose_secret().trim().is_empty() {
                log::info!("using local wallet key from {}", PRIVATE_KEY_ENV);
                return AccountKey::from_hex(secret.expose_secret());
            }
        }

        if self.path.exists() {
            let contents = Zeroizing::new(fs::read_to_string(&self.path)?);
            return AccountKey::from_hex(contents.trim()).map_err(|e| {
                WalletError::InvalidKey(format!("{}: {}", self.path.display(), e))
            });
        }

        let key = AccountKey::generate();
        self.store(&key)?;
        log::info!(
            "generated local wallet {} at {}",
            key.address(),
            self.path.display()
        );
        Ok(key)
    }

    pub fn store(&self, key: &AccountKey) -> WalletResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("new");
        {
            let mut file = File::create(&tmp_path)?;
            restrict_permissions(&file)?;
            file.write_all(key.secret_hex().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &File) -> WalletResult<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &File) -> WalletResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generated_key_is_reloaded() {
        let temp = TempDir::new().unwrap();
        let store = KeyStore::new(temp.path().join("local.key"));
        assert!(!store.exists());

        let first = store.load_or_create().unwrap();
        assert!(store.exists());
        let second = store.load_or_create().unwrap();
        assert_eq!(first.address(), second.address());
    }

    #[test]
    fn corrupt_keystore_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("local.key");
        fs::write(&path, "not-a-key").unwrap();
        let err = KeyStore::new(&path).load_or_create().unwrap_err();
        assert!(matches!(err, WalletError::InvalidKey(_)));
    }
}
