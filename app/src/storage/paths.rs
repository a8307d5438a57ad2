use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{WalletError, WalletResult};

/// Manages filesystem paths used by the application.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Root directory for application data.
    root_dir: PathBuf,
    /// Path to persisted application configuration.
    config_file: PathBuf,
    /// Hex-encoded secret of the local wallet backend.
    keystore_file: PathBuf,
}

impl AppPaths {
    pub const CONFIG_FILENAME: &'static str = "dapp-connect.config";
    pub const KEYSTORE_FILENAME: &'static str = "local.key";

    /// Create a new path manager rooted at the provided directory.
    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::StorageError(
                "Data directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            config_file: root_dir.join(Self::CONFIG_FILENAME),
            keystore_file: root_dir.join(Self::KEYSTORE_FILENAME),
            root_dir,
        })
    }

    /// Platform config directory, falling back to the working directory.
    pub fn default_root() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("dapp-connect"))
            .unwrap_or_else(|| PathBuf::from(".dapp-connect"))
    }

    /// Ensure the directory structure exists, creating missing folders.
    pub fn ensure_directories(&self) -> WalletResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        Ok(())
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn keystore_file(&self) -> &Path {
        &self.keystore_file
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}
