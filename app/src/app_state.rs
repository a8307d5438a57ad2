use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config_store::{AppConfig, ConfigStore};
use crate::connection::{
    ConnectionManager, HttpProviderFactory, LocalProviderFactory, ProviderSelector,
};
use crate::errors::{WalletError, WalletResult};
use crate::provider::ProviderKind;
use crate::session::{DisconnectHook, SessionController, SessionState};
use crate::storage::{AppPaths, KeyStore};

/// Environment variable naming the active configuration environment.
pub const ENVIRONMENT_ENV: &str = "DAPP_CONNECT_ENV";

/// Composition root: owns storage, the connection manager and the session.
pub struct DappContext {
    paths: AppPaths,
    config_store: ConfigStore,
    connection: ConnectionManager,
    session: SessionController,
    environment: String,
}

impl DappContext {
    pub fn initialize(
        root_dir: PathBuf,
        selector: Arc<dyn ProviderSelector>,
    ) -> WalletResult<Self> {
        let environment =
            std::env::var(ENVIRONMENT_ENV).unwrap_or_else(|_| "development".to_string());
        let paths = AppPaths::new(&root_dir)?;
        paths.ensure_directories()?;

        let config_store = ConfigStore::from_paths(&paths);
        let config = config_store.load_or_default(environment.clone())?;

        let connection = ConnectionManager::new(selector, config_store.clone(), environment.clone())
            .with_factory(
                ProviderKind::Local,
                Arc::new(LocalProviderFactory::new(
                    KeyStore::from_paths(&paths),
                    config.local.clone(),
                )),
            )
            .with_factory(
                ProviderKind::Http,
                Arc::new(HttpProviderFactory::new(
                    config.provider.http_endpoint.clone(),
                    Duration::from_secs(config.provider.request_timeout_secs.max(1)),
                )),
            );

        log::info!(
            "initialised {} environment at {}",
            environment,
            paths.root_dir().display()
        );

        Ok(Self {
            paths,
            config_store,
            connection,
            session: SessionController::new(),
            environment,
        })
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn load_config(&self) -> WalletResult<AppConfig> {
        self.config_store.load_or_default(self.environment.clone())
    }

    /// Run the selector, connect, and populate the session.
    pub async fn connect(&self) -> WalletResult<SessionState> {
        self.session.begin_connecting();
        match self.connection.connect().await {
            Ok(provider) => {
                self.session.attach(provider, Some(self.disconnect_hook()));
                self.session.list_accounts_and_network().await
            }
            Err(err) => {
                self.session.fail_connection(&err);
                Err(err)
            }
        }
    }

    /// Reconnect with the cached provider, if one was persisted.
    pub async fn restore(&self) -> WalletResult<Option<SessionState>> {
        if self.connection.cached_provider()?.is_none() {
            return Ok(None);
        }

        self.session.begin_connecting();
        match self.connection.restore_cached_provider().await {
            Ok(Some(provider)) => {
                self.session.attach(provider, Some(self.disconnect_hook()));
                self.session.list_accounts_and_network().await.map(Some)
            }
            Ok(None) => {
                self.session.detach();
                Ok(None)
            }
            Err(err) => {
                self.session.fail_connection(&err);
                Err(err)
            }
        }
    }

    pub async fn disconnect(&self) -> WalletResult<()> {
        self.session.detach();
        let result = self.connection.disconnect().await;
        if let Err(err) = &result {
            self.session.record_error(err);
        }
        result
    }

    fn disconnect_hook(&self) -> DisconnectHook {
        let connection = self.connection.clone();
        Arc::new(move || connection.forget())
    }

    pub fn require_connected(&self) -> WalletResult<()> {
        if self.session.snapshot().is_connected() {
            Ok(())
        } else {
            Err(WalletError::NotConnected)
        }
    }
}
