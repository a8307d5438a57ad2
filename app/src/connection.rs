/// Provider selection and connection lifecycle.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::config_store::{ConfigStore, LocalWalletConfig};
use crate::errors::{WalletError, WalletResult};
use crate::provider::{HttpProvider, LocalProvider, Provider, ProviderKind};
use crate::storage::KeyStore;

/// The selection step shown before connecting. `None` means the user backed out.
#[async_trait]
pub trait ProviderSelector: Send + Sync {
    async fn select(&self, available: &[ProviderKind]) -> Option<ProviderKind>;
}

/// Selector answering with a preset choice.
#[derive(Debug, Default)]
pub struct StaticSelector {
    choice: Mutex<Option<ProviderKind>>,
}

impl StaticSelector {
    pub fn new(choice: Option<ProviderKind>) -> Self {
        Self {
            choice: Mutex::new(choice),
        }
    }

    pub fn set(&self, choice: Option<ProviderKind>) {
        *self.choice.lock() = choice;
    }
}

#[async_trait]
impl ProviderSelector for StaticSelector {
    async fn select(&self, available: &[ProviderKind]) -> Option<ProviderKind> {
        let choice = *self.choice.lock();
        choice.filter(|kind| available.contains(kind))
    }
}

/// Builds a connected provider for one backend.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn connect(&self) -> WalletResult<Arc<dyn Provider>>;
}

pub struct LocalProviderFactory {
    keystore: KeyStore,
    settings: LocalWalletConfig,
}

impl LocalProviderFactory {
    pub fn new(keystore: KeyStore, settings: LocalWalletConfig) -> Self {
        Self { keystore, settings }
    }
}

#[async_trait]
impl ProviderFactory for LocalProviderFactory {
    async fn connect(&self) -> WalletResult<Arc<dyn Provider>> {
        let account = self.keystore.load_or_create()?;
        Ok(Arc::new(LocalProvider::new(
            account,
            self.settings.initial_chain_id,
            self.settings.known_chains.iter().copied(),
        )))
    }
}

pub struct HttpProviderFactory {
    endpoint: String,
    timeout: Duration,
}

impl HttpProviderFactory {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProviderFactory for HttpProviderFactory {
    async fn connect(&self) -> WalletResult<Arc<dyn Provider>> {
        Ok(Arc::new(HttpProvider::new(&self.endpoint, self.timeout)?))
    }
}

struct ConnectionInner {
    factories: HashMap<ProviderKind, Arc<dyn ProviderFactory>>,
    selector: Arc<dyn ProviderSelector>,
    config_store: ConfigStore,
    environment: String,
    active: RwLock<Option<Arc<dyn Provider>>>,
}

/// Hands out provider handles and remembers which backend was used last.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

impl ConnectionManager {
    pub fn new(
        selector: Arc<dyn ProviderSelector>,
        config_store: ConfigStore,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                factories: HashMap::new(),
                selector,
                config_store,
                environment: environment.into(),
                active: RwLock::new(None),
            }),
        }
    }

    /// Register a backend. Only valid before the manager is shared.
    pub fn with_factory(mut self, kind: ProviderKind, factory: Arc<dyn ProviderFactory>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => {
                inner.factories.insert(kind, factory);
            }
            None => log::warn!("ignoring {} factory registered after sharing", kind),
        }
        self
    }

    /// Registered backends in a stable order.
    pub fn available(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.inner.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn active(&self) -> Option<Arc<dyn Provider>> {
        self.inner.active.read().clone()
    }

    pub fn cached_provider(&self) -> WalletResult<Option<ProviderKind>> {
        let config = self
            .inner
            .config_store
            .load_or_default(self.inner.environment.clone())?;
        Ok(config.provider.cached_provider)
    }

    /// Ask the selector for a backend and connect to it.
    pub async fn connect(&self) -> WalletResult<Arc<dyn Provider>> {
        let available = self.available();
        let kind = self
            .inner
            .selector
            .select(&available)
            .await
            .ok_or(WalletError::Cancelled)?;
        self.connect_with(kind).await
    }

    /// Reconnect with the persisted choice, skipping the selector.
    pub async fn restore_cached_provider(&self) -> WalletResult<Option<Arc<dyn Provider>>> {
        match self.cached_provider()? {
            Some(kind) => {
                log::info!("restoring cached provider {}", kind);
                self.connect_with(kind).await.map(Some)
            }
            None => Ok(None),
        }
    }

    async fn connect_with(&self, kind: ProviderKind) -> WalletResult<Arc<dyn Provider>> {
        let factory = self
            .inner
            .factories
            .get(&kind)
            .cloned()
            .ok_or_else(|| WalletError::ConnectionFailed(format!("{} is not available", kind)))?;

        let provider = factory.connect().await.map_err(|e| {
            log::warn!("{} provider failed to initialise: {}", kind, e);
            WalletError::ConnectionFailed(e.to_string())
        })?;

        self.persist_choice(Some(kind))?;
        *self.inner.active.write() = Some(provider.clone());
        log::info!("connected via {} provider", kind);
        Ok(provider)
    }

    /// Close the active provider and erase the persisted choice.
    pub async fn disconnect(&self) -> WalletResult<()> {
        let active = self.inner.active.write().take();
        if let Some(provider) = active {
            provider.close().await;
            log::info!("disconnected {} provider", provider.kind());
        }
        self.persist_choice(None)
    }

    /// Drop the active handle and cached choice without awaiting the backend.
    pub fn forget(&self) {
        self.inner.active.write().take();
        if let Err(e) = self.persist_choice(None) {
            log::warn!("failed to clear cached provider: {}", e);
        }
    }

    fn persist_choice(&self, choice: Option<ProviderKind>) -> WalletResult<()> {
        self.inner
            .config_store
            .update(self.inner.environment.clone(), |config| {
                config.provider.cached_provider = choice;
                Ok(())
            })?;
        Ok(())
    }
}
