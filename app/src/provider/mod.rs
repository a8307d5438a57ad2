/// Wallet provider abstraction.
///
/// A provider is an EIP-1193 style handle: a single `request` entry point
/// taking a method name and JSON params, plus a stream of lifecycle events.
/// Backends live in the submodules and are handed out by the connection
/// manager as `Arc<dyn Provider>`.
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::errors::WalletError;

pub mod http;
pub mod local;

pub use http::HttpProvider;
pub use local::LocalProvider;

/// Capacity of each provider's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Provider backends this crate knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-process keystore wallet.
    Local,
    /// Remote JSON-RPC endpoint over HTTP.
    Http,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Http => "http",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ProviderKind::Local),
            "http" => Ok(ProviderKind::Http),
            other => Err(WalletError::ValidationError(format!(
                "Unknown provider '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle events pushed by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    /// Chain id as reported by the wallet, usually `0x` hex.
    ChainChanged(String),
    Disconnect { code: i64, message: String },
}

/// Error returned by a provider request, carrying the EIP-1193 / JSON-RPC code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message)
    }

    pub fn unsupported(method: &str) -> Self {
        Self::new(
            Self::UNSUPPORTED_METHOD,
            format!("The provider does not support {}", method),
        )
    }

    pub fn unrecognized_chain(chain_id: &str) -> Self {
        Self::new(
            Self::UNRECOGNIZED_CHAIN,
            format!(
                "Unrecognized chain ID \"{}\". Try adding the chain using wallet_addEthereumChain first.",
                chain_id
            ),
        )
    }

    pub fn disconnected() -> Self {
        Self::new(Self::DISCONNECTED, "The provider is disconnected")
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// A connected wallet.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Issue one JSON-RPC request. Resolves when the wallet answers.
    async fn request(&self, method: &str, params: Value) -> ProviderResult<Value>;

    /// New receiver for lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;

    /// Whether `eth_getEncryptionPublicKey` / `eth_decrypt` are available.
    fn supports_encryption(&self) -> bool {
        false
    }

    /// Release backend resources. Requests after close fail with 4900.
    async fn close(&self) {}
}

impl fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Provider")
            .field("kind", &self.kind())
            .finish()
    }
}
