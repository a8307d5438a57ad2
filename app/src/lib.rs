// lib.rs - Core library structure for the wallet connection demo

pub mod app_state;
pub mod chains;
pub mod config_store;
pub mod connection;
pub mod crypto;
pub mod display;
pub mod errors;
pub mod provider;
pub mod session;
pub mod storage;
pub mod validation;

// Re-export common types
pub use app_state::DappContext;
pub use chains::{chain_params, ChainParams};
pub use config_store::{AppConfig, ConfigStore, LocalWalletConfig, ProviderConfig};
pub use connection::{ConnectionManager, ProviderFactory, ProviderSelector, StaticSelector};
pub use errors::{WalletError, WalletResult};
pub use provider::{
    HttpProvider, LocalProvider, Provider, ProviderError, ProviderEvent, ProviderKind,
};
pub use session::{ConnectionStatus, SessionController, SessionState, SwitchOutcome};
pub use storage::{AppPaths, KeyStore};
pub use validation::InputValidator;
