/// In-process wallet backend.
///
/// Holds one secp256k1 account and answers the subset of wallet RPC methods
/// the session controller uses, the way a browser wallet extension would.
use std::collections::BTreeSet;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::{
    Provider, ProviderError, ProviderEvent, ProviderKind, ProviderResult, EVENT_CHANNEL_CAPACITY,
};
use crate::chains::{parse_chain_id, to_hex, ChainParams};
use crate::crypto::{self, AccountKey, EncryptedEnvelope};

/// Chains the local wallet knows without being asked to add them.
pub const DEFAULT_KNOWN_CHAINS: &[u64] = &[1, 3, 4, 5, 42];

#[derive(Debug)]
struct LocalChainState {
    chain_id: u64,
    known_chains: BTreeSet<u64>,
    closed: bool,
}

pub struct LocalProvider {
    account: AccountKey,
    state: RwLock<LocalChainState>,
    events: broadcast::Sender<ProviderEvent>,
}

impl LocalProvider {
    pub fn new(
        account: AccountKey,
        chain_id: u64,
        known_chains: impl IntoIterator<Item = u64>,
    ) -> Self {
        let mut known_chains: BTreeSet<u64> = known_chains.into_iter().collect();
        known_chains.insert(chain_id);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            account,
            state: RwLock::new(LocalChainState {
                chain_id,
                known_chains,
                closed: false,
            }),
            events,
        }
    }

    pub fn with_defaults(account: AccountKey) -> Self {
        Self::new(account, 1, DEFAULT_KNOWN_CHAINS.iter().copied())
    }

    pub fn address(&self) -> &str {
        self.account.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.state.read().chain_id
    }

    pub fn knows_chain(&self, chain_id: u64) -> bool {
        self.state.read().known_chains.contains(&chain_id)
    }

    pub fn encryption_public_key(&self) -> String {
        self.account.encryption_public_key()
    }

    /// End the session from the wallet side.
    pub fn emit_disconnect(&self) {
        self.state.write().closed = true;
        log::info!("local wallet ended the session");
        let _ = self.events.send(ProviderEvent::Disconnect {
            code: ProviderError::DISCONNECTED,
            message: "Wallet disconnected".to_string(),
        });
    }

    fn handle(&self, method: &str, params: &Value) -> ProviderResult<Value> {
        if self.state.read().closed {
            return Err(ProviderError::disconnected());
        }

        match method {
            "eth_requestAccounts" | "eth_accounts" => Ok(json!([self.account.address()])),
            "eth_chainId" => Ok(Value::String(to_hex(self.chain_id()))),
            "net_version" => Ok(Value::String(self.chain_id().to_string())),
            "personal_sign" => {
                let message = str_param(params, 0)?;
                self.ensure_account(str_param(params, 1)?)?;
                let signature = self
                    .account
                    .sign_personal(&crypto::message_bytes(message))
                    .map_err(|e| ProviderError::internal(e.to_string()))?;
                Ok(Value::String(signature))
            }
            "personal_ecRecover" => {
                let message = str_param(params, 0)?;
                let signature = str_param(params, 1)?;
                let recovered =
                    crypto::recover_personal_signature(&crypto::message_bytes(message), signature)
                        .map_err(|e| ProviderError::invalid_params(e.to_string()))?;
                Ok(Value::String(recovered))
            }
            "wallet_switchEthereumChain" => {
                let requested = param(params, 0)?
                    .get("chainId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProviderError::invalid_params("Missing chainId"))?;
                let chain_id = parse_chain_id(requested)
                    .map_err(|e| ProviderError::invalid_params(e.to_string()))?;
                self.switch_chain(chain_id, requested)?;
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let chain: ChainParams = serde_json::from_value(param(params, 0)?.clone())
                    .map_err(|e| ProviderError::invalid_params(e.to_string()))?;
                let chain_id = parse_chain_id(&chain.chain_id)
                    .map_err(|e| ProviderError::invalid_params(e.to_string()))?;
                if chain.rpc_urls.is_empty() {
                    return Err(ProviderError::invalid_params("rpcUrls must not be empty"));
                }
                self.state.write().known_chains.insert(chain_id);
                log::info!("local wallet added chain {} ({})", chain.chain_name, chain_id);
                Ok(Value::Null)
            }
            "eth_getEncryptionPublicKey" => {
                self.ensure_account(str_param(params, 0)?)?;
                Ok(Value::String(self.account.encryption_public_key()))
            }
            "eth_decrypt" => {
                let envelope = EncryptedEnvelope::from_hex(str_param(params, 0)?)
                    .map_err(|e| ProviderError::invalid_params(e.to_string()))?;
                self.ensure_account(str_param(params, 1)?)?;
                let plaintext = self
                    .account
                    .decrypt(&envelope)
                    .map_err(|e| ProviderError::internal(e.to_string()))?;
                Ok(Value::String(plaintext))
            }
            other => Err(ProviderError::unsupported(other)),
        }
    }

    fn switch_chain(&self, chain_id: u64, requested: &str) -> ProviderResult<()> {
        let changed = {
            let mut state = self.state.write();
            if !state.known_chains.contains(&chain_id) {
                return Err(ProviderError::unrecognized_chain(requested));
            }
            let changed = state.chain_id != chain_id;
            state.chain_id = chain_id;
            changed
        };
        if changed {
            let _ = self
                .events
                .send(ProviderEvent::ChainChanged(to_hex(chain_id)));
        }
        Ok(())
    }

    fn ensure_account(&self, requested: &str) -> ProviderResult<()> {
        if requested.eq_ignore_ascii_case(self.account.address()) {
            Ok(())
        } else {
            Err(ProviderError::new(
                ProviderError::UNAUTHORIZED,
                format!("Account {} is not managed by this wallet", requested),
            ))
        }
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn request(&self, method: &str, params: Value) -> ProviderResult<Value> {
        log::debug!("local provider request {}", method);
        self.handle(method, &params)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    fn supports_encryption(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.state.write().closed = true;
    }
}

fn param(params: &Value, index: usize) -> ProviderResult<&Value> {
    params
        .get(index)
        .ok_or_else(|| ProviderError::invalid_params(format!("Missing parameter {}", index)))
}

fn str_param(params: &Value, index: usize) -> ProviderResult<&str> {
    param(params, index)?
        .as_str()
        .ok_or_else(|| {
            ProviderError::invalid_params(format!("Parameter {} must be a string", index))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::chain_params;

    fn provider() -> LocalProvider {
        LocalProvider::with_defaults(AccountKey::generate())
    }

    #[tokio::test]
    async fn switching_to_unknown_chain_needs_add_first() {
        let wallet = provider();
        let switch = json!([{ "chainId": "0xa4ec" }]);

        let err = wallet
            .request("wallet_switchEthereumChain", switch.clone())
            .await
            .unwrap_err();
        assert_eq!(err.code, ProviderError::UNRECOGNIZED_CHAIN);

        let params = serde_json::to_value(chain_params(42_220).unwrap()).unwrap();
        wallet
            .request("wallet_addEthereumChain", json!([params]))
            .await
            .unwrap();
        assert!(wallet.knows_chain(42_220));
        assert_eq!(wallet.chain_id(), 1);

        wallet
            .request("wallet_switchEthereumChain", switch)
            .await
            .unwrap();
        assert_eq!(wallet.chain_id(), 42_220);
    }

    #[tokio::test]
    async fn chain_switch_emits_event() {
        let wallet = provider();
        let mut events = wallet.subscribe();
        wallet
            .request("wallet_switchEthereumChain", json!([{ "chainId": "0x2a" }]))
            .await
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ProviderEvent::ChainChanged("0x2a".to_string())
        );
    }

    #[tokio::test]
    async fn refuses_foreign_account() {
        let wallet = provider();
        let err = wallet
            .request(
                "personal_sign",
                json!(["hi", "0x0000000000000000000000000000000000000001"]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ProviderError::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn sign_then_recover_returns_lowercase_signer() {
        let wallet = provider();
        let address = wallet.address().to_string();
        let signature = wallet
            .request("personal_sign", json!(["gm", address.to_uppercase().replace("0X", "0x")]))
            .await
            .unwrap();
        let recovered = wallet
            .request("personal_ecRecover", json!(["gm", signature]))
            .await
            .unwrap();
        assert_eq!(recovered, Value::String(address));
    }

    #[tokio::test]
    async fn closed_wallet_rejects_requests() {
        let wallet = provider();
        wallet.close().await;
        let err = wallet.request("eth_accounts", json!([])).await.unwrap_err();
        assert_eq!(err.code, ProviderError::DISCONNECTED);
    }

    #[tokio::test]
    async fn unknown_methods_are_unsupported() {
        let wallet = provider();
        let err = wallet
            .request("eth_sendTransaction", json!([]))
            .await
            .unwrap_err();
        assert_eq!(err.code, ProviderError::UNSUPPORTED_METHOD);
    }
}
