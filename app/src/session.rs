use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::chains::{chain_params, parse_chain_id, to_hex};
use crate::crypto;
use crate::errors::{WalletError, WalletResult};
use crate::provider::{Provider, ProviderError, ProviderEvent};
use crate::validation::InputValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Everything the front end renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub status: ConnectionStatus,
    pub account: Option<String>,
    pub chain_id: Option<u64>,
    /// Network picked as the next switch target.
    pub target_network: Option<u64>,
    pub message: String,
    pub signed_message: String,
    pub signature: String,
    pub verified: Option<bool>,
    pub encryption_public_key: Option<String>,
    pub recipient_public_key: Option<String>,
    pub encrypted_message: String,
    pub decrypted_message: String,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    fn clear_signature(&mut self) {
        self.signed_message.clear();
        self.signature.clear();
        self.verified = None;
    }

    fn set_account(&mut self, account: Option<String>) {
        if self.account != account {
            self.account = account;
            self.encryption_public_key = None;
            self.clear_signature();
        }
    }

    fn set_chain_id(&mut self, chain_id: Option<u64>) {
        if self.chain_id != chain_id {
            self.chain_id = chain_id;
            self.clear_signature();
        }
    }
}

/// Result of a switch-network request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched,
    /// The wallet did not know the chain; its definition was added instead.
    ChainAdded,
}

/// Called when the wallet ends the session on its own.
pub type DisconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Event listener bound to one connection. Dropping it stops the listener.
#[derive(Debug)]
pub struct EventSubscription {
    task: JoinHandle<()>,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ActiveProvider {
    handle: Arc<dyn Provider>,
    epoch: u64,
    hook: Option<DisconnectHook>,
    _subscription: EventSubscription,
}

struct SessionInner {
    state: watch::Sender<SessionState>,
    active: RwLock<Option<ActiveProvider>>,
    epoch: AtomicU64,
    validator: InputValidator,
}

/// Owns the session record and issues one provider request per user action.
///
/// Failures are stored in `last_error` and returned. Responses that arrive
/// after the connection they were issued on has gone away are dropped.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(SessionInner {
                state,
                active: RwLock::new(None),
                epoch: AtomicU64::new(0),
                validator: InputValidator::default(),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.active.read().is_some()
    }

    /// Mark a connection attempt in progress, clearing the previous session.
    pub fn begin_connecting(&self) {
        self.release();
        self.inner.state.send_replace(SessionState {
            status: ConnectionStatus::Connecting,
            ..SessionState::default()
        });
    }

    /// Record a failed connection attempt on an otherwise empty session.
    pub fn fail_connection(&self, error: &WalletError) {
        self.release();
        log::warn!("connection failed: {}", error);
        self.inner.state.send_replace(SessionState {
            status: ConnectionStatus::Error,
            last_error: Some(error.to_string()),
            ..SessionState::default()
        });
    }

    /// Bind a connected provider and start listening to its events.
    pub fn attach(&self, provider: Arc<dyn Provider>, hook: Option<DisconnectHook>) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let events = provider.subscribe();
        let task = spawn_listener(Arc::downgrade(&self.inner), events, epoch);

        let previous = self.inner.active.write().replace(ActiveProvider {
            handle: provider.clone(),
            epoch,
            hook,
            _subscription: EventSubscription { task },
        });
        drop(previous);

        self.inner.state.send_modify(|state| {
            state.status = ConnectionStatus::Connected;
            state.last_error = None;
        });
        log::info!("session attached to {} provider (epoch {})", provider.kind(), epoch);
    }

    /// Release the provider subscription and reset the session.
    pub fn detach(&self) {
        self.release();
        self.inner.state.send_replace(SessionState::default());
        log::info!("session reset");
    }

    /// Store a failure from outside the controller as `last_error`.
    pub fn record_error(&self, error: &WalletError) {
        log::warn!("session operation failed: {}", error);
        let message = error.to_string();
        self.inner
            .state
            .send_modify(|state| state.last_error = Some(message));
    }

    fn release(&self) {
        let previous = self.inner.active.write().take();
        drop(previous);
    }

    pub fn select_network(&self, chain_id: u64) {
        self.inner
            .state
            .send_modify(|state| state.target_network = Some(chain_id));
    }

    /// Set the pending message. Input longer than the sign form allows is
    /// refused and the previous message kept.
    pub fn set_message(&self, message: impl Into<String>) -> WalletResult<()> {
        let message = message.into();
        if let Err(err) = self.inner.validator.validate_message(&message) {
            return self.fail(err);
        }
        self.inner.state.send_modify(|state| state.message = message);
        Ok(())
    }

    pub fn set_recipient_key(&self, key: impl Into<String>) {
        let key = key.into();
        self.inner
            .state
            .send_modify(|state| state.recipient_public_key = Some(key));
    }

    /// Fetch accounts and chain id, plus the encryption key when supported.
    pub async fn list_accounts_and_network(&self) -> WalletResult<SessionState> {
        let (provider, epoch) = self.current()?;
        let result = self.list_inner(provider.as_ref(), epoch).await;
        self.finish(Some(epoch), result)
    }

    async fn list_inner(&self, provider: &dyn Provider, epoch: u64) -> WalletResult<SessionState> {
        let accounts = provider.request("eth_accounts", json!([])).await?;
        let accounts: Vec<String> = serde_json::from_value(accounts)
            .map_err(|e| WalletError::InvalidResponse(format!("eth_accounts: {}", e)))?;
        let account = accounts.first().map(|account| checksummed(account));
        self.update_if_current(epoch, |state| state.set_account(account.clone()));
        let account =
            account.ok_or_else(|| WalletError::NotFound("Wallet exposed no accounts".to_string()))?;

        let chain_id = parse_chain_value(&provider.request("eth_chainId", json!([])).await?)?;
        self.update_if_current(epoch, |state| state.set_chain_id(Some(chain_id)));

        if provider.supports_encryption() {
            let key = self.request_encryption_key(provider, &account).await?;
            self.update_if_current(epoch, |state| state.encryption_public_key = Some(key));
        }

        Ok(self.snapshot())
    }

    /// Ask the wallet for the connected account's encryption public key.
    pub async fn fetch_encryption_public_key(&self) -> WalletResult<String> {
        let (provider, epoch) = self.current()?;
        let result = async {
            let account = self.connected_account()?;
            let key = self.request_encryption_key(provider.as_ref(), &account).await?;
            self.update_if_current(epoch, |state| {
                state.encryption_public_key = Some(key.clone())
            });
            Ok::<_, WalletError>(key)
        }
        .await;
        self.finish(Some(epoch), result)
    }

    async fn request_encryption_key(
        &self,
        provider: &dyn Provider,
        account: &str,
    ) -> WalletResult<String> {
        let key = provider
            .request("eth_getEncryptionPublicKey", json!([account]))
            .await?;
        expect_string(key, "eth_getEncryptionPublicKey")
    }

    /// Switch the wallet to `target`, adding the chain when the wallet lacks it.
    ///
    /// After an add the switch is not retried.
    pub async fn switch_network(&self, target: u64) -> WalletResult<SwitchOutcome> {
        let (provider, epoch) = self.current()?;
        let result = self.switch_inner(provider.as_ref(), epoch, target).await;
        self.finish(Some(epoch), result)
    }

    async fn switch_inner(
        &self,
        provider: &dyn Provider,
        epoch: u64,
        target: u64,
    ) -> WalletResult<SwitchOutcome> {
        let chain_id = to_hex(target);
        match provider
            .request("wallet_switchEthereumChain", json!([{ "chainId": chain_id }]))
            .await
        {
            Ok(_) => {
                self.update_if_current(epoch, |state| state.set_chain_id(Some(target)));
                log::info!("switched to chain {}", target);
                Ok(SwitchOutcome::Switched)
            }
            Err(err) if err.code == ProviderError::UNRECOGNIZED_CHAIN => {
                let params = chain_params(target).ok_or_else(|| {
                    WalletError::NotFound(format!("No chain parameters for {}", chain_id))
                })?;
                log::info!("wallet lacks chain {}, requesting add", target);
                provider
                    .request("wallet_addEthereumChain", json!([params]))
                    .await?;
                Ok(SwitchOutcome::ChainAdded)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Switch to the network picked with [`select_network`](Self::select_network).
    pub async fn switch_to_selected(&self) -> WalletResult<SwitchOutcome> {
        match self.snapshot().target_network {
            Some(target) => self.switch_network(target).await,
            None => self.fail(WalletError::ValidationError(
                "No network selected".to_string(),
            )),
        }
    }

    /// `personal_sign` the literal message with `account`.
    pub async fn sign_message(&self, message: &str, account: &str) -> WalletResult<String> {
        let (provider, epoch) = self.current()?;
        let result = async {
            self.inner.validator.validate_address(account)?;
            let signature = provider
                .request("personal_sign", json!([message, account]))
                .await?;
            let signature = expect_string(signature, "personal_sign")?;
            self.update_if_current(epoch, |state| {
                state.signed_message = message.to_string();
                state.signature = signature.clone();
                state.verified = None;
            });
            Ok::<_, WalletError>(signature)
        }
        .await;
        self.finish(Some(epoch), result)
    }

    pub async fn sign_pending(&self) -> WalletResult<String> {
        let state = self.snapshot();
        let account = self.connected_account()?;
        self.sign_message(&state.message, &account).await
    }

    /// Recover the signer and compare it with `account`, ignoring case.
    pub async fn verify_signature(
        &self,
        signed_message: &str,
        signature: &str,
        account: &str,
    ) -> WalletResult<bool> {
        let (provider, epoch) = self.current()?;
        let result = async {
            let recovered = provider
                .request("personal_ecRecover", json!([signed_message, signature]))
                .await?;
            let recovered = expect_string(recovered, "personal_ecRecover")?;
            let verified = recovered.eq_ignore_ascii_case(account);
            log::debug!("recovered {} for {}: {}", recovered, account, verified);
            self.update_if_current(epoch, |state| state.verified = Some(verified));
            Ok::<_, WalletError>(verified)
        }
        .await;
        self.finish(Some(epoch), result)
    }

    pub async fn verify_last(&self) -> WalletResult<bool> {
        let state = self.snapshot();
        let account = self.connected_account()?;
        if state.signature.is_empty() {
            return self.fail(WalletError::ValidationError(
                "Nothing has been signed yet".to_string(),
            ));
        }
        self.verify_signature(&state.signed_message, &state.signature, &account)
            .await
    }

    /// Seal `message` to a recipient's encryption key. No wallet round-trip.
    pub fn encrypt_message(
        &self,
        message: &str,
        recipient_public_key: &str,
    ) -> WalletResult<String> {
        let result = (|| {
            self.inner.validator.validate_plaintext(message)?;
            self.inner
                .validator
                .validate_encryption_key(recipient_public_key)?;
            crypto::encrypt(recipient_public_key, message)?.to_hex()
        })();
        let encrypted = self.finish(None, result)?;
        self.inner.state.send_modify(|state| {
            state.encrypted_message = encrypted.clone();
            state.decrypted_message.clear();
        });
        Ok(encrypted)
    }

    /// Encrypt the pending message to the chosen recipient, defaulting to
    /// the connected account's own key.
    pub fn encrypt_pending(&self) -> WalletResult<String> {
        let state = self.snapshot();
        let recipient = state
            .recipient_public_key
            .or(state.encryption_public_key)
            .ok_or_else(|| {
                WalletError::ValidationError("No recipient encryption key".to_string())
            });
        match recipient {
            Ok(recipient) => self.encrypt_message(&state.message, &recipient),
            Err(err) => self.fail(err),
        }
    }

    /// Have the wallet decrypt an envelope addressed to `account`.
    pub async fn decrypt_message(
        &self,
        encrypted_message: &str,
        account: &str,
    ) -> WalletResult<String> {
        let (provider, epoch) = self.current()?;
        let result = async {
            self.inner
                .validator
                .validate_encrypted_payload(encrypted_message)?;
            let plaintext = provider
                .request("eth_decrypt", json!([encrypted_message, account]))
                .await?;
            let plaintext = expect_string(plaintext, "eth_decrypt")?;
            self.update_if_current(epoch, |state| {
                state.decrypted_message = plaintext.clone()
            });
            Ok::<_, WalletError>(plaintext)
        }
        .await;
        self.finish(Some(epoch), result)
    }

    pub async fn decrypt_last(&self) -> WalletResult<String> {
        let state = self.snapshot();
        let account = self.connected_account()?;
        if state.encrypted_message.is_empty() {
            return self.fail(WalletError::ValidationError(
                "Nothing has been encrypted yet".to_string(),
            ));
        }
        self.decrypt_message(&state.encrypted_message, &account).await
    }

    /// Apply a provider event to the current connection.
    pub fn apply_event(&self, event: ProviderEvent) {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        handle_event(&self.inner, epoch, event);
    }

    fn current(&self) -> WalletResult<(Arc<dyn Provider>, u64)> {
        let active = self
            .inner
            .active
            .read()
            .as_ref()
            .map(|active| (active.handle.clone(), active.epoch));
        match active {
            Some(active) => Ok(active),
            None => self.fail(WalletError::NotConnected),
        }
    }

    fn connected_account(&self) -> WalletResult<String> {
        match self.snapshot().account {
            Some(account) => Ok(account),
            None => self.fail(WalletError::NotConnected),
        }
    }

    fn update_if_current(&self, epoch: u64, update: impl FnOnce(&mut SessionState)) -> bool {
        let active = self.inner.active.read();
        let current = active.as_ref().map(|active| active.epoch) == Some(epoch);
        if current {
            self.inner.state.send_modify(update);
        } else {
            log::debug!("discarding response from stale connection {}", epoch);
        }
        current
    }

    fn finish<T>(&self, epoch: Option<u64>, result: WalletResult<T>) -> WalletResult<T> {
        if let Err(err) = &result {
            match epoch {
                Some(epoch) => {
                    log::warn!("session operation failed: {}", err);
                    let message = err.to_string();
                    self.update_if_current(epoch, |state| state.last_error = Some(message));
                }
                None => self.record_error(err),
            }
        }
        result
    }

    fn fail<T>(&self, error: WalletError) -> WalletResult<T> {
        self.finish(None, Err(error))
    }
}

fn spawn_listener(
    inner: Weak<SessionInner>,
    mut events: broadcast::Receiver<ProviderEvent>,
    epoch: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    let disconnect = matches!(event, ProviderEvent::Disconnect { .. });
                    handle_event(&inner, epoch, event);
                    if disconnect {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("provider event listener skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn handle_event(inner: &SessionInner, epoch: u64, event: ProviderEvent) {
    let current = inner.active.read().as_ref().map(|active| active.epoch) == Some(epoch);
    if !current {
        log::debug!("ignoring {:?} for stale connection {}", event, epoch);
        return;
    }

    match event {
        ProviderEvent::AccountsChanged(accounts) => {
            log::info!("accountsChanged {:?}", accounts);
            let account = accounts.first().map(|account| checksummed(account));
            inner.state.send_modify(|state| state.set_account(account));
        }
        ProviderEvent::ChainChanged(raw) => match parse_chain_id(&raw) {
            Ok(chain_id) => {
                log::info!("chainChanged {}", chain_id);
                inner
                    .state
                    .send_modify(|state| state.set_chain_id(Some(chain_id)));
            }
            Err(err) => log::warn!("ignoring chainChanged '{}': {}", raw, err),
        },
        ProviderEvent::Disconnect { code, message } => {
            log::info!("provider disconnected ({}): {}", code, message);
            let active = inner.active.write().take();
            inner.state.send_replace(SessionState::default());
            if let Some(hook) = active.as_ref().and_then(|active| active.hook.clone()) {
                hook();
            }
            drop(active);
        }
    }
}

fn checksummed(account: &str) -> String {
    crypto::to_checksum_address(account).unwrap_or_else(|_| account.to_string())
}

fn expect_string(value: Value, method: &str) -> WalletResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(WalletError::InvalidResponse(format!(
            "{} returned {}",
            method, other
        ))),
    }
}

fn parse_chain_value(value: &Value) -> WalletResult<u64> {
    match value {
        Value::String(s) => parse_chain_id(s),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| WalletError::InvalidResponse(format!("eth_chainId returned {}", n))),
        other => Err(WalletError::InvalidResponse(format!(
            "eth_chainId returned {}",
            other
        ))),
    }
}
