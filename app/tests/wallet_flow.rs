use std::sync::Arc;

use dapp_connect_lib::{
    ConnectionStatus, DappContext, ProviderError, ProviderEvent, ProviderKind, SessionState,
    StaticSelector, SwitchOutcome, WalletError, WalletResult,
};
use tempfile::TempDir;

fn build_context(
    temp: &TempDir,
    choice: Option<ProviderKind>,
) -> WalletResult<(DappContext, Arc<StaticSelector>)> {
    let selector = Arc::new(StaticSelector::new(choice));
    let context = DappContext::initialize(temp.path().to_path_buf(), selector.clone())?;
    Ok((context, selector))
}

#[tokio::test]
async fn connect_sign_verify_encrypt_disconnect_flow() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let (context, _) = build_context(&temp_dir, Some(ProviderKind::Local))?;

    let state = context.connect().await?;
    assert_eq!(state.status, ConnectionStatus::Connected);
    let account = state.account.clone().expect("account after connect");
    assert_eq!(state.chain_id, Some(1));
    assert!(state.signature.is_empty());
    assert_eq!(state.verified, None);
    let own_key = state
        .encryption_public_key
        .clone()
        .expect("local wallet exposes an encryption key");

    let session = context.session();
    session.set_message("hello dapp")?;
    let signature = session.sign_pending().await?;
    assert_eq!(session.snapshot().signed_message, "hello dapp");
    assert_eq!(session.snapshot().signature, signature);

    assert!(session.verify_last().await?);
    assert!(
        session
            .verify_signature("hello dapp", &signature, &account.to_lowercase())
            .await?
    );
    assert!(
        !session
            .verify_signature("tampered", &signature, &account)
            .await?
    );

    session.set_recipient_key(own_key);
    let encrypted = session.encrypt_pending()?;
    let decrypted = session.decrypt_message(&encrypted, &account).await?;
    assert_eq!(decrypted, "hello dapp");
    assert_eq!(session.snapshot().decrypted_message, "hello dapp");

    context.disconnect().await?;
    let state = session.snapshot();
    assert_eq!(state, SessionState::default());
    assert_eq!(context.connection().cached_provider()?, None);
    Ok(())
}

#[tokio::test]
async fn cancelled_selection_leaves_session_empty() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let (context, _) = build_context(&temp_dir, None)?;

    let err = context.connect().await.expect_err("selection was cancelled");
    assert_eq!(err, WalletError::Cancelled);

    let state = context.session().snapshot();
    assert_eq!(state.status, ConnectionStatus::Error);
    assert!(state.last_error.is_some());
    assert_eq!(
        SessionState {
            status: ConnectionStatus::Disconnected,
            last_error: None,
            ..state
        },
        SessionState::default()
    );
    Ok(())
}

#[tokio::test]
async fn cached_provider_is_restored_after_restart() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let first_account = {
        let (context, _) = build_context(&temp_dir, Some(ProviderKind::Local))?;
        context.connect().await?.account
    };

    let (context, _) = build_context(&temp_dir, None)?;
    let restored = context.restore().await?.expect("cached provider restored");
    assert_eq!(restored.account, first_account);
    assert!(restored.is_connected());
    Ok(())
}

#[tokio::test]
async fn wallet_disconnect_forgets_cached_provider() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let (context, _) = build_context(&temp_dir, Some(ProviderKind::Local))?;
    context.connect().await?;
    assert_eq!(
        context.connection().cached_provider()?,
        Some(ProviderKind::Local)
    );

    context.session().apply_event(ProviderEvent::Disconnect {
        code: ProviderError::DISCONNECTED,
        message: "locked".to_string(),
    });

    assert_eq!(context.session().snapshot(), SessionState::default());
    assert_eq!(context.connection().cached_provider()?, None);
    assert!(context.restore().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_network_is_added_then_switchable() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let (context, _) = build_context(&temp_dir, Some(ProviderKind::Local))?;
    context.connect().await?;
    let session = context.session();

    session.select_network(42_220);
    assert_eq!(session.switch_to_selected().await?, SwitchOutcome::ChainAdded);
    assert_eq!(session.snapshot().chain_id, Some(1));

    assert_eq!(session.switch_to_selected().await?, SwitchOutcome::Switched);
    assert_eq!(session.snapshot().chain_id, Some(42_220));
    Ok(())
}

#[tokio::test]
async fn failed_disconnect_is_recorded_as_last_error() -> WalletResult<()> {
    let temp_dir = TempDir::new().expect("create temp dir");
    let (context, _) = build_context(&temp_dir, Some(ProviderKind::Local))?;
    context.connect().await?;

    let config_file = context.paths().config_file().to_path_buf();
    std::fs::remove_file(&config_file).expect("remove config");
    std::fs::create_dir(&config_file).expect("block config path");

    assert!(context.disconnect().await.is_err());
    let state = context.session().snapshot();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert!(state.account.is_none());
    assert!(state.last_error.is_some());
    Ok(())
}
