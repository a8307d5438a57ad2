/// Formatting for the status view.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::session::{ConnectionStatus, SessionState};

static ADDRESS_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0x[a-zA-Z0-9]{2})[a-zA-Z0-9]+([a-zA-Z0-9]{2})$").expect("static regex")
});

/// `0xAb…Cd` form of an address or signature.
pub fn truncate_address(address: &str) -> String {
    if address.is_empty() {
        return "No Account".to_string();
    }
    match ADDRESS_SHAPE.captures(address) {
        Some(caps) => format!("{}…{}", &caps[1], &caps[2]),
        None => address.to_string(),
    }
}

/// Multi-line status block shown after each action.
pub fn render_status(state: &SessionState) -> String {
    let mut lines = Vec::new();

    let status = match state.status {
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Connecting => "connecting",
        ConnectionStatus::Disconnected => "not connected",
        ConnectionStatus::Error => "error",
    };
    lines.push(format!("Connection Status: {}", status));
    lines.push(format!(
        "Account: {}",
        truncate_address(state.account.as_deref().unwrap_or(""))
    ));
    lines.push(match state.chain_id {
        Some(id) => format!("Network ID: {}", id),
        None => "Network ID: No Network".to_string(),
    });

    if let Some(target) = state.target_network {
        lines.push(format!("Selected network: {}", target));
    }
    if !state.message.is_empty() {
        lines.push(format!("Message: {}", state.message));
    }
    if !state.signature.is_empty() {
        lines.push(format!("Signature: {}", truncate_address(&state.signature)));
    }
    match state.verified {
        Some(true) => lines.push("Signature Verified!".to_string()),
        Some(false) => lines.push("Signature Denied!".to_string()),
        None => {}
    }
    if let Some(key) = &state.encryption_public_key {
        lines.push(format!("Encryption key: {}", key));
    }
    if !state.encrypted_message.is_empty() {
        lines.push(format!(
            "Encrypted: {}",
            truncate_address(&state.encrypted_message)
        ));
    }
    if !state.decrypted_message.is_empty() {
        lines.push(format!("Decrypted: {}", state.decrypted_message));
    }
    if let Some(error) = &state.last_error {
        lines.push(format!("Error: {}", error));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_well_formed_addresses() {
        assert_eq!(
            truncate_address("0x2c7536E3605D9C16a7a3D7b1898e529396a65c23"),
            "0x2c…23"
        );
        assert_eq!(truncate_address(""), "No Account");
        assert_eq!(truncate_address("0x12"), "0x12");
    }

    #[test]
    fn empty_state_renders_placeholders() {
        let rendered = render_status(&SessionState::default());
        assert!(rendered.contains("Connection Status: not connected"));
        assert!(rendered.contains("Account: No Account"));
        assert!(rendered.contains("Network ID: No Network"));
        assert!(!rendered.contains("Error"));
    }

    #[test]
    fn verification_outcome_is_rendered() {
        let state = SessionState {
            verified: Some(false),
            last_error: Some("User rejected".to_string()),
            ..SessionState::default()
        };
        let rendered = render_status(&state);
        assert!(rendered.contains("Signature Denied!"));
        assert!(rendered.contains("Error: User rejected"));
    }
}
