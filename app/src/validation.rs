use crate::crypto;
use crate::errors::{WalletError, WalletResult};
use regex::Regex;

/// Longest message the sign form accepts.
pub const MAX_MESSAGE_CHARS: usize = 20;
/// Longest plaintext accepted for encryption.
pub const MAX_PLAINTEXT_BYTES: usize = 4096;

/// Input validation for values typed into the session forms
pub struct InputValidator {
    address_pattern: Regex,
    hex_payload_pattern: Regex,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let address_pattern = Regex::new(r"^0x[a-fA-F0-9]{40}$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid address regex: {}", e)))?;

        let hex_payload_pattern = Regex::new(r"^0x([a-fA-F0-9]{2})+$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid payload regex: {}", e)))?;

        Ok(InputValidator {
            address_pattern,
            hex_payload_pattern,
        })
    }

    /// Validate an account address
    pub fn validate_address(&self, address: &str) -> WalletResult<()> {
        if address.is_empty() {
            return Err(WalletError::ValidationError(
                "Address cannot be empty".to_string(),
            ));
        }

        if !self.address_pattern.is_match(address) {
            return Err(WalletError::InvalidAddress(
                "Address format is invalid".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate a message typed into the sign form
    pub fn validate_message(&self, message: &str) -> WalletResult<()> {
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(WalletError::ValidationError(format!(
                "Message must be at most {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        Ok(())
    }

    pub fn validate_plaintext(&self, plaintext: &str) -> WalletResult<()> {
        if plaintext.is_empty() {
            return Err(WalletError::ValidationError(
                "Nothing to encrypt".to_string(),
            ));
        }

        if plaintext.len() > MAX_PLAINTEXT_BYTES {
            return Err(WalletError::ValidationError("Plaintext too long".to_string()));
        }

        Ok(())
    }

    /// Validate a base64 x25519 encryption public key
    pub fn validate_encryption_key(&self, key: &str) -> WalletResult<()> {
        crypto::decode_public_key(key).map(|_| ())
    }

    /// Validate the hex envelope handed to `eth_decrypt`
    pub fn validate_encrypted_payload(&self, payload: &str) -> WalletResult<()> {
        if !self.hex_payload_pattern.is_match(payload) {
            return Err(WalletError::ValidationError(
                "Encrypted message must be 0x-prefixed hex".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new().expect("Failed to create InputValidator")
    }
}
