/// Account cryptography for the local wallet backend and the app's local
/// encryption step.
///
/// Signing follows `personal_sign` (EIP-191 prefix, keccak-256, recoverable
/// secp256k1 signature encoded as `r || s || v`). Encryption follows the
/// `x25519-xsalsa20-poly1305` envelope used by `eth_decrypt`.
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::Aead;
use crypto_box::{PublicKey as BoxPublicKey, SalsaBox, SecretKey as BoxSecretKey};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

use crate::errors::{WalletError, WalletResult};

/// Envelope version tag understood by `eth_decrypt`.
pub const ENCRYPTION_VERSION: &str = "x25519-xsalsa20-poly1305";

const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";
const SIGNATURE_LEN: usize = 65;
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut output = [0u8; 32];
    output.copy_from_slice(&Keccak256::digest(data));
    output
}

/// Hash of a message with the EIP-191 `personal_sign` prefix applied.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// Bytes a wallet signs for a `personal_sign` message parameter.
///
/// `0x`-prefixed hex is decoded; anything else is taken as UTF-8 text.
pub fn message_bytes(message: &str) -> Vec<u8> {
    if let Some(stripped) = message.strip_prefix("0x") {
        if let Ok(bytes) = hex::decode(stripped) {
            return bytes;
        }
    }
    message.as_bytes().to_vec()
}

/// Lowercase `0x` address of a secp256k1 public key.
pub fn address_from_verifying_key(key: &VerifyingKey) -> String {
    let encoded = key.as_affine().to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// EIP-55 mixed-case checksum encoding of an address.
pub fn to_checksum_address(address: &str) -> WalletResult<String> {
    let lower = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address)
        .to_ascii_lowercase();
    if lower.len() != 40 || !lower.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(WalletError::InvalidAddress(address.to_string()));
    }

    let hash = keccak256(lower.as_bytes());
    let mut checksummed = String::with_capacity(42);
    checksummed.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            checksummed.push(c.to_ascii_uppercase());
        } else {
            checksummed.push(c);
        }
    }
    Ok(checksummed)
}

/// Recover the signer address (lowercase) of a `personal_sign` signature.
pub fn recover_personal_signature(message: &[u8], signature_hex: &str) -> WalletResult<String> {
    let raw = hex::decode(signature_hex.trim_start_matches("0x"))
        .map_err(|e| WalletError::SignatureError(format!("Invalid signature hex: {}", e)))?;
    if raw.len() != SIGNATURE_LEN {
        return Err(WalletError::SignatureError(format!(
            "Expected {} signature bytes, got {}",
            SIGNATURE_LEN,
            raw.len()
        )));
    }

    let v = match raw[64] {
        v @ 27..=28 => v - 27,
        v => v,
    };
    let mut recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| WalletError::SignatureError(format!("Invalid recovery byte {}", raw[64])))?;
    let mut signature = Signature::from_slice(&raw[..64])
        .map_err(|e| WalletError::SignatureError(e.to_string()))?;
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let hash = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&hash, &signature, recovery_id)
        .map_err(|e| WalletError::SignatureError(format!("Recovery failed: {}", e)))?;
    Ok(address_from_verifying_key(&key))
}

/// Serialized ciphertext handed to `eth_decrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    pub version: String,
    pub nonce: String,
    pub ephem_public_key: String,
    pub ciphertext: String,
}

impl EncryptedEnvelope {
    /// `0x` + hex of the envelope's JSON, the form wallets accept.
    pub fn to_hex(&self) -> WalletResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(format!("0x{}", hex::encode(json)))
    }

    pub fn from_hex(encoded: &str) -> WalletResult<Self> {
        let bytes = hex::decode(encoded.trim().trim_start_matches("0x"))
            .map_err(|e| WalletError::ValidationError(format!("Invalid envelope hex: {}", e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Seal `plaintext` to a base64 x25519 encryption public key.
pub fn encrypt(recipient_public_key: &str, plaintext: &str) -> WalletResult<EncryptedEnvelope> {
    let recipient = decode_public_key(recipient_public_key)?;
    let ephemeral = BoxSecretKey::generate(&mut OsRng);

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = SalsaBox::new(&recipient, &ephemeral)
        .encrypt(GenericArray::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| WalletError::CryptoError("Encryption failed".to_string()))?;

    Ok(EncryptedEnvelope {
        version: ENCRYPTION_VERSION.to_string(),
        nonce: BASE64.encode(nonce),
        ephem_public_key: BASE64.encode(ephemeral.public_key().as_bytes()),
        ciphertext: BASE64.encode(ciphertext),
    })
}

pub fn decode_public_key(encoded: &str) -> WalletResult<BoxPublicKey> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| WalletError::InvalidKey(format!("Public key is not base64: {}", e)))?;
    let bytes: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
        WalletError::InvalidKey(format!(
            "Public key must be {} bytes, got {}",
            KEY_LEN,
            bytes.len()
        ))
    })?;
    Ok(BoxPublicKey::from(bytes))
}

/// A secp256k1 account plus the x25519 key derived from the same secret.
pub struct AccountKey {
    signing: SigningKey,
    encryption: BoxSecretKey,
    address: String,
}

impl AccountKey {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    pub fn from_hex(secret: &str) -> WalletResult<Self> {
        let bytes = Zeroizing::new(
            hex::decode(secret.trim().trim_start_matches("0x"))
                .map_err(|e| WalletError::InvalidKey(format!("Secret key is not hex: {}", e)))?,
        );
        let signing = SigningKey::from_slice(&bytes)
            .map_err(|e| WalletError::InvalidKey(format!("Invalid secp256k1 key: {}", e)))?;
        Ok(Self::from_signing_key(signing))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        // The encryption key reuses the raw account secret as an x25519 scalar.
        let mut raw = [0u8; KEY_LEN];
        raw.copy_from_slice(&signing.to_bytes());
        let encryption = BoxSecretKey::from(raw);
        raw.zeroize();

        let address = address_from_verifying_key(signing.verifying_key());
        Self {
            signing,
            encryption,
            address,
        }
    }

    /// Lowercase `0x` address.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing.to_bytes()))
    }

    /// `personal_sign` over raw message bytes, returned as `0x` hex.
    pub fn sign_personal(&self, message: &[u8]) -> WalletResult<String> {
        let hash = personal_message_hash(message);
        let (signature, recovery_id) = self
            .signing
            .sign_prehash_recoverable(&hash)
            .map_err(|e| WalletError::SignatureError(e.to_string()))?;

        let mut encoded = Vec::with_capacity(SIGNATURE_LEN);
        encoded.extend_from_slice(&signature.to_bytes());
        encoded.push(27 + recovery_id.to_byte());
        Ok(format!("0x{}", hex::encode(encoded)))
    }

    /// Base64 x25519 public key, the `eth_getEncryptionPublicKey` answer.
    pub fn encryption_public_key(&self) -> String {
        BASE64.encode(self.encryption.public_key().as_bytes())
    }

    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> WalletResult<String> {
        if envelope.version != ENCRYPTION_VERSION {
            return Err(WalletError::CryptoError(format!(
                "Unsupported encryption version '{}'",
                envelope.version
            )));
        }

        let nonce = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| WalletError::CryptoError(format!("Invalid nonce: {}", e)))?;
        if nonce.len() != NONCE_LEN {
            return Err(WalletError::CryptoError(format!(
                "Nonce must be {} bytes",
                NONCE_LEN
            )));
        }
        let ephemeral = decode_public_key(&envelope.ephem_public_key)?;
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| WalletError::CryptoError(format!("Invalid ciphertext: {}", e)))?;

        let plaintext = SalsaBox::new(&ephemeral, &self.encryption)
            .decrypt(GenericArray::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| WalletError::CryptoError("Decryption failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| WalletError::CryptoError("Plaintext is not UTF-8".to_string()))
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN_SECRET: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const KNOWN_ADDRESS: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";

    #[test]
    fn derives_known_address() {
        let key = AccountKey::from_hex(KNOWN_SECRET).unwrap();
        assert_eq!(key.address(), KNOWN_ADDRESS.to_ascii_lowercase());
        assert_eq!(to_checksum_address(key.address()).unwrap(), KNOWN_ADDRESS);
    }

    #[test]
    fn checksum_matches_eip55_vectors() {
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
        ] {
            assert_eq!(
                to_checksum_address(&expected.to_ascii_lowercase()).unwrap(),
                expected
            );
        }
        assert!(to_checksum_address("0x1234").is_err());
    }

    #[test]
    fn personal_signature_recovers_signer() {
        let key = AccountKey::generate();
        let signature = key.sign_personal(b"hello").unwrap();
        assert_eq!(signature.len(), 2 + SIGNATURE_LEN * 2);
        assert_eq!(
            recover_personal_signature(b"hello", &signature).unwrap(),
            key.address()
        );
        assert_ne!(
            recover_personal_signature(b"hellO", &signature).unwrap(),
            key.address()
        );
    }

    #[test]
    fn recover_rejects_malformed_signature() {
        assert!(matches!(
            recover_personal_signature(b"hello", "0xdeadbeef"),
            Err(WalletError::SignatureError(_))
        ));
    }

    #[test]
    fn hex_messages_are_signed_as_bytes() {
        assert_eq!(message_bytes("0x6869"), b"hi".to_vec());
        assert_eq!(message_bytes("hi"), b"hi".to_vec());
        assert_eq!(message_bytes("0xzz"), b"0xzz".to_vec());
    }

    #[test]
    fn envelope_opens_only_for_recipient() {
        let recipient = AccountKey::generate();
        let envelope = encrypt(&recipient.encryption_public_key(), "secret note").unwrap();
        assert_eq!(envelope.version, ENCRYPTION_VERSION);

        let hex = envelope.to_hex().unwrap();
        let parsed = EncryptedEnvelope::from_hex(&hex).unwrap();
        assert_eq!(recipient.decrypt(&parsed).unwrap(), "secret note");

        let other = AccountKey::generate();
        assert!(other.decrypt(&parsed).is_err());
    }

    #[test]
    fn envelope_json_uses_wallet_field_names() {
        let recipient = AccountKey::generate();
        let envelope = encrypt(&recipient.encryption_public_key(), "x").unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("ephemPublicKey").is_some());
        assert_eq!(json["version"], ENCRYPTION_VERSION);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let recipient = AccountKey::generate();
        let mut envelope = encrypt(&recipient.encryption_public_key(), "payload").unwrap();
        let mut raw = BASE64.decode(&envelope.ciphertext).unwrap();
        raw[0] ^= 0x01;
        envelope.ciphertext = BASE64.encode(raw);
        assert!(matches!(
            recipient.decrypt(&envelope),
            Err(WalletError::CryptoError(_))
        ));
    }

    #[test]
    fn rejects_short_public_key() {
        assert!(matches!(
            encrypt(&BASE64.encode([1u8; 16]), "x"),
            Err(WalletError::InvalidKey(_))
        ));
    }
}
