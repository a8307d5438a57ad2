/// Static chain metadata: the networks offered for switching and the
/// `wallet_addEthereumChain` parameters for those wallets don't ship with.
use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Payload of `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainParams {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub block_explorer_urls: Vec<String>,
}

/// Networks the user can pick as a switch target.
pub const SELECTABLE_NETWORKS: &[(u64, &str)] = &[
    (3, "Ropsten"),
    (4, "Rinkeby"),
    (42, "Kovan"),
    (1_666_600_000, "Harmony"),
    (42_220, "Celo"),
];

static CHAIN_PARAMS: Lazy<HashMap<u64, ChainParams>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        1_666_600_000,
        ChainParams {
            chain_id: to_hex(1_666_600_000),
            chain_name: "Harmony Mainnet".to_string(),
            native_currency: NativeCurrency {
                name: "ONE".to_string(),
                symbol: "ONE".to_string(),
                decimals: 18,
            },
            rpc_urls: vec!["https://api.harmony.one".to_string()],
            block_explorer_urls: vec!["https://explorer.harmony.one".to_string()],
        },
    );
    table.insert(
        42_220,
        ChainParams {
            chain_id: to_hex(42_220),
            chain_name: "Celo Mainnet".to_string(),
            native_currency: NativeCurrency {
                name: "CELO".to_string(),
                symbol: "CELO".to_string(),
                decimals: 18,
            },
            rpc_urls: vec!["https://forno.celo.org".to_string()],
            block_explorer_urls: vec!["https://explorer.celo.org".to_string()],
        },
    );
    table
});

/// Parameters needed to add `chain_id` to a wallet, if known.
pub fn chain_params(chain_id: u64) -> Option<&'static ChainParams> {
    CHAIN_PARAMS.get(&chain_id)
}

pub fn network_name(chain_id: u64) -> Option<&'static str> {
    SELECTABLE_NETWORKS
        .iter()
        .find(|(id, _)| *id == chain_id)
        .map(|(_, name)| *name)
}

/// `0x`-prefixed lowercase hex quantity.
pub fn to_hex(value: u64) -> String {
    format!("0x{:x}", value)
}

/// Parse a chain id given either as `0x` hex or as a decimal string.
pub fn parse_chain_id(input: &str) -> WalletResult<u64> {
    let trimmed = input.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    match parsed {
        Ok(0) | Err(_) => Err(WalletError::ValidationError(format!(
            "Invalid chain id '{}'",
            input
        ))),
        Ok(id) => Ok(id),
    }
}
