//! Chain identifiers and address validation
//!
//! Checks are structural plus checksum where the chain defines one:
//! base58check for Bitcoin legacy and TRON, bech32 for SegWit, EIP-55 for
//! mixed-case EVM addresses, and a 32-byte key for Solana.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("not a valid {chain} address: {reason}")]
    Format { chain: Chain, reason: &'static str },

    #[error("{0} address checksum mismatch")]
    Checksum(Chain),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Bitcoin,
    Ethereum,
    Tron,
    Solana,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::Ethereum => "ethereum",
            Chain::Tron => "tron",
            Chain::Solana => "solana",
        }
    }

    /// Chain to use when the caller names only the asset
    ///
    /// Stablecoins live on several chains, so they need an explicit chain.
    pub fn default_for_asset(asset: &str) -> Option<Chain> {
        match asset.to_ascii_uppercase().as_str() {
            "BTC" => Some(Chain::Bitcoin),
            "ETH" => Some(Chain::Ethereum),
            "TRX" => Some(Chain::Tron),
            "SOL" => Some(Chain::Solana),
            _ => None,
        }
    }

    /// On-chain decimals of `asset` on this chain; `None` if unsupported
    pub fn asset_decimals(&self, asset: &str) -> Option<u32> {
        match (self, asset.to_ascii_uppercase().as_str()) {
            (Chain::Bitcoin, "BTC") => Some(8),
            (Chain::Ethereum, "ETH") => Some(18),
            (Chain::Ethereum, "USDT" | "USDC") => Some(6),
            (Chain::Tron, "TRX") => Some(6),
            (Chain::Tron, "USDT") => Some(6),
            (Chain::Solana, "SOL") => Some(9),
            (Chain::Solana, "USDT" | "USDC") => Some(6),
            _ => None,
        }
    }

    pub fn validate_address(&self, address: &str) -> Result<(), AddressError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(AddressError::Empty);
        }
        match self {
            Chain::Bitcoin => validate_bitcoin(address),
            Chain::Ethereum => validate_evm(address),
            Chain::Tron => validate_tron(address),
            Chain::Solana => validate_solana(address),
        }
    }

    /// Validate `address` and return the one spelling used for comparison
    /// and lookups
    ///
    /// Bech32 and single-case EVM addresses may be written in either case;
    /// both are lowered. Base58 addresses are case-sensitive and kept as is.
    pub fn canonical_address(&self, address: &str) -> Result<String, AddressError> {
        self.validate_address(address)?;
        let address = address.trim();
        Ok(match self {
            Chain::Ethereum => address.to_ascii_lowercase(),
            Chain::Bitcoin if address.to_ascii_lowercase().starts_with("bc1") => {
                address.to_ascii_lowercase()
            }
            _ => address.to_string(),
        })
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Chain {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(Chain::Bitcoin),
            "ethereum" | "eth" | "erc20" => Ok(Chain::Ethereum),
            "tron" | "trx" | "trc20" => Ok(Chain::Tron),
            "solana" | "sol" | "spl" => Ok(Chain::Solana),
            other => Err(AddressError::UnsupportedChain(other.to_string())),
        }
    }
}

fn format_err(chain: Chain, reason: &'static str) -> AddressError {
    AddressError::Format { chain, reason }
}

fn validate_bitcoin(address: &str) -> Result<(), AddressError> {
    if address.starts_with('1') || address.starts_with('3') {
        let decoded = bs58::decode(address)
            .with_check(None)
            .into_vec()
            .map_err(|e| match e {
                bs58::decode::Error::InvalidChecksum { .. } => {
                    AddressError::Checksum(Chain::Bitcoin)
                }
                _ => format_err(Chain::Bitcoin, "invalid base58"),
            })?;
        // version byte + 20-byte hash
        if decoded.len() != 21 || !matches!(decoded[0], 0x00 | 0x05) {
            return Err(format_err(Chain::Bitcoin, "unexpected payload"));
        }
        return Ok(());
    }

    if address.to_ascii_lowercase().starts_with("bc1") {
        let (hrp, _version, _program) = bech32::segwit::decode(address)
            .map_err(|_| format_err(Chain::Bitcoin, "invalid bech32"))?;
        if hrp != bech32::hrp::BC {
            return Err(format_err(Chain::Bitcoin, "not a mainnet address"));
        }
        return Ok(());
    }

    Err(format_err(Chain::Bitcoin, "unknown prefix"))
}

fn validate_evm(address: &str) -> Result<(), AddressError> {
    let Some(hex_part) = address.strip_prefix("0x") else {
        return Err(format_err(Chain::Ethereum, "missing 0x prefix"));
    };
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format_err(Chain::Ethereum, "expected 40 hex characters"));
    }

    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    // Single-case addresses carry no checksum
    if has_upper && has_lower && !eip55_matches(hex_part) {
        return Err(AddressError::Checksum(Chain::Ethereum));
    }
    Ok(())
}

/// https://eips.ethereum.org/EIPS/eip-55
fn eip55_matches(hex_part: &str) -> bool {
    use sha3::{Digest, Keccak256};

    let hash = Keccak256::digest(hex_part.to_ascii_lowercase().as_bytes());
    hex_part.chars().enumerate().all(|(i, ch)| {
        if !ch.is_ascii_alphabetic() {
            return true;
        }
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        ch.is_ascii_uppercase() == (nibble >= 8)
    })
}

fn validate_tron(address: &str) -> Result<(), AddressError> {
    if !address.starts_with('T') {
        return Err(format_err(Chain::Tron, "expected T prefix"));
    }
    let decoded = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| match e {
            bs58::decode::Error::InvalidChecksum { .. } => AddressError::Checksum(Chain::Tron),
            _ => format_err(Chain::Tron, "invalid base58"),
        })?;
    if decoded.len() != 21 || decoded[0] != 0x41 {
        return Err(format_err(Chain::Tron, "unexpected payload"));
    }
    Ok(())
}

fn validate_solana(address: &str) -> Result<(), AddressError> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| format_err(Chain::Solana, "invalid base58"))?;
    if decoded.len() != 32 {
        return Err(format_err(Chain::Solana, "expected a 32-byte key"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitcoin_addresses() {
        let btc = Chain::Bitcoin;
        assert!(btc.validate_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").is_ok());
        assert!(btc.validate_address("3J98t1WpEZ73CNmYviecrnyiWrnqRhWNLy").is_ok());
        assert!(
            btc.validate_address("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
                .is_ok()
        );

        // Last character altered
        assert_eq!(
            btc.validate_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb"),
            Err(AddressError::Checksum(Chain::Bitcoin))
        );
        assert!(
            btc.validate_address("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t5")
                .is_err()
        );
        assert!(btc.validate_address("2NotAnAddress").is_err());
        assert_eq!(btc.validate_address("   "), Err(AddressError::Empty));
    }

    #[test]
    fn test_evm_addresses() {
        let eth = Chain::Ethereum;
        assert!(
            eth.validate_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed")
                .is_ok()
        );
        assert!(
            eth.validate_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")
                .is_ok()
        );
        // First 'A' lowered: checksum no longer matches
        assert_eq!(
            eth.validate_address("0x5aaeb6053F3E94C9b9A09f33669435E7Ef1BeAed"),
            Err(AddressError::Checksum(Chain::Ethereum))
        );
        assert!(eth.validate_address("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_err());
        assert!(eth.validate_address("0x1234").is_err());
    }

    #[test]
    fn test_tron_addresses() {
        let tron = Chain::Tron;
        assert!(tron.validate_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").is_ok());
        assert!(tron.validate_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6u").is_err());
        assert!(
            tron.validate_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa")
                .is_err()
        );
    }

    #[test]
    fn test_solana_addresses() {
        let sol = Chain::Solana;
        assert!(sol.validate_address("11111111111111111111111111111111").is_ok());
        assert!(
            sol.validate_address("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA")
                .is_ok()
        );
        assert!(sol.validate_address("0OIl").is_err());
        assert!(sol.validate_address("abc").is_err());
    }

    #[test]
    fn test_canonical_address_folds_case_insensitive_forms() {
        let segwit = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
        assert_eq!(
            Chain::Bitcoin.canonical_address(&segwit.to_ascii_uppercase()),
            Ok(segwit.to_string())
        );
        assert_eq!(
            Chain::Bitcoin.canonical_address(" 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa "),
            Ok("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".to_string())
        );

        let lower = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
        assert_eq!(
            Chain::Ethereum.canonical_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"),
            Ok(lower.to_string())
        );
        assert_eq!(
            Chain::Ethereum.canonical_address("0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED"),
            Ok(lower.to_string())
        );
        // Still validated first
        assert_eq!(
            Chain::Ethereum.canonical_address("0x5aaeb6053F3E94C9b9A09f33669435E7Ef1BeAed"),
            Err(AddressError::Checksum(Chain::Ethereum))
        );

        assert_eq!(
            Chain::Tron.canonical_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"),
            Ok("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string())
        );
    }

    #[test]
    fn test_chain_parsing_and_assets() {
        assert_eq!("ERC20".parse::<Chain>(), Ok(Chain::Ethereum));
        assert_eq!("trc20".parse::<Chain>(), Ok(Chain::Tron));
        assert!("dogecoin".parse::<Chain>().is_err());

        assert_eq!(Chain::default_for_asset("eth"), Some(Chain::Ethereum));
        assert_eq!(Chain::default_for_asset("USDT"), None);
        assert_eq!(Chain::Ethereum.asset_decimals("usdt"), Some(6));
        assert_eq!(Chain::Bitcoin.asset_decimals("ETH"), None);
    }
}
