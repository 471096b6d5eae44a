//! Network parameters, verification flags and signing options

use crate::constants::TX_VERSION;
use crate::error::{Result, TemplateError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Network a key, address or transaction template belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl NetworkType {
    /// Base58 version byte of P2PKH addresses
    pub fn p2pkh_version(&self) -> u8 {
        match self {
            NetworkType::Mainnet => 0x00,
            NetworkType::Testnet | NetworkType::Regtest => 0x6f,
        }
    }

    /// Base58 version byte of P2SH addresses
    pub fn p2sh_version(&self) -> u8 {
        match self {
            NetworkType::Mainnet => 0x05,
            NetworkType::Testnet | NetworkType::Regtest => 0xc4,
        }
    }

    /// Version byte of WIF encoded private keys
    pub fn wif_version(&self) -> u8 {
        match self {
            NetworkType::Mainnet => 0x80,
            NetworkType::Testnet | NetworkType::Regtest => 0xef,
        }
    }

    /// Testnet and regtest share version bytes, so a decoded prefix maps to testnet.
    pub fn from_wif_version(version: u8) -> Option<Self> {
        match version {
            0x80 => Some(NetworkType::Mainnet),
            0xef => Some(NetworkType::Testnet),
            _ => None,
        }
    }

    /// True when both networks use the same encoding prefixes.
    pub fn shares_prefixes(&self, other: NetworkType) -> bool {
        self.p2pkh_version() == other.p2pkh_version()
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

impl FromStr for NetworkType {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(NetworkType::Mainnet),
            "testnet" | "test" => Ok(NetworkType::Testnet),
            "regtest" => Ok(NetworkType::Regtest),
            other => Err(TemplateError::Parse(format!("unknown network: {}", other))),
        }
    }
}

/// Script verification flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScriptFlags(u32);

impl ScriptFlags {
    pub const NONE: ScriptFlags = ScriptFlags(0);
    /// BIP16 pay-to-script-hash evaluation
    pub const P2SH: ScriptFlags = ScriptFlags(1 << 0);
    /// Strict signature and public key encodings
    pub const STRICTENC: ScriptFlags = ScriptFlags(1 << 1);
    /// Strict DER signatures (BIP66)
    pub const DERSIG: ScriptFlags = ScriptFlags(1 << 2);
    /// Reject signatures with a high S value
    pub const LOW_S: ScriptFlags = ScriptFlags(1 << 3);
    /// CHECKMULTISIG dummy element must be empty
    pub const NULLDUMMY: ScriptFlags = ScriptFlags(1 << 4);
    /// scriptSig must only push data
    pub const SIGPUSHONLY: ScriptFlags = ScriptFlags(1 << 5);
    /// Pushes and numbers must use the minimal encoding
    pub const MINIMALDATA: ScriptFlags = ScriptFlags(1 << 6);
    /// Exactly one element must remain after evaluation
    pub const CLEANSTACK: ScriptFlags = ScriptFlags(1 << 8);
    /// BIP65
    pub const CHECKLOCKTIMEVERIFY: ScriptFlags = ScriptFlags(1 << 9);
    /// BIP112
    pub const CHECKSEQUENCEVERIFY: ScriptFlags = ScriptFlags(1 << 10);

    /// Flags applied when checking that a template spends its parents
    pub const STANDARD: ScriptFlags = ScriptFlags(
        Self::P2SH.0
            | Self::STRICTENC.0
            | Self::DERSIG.0
            | Self::LOW_S.0
            | Self::NULLDUMMY.0
            | Self::CHECKLOCKTIMEVERIFY.0
            | Self::CHECKSEQUENCEVERIFY.0,
    );

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        ScriptFlags(bits)
    }

    pub fn contains(&self, other: ScriptFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn without(&self, other: ScriptFlags) -> Self {
        ScriptFlags(self.0 & !other.0)
    }
}

impl BitOr for ScriptFlags {
    type Output = ScriptFlags;

    fn bitor(self, rhs: ScriptFlags) -> ScriptFlags {
        ScriptFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ScriptFlags {
    fn bitor_assign(&mut self, rhs: ScriptFlags) {
        self.0 |= rhs.0;
    }
}

/// Options applied while resolving signature placeholders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignOptions {
    /// Normalize every signature to low S
    pub force_low_s: bool,
    /// Push the signer's public key right after each signature (P2PKH spends)
    pub append_pubkey: bool,
}

impl Default for SignOptions {
    fn default() -> Self {
        SignOptions {
            force_low_s: true,
            append_pubkey: false,
        }
    }
}

/// Settings shared by the transaction builders of one project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub network: NetworkType,
    pub tx_version: u32,
    pub verify_flags: ScriptFlags,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        TemplateConfig {
            network: NetworkType::default(),
            tx_version: TX_VERSION,
            verify_flags: ScriptFlags::STANDARD,
        }
    }
}

impl TemplateConfig {
    pub fn for_network(network: NetworkType) -> Self {
        TemplateConfig {
            network,
            ..Default::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TemplateError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| TemplateError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_versions() {
        assert_eq!(NetworkType::Mainnet.p2pkh_version(), 0x00);
        assert_eq!(NetworkType::Testnet.p2sh_version(), 0xc4);
        assert_eq!(NetworkType::Regtest.wif_version(), 0xef);
        assert!(NetworkType::Testnet.shares_prefixes(NetworkType::Regtest));
        assert!(!NetworkType::Mainnet.shares_prefixes(NetworkType::Testnet));
    }

    #[test]
    fn test_network_from_str() {
        assert_eq!("testnet".parse::<NetworkType>().unwrap(), NetworkType::Testnet);
        assert_eq!("MAIN".parse::<NetworkType>().unwrap(), NetworkType::Mainnet);
        assert!("signet".parse::<NetworkType>().is_err());
    }

    #[test]
    fn test_flags_contains() {
        let flags = ScriptFlags::P2SH | ScriptFlags::LOW_S;
        assert!(flags.contains(ScriptFlags::P2SH));
        assert!(!flags.contains(ScriptFlags::CLEANSTACK));
        assert!(ScriptFlags::STANDARD.contains(flags));
        assert!(!ScriptFlags::STANDARD.without(ScriptFlags::P2SH).contains(ScriptFlags::P2SH));
    }

    #[test]
    fn test_config_json() {
        let config = TemplateConfig::from_json(r#"{"network":"testnet"}"#).unwrap();
        assert_eq!(config.network, NetworkType::Testnet);
        assert_eq!(config.tx_version, TX_VERSION);
        assert_eq!(config.verify_flags, ScriptFlags::STANDARD);

        let text = config.to_json().unwrap();
        assert_eq!(TemplateConfig::from_json(&text).unwrap(), config);
        assert!(TemplateConfig::from_json("{not json").is_err());
    }
}
