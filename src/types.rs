//! Core transaction types produced by materialization

use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// OutPoint: 𝒪 = ℍ × ℕ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    /// The outpoint carried by a coinbase input.
    pub fn null() -> Self {
        OutPoint {
            hash: [0u8; 32],
            index: crate::constants::COINBASE_INDEX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash == [0u8; 32] && self.index == crate::constants::COINBASE_INDEX
    }
}

/// Transaction Input: ℐ = 𝒪 × 𝕊 × ℕ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
}

/// Transaction Output: 𝒯 = ℕ × 𝕊
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: u64,
    pub script_pubkey: ByteString,
}

/// Transaction: 𝒯𝒳 = ℕ × ℐ* × 𝒯* × ℕ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Coinbase: exactly one input spending the null outpoint
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Transaction id as raw (internal byte order) hash
    pub fn txid(&self) -> Hash {
        crate::serialization::txid(self)
    }

    /// Transaction id in the conventional reversed hex notation
    pub fn txid_hex(&self) -> String {
        let mut id = self.txid();
        id.reverse();
        hex::encode(id)
    }

    pub fn to_bytes(&self) -> ByteString {
        crate::serialization::serialize_transaction(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::error::Result<Self> {
        crate::serialization::deserialize_transaction(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(text: &str) -> crate::error::Result<Self> {
        let bytes = hex::decode(text.trim())?;
        Self::from_bytes(&bytes)
    }
}
