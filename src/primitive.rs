//! Values that flow through variable bindings and script placeholders

use crate::chunk::ScriptChunk;
use crate::error::{Result, TemplateError};
use crate::keys::{Address, PrivateKey, PublicKey, Signature};
use crate::opcodes::{OP_FALSE, OP_TRUE};
use crate::types::Transaction;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Type of a declared variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeTag {
    Number,
    String,
    Boolean,
    Hash,
    Signature,
    PrivateKey,
    PublicKey,
    Address,
    Transaction,
}

impl TypeTag {
    pub const ALL: [TypeTag; 9] = [
        TypeTag::Number,
        TypeTag::String,
        TypeTag::Boolean,
        TypeTag::Hash,
        TypeTag::Signature,
        TypeTag::PrivateKey,
        TypeTag::PublicKey,
        TypeTag::Address,
        TypeTag::Transaction,
    ];

    /// Fully qualified name used by the script line format
    pub fn qualified_name(&self) -> &'static str {
        match self {
            TypeTag::Number => "tx_template::Number",
            TypeTag::String => "tx_template::String",
            TypeTag::Boolean => "tx_template::Boolean",
            TypeTag::Hash => "tx_template::Hash",
            TypeTag::Signature => "tx_template::Signature",
            TypeTag::PrivateKey => "tx_template::PrivateKey",
            TypeTag::PublicKey => "tx_template::PublicKey",
            TypeTag::Address => "tx_template::Address",
            TypeTag::Transaction => "tx_template::Transaction",
        }
    }

    pub fn from_qualified_name(name: &str) -> Option<TypeTag> {
        TypeTag::ALL
            .iter()
            .copied()
            .find(|t| t.qualified_name() == name)
    }

    /// Whether values of this type have a script encoding
    pub fn is_script_type(&self) -> bool {
        !matches!(self, TypeTag::PrivateKey)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.qualified_name())
    }
}

impl FromStr for TypeTag {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self> {
        TypeTag::from_qualified_name(s)
            .ok_or_else(|| TemplateError::InvalidType(format!("unknown type name: {}", s)))
    }
}

/// Primitive value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primitive {
    Number(i64),
    String(String),
    Boolean(bool),
    Hash(Vec<u8>),
    Signature(Signature),
    PrivateKey(PrivateKey),
    PublicKey(PublicKey),
    Address(Address),
    /// A materialized transaction
    Transaction(Arc<Transaction>),
}

impl Primitive {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Primitive::Number(_) => TypeTag::Number,
            Primitive::String(_) => TypeTag::String,
            Primitive::Boolean(_) => TypeTag::Boolean,
            Primitive::Hash(_) => TypeTag::Hash,
            Primitive::Signature(_) => TypeTag::Signature,
            Primitive::PrivateKey(_) => TypeTag::PrivateKey,
            Primitive::PublicKey(_) => TypeTag::PublicKey,
            Primitive::Address(_) => TypeTag::Address,
            Primitive::Transaction(_) => TypeTag::Transaction,
        }
    }

    /// Chunks replacing a variable placeholder bound to this value
    pub fn to_chunks(&self) -> Result<Vec<ScriptChunk>> {
        let chunks = match self {
            Primitive::Number(n) => vec![ScriptChunk::number(*n)],
            Primitive::String(s) => vec![ScriptChunk::data(s.as_bytes().to_vec())],
            Primitive::Boolean(true) => vec![ScriptChunk::Op(OP_TRUE)],
            Primitive::Boolean(false) => vec![ScriptChunk::Op(OP_FALSE)],
            Primitive::Hash(bytes) => vec![ScriptChunk::data(bytes.clone())],
            Primitive::Signature(sig) => {
                let mut chunks = vec![ScriptChunk::data(sig.bytes.clone())];
                if let Some(pubkey) = &sig.pubkey {
                    chunks.push(ScriptChunk::data(pubkey.to_bytes()));
                }
                chunks
            }
            Primitive::PublicKey(pubkey) => vec![ScriptChunk::data(pubkey.to_bytes())],
            Primitive::Address(address) => vec![ScriptChunk::data(address.hash.to_vec())],
            Primitive::Transaction(tx) => vec![ScriptChunk::data(tx.to_bytes())],
            Primitive::PrivateKey(_) => {
                return Err(TemplateError::InvalidType(
                    "private keys cannot be encoded in a script".to_string(),
                ))
            }
        };
        Ok(chunks)
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Number(n) => write!(f, "{}", n),
            Primitive::String(s) => write!(f, "{:?}", s),
            Primitive::Boolean(b) => write!(f, "{}", b),
            Primitive::Hash(bytes) => write!(f, "hash:{}", hex::encode(bytes)),
            Primitive::Signature(sig) => write!(f, "sig:{}", hex::encode(&sig.bytes)),
            Primitive::PrivateKey(key) => write!(f, "key:{}", key.key_id()),
            Primitive::PublicKey(pubkey) => write!(f, "pubkey:{}", pubkey),
            Primitive::Address(address) => write!(f, "address:{}", address),
            Primitive::Transaction(tx) => write!(f, "tx:{}", tx.txid_hex()),
        }
    }
}

impl From<i64> for Primitive {
    fn from(n: i64) -> Self {
        Primitive::Number(n)
    }
}

impl From<bool> for Primitive {
    fn from(b: bool) -> Self {
        Primitive::Boolean(b)
    }
}

impl From<&str> for Primitive {
    fn from(s: &str) -> Self {
        Primitive::String(s.to_string())
    }
}

impl From<String> for Primitive {
    fn from(s: String) -> Self {
        Primitive::String(s)
    }
}

impl From<PublicKey> for Primitive {
    fn from(pubkey: PublicKey) -> Self {
        Primitive::PublicKey(pubkey)
    }
}

impl From<Signature> for Primitive {
    fn from(sig: Signature) -> Self {
        Primitive::Signature(sig)
    }
}

impl From<Address> for Primitive {
    fn from(address: Address) -> Self {
        Primitive::Address(address)
    }
}

impl From<Transaction> for Primitive {
    fn from(tx: Transaction) -> Self {
        Primitive::Transaction(Arc::new(tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkType;
    use crate::opcodes::OP_16;

    #[test]
    fn test_qualified_names() {
        for tag in TypeTag::ALL {
            assert_eq!(tag.qualified_name().parse::<TypeTag>().unwrap(), tag);
        }
        assert!("Number".parse::<TypeTag>().is_err());
    }

    #[test]
    fn test_number_encoding() {
        assert_eq!(
            Primitive::Number(16).to_chunks().unwrap(),
            vec![ScriptChunk::Op(OP_16)]
        );
        assert_eq!(
            Primitive::Number(1000).to_chunks().unwrap(),
            vec![ScriptChunk::Push(vec![0xe8, 0x03])]
        );
    }

    #[test]
    fn test_string_and_boolean_encoding() {
        assert_eq!(
            Primitive::from("abc").to_chunks().unwrap(),
            vec![ScriptChunk::Push(b"abc".to_vec())]
        );
        assert_eq!(
            Primitive::from("").to_chunks().unwrap(),
            vec![ScriptChunk::Op(OP_FALSE)]
        );
        assert_eq!(
            Primitive::from(true).to_chunks().unwrap(),
            vec![ScriptChunk::Op(OP_TRUE)]
        );
    }

    #[test]
    fn test_signature_with_pubkey() {
        let key = PrivateKey::fresh(NetworkType::Testnet);
        let sig = Signature::new(vec![0x30, 0x01], Some(key.public_key()));
        let chunks = Primitive::from(sig).to_chunks().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], ScriptChunk::Push(key.public_key().to_bytes()));
    }

    #[test]
    fn test_private_key_not_encodable() {
        let key = PrivateKey::fresh(NetworkType::Testnet);
        let value = Primitive::PrivateKey(key);
        assert_eq!(value.type_tag(), TypeTag::PrivateKey);
        assert!(value.to_chunks().is_err());
    }
}
