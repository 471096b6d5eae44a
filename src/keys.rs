//! Keys, addresses, signatures and the key store lookup contract

use crate::config::NetworkType;
use crate::crypto::hash160;
use crate::error::{Result, TemplateError};
use crate::types::Hash;
use secp256k1::{ecdsa, Message, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Secret key tagged with the network it was issued for
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    secret: SecretKey,
    network: NetworkType,
    compressed: bool,
}

impl PrivateKey {
    /// Fresh random key
    pub fn fresh(network: NetworkType) -> Self {
        let secret = SecretKey::new(&mut secp256k1::rand::thread_rng());
        PrivateKey {
            secret,
            network,
            compressed: true,
        }
    }

    pub fn from_bytes(bytes: &[u8], network: NetworkType) -> Result<Self> {
        let secret = SecretKey::from_slice(bytes)?;
        Ok(PrivateKey {
            secret,
            network,
            compressed: true,
        })
    }

    pub fn from_wif(wif: &str) -> Result<Self> {
        let payload = bs58::decode(wif.trim()).with_check(None).into_vec()?;
        let (compressed, key_bytes) = match payload.len() {
            34 if payload[33] == 0x01 => (true, &payload[1..33]),
            33 => (false, &payload[1..33]),
            n => {
                return Err(TemplateError::InvalidKey(format!(
                    "WIF payload has invalid length {}",
                    n
                )))
            }
        };
        let network = NetworkType::from_wif_version(payload[0]).ok_or_else(|| {
            TemplateError::InvalidKey(format!("unknown WIF version byte {:#04x}", payload[0]))
        })?;
        let secret = SecretKey::from_slice(key_bytes)?;
        Ok(PrivateKey {
            secret,
            network,
            compressed,
        })
    }

    pub fn to_wif(&self) -> String {
        let mut payload = Vec::with_capacity(34);
        payload.push(self.network.wif_version());
        payload.extend_from_slice(&self.secret.secret_bytes());
        if self.compressed {
            payload.push(0x01);
        }
        bs58::encode(payload).with_check().into_string()
    }

    pub fn network(&self) -> NetworkType {
        self.network
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::signing_only();
        PublicKey {
            key: secp256k1::PublicKey::from_secret_key(&secp, &self.secret),
            compressed: self.compressed,
        }
    }

    /// Identifier of this key in a [`KeyStore`]
    pub fn key_id(&self) -> String {
        self.public_key().key_id()
    }

    pub fn to_address(&self) -> Address {
        self.public_key().to_address(self.network)
    }

    /// Sign a 32-byte digest, returning the DER encoding.
    pub fn sign_hash(&self, hash: &Hash, force_low_s: bool) -> Result<Vec<u8>> {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest_slice(hash)?;
        let mut signature = secp.sign_ecdsa(&message, &self.secret);
        if force_low_s {
            signature.normalize_s();
        }
        Ok(signature.serialize_der().to_vec())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key_id", &self.key_id())
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// secp256k1 public key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    key: secp256k1::PublicKey,
    compressed: bool,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key = secp256k1::PublicKey::from_slice(bytes)?;
        Ok(PublicKey {
            key,
            compressed: bytes.len() == 33,
        })
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(text)?)
    }

    /// Encoding pushed into scripts (33 bytes when compressed, 65 otherwise)
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.compressed {
            self.key.serialize().to_vec()
        } else {
            self.key.serialize_uncompressed().to_vec()
        }
    }

    pub fn hash160(&self) -> [u8; 20] {
        hash160(&self.to_bytes())
    }

    /// `hex(hash160(pubkey))`, stable across processes
    pub fn key_id(&self) -> String {
        hex::encode(self.hash160())
    }

    pub fn to_address(&self, network: NetworkType) -> Address {
        Address::p2pkh(self.hash160(), network)
    }

    /// Check a DER signature over a 32-byte digest; high-S signatures are normalized first.
    pub fn verify_hash(&self, hash: &Hash, der: &[u8]) -> bool {
        let secp = Secp256k1::verification_only();
        let message = match Message::from_digest_slice(hash) {
            Ok(m) => m,
            Err(_) => return false,
        };
        let mut signature = match ecdsa::Signature::from_der(der) {
            Ok(s) => s,
            Err(_) => return false,
        };
        signature.normalize_s();
        secp.verify_ecdsa(&message, &signature, &self.key).is_ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    P2PKH,
    P2SH,
}

/// Base58Check address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub kind: AddressKind,
    pub hash: [u8; 20],
    pub network: NetworkType,
}

impl Address {
    pub fn p2pkh(hash: [u8; 20], network: NetworkType) -> Self {
        Address {
            kind: AddressKind::P2PKH,
            hash,
            network,
        }
    }

    pub fn p2sh(hash: [u8; 20], network: NetworkType) -> Self {
        Address {
            kind: AddressKind::P2SH,
            hash,
            network,
        }
    }

    /// Parse an address expected to belong to `network`.
    pub fn from_base58(text: &str, network: NetworkType) -> Result<Self> {
        let payload = bs58::decode(text.trim())
            .with_check(None)
            .into_vec()
            .map_err(|e| TemplateError::InvalidAddress(e.to_string()))?;
        if payload.len() != 21 {
            return Err(TemplateError::InvalidAddress(format!(
                "payload has invalid length {}",
                payload.len()
            )));
        }
        let kind = if payload[0] == network.p2pkh_version() {
            AddressKind::P2PKH
        } else if payload[0] == network.p2sh_version() {
            AddressKind::P2SH
        } else {
            return Err(TemplateError::InvalidAddress(format!(
                "version byte {:#04x} does not belong to {}",
                payload[0], network
            )));
        };
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        Ok(Address {
            kind,
            hash,
            network,
        })
    }

    pub fn to_base58(&self) -> String {
        let version = match self.kind {
            AddressKind::P2PKH => self.network.p2pkh_version(),
            AddressKind::P2SH => self.network.p2sh_version(),
        };
        let mut payload = Vec::with_capacity(21);
        payload.push(version);
        payload.extend_from_slice(&self.hash);
        bs58::encode(payload).with_check().into_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

/// DER signature followed by its sighash byte, with the signer's key when known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub bytes: Vec<u8>,
    pub pubkey: Option<PublicKey>,
}

impl Signature {
    pub fn new(bytes: Vec<u8>, pubkey: Option<PublicKey>) -> Self {
        Signature { bytes, pubkey }
    }

    pub fn sighash_type(&self) -> Option<u8> {
        self.bytes.last().copied()
    }
}

/// Lookup of private keys by their opaque id
pub trait KeyStore {
    fn resolve(&self, key_id: &str) -> Result<PrivateKey>;

    fn contains(&self, key_id: &str) -> bool {
        self.resolve(key_id).is_ok()
    }
}

/// In-memory [`KeyStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    keys: BTreeMap<String, PrivateKey>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a key and return its id
    pub fn add_key(&mut self, key: PrivateKey) -> String {
        let id = key.key_id();
        self.keys.insert(id.clone(), key);
        id
    }

    pub fn remove_key(&mut self, key_id: &str) -> Option<PrivateKey> {
        self.keys.remove(key_id)
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyStore for MemoryKeyStore {
    fn resolve(&self, key_id: &str) -> Result<PrivateKey> {
        self.keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| TemplateError::UnknownKey(key_id.to_string()))
    }

    fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one() -> PrivateKey {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        PrivateKey::from_bytes(&bytes, NetworkType::Mainnet).unwrap()
    }

    #[test]
    fn test_wif_round_trip() {
        let key = one();
        assert_eq!(
            key.to_wif(),
            "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn"
        );
        let parsed =
            PrivateKey::from_wif("cMahea7zqjxrtgAbB7LSGbcQUr1uX1ojuat9jZodMN87JcbXMTcA").unwrap();
        assert_eq!(parsed.network(), NetworkType::Testnet);
        assert_eq!(parsed.secret_bytes(), key.secret_bytes());
    }

    #[test]
    fn test_uncompressed_wif() {
        let key = PrivateKey::from_wif("5HpHagT65TZzG1PH3CSu63k8DbpvD8s5ip4nEB3kEsreAnchuDf").unwrap();
        assert_eq!(key.public_key().to_bytes().len(), 65);
        assert_eq!(key.to_wif(), "5HpHagT65TZzG1PH3CSu63k8DbpvD8s5ip4nEB3kEsreAnchuDf");
    }

    #[test]
    fn test_invalid_wif() {
        assert!(PrivateKey::from_wif("KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWm").is_err());
        assert!(PrivateKey::from_wif("not a key").is_err());
    }

    #[test]
    fn test_key_id_and_address() {
        let key = one();
        assert_eq!(key.key_id(), "751e76e8199196d454941c45d1b3a323f1433bd6");
        assert_eq!(key.to_address().to_string(), "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
        assert_eq!(
            key.public_key().to_address(NetworkType::Testnet).to_string(),
            "mrCDrCybB6J1vRfbwM5hemdJz73FwDBC8r"
        );
    }

    #[test]
    fn test_address_parsing() {
        let addr =
            Address::from_base58("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH", NetworkType::Mainnet)
                .unwrap();
        assert_eq!(addr.kind, AddressKind::P2PKH);
        assert_eq!(hex::encode(addr.hash), "751e76e8199196d454941c45d1b3a323f1433bd6");
        assert!(
            Address::from_base58("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH", NetworkType::Testnet)
                .is_err()
        );
        let p2sh = Address::p2sh([7u8; 20], NetworkType::Testnet);
        assert_eq!(
            Address::from_base58(&p2sh.to_base58(), NetworkType::Testnet).unwrap(),
            p2sh
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let key = PrivateKey::fresh(NetworkType::Testnet);
        let hash = [42u8; 32];
        let der = key.sign_hash(&hash, true).unwrap();
        assert!(key.public_key().verify_hash(&hash, &der));
        assert!(!key.public_key().verify_hash(&[43u8; 32], &der));
        assert!(!one().public_key().verify_hash(&hash, &der));
    }

    #[test]
    fn test_memory_key_store() {
        let mut store = MemoryKeyStore::new();
        let id = store.add_key(one());
        assert!(store.contains(&id));
        assert_eq!(store.resolve(&id).unwrap(), one());
        assert!(matches!(
            store.resolve("deadbeef"),
            Err(TemplateError::UnknownKey(_))
        ));
        assert_eq!(store.remove_key(&id), Some(one()));
        assert!(store.is_empty());
    }

    #[test]
    fn test_debug_does_not_print_secret() {
        let text = format!("{:?}", one());
        assert!(text.contains("751e76e8"));
        assert!(!text.contains("0000000000000001"));
    }
}
