//! # tx-template
//!
//! Templated Bitcoin transactions: build transactions whose scripts still
//! contain free variables and signature placeholders, bind them over time,
//! then materialize and check the result.
//!
//! ## Architecture
//!
//! The crate is layered, leaves first:
//! - Script primitives (opcodes, chunks, script numbers, wire encoding)
//! - `Env` of typed free variables
//! - `ScriptBuilder` with variable and signature placeholders
//! - `OutputScript` / `InputScript` redeem patterns
//! - `TransactionBuilder` with hooks, readiness and materialization
//! - Spend validation on top of a legacy script interpreter
//!
//! ## Design Principles
//!
//! 1. **Persistent scripts**: binding a script returns a new script
//! 2. **Single-owner transactions**: a `TransactionBuilder` is mutated in place
//!    until it is shared as a parent, after which it is read-only
//! 3. **Opaque keys**: signature placeholders carry key ids, never key material
//! 4. **Exact Version Pinning**: cryptographic dependencies pinned to exact versions
//!
//! ## Usage
//!
//! ```rust
//! use tx_template::*;
//!
//! let mut tx = TransactionBuilder::new(NetworkType::Testnet);
//! tx.add_variable("amount", TypeTag::Number).unwrap();
//! let script = ScriptBuilder::new()
//!     .add_variable("amount", TypeTag::Number)
//!     .unwrap()
//!     .op(OP_EQUAL);
//! tx.add_output(OutputScript::p2sh(script), 1000).unwrap();
//! assert!(!tx.is_ready());
//!
//! tx.bind_variable("amount", Primitive::Number(7)).unwrap();
//! assert!(tx.is_ready());
//! ```

pub mod chunk;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod env;
pub mod error;
pub mod hooks;
pub mod input_script;
pub mod keys;
pub mod opcodes;
pub mod output_script;
pub mod primitive;
pub mod script;
pub mod script_builder;
pub mod serialization;
pub mod sighash;
pub mod transaction;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use chunk::{ScriptChunk, SignaturePlaceholder};
pub use config::{NetworkType, ScriptFlags, SignOptions, TemplateConfig};
pub use constants::*;
pub use env::{Env, Typed};
pub use error::{Result, TemplateError};
pub use hooks::{BindingHook, HookRegistry};
pub use input_script::InputScript;
pub use keys::{Address, AddressKind, KeyStore, MemoryKeyStore, PrivateKey, PublicKey, Signature};
pub use opcodes::*;
pub use output_script::OutputScript;
pub use primitive::{Primitive, TypeTag};
pub use script_builder::ScriptBuilder;
pub use sighash::SigHash;
pub use transaction::{
    materialize_cached, Input, MaterializeCache, Output, ParentRef, TransactionBuilder,
    TransactionTemplate,
};
pub use types::*;
pub use validation::{InputValidationError, OutputLookup, ValidationResult};

/// Entry point bundling one [`TemplateConfig`]
///
/// # Examples
///
/// ```
/// use tx_template::*;
///
/// let templates = TxTemplates::new(NetworkType::Regtest);
/// let tx = templates.transaction();
/// assert_eq!(tx.config().network, NetworkType::Regtest);
/// assert!(tx.is_coinbase());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TxTemplates {
    config: TemplateConfig,
}

impl TxTemplates {
    pub fn new(network: NetworkType) -> Self {
        Self::with_config(TemplateConfig::for_network(network))
    }

    pub fn with_config(config: TemplateConfig) -> Self {
        TxTemplates { config }
    }

    /// Load the configuration from JSON
    ///
    /// # Examples
    ///
    /// ```
    /// use tx_template::*;
    ///
    /// let templates = TxTemplates::from_json(r#"{"network": "testnet"}"#).unwrap();
    /// assert_eq!(templates.config().network, NetworkType::Testnet);
    /// assert_eq!(templates.config().tx_version, TX_VERSION);
    /// ```
    pub fn from_json(text: &str) -> Result<Self> {
        TemplateConfig::from_json(text).map(Self::with_config)
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    /// Empty transaction template using this configuration
    pub fn transaction(&self) -> TransactionBuilder {
        TransactionBuilder::with_config(self.config)
    }

    /// Fresh random key for the configured network
    pub fn fresh_key(&self) -> PrivateKey {
        PrivateKey::fresh(self.config.network)
    }

    /// Decode a base58 address of the configured network
    pub fn address(&self, text: &str) -> Result<Address> {
        Address::from_base58(text, self.config.network)
    }

    /// Check that every input of `builder` redeems the output it spends
    ///
    /// # Examples
    ///
    /// ```
    /// use tx_template::*;
    ///
    /// let templates = TxTemplates::new(NetworkType::Testnet);
    /// let builder = templates.transaction();
    /// let result = templates.check_spends(&builder, &MemoryKeyStore::new()).unwrap();
    /// assert!(result.is_valid());
    /// ```
    pub fn check_spends(
        &self,
        builder: &TransactionBuilder,
        key_store: &dyn KeyStore,
    ) -> Result<ValidationResult> {
        validation::check_spends(builder, key_store)
    }

    /// Interpreter check of a concrete transaction with the configured flags
    pub fn verify_spends<L>(&self, tx: &Transaction, lookup: &L) -> ValidationResult
    where
        L: OutputLookup + ?Sized,
    {
        validation::verify_spends(tx, lookup, self.config.verify_flags)
    }
}
