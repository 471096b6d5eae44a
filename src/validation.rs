//! Post-construction checks: do the inputs of a materialized transaction
//! really redeem the outputs they spend?

use crate::chunk::{disassemble, is_p2sh, last_push};
use crate::config::{NetworkType, ScriptFlags};
use crate::constants::MAX_SCRIPT_ELEMENT_SIZE;
use crate::error::Result;
use crate::keys::{Address, KeyStore, PrivateKey};
use crate::output_script::OutputScript;
use crate::script::{verify_script, TransactionChecker};
use crate::transaction::{materialize_cached, MaterializeCache, TransactionBuilder, TransactionTemplate};
use crate::types::*;
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;

/// Failure of one input, with the scripts involved in line format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputValidationError {
    pub index: usize,
    pub message: String,
    pub input_script: String,
    pub output_script: String,
    /// Redeem script revealed by the input, when the spent output is P2SH
    pub redeem_script: Option<String>,
}

impl fmt::Display for InputValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input {}: {}\n  input script: {}\n  output script: {}",
            self.index, self.message, self.input_script, self.output_script
        )?;
        if let Some(redeem) = &self.redeem_script {
            write!(f, "\n  redeem script: {}", redeem)?;
        }
        Ok(())
    }
}

/// Validation outcome. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid(String),
    Invalid(String),
    InputInvalid(InputValidationError),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ValidationResult::Valid(m) | ValidationResult::Invalid(m) => m,
            ValidationResult::InputInvalid(e) => &e.message,
        }
    }

    pub fn input_error(&self) -> Option<&InputValidationError> {
        match self {
            ValidationResult::InputInvalid(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationResult::Valid(m) => write!(f, "valid: {}", m),
            ValidationResult::Invalid(m) => write!(f, "invalid: {}", m),
            ValidationResult::InputInvalid(e) => write!(f, "invalid {}", e),
        }
    }
}

/// Source of the outputs a transaction spends
pub trait OutputLookup {
    fn output(&self, outpoint: &OutPoint) -> Option<TransactionOutput>;
}

impl OutputLookup for HashMap<OutPoint, TransactionOutput> {
    fn output(&self, outpoint: &OutPoint) -> Option<TransactionOutput> {
        self.get(outpoint).cloned()
    }
}

/// Parent transactions, searched by txid
impl OutputLookup for [Transaction] {
    fn output(&self, outpoint: &OutPoint) -> Option<TransactionOutput> {
        self.iter()
            .find(|tx| tx.txid() == outpoint.hash)
            .and_then(|tx| tx.outputs.get(outpoint.index as usize).cloned())
    }
}

/// VerifySpends: 𝒯𝒳 × 𝒰 × ℱ → {valid, invalid}
///
/// For tx = (v, ins, outs, lt), valid iff tx is coinbase or
/// ∀i ∈ ins: VerifyScript(i.scriptSig, u(i.prevout).scriptPubKey, f) with
/// the signature context of input i. Stops at the first failing input.
pub fn verify_spends<L>(tx: &Transaction, lookup: &L, flags: ScriptFlags) -> ValidationResult
where
    L: OutputLookup + ?Sized,
{
    if tx.is_coinbase() {
        return ValidationResult::Valid("coinbase transaction, nothing to check".to_string());
    }

    for (index, input) in tx.inputs.iter().enumerate() {
        let spent = match lookup.output(&input.prevout) {
            Some(output) => output,
            None => {
                return ValidationResult::Invalid(format!(
                    "output {}:{} spent by input {} not found",
                    hex::encode(input.prevout.hash),
                    input.prevout.index,
                    index
                ))
            }
        };

        let checker = TransactionChecker::new(tx, index);
        if let Err(e) = verify_script(&input.script_sig, &spent.script_pubkey, flags, &checker) {
            let redeem_script = if is_p2sh(&spent.script_pubkey) {
                last_push(&input.script_sig).map(|redeem| disassemble(&redeem))
            } else {
                None
            };
            let error = InputValidationError {
                index,
                message: e.to_string(),
                input_script: disassemble(&input.script_sig),
                output_script: disassemble(&spent.script_pubkey),
                redeem_script,
            };
            warn!("{}", error);
            return ValidationResult::InputInvalid(error);
        }
    }

    debug!("verified {} inputs of {}", tx.inputs.len(), tx.txid_hex());
    ValidationResult::Valid(format!("all {} inputs redeem their outputs", tx.inputs.len()))
}

/// Materialize `builder` and check every input against its parent.
///
/// Coinbase and not-yet-ready templates have nothing to check.
pub fn check_spends(builder: &TransactionBuilder, key_store: &dyn KeyStore) -> Result<ValidationResult> {
    if builder.is_coinbase() {
        return Ok(ValidationResult::Valid(
            "coinbase transaction, nothing to check".to_string(),
        ));
    }
    if !builder.is_ready() {
        return Ok(ValidationResult::Valid(
            "transaction is not ready, nothing to check".to_string(),
        ));
    }

    let mut cache = MaterializeCache::new();
    let tx = builder.to_transaction_in(key_store, &mut cache)?;
    let mut parents = Vec::new();
    for parent in builder.parents() {
        parents.push(materialize_cached(&*parent, key_store, &mut cache)?);
    }
    Ok(verify_spends(&tx, parents.as_slice(), builder.config().verify_flags))
}

/// P2SH redeem scripts, and output scripts in general, must fit in one push.
pub fn check_output_script_size(output: &OutputScript) -> ValidationResult {
    let script = match output.redeem_script() {
        Ok(Some(redeem)) => Ok(redeem),
        Ok(None) => output.script_pubkey(),
        Err(e) => Err(e),
    };
    match script {
        Ok(bytes) if bytes.len() > MAX_SCRIPT_ELEMENT_SIZE => ValidationResult::Invalid(format!(
            "{} script is {} bytes, above the {} byte limit",
            output.kind(),
            bytes.len(),
            MAX_SCRIPT_ELEMENT_SIZE
        )),
        Ok(bytes) => ValidationResult::Valid(format!("{} script of {} bytes", output.kind(), bytes.len())),
        Err(e) => ValidationResult::Invalid(e.to_string()),
    }
}

pub fn validate_raw_transaction(hex_text: &str) -> ValidationResult {
    match Transaction::from_hex(hex_text.trim()) {
        Ok(tx) => ValidationResult::Valid(format!("transaction {}", tx.txid_hex())),
        Err(e) => ValidationResult::Invalid(e.to_string()),
    }
}

pub fn validate_private_key(wif: &str, network: NetworkType) -> ValidationResult {
    match PrivateKey::from_wif(wif) {
        Ok(key) if key.network().shares_prefixes(network) => {
            ValidationResult::Valid(format!("private key for {}", key.to_address()))
        }
        Ok(key) => ValidationResult::Invalid(format!(
            "private key belongs to {}, expected {}",
            key.network(),
            network
        )),
        Err(e) => ValidationResult::Invalid(e.to_string()),
    }
}

pub fn validate_address(text: &str, network: NetworkType) -> ValidationResult {
    match Address::from_base58(text, network) {
        Ok(address) => ValidationResult::Valid(format!("{:?} address", address.kind)),
        Err(e) => ValidationResult::Invalid(e.to_string()),
    }
}
