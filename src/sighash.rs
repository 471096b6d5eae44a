//! Legacy signature hash computation
//!
//! A signature commits to a modified copy of the spending transaction: the
//! script of the signed input is replaced by the script code, every other
//! script is emptied, and the sighash mode decides which other inputs and
//! outputs stay in the copy.

use crate::chunk::strip_opcode;
use crate::error::{Result, TemplateError};
use crate::opcodes::OP_CODESEPARATOR;
use crate::serialization::serialize_transaction;
use crate::types::*;
use bitcoin_hashes::{sha256d, Hash as BitcoinHash};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SIGHASH_ALL: u8 = 0x01;
pub const SIGHASH_NONE: u8 = 0x02;
pub const SIGHASH_SINGLE: u8 = 0x03;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

/// Which outputs a signature commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigHash {
    All,
    None,
    Single,
}

impl SigHash {
    pub fn base_flag(&self) -> u8 {
        match self {
            SigHash::All => SIGHASH_ALL,
            SigHash::None => SIGHASH_NONE,
            SigHash::Single => SIGHASH_SINGLE,
        }
    }

    /// Sighash byte appended to an encoded signature
    pub fn sighash_type(&self, anyone_can_pay: bool) -> u8 {
        if anyone_can_pay {
            self.base_flag() | SIGHASH_ANYONECANPAY
        } else {
            self.base_flag()
        }
    }

    /// Inverse of [`SigHash::sighash_type`]; `None` for undefined base modes.
    pub fn from_sighash_type(sighash_type: u8) -> Option<(SigHash, bool)> {
        let anyone_can_pay = sighash_type & SIGHASH_ANYONECANPAY != 0;
        let mode = match sighash_type & !SIGHASH_ANYONECANPAY {
            SIGHASH_ALL => SigHash::All,
            SIGHASH_NONE => SigHash::None,
            SIGHASH_SINGLE => SigHash::Single,
            _ => return None,
        };
        Some((mode, anyone_can_pay))
    }

    /// Four character code used by the script line format.
    ///
    /// `A`/`S` first: all inputs or only the signed one; then `I`, the output
    /// mode (`A`, `N` or `S`) and `O`.
    pub fn modifier_code(&self, anyone_can_pay: bool) -> &'static str {
        match (anyone_can_pay, self) {
            (false, SigHash::All) => "AIAO",
            (false, SigHash::None) => "AINO",
            (false, SigHash::Single) => "AISO",
            (true, SigHash::All) => "SIAO",
            (true, SigHash::None) => "SINO",
            (true, SigHash::Single) => "SISO",
        }
    }

    pub fn from_modifier_code(code: &str) -> Result<(SigHash, bool)> {
        match code {
            "AIAO" => Ok((SigHash::All, false)),
            "AINO" => Ok((SigHash::None, false)),
            "AISO" => Ok((SigHash::Single, false)),
            "SIAO" => Ok((SigHash::All, true)),
            "SINO" => Ok((SigHash::None, true)),
            "SISO" => Ok((SigHash::Single, true)),
            other => Err(TemplateError::Parse(format!(
                "invalid signature modifier: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SigHash::All => "ALL",
            SigHash::None => "NONE",
            SigHash::Single => "SINGLE",
        };
        f.write_str(name)
    }
}

/// Legacy signature hash of `tx` for input `input_index`.
///
/// SIGHASH_SINGLE without a matching output signs the constant 1, as the
/// reference client does.
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: u8,
) -> Result<Hash> {
    if input_index >= tx.inputs.len() {
        return Err(TemplateError::IndexOutOfRange {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let base = sighash_type & 0x1f;
    if base == SIGHASH_SINGLE && input_index >= tx.outputs.len() {
        let mut one = [0u8; 32];
        one[0] = 1;
        return Ok(one);
    }

    let script_code = strip_opcode(script_code, OP_CODESEPARATOR);
    let anyone_can_pay = sighash_type & SIGHASH_ANYONECANPAY != 0;

    let mut inputs = Vec::with_capacity(tx.inputs.len());
    for (j, input) in tx.inputs.iter().enumerate() {
        if anyone_can_pay && j != input_index {
            continue;
        }
        let mut copy = input.clone();
        if j == input_index {
            copy.script_sig = script_code.clone();
        } else {
            copy.script_sig = Vec::new();
            if base == SIGHASH_NONE || base == SIGHASH_SINGLE {
                copy.sequence = 0;
            }
        }
        inputs.push(copy);
    }

    let outputs = match base {
        SIGHASH_NONE => Vec::new(),
        SIGHASH_SINGLE => {
            let mut outputs: Vec<TransactionOutput> = (0..input_index)
                .map(|_| TransactionOutput {
                    value: u64::MAX,
                    script_pubkey: Vec::new(),
                })
                .collect();
            outputs.push(tx.outputs[input_index].clone());
            outputs
        }
        _ => tx.outputs.clone(),
    };

    let copy = Transaction {
        version: tx.version,
        inputs,
        outputs,
        lock_time: tx.lock_time,
    };

    let mut preimage = serialize_transaction(&copy);
    preimage.extend_from_slice(&(sighash_type as u32).to_le_bytes());
    Ok(sha256d::Hash::hash(&preimage).into_inner())
}
