//! Script chunks: parsing, encoding and the textual line format
//!
//! A chunk is an opcode, a data push, or one of the two placeholders a
//! template script may carry before it is resolved.

use crate::error::{Result, TemplateError};
use crate::opcodes::*;
use crate::primitive::TypeTag;
use crate::sighash::SigHash;
use crate::types::ByteString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unresolved signature: which key signs, and with which sighash mode
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignaturePlaceholder {
    pub key_id: String,
    pub mode: SigHash,
    pub anyone_can_pay: bool,
}

impl SignaturePlaceholder {
    pub fn sighash_type(&self) -> u8 {
        self.mode.sighash_type(self.anyone_can_pay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScriptChunk {
    Op(u8),
    Push(Vec<u8>),
    Variable { name: String, ty: TypeTag },
    Signature(SignaturePlaceholder),
}

impl ScriptChunk {
    /// Data push; empty data is `OP_0`
    pub fn data(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            ScriptChunk::Op(OP_0)
        } else {
            ScriptChunk::Push(bytes)
        }
    }

    /// Numeric push; -1..=16 use the small number opcodes
    pub fn number(n: i64) -> Self {
        match small_number_opcode(n) {
            Some(op) => ScriptChunk::Op(op),
            None => ScriptChunk::Push(encode_num(n)),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ScriptChunk::Variable { .. } | ScriptChunk::Signature(_))
    }

    /// Append the binary encoding; placeholders cannot be encoded.
    pub fn encode_into(&self, out: &mut ByteString) -> Result<()> {
        match self {
            ScriptChunk::Op(op) => out.push(*op),
            ScriptChunk::Push(data) => write_push(out, data),
            ScriptChunk::Variable { name, .. } => {
                return Err(TemplateError::IllegalState(format!(
                    "variable '{}' is still free",
                    name
                )))
            }
            ScriptChunk::Signature(sig) => {
                return Err(TemplateError::IllegalState(format!(
                    "signature for key '{}' is not set",
                    sig.key_id
                )))
            }
        }
        Ok(())
    }

    pub fn to_token(&self) -> String {
        match self {
            ScriptChunk::Op(op) => opcode_display(*op),
            ScriptChunk::Push(data) => format!("PUSHDATA[{}]", hex::encode(data)),
            ScriptChunk::Variable { name, ty } => format!("[var,{},{}]", name, ty.qualified_name()),
            ScriptChunk::Signature(sig) => format!(
                "[sig,{},{}]",
                sig.key_id,
                sig.mode.modifier_code(sig.anyone_can_pay)
            ),
        }
    }

    pub fn parse_token(token: &str) -> Result<Self> {
        if let Some(body) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            let parts: Vec<&str> = body.split(',').collect();
            return match parts.as_slice() {
                ["var", name, ty] => {
                    validate_name(name)?;
                    Ok(ScriptChunk::Variable {
                        name: name.to_string(),
                        ty: ty.parse()?,
                    })
                }
                ["sig", key_id, code] => {
                    validate_name(key_id)?;
                    let (mode, anyone_can_pay) = SigHash::from_modifier_code(code)?;
                    Ok(ScriptChunk::Signature(SignaturePlaceholder {
                        key_id: key_id.to_string(),
                        mode,
                        anyone_can_pay,
                    }))
                }
                _ => Err(TemplateError::Parse(format!("invalid placeholder: {}", token))),
            };
        }

        if let Some(hex_data) = token
            .strip_prefix("PUSHDATA[")
            .and_then(|t| t.strip_suffix(']'))
        {
            if hex_data.is_empty() || hex_data.chars().any(|c| c.is_ascii_uppercase()) {
                return Err(TemplateError::Parse(format!("invalid data push: {}", token)));
            }
            return Ok(ScriptChunk::Push(hex::decode(hex_data)?));
        }

        if let Ok(n) = token.parse::<i64>() {
            if n.to_string() != token {
                return Err(TemplateError::Parse(format!("non-canonical number: {}", token)));
            }
            return small_number_opcode(n)
                .map(ScriptChunk::Op)
                .ok_or_else(|| TemplateError::Parse(format!("number out of range: {}", token)));
        }

        match opcode_from_name(token) {
            Some(op) if op > OP_PUSHDATA4 => Ok(ScriptChunk::Op(op)),
            _ => Err(TemplateError::Parse(format!("unknown token: {}", token))),
        }
    }
}

impl fmt::Display for ScriptChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

/// Names and key ids must survive the line format unchanged.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | '[' | ']'))
    {
        return Err(TemplateError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// One parsed instruction of a binary script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub opcode: u8,
    pub data: Option<&'a [u8]>,
    /// Offset right after this instruction
    pub end: usize,
}

pub fn parse_script(script: &[u8]) -> Result<Vec<Instruction<'_>>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < script.len() {
        let opcode = script[pos];
        pos += 1;
        let len = match opcode {
            0x01..=0x4b => Some(opcode as usize),
            OP_PUSHDATA1 => Some(read_len(script, pos, 1)?),
            OP_PUSHDATA2 => Some(read_len(script, pos, 2)?),
            OP_PUSHDATA4 => Some(read_len(script, pos, 4)?),
            _ => None,
        };
        let data = match len {
            Some(len) => {
                pos += match opcode {
                    OP_PUSHDATA1 => 1,
                    OP_PUSHDATA2 => 2,
                    OP_PUSHDATA4 => 4,
                    _ => 0,
                };
                if script.len() - pos < len {
                    return Err(TemplateError::Parse(format!(
                        "push of {} bytes at offset {} runs past end of script",
                        len, pos
                    )));
                }
                let data = &script[pos..pos + len];
                pos += len;
                Some(data)
            }
            None if opcode == OP_0 => Some(&script[pos..pos]),
            None => None,
        };
        out.push(Instruction {
            opcode,
            data,
            end: pos,
        });
    }
    Ok(out)
}

fn read_len(script: &[u8], pos: usize, width: usize) -> Result<usize> {
    if script.len() < pos + width {
        return Err(TemplateError::Parse(format!(
            "truncated push length at offset {}",
            pos
        )));
    }
    let mut buf = [0u8; 4];
    buf[..width].copy_from_slice(&script[pos..pos + width]);
    Ok(u32::from_le_bytes(buf) as usize)
}

/// Decode a binary script into concrete chunks
pub fn decode_script(script: &[u8]) -> Result<Vec<ScriptChunk>> {
    Ok(parse_script(script)?
        .into_iter()
        .map(|ins| match ins.data {
            Some(data) if ins.opcode != OP_0 => ScriptChunk::Push(data.to_vec()),
            _ => ScriptChunk::Op(ins.opcode),
        })
        .collect())
}

pub fn encode_chunks(chunks: &[ScriptChunk]) -> Result<ByteString> {
    let mut out = Vec::new();
    for chunk in chunks {
        chunk.encode_into(&mut out)?;
    }
    Ok(out)
}

/// Append a push of `data` with the smallest prefix
pub fn write_push(out: &mut ByteString, data: &[u8]) {
    let len = data.len();
    if len == 0 {
        out.push(OP_0);
        return;
    }
    if len <= 0x4b {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(OP_PUSHDATA1);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(OP_PUSHDATA2);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        out.push(OP_PUSHDATA4);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
}

/// Script number encoding: little endian, sign bit in the last byte
pub fn encode_num(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let negative = n < 0;
    let mut abs = n.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    let last = out.len() - 1;
    if out[last] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        out[last] |= 0x80;
    }
    out
}

pub fn decode_num(bytes: &[u8], max_len: usize, require_minimal: bool) -> Result<i64> {
    if bytes.len() > max_len {
        return Err(TemplateError::ScriptExecution(format!(
            "script number overflow: {} bytes",
            bytes.len()
        )));
    }
    if bytes.is_empty() {
        return Ok(0);
    }
    if require_minimal {
        let last = bytes[bytes.len() - 1];
        if last & 0x7f == 0 && (bytes.len() == 1 || bytes[bytes.len() - 2] & 0x80 == 0) {
            return Err(TemplateError::ScriptExecution(
                "non-minimally encoded script number".to_string(),
            ));
        }
    }
    let mut result: i64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        result |= (*byte as i64) << (8 * i);
    }
    let sign_bit = 0x80i64 << (8 * (bytes.len() - 1));
    if result & sign_bit != 0 {
        Ok(-(result & !sign_bit))
    } else {
        Ok(result)
    }
}

/// Copy of `script` without any occurrence of `opcode`
pub fn strip_opcode(script: &[u8], opcode: u8) -> ByteString {
    let instructions = match parse_script(script) {
        Ok(ins) => ins,
        Err(_) => return script.to_vec(),
    };
    let mut out = Vec::with_capacity(script.len());
    let mut start = 0;
    for ins in instructions {
        if ins.opcode != opcode || ins.data.is_some() {
            out.extend_from_slice(&script[start..ins.end]);
        }
        start = ins.end;
    }
    out
}

/// Copy of `script` without pushes of exactly `data`
pub fn find_and_delete(script: &[u8], data: &[u8]) -> ByteString {
    if data.is_empty() {
        return script.to_vec();
    }
    let instructions = match parse_script(script) {
        Ok(ins) => ins,
        Err(_) => return script.to_vec(),
    };
    let mut out = Vec::with_capacity(script.len());
    let mut start = 0;
    for ins in instructions {
        if ins.data != Some(data) {
            out.extend_from_slice(&script[start..ins.end]);
        }
        start = ins.end;
    }
    out
}

/// `HASH160 <20 bytes> EQUAL`
pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// `DUP HASH160 <20 bytes> EQUALVERIFY CHECKSIG`
pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

pub fn is_op_return(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN)
}

/// Only pushes (including small numbers) and parseable
pub fn is_push_only(script: &[u8]) -> bool {
    match parse_script(script) {
        Ok(ins) => ins.iter().all(|i| i.opcode <= OP_16),
        Err(_) => false,
    }
}

/// Data of the last push, used to recover a P2SH redeem script
pub fn last_push(script: &[u8]) -> Option<Vec<u8>> {
    let instructions = parse_script(script).ok()?;
    let last = instructions.last()?;
    last.data.map(|d| d.to_vec())
}

/// Line format text of a binary script
pub fn disassemble(script: &[u8]) -> String {
    match decode_script(script) {
        Ok(chunks) => chunks
            .iter()
            .map(ScriptChunk::to_token)
            .collect::<Vec<_>>()
            .join(" "),
        Err(_) => format!("<unparseable script {}>", hex::encode(script)),
    }
}
