//! Output scripts: the redeem patterns a transaction output can lock funds with

use crate::chunk::{disassemble, write_push};
use crate::constants::MAX_OP_RETURN_DATA;
use crate::crypto::hash160;
use crate::error::{Result, TemplateError};
use crate::keys::{Address, AddressKind, PublicKey};
use crate::opcodes::*;
use crate::primitive::{Primitive, TypeTag};
use crate::script_builder::ScriptBuilder;
use crate::types::ByteString;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputScript {
    /// Script used verbatim as the output script
    Generic(ScriptBuilder),
    /// Pay to script hash: the output commits to `hash160(redeem)`
    P2SH(ScriptBuilder),
    /// `DUP HASH160 <pubkey_hash> EQUALVERIFY CHECKSIG`
    P2PKH { pubkey_hash: [u8; 20] },
    /// Unspendable null-data output
    OpReturn { data: Vec<u8> },
}

impl OutputScript {
    pub fn generic(script: ScriptBuilder) -> Self {
        OutputScript::Generic(script)
    }

    pub fn p2sh(redeem: ScriptBuilder) -> Self {
        OutputScript::P2SH(redeem)
    }

    pub fn p2pkh(pubkey_hash: [u8; 20]) -> Self {
        OutputScript::P2PKH { pubkey_hash }
    }

    pub fn p2pkh_for_key(pubkey: &PublicKey) -> Self {
        OutputScript::p2pkh(pubkey.hash160())
    }

    pub fn p2pkh_for_address(address: &Address) -> Result<Self> {
        match address.kind {
            AddressKind::P2PKH => Ok(OutputScript::p2pkh(address.hash)),
            AddressKind::P2SH => Err(TemplateError::InvalidAddress(format!(
                "{} is a script hash address",
                address
            ))),
        }
    }

    pub fn op_return(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_OP_RETURN_DATA {
            return Err(TemplateError::IllegalState(format!(
                "OP_RETURN data of {} bytes exceeds {} bytes",
                data.len(),
                MAX_OP_RETURN_DATA
            )));
        }
        Ok(OutputScript::OpReturn {
            data: data.to_vec(),
        })
    }

    /// Classify a raw output script. P2SH outputs can not reveal their
    /// redeem script and stay generic.
    pub fn from_script_pubkey(script: &[u8]) -> Result<Self> {
        if crate::chunk::is_p2pkh(script) {
            let mut pubkey_hash = [0u8; 20];
            pubkey_hash.copy_from_slice(&script[3..23]);
            return Ok(OutputScript::p2pkh(pubkey_hash));
        }
        if let [OP_RETURN, rest @ ..] = script {
            if let Ok(chunks) = crate::chunk::decode_script(rest) {
                if let [crate::chunk::ScriptChunk::Push(data)] = chunks.as_slice() {
                    if data.len() <= MAX_OP_RETURN_DATA {
                        return Ok(OutputScript::OpReturn { data: data.clone() });
                    }
                }
            }
        }
        Ok(OutputScript::Generic(ScriptBuilder::from_script(script)?))
    }

    pub fn is_p2sh(&self) -> bool {
        matches!(self, OutputScript::P2SH(_))
    }

    pub fn is_p2pkh(&self) -> bool {
        matches!(self, OutputScript::P2PKH { .. })
    }

    pub fn is_op_return(&self) -> bool {
        matches!(self, OutputScript::OpReturn { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutputScript::Generic(_) => "STANDARD",
            OutputScript::P2SH(_) => "P2SH",
            OutputScript::P2PKH { .. } => "P2PKH",
            OutputScript::OpReturn { .. } => "OP_RETURN",
        }
    }

    /// Template script, for the variants that have one
    pub fn builder(&self) -> Option<&ScriptBuilder> {
        match self {
            OutputScript::Generic(sb) | OutputScript::P2SH(sb) => Some(sb),
            _ => None,
        }
    }

    fn map_builder(&self, f: impl FnOnce(&ScriptBuilder) -> Result<ScriptBuilder>) -> Result<Self> {
        match self {
            OutputScript::Generic(sb) => Ok(OutputScript::Generic(f(sb)?)),
            OutputScript::P2SH(sb) => Ok(OutputScript::P2SH(f(sb)?)),
            other => Ok(other.clone()),
        }
    }

    pub fn bind_variable(&self, name: &str, value: Primitive) -> Result<Self> {
        match self.builder() {
            Some(_) => self.map_builder(|sb| sb.bind_variable(name, value)),
            None => Err(TemplateError::UnknownVariable(name.to_string())),
        }
    }

    pub fn bind_all(&self, bindings: &BTreeMap<String, Primitive>) -> Result<Self> {
        self.map_builder(|sb| sb.bind_all(bindings))
    }

    pub fn optimize(&self) -> Self {
        match self {
            OutputScript::Generic(sb) => OutputScript::Generic(sb.optimize()),
            OutputScript::P2SH(sb) => OutputScript::P2SH(sb.optimize()),
            other => other.clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.builder().map_or(true, ScriptBuilder::is_ready)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.builder().map_or(false, |sb| sb.has_variable(name))
    }

    pub fn type_of(&self, name: &str) -> Result<TypeTag> {
        match self.builder() {
            Some(sb) => sb.type_of(name),
            None => Err(TemplateError::UnknownVariable(name.to_string())),
        }
    }

    pub fn free_variables(&self) -> BTreeMap<String, TypeTag> {
        self.builder().map(ScriptBuilder::free_variables).unwrap_or_default()
    }

    pub fn variables(&self) -> BTreeMap<String, TypeTag> {
        self.builder().map(ScriptBuilder::variables).unwrap_or_default()
    }

    pub fn signature_size(&self) -> usize {
        self.builder().map_or(0, ScriptBuilder::signature_size)
    }

    /// Script revealed when spending a P2SH output
    pub fn redeem_script(&self) -> Result<Option<ByteString>> {
        match self {
            OutputScript::P2SH(sb) => sb.build().map(Some),
            _ => Ok(None),
        }
    }

    /// Script placed in the transaction output
    pub fn script_pubkey(&self) -> Result<ByteString> {
        match self {
            OutputScript::Generic(sb) => sb.build(),
            OutputScript::P2SH(sb) => {
                let hash = hash160(&sb.build()?);
                let mut out = Vec::with_capacity(23);
                out.push(OP_HASH160);
                write_push(&mut out, &hash);
                out.push(OP_EQUAL);
                Ok(out)
            }
            OutputScript::P2PKH { pubkey_hash } => {
                let mut out = Vec::with_capacity(25);
                out.push(OP_DUP);
                out.push(OP_HASH160);
                write_push(&mut out, pubkey_hash);
                out.push(OP_EQUALVERIFY);
                out.push(OP_CHECKSIG);
                Ok(out)
            }
            OutputScript::OpReturn { data } => {
                let mut out = vec![OP_RETURN];
                if !data.is_empty() {
                    write_push(&mut out, data);
                }
                Ok(out)
            }
        }
    }

    pub fn build(&self) -> Result<ByteString> {
        self.script_pubkey()
    }

    /// Line format of the template script. P2SH renders its redeem script.
    pub fn serialize(&self) -> String {
        match self {
            OutputScript::Generic(sb) | OutputScript::P2SH(sb) => sb.serialize(),
            other => other
                .script_pubkey()
                .map(|bytes| disassemble(&bytes))
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for OutputScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{is_op_return, is_p2pkh, is_p2sh};

    #[test]
    fn test_p2sh_script_pubkey() {
        let redeem = ScriptBuilder::new().op(OP_1);
        let out = OutputScript::p2sh(redeem);
        let spk = out.script_pubkey().unwrap();
        assert!(is_p2sh(&spk));
        assert_eq!(&spk[2..22], &hash160(&[OP_1]));
        assert_eq!(out.redeem_script().unwrap(), Some(vec![OP_1]));
        assert!(out.is_p2sh());
        assert!(!out.is_p2pkh());
    }

    #[test]
    fn test_p2pkh_script_pubkey() {
        let hash = hex::decode("a9776115106b0599bf5f6f82c22e83429babad4d").unwrap();
        let mut pubkey_hash = [0u8; 20];
        pubkey_hash.copy_from_slice(&hash);
        let out = OutputScript::p2pkh(pubkey_hash);
        let spk = out.script_pubkey().unwrap();
        assert!(is_p2pkh(&spk));
        assert_eq!(
            out.serialize(),
            "DUP HASH160 PUSHDATA[a9776115106b0599bf5f6f82c22e83429babad4d] EQUALVERIFY CHECKSIG"
        );
        assert_eq!(OutputScript::from_script_pubkey(&spk).unwrap(), out);
        assert!(out.free_variables().is_empty());
        assert!(out.is_ready());
    }

    #[test]
    fn test_op_return() {
        let out = OutputScript::op_return(b"DATA").unwrap();
        let spk = out.script_pubkey().unwrap();
        assert!(is_op_return(&spk));
        assert_eq!(out.serialize(), "RETURN PUSHDATA[44415441]");
        assert_eq!(OutputScript::from_script_pubkey(&spk).unwrap(), out);
        assert!(OutputScript::op_return(&[0u8; 81]).is_err());
    }

    #[test]
    fn test_free_variables_in_p2sh() {
        let redeem = ScriptBuilder::new()
            .add_variable("h", TypeTag::Hash)
            .unwrap()
            .op(OP_EQUAL);
        let out = OutputScript::p2sh(redeem);
        assert!(!out.is_ready());
        assert!(out.script_pubkey().is_err());

        let bound = out
            .bind_variable("h", Primitive::Hash(vec![1; 20]))
            .unwrap();
        assert!(bound.is_ready());
        assert!(bound.is_p2sh());
        assert!(bound.script_pubkey().is_ok());
    }

    #[test]
    fn test_bind_on_fixed_variant() {
        let out = OutputScript::p2pkh([0; 20]);
        assert!(out.bind_variable("x", Primitive::Number(1)).is_err());
        assert!(out.type_of("x").is_err());
    }

    #[test]
    fn test_generic_from_raw() {
        let out = OutputScript::from_script_pubkey(&[OP_1, OP_EQUAL]).unwrap();
        assert_eq!(out.kind(), "STANDARD");
        assert_eq!(out.to_string(), "STANDARD 1 EQUAL");
    }
}
