//! Script builder with free variables and signature placeholders
//!
//! Appending consumes and returns the builder. Binding and signing never
//! touch `self`: they return a new builder, so earlier snapshots stay valid.

use crate::chunk::{encode_chunks, validate_name, ScriptChunk, SignaturePlaceholder};
use crate::config::SignOptions;
use crate::env::Env;
use crate::error::{Result, TemplateError};
use crate::keys::KeyStore;
use crate::opcodes::{OP_FALSE, OP_FROMALTSTACK, OP_TOALTSTACK, OP_TRUE};
use crate::primitive::{Primitive, TypeTag};
use crate::sighash::{signature_hash, SigHash};
use crate::types::{ByteString, Transaction};
use log::{debug, trace};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptBuilder {
    chunks: Vec<ScriptChunk>,
    env: Env<Primitive>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder holding the concrete chunks of a binary script
    pub fn from_script(script: &[u8]) -> Result<Self> {
        Ok(ScriptBuilder {
            chunks: crate::chunk::decode_script(script)?,
            env: Env::new(),
        })
    }

    /// Parse the line format produced by [`ScriptBuilder::serialize`].
    pub fn deserialize(text: &str) -> Result<Self> {
        let mut builder = ScriptBuilder::new();
        for token in text.split_whitespace() {
            let chunk = ScriptChunk::parse_token(token)?;
            if let ScriptChunk::Variable { name, ty } = &chunk {
                builder.declare(name, *ty)?;
            }
            builder.chunks.push(chunk);
        }
        Ok(builder)
    }

    pub fn op(mut self, opcode: u8) -> Self {
        self.chunks.push(ScriptChunk::Op(opcode));
        self
    }

    pub fn data(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.chunks.push(ScriptChunk::data(bytes.as_ref().to_vec()));
        self
    }

    pub fn number(mut self, n: i64) -> Self {
        self.chunks.push(ScriptChunk::number(n));
        self
    }

    pub fn op_true(self) -> Self {
        self.op(OP_TRUE)
    }

    pub fn op_false(self) -> Self {
        self.op(OP_FALSE)
    }

    /// Append a placeholder for `name`, declaring it if needed.
    pub fn add_variable(mut self, name: &str, ty: TypeTag) -> Result<Self> {
        self.declare(name, ty)?;
        self.chunks.push(ScriptChunk::Variable {
            name: name.to_string(),
            ty,
        });
        Ok(self)
    }

    pub fn signature_placeholder(
        mut self,
        key_id: &str,
        mode: SigHash,
        anyone_can_pay: bool,
    ) -> Result<Self> {
        validate_name(key_id)?;
        self.chunks.push(ScriptChunk::Signature(SignaturePlaceholder {
            key_id: key_id.to_string(),
            mode,
            anyone_can_pay,
        }));
        Ok(self)
    }

    /// Concatenate `other` onto this builder, merging declarations.
    ///
    /// A variable bound on one side and free on the other is bound on both
    /// before the chunks are joined.
    pub fn append(self, other: &ScriptBuilder) -> Result<Self> {
        let mut declared = self.env.clone();
        for (name, ty) in other.env.variables() {
            declared.add_variable(&name, ty)?;
        }
        let mut merged = self.bind_all(&other.env.bound_variables())?;
        let other = other.bind_all(&self.env.bound_variables())?;
        for (name, ty) in other.env.variables() {
            merged.env.add_variable(&name, ty)?;
        }
        for (name, value) in other.env.bound_variables() {
            if !merged.env.is_bound(&name)? {
                merged.env.bind_variable(&name, value)?;
            }
        }
        merged.chunks.extend(other.chunks);
        Ok(merged)
    }

    /// Replace the placeholders of free variable `name` by the encoding of `value`.
    pub fn bind_variable(&self, name: &str, value: Primitive) -> Result<Self> {
        if !self.env.is_free(name)? {
            return Err(TemplateError::NotFree(name.to_string()));
        }
        self.env.check_binding(name, &value)?;
        let encoded = value.to_chunks()?;

        let mut chunks = Vec::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            match chunk {
                ScriptChunk::Variable { name: n, .. } if n == name => {
                    chunks.extend(encoded.iter().cloned())
                }
                other => chunks.push(other.clone()),
            }
        }

        let mut env = self.env.clone();
        env.bind_variable(name, value)?;
        trace!("bound script variable '{}'", name);
        Ok(ScriptBuilder { chunks, env })
    }

    /// Bind every free variable that has an entry in `bindings`.
    pub fn bind_all(&self, bindings: &BTreeMap<String, Primitive>) -> Result<Self> {
        let mut builder = self.clone();
        for name in self.env.free_variables().keys() {
            if let Some(value) = bindings.get(name) {
                builder = builder.bind_variable(name, value.clone())?;
            }
        }
        Ok(builder)
    }

    /// Drop variable `name` together with its placeholders.
    pub fn remove_variable(&self, name: &str) -> Result<Self> {
        let mut env = self.env.clone();
        env.remove_variable(name)?;
        let chunks = self
            .chunks
            .iter()
            .filter(|c| !matches!(c, ScriptChunk::Variable { name: n, .. } if n == name))
            .cloned()
            .collect();
        Ok(ScriptBuilder { chunks, env })
    }

    /// Resolve every signature placeholder against input `input_index` of `tx`.
    ///
    /// `script_code` is the script the signatures commit to: the spent output
    /// script, or the redeem script for P2SH outputs.
    pub fn set_all_signatures(
        &self,
        key_store: &dyn KeyStore,
        tx: &Transaction,
        input_index: usize,
        script_code: &[u8],
        options: SignOptions,
    ) -> Result<Self> {
        let mut chunks = Vec::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            let placeholder = match chunk {
                ScriptChunk::Signature(p) => p,
                other => {
                    chunks.push(other.clone());
                    continue;
                }
            };

            let key = key_store.resolve(&placeholder.key_id)?;
            let sighash_type = placeholder.sighash_type();
            let hash = signature_hash(tx, input_index, script_code, sighash_type)?;
            let mut sig = key.sign_hash(&hash, options.force_low_s)?;
            sig.push(sighash_type);
            debug!(
                "resolved signature placeholder for key {} ({}, anyone_can_pay={}) on input {}",
                placeholder.key_id, placeholder.mode, placeholder.anyone_can_pay, input_index
            );

            chunks.push(ScriptChunk::Push(sig));
            if options.append_pubkey {
                chunks.push(ScriptChunk::Push(key.public_key().to_bytes()));
            }
        }
        Ok(ScriptBuilder {
            chunks,
            env: self.env.clone(),
        })
    }

    /// Remove adjacent `TOALTSTACK FROMALTSTACK` pairs until none is left.
    pub fn optimize(&self) -> Self {
        let mut chunks: Vec<ScriptChunk> = Vec::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            let cancels = *chunk == ScriptChunk::Op(OP_FROMALTSTACK)
                && chunks.last() == Some(&ScriptChunk::Op(OP_TOALTSTACK));
            if cancels {
                chunks.pop();
            } else {
                chunks.push(chunk.clone());
            }
        }
        if chunks.len() != self.chunks.len() {
            trace!(
                "optimized script from {} to {} chunks",
                self.chunks.len(),
                chunks.len()
            );
        }
        ScriptBuilder {
            chunks,
            env: self.env.clone(),
        }
    }

    /// Binary script; fails while any placeholder remains.
    pub fn build(&self) -> Result<ByteString> {
        encode_chunks(&self.chunks)
    }

    pub fn serialize(&self) -> String {
        self.chunks
            .iter()
            .map(ScriptChunk::to_token)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn chunks(&self) -> &[ScriptChunk] {
        &self.chunks
    }

    /// Number of chunks
    pub fn size(&self) -> usize {
        self.chunks.len()
    }

    /// Number of unresolved signature placeholders
    pub fn signature_size(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| matches!(c, ScriptChunk::Signature(_)))
            .count()
    }

    pub fn signatures(&self) -> impl Iterator<Item = &SignaturePlaceholder> {
        self.chunks.iter().filter_map(|c| match c {
            ScriptChunk::Signature(p) => Some(p),
            _ => None,
        })
    }

    /// No free variable is left
    pub fn is_ready(&self) -> bool {
        self.env.is_ready()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.env.has_variable(name)
    }

    pub fn is_free(&self, name: &str) -> Result<bool> {
        self.env.is_free(name)
    }

    pub fn is_bound(&self, name: &str) -> Result<bool> {
        self.env.is_bound(name)
    }

    pub fn type_of(&self, name: &str) -> Result<TypeTag> {
        self.env.type_of(name)
    }

    pub fn free_variables(&self) -> BTreeMap<String, TypeTag> {
        self.env.free_variables()
    }

    pub fn bound_variables(&self) -> BTreeMap<String, Primitive> {
        self.env.bound_variables()
    }

    pub fn variables(&self) -> BTreeMap<String, TypeTag> {
        self.env.variables()
    }

    fn declare(&mut self, name: &str, ty: TypeTag) -> Result<()> {
        validate_name(name)?;
        if !ty.is_script_type() {
            return Err(TemplateError::InvalidType(format!(
                "variable '{}' of type {} cannot appear in a script",
                name, ty
            )));
        }
        self.env.add_variable(name, ty)
    }
}

impl fmt::Display for ScriptBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for ScriptBuilder {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self> {
        ScriptBuilder::deserialize(s)
    }
}

impl Serialize for ScriptBuilder {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&ScriptBuilder::serialize(self))
    }
}

impl<'de> Deserialize<'de> for ScriptBuilder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        ScriptBuilder::deserialize(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkType;
    use crate::keys::{MemoryKeyStore, PrivateKey};
    use crate::opcodes::*;
    use crate::types::{OutPoint, TransactionInput};

    fn spending_tx() -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![TransactionInput {
                prevout: OutPoint {
                    hash: [42; 32],
                    index: 0,
                },
                script_sig: Vec::new(),
                sequence: 0xffffffff,
            }],
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    #[test]
    fn test_append_ops() {
        let sb = ScriptBuilder::new().number(5).op(OP_DUP).data([1u8, 2, 3]).op_true();
        assert_eq!(sb.size(), 4);
        assert_eq!(sb.build().unwrap(), vec![0x55, OP_DUP, 0x03, 1, 2, 3, OP_1]);
        assert!(sb.free_variables().is_empty());
        assert_eq!(sb.signature_size(), 0);
    }

    #[test]
    fn test_free_variable() {
        let sb = ScriptBuilder::new()
            .add_variable("foo", TypeTag::Number)
            .unwrap();
        assert!(sb.has_variable("foo"));
        assert_eq!(sb.size(), 1);
        assert_eq!(sb.free_variables().len(), 1);
        assert!(sb.build().is_err());

        let bound = sb.bind_variable("foo", Primitive::Number(5)).unwrap();
        assert_eq!(bound.size(), 1);
        assert_eq!(bound.variables().len(), 1);
        assert_eq!(bound.bound_variables().len(), 1);
        assert!(bound.free_variables().is_empty());
        assert_eq!(bound.build().unwrap(), vec![0x55]);
        assert_eq!(bound.serialize(), "5");

        // the original builder is untouched
        assert_eq!(sb.free_variables().len(), 1);

        let removed = bound.remove_variable("foo").unwrap();
        assert_eq!(removed.size(), 1);
        assert!(!removed.has_variable("foo"));

        let removed = sb.remove_variable("foo").unwrap();
        assert_eq!(removed.size(), 0);
    }

    #[test]
    fn test_bind_errors() {
        let sb = ScriptBuilder::new()
            .add_variable("foo", TypeTag::Number)
            .unwrap();
        assert!(matches!(
            sb.bind_variable("bar", Primitive::Number(1)),
            Err(TemplateError::UnknownVariable(_))
        ));
        assert!(matches!(
            sb.bind_variable("foo", Primitive::Boolean(true)),
            Err(TemplateError::TypeMismatch { .. })
        ));
        let bound = sb.bind_variable("foo", Primitive::Number(1)).unwrap();
        assert!(matches!(
            bound.bind_variable("foo", Primitive::Number(2)),
            Err(TemplateError::NotFree(_))
        ));
    }

    #[test]
    fn test_variable_declaration_rules() {
        assert!(ScriptBuilder::new()
            .add_variable("a", TypeTag::Number)
            .unwrap()
            .add_variable("a", TypeTag::String)
            .is_err());
        assert!(ScriptBuilder::new()
            .add_variable("bad name", TypeTag::Number)
            .is_err());
        assert!(ScriptBuilder::new()
            .add_variable("k", TypeTag::PrivateKey)
            .is_err());

        // repeated placeholders of one variable are all replaced
        let sb = ScriptBuilder::new()
            .add_variable("a", TypeTag::Number)
            .unwrap()
            .add_variable("a", TypeTag::Number)
            .unwrap()
            .bind_variable("a", Primitive::Number(2))
            .unwrap();
        assert_eq!(sb.build().unwrap(), vec![0x52, 0x52]);
    }

    #[test]
    fn test_signature() {
        let mut store = MemoryKeyStore::new();
        let id1 = store.add_key(PrivateKey::fresh(NetworkType::Testnet));
        let id2 = store.add_key(PrivateKey::fresh(NetworkType::Testnet));

        let sb = ScriptBuilder::new()
            .signature_placeholder(&id1, SigHash::All, false)
            .unwrap()
            .signature_placeholder(&id2, SigHash::All, false)
            .unwrap();
        assert_eq!(sb.size(), 2);
        assert_eq!(sb.signature_size(), 2);
        assert!(sb.build().is_err());

        let signed = sb
            .set_all_signatures(&store, &spending_tx(), 0, &[], SignOptions::default())
            .unwrap();
        assert_eq!(signed.size(), 2);
        assert_eq!(signed.signature_size(), 0);
        assert!(signed.build().is_ok());
        assert_eq!(sb.signature_size(), 2);

        let with_pubkeys = sb
            .set_all_signatures(
                &store,
                &spending_tx(),
                0,
                &[],
                SignOptions {
                    force_low_s: true,
                    append_pubkey: true,
                },
            )
            .unwrap();
        assert_eq!(with_pubkeys.size(), 4);
    }

    #[test]
    fn test_signature_unknown_key() {
        let store = MemoryKeyStore::new();
        let sb = ScriptBuilder::new()
            .signature_placeholder("00ff", SigHash::All, false)
            .unwrap();
        assert!(matches!(
            sb.set_all_signatures(&store, &spending_tx(), 0, &[], SignOptions::default()),
            Err(TemplateError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_serialize_free_variable() {
        let sb = ScriptBuilder::new()
            .number(15)
            .add_variable("Donald", TypeTag::String)
            .unwrap();
        assert_eq!(sb.serialize(), "15 [var,Donald,tx_template::String]");

        let parsed = ScriptBuilder::deserialize("15 [var,Donald,tx_template::String]").unwrap();
        assert_eq!(parsed.free_variables().len(), 1);
        assert_eq!(parsed.size(), 2);
        assert_eq!(parsed.type_of("Donald").unwrap(), TypeTag::String);
        assert_eq!(parsed, sb);
    }

    #[test]
    fn test_serialize_signature_codes() {
        let key_id = PrivateKey::fresh(NetworkType::Testnet).key_id();
        let cases = [
            (SigHash::All, false, "AIAO"),
            (SigHash::All, true, "SIAO"),
            (SigHash::Single, false, "AISO"),
            (SigHash::Single, true, "SISO"),
            (SigHash::None, false, "AINO"),
            (SigHash::None, true, "SINO"),
        ];
        for (mode, acp, code) in cases {
            let sb = ScriptBuilder::new()
                .number(15)
                .signature_placeholder(&key_id, mode, acp)
                .unwrap();
            let expected = format!("15 [sig,{},{}]", key_id, code);
            assert_eq!(sb.serialize(), expected);

            let parsed = ScriptBuilder::deserialize(&expected).unwrap();
            assert_eq!(parsed.signature_size(), 1);
            assert_eq!(parsed.size(), 2);
            assert_eq!(parsed.serialize(), expected);
        }
    }

    #[test]
    fn test_serialize_deserialize_standard() {
        let scripts = [
            "HASH160 PUSHDATA[8174e27d08a37d26e81bbb99c39d20426b782645] EQUAL",
            "DUP HASH160 PUSHDATA[a9776115106b0599bf5f6f82c22e83429babad4d] EQUALVERIFY CHECKSIG",
            "RETURN PUSHDATA[44415441]",
        ];
        for s in scripts {
            assert_eq!(ScriptBuilder::deserialize(s).unwrap().serialize(), s);
        }
        assert!(ScriptBuilder::deserialize("DUP FOO").is_err());
    }

    #[test]
    fn test_optimize() {
        let sb = ScriptBuilder::new().op(OP_TOALTSTACK).op(OP_FROMALTSTACK);
        let opt = sb.optimize();
        assert_eq!(sb.size(), 2);
        assert_eq!(opt.size(), 0);
        assert_eq!(opt.build().unwrap(), Vec::<u8>::new());

        let sb = ScriptBuilder::new()
            .op(OP_TOALTSTACK)
            .number(4)
            .op(OP_FROMALTSTACK);
        assert_eq!(sb.optimize(), sb);

        let sb = ScriptBuilder::new()
            .op(OP_TOALTSTACK)
            .op(OP_FROMALTSTACK)
            .number(4)
            .op(OP_TOALTSTACK)
            .op(OP_FROMALTSTACK);
        assert_eq!(sb.optimize().build().unwrap(), vec![OP_4]);

        let sb = ScriptBuilder::new()
            .op(OP_TOALTSTACK)
            .op(OP_TOALTSTACK)
            .op(OP_FROMALTSTACK)
            .op(OP_FROMALTSTACK)
            .number(4);
        assert_eq!(sb.optimize().build().unwrap(), vec![OP_4]);
    }

    #[test]
    fn test_append() {
        let a = ScriptBuilder::new()
            .add_variable("x", TypeTag::Number)
            .unwrap();
        let b = ScriptBuilder::new()
            .op(OP_DUP)
            .add_variable("y", TypeTag::Hash)
            .unwrap();
        let joined = a.clone().append(&b).unwrap();
        assert_eq!(joined.size(), 3);
        assert_eq!(joined.free_variables().len(), 2);

        let conflicting = ScriptBuilder::new()
            .add_variable("x", TypeTag::String)
            .unwrap();
        assert!(a.append(&conflicting).is_err());
    }

    #[test]
    fn test_append_binds_across_sides() {
        let free = ScriptBuilder::new()
            .add_variable("x", TypeTag::Number)
            .unwrap();
        let bound = free.bind_variable("x", Primitive::Number(1)).unwrap();

        for joined in [
            free.clone().append(&bound).unwrap(),
            bound.clone().append(&free).unwrap(),
        ] {
            assert!(joined.is_ready());
            assert!(joined.is_bound("x").unwrap());
            assert_eq!(joined.serialize(), "1 1");
            assert_eq!(joined.build().unwrap(), vec![OP_1, OP_1]);
            assert!(matches!(
                joined.bind_variable("x", Primitive::Number(2)),
                Err(TemplateError::NotFree(_))
            ));
        }
    }

    #[test]
    fn test_serde_as_line_format() {
        let sb = ScriptBuilder::new()
            .op(OP_DUP)
            .add_variable("h", TypeTag::Hash)
            .unwrap();
        let json = serde_json::to_string(&sb).unwrap();
        assert_eq!(json, "\"DUP [var,h,tx_template::Hash]\"");
        let back: ScriptBuilder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sb);
    }
}
