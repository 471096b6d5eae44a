//! Input scripts: what an input presents to unlock the output it spends

use crate::chunk::write_push;
use crate::config::SignOptions;
use crate::error::{Result, TemplateError};
use crate::keys::KeyStore;
use crate::output_script::OutputScript;
use crate::primitive::{Primitive, TypeTag};
use crate::script_builder::ScriptBuilder;
use crate::types::{ByteString, Transaction};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputScript {
    Standard(ScriptBuilder),
    /// Spends a P2SH output: the arguments, followed by a push of the redeem script
    P2SH {
        script: ScriptBuilder,
        redeem: Box<OutputScript>,
    },
}

impl InputScript {
    pub fn standard(script: ScriptBuilder) -> Self {
        InputScript::Standard(script)
    }

    /// `redeem` must be a P2SH output script; shared variables must agree on their type.
    pub fn p2sh(script: ScriptBuilder, redeem: OutputScript) -> Result<Self> {
        if !redeem.is_p2sh() {
            return Err(TemplateError::IllegalState(format!(
                "redeem script must be P2SH, found {}",
                redeem.kind()
            )));
        }
        for (name, ty) in script.variables() {
            if let Ok(other) = redeem.type_of(&name) {
                if other != ty {
                    return Err(TemplateError::TypeConflict {
                        name,
                        existing: other.to_string(),
                        requested: ty.to_string(),
                    });
                }
            }
        }
        Ok(InputScript::P2SH {
            script,
            redeem: Box::new(redeem),
        })
    }

    pub fn is_p2sh(&self) -> bool {
        matches!(self, InputScript::P2SH { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InputScript::Standard(_) => "STANDARD",
            InputScript::P2SH { .. } => "P2SH",
        }
    }

    pub fn script(&self) -> &ScriptBuilder {
        match self {
            InputScript::Standard(sb) | InputScript::P2SH { script: sb, .. } => sb,
        }
    }

    pub fn redeem(&self) -> Option<&OutputScript> {
        match self {
            InputScript::P2SH { redeem, .. } => Some(&**redeem),
            InputScript::Standard(_) => None,
        }
    }

    /// Bind `name` wherever it is still free.
    pub fn bind_variable(&self, name: &str, value: Primitive) -> Result<Self> {
        match self {
            InputScript::Standard(sb) => Ok(InputScript::Standard(sb.bind_variable(name, value)?)),
            InputScript::P2SH { script, redeem } => {
                let in_script = script.has_variable(name);
                let in_redeem = redeem.has_variable(name);
                if !in_script && !in_redeem {
                    return Err(TemplateError::UnknownVariable(name.to_string()));
                }
                let script_free = in_script && script.is_free(name)?;
                let redeem_free = in_redeem && redeem.free_variables().contains_key(name);
                if !script_free && !redeem_free {
                    return Err(TemplateError::NotFree(name.to_string()));
                }
                let script = if script_free {
                    script.bind_variable(name, value.clone())?
                } else {
                    script.clone()
                };
                let redeem = if redeem_free {
                    redeem.bind_variable(name, value)?
                } else {
                    (**redeem).clone()
                };
                Ok(InputScript::P2SH {
                    script,
                    redeem: Box::new(redeem),
                })
            }
        }
    }

    pub fn bind_all(&self, bindings: &BTreeMap<String, Primitive>) -> Result<Self> {
        match self {
            InputScript::Standard(sb) => Ok(InputScript::Standard(sb.bind_all(bindings)?)),
            InputScript::P2SH { script, redeem } => Ok(InputScript::P2SH {
                script: script.bind_all(bindings)?,
                redeem: Box::new(redeem.bind_all(bindings)?),
            }),
        }
    }

    /// Resolve the signature placeholders of the argument script.
    pub fn set_all_signatures(
        &self,
        key_store: &dyn KeyStore,
        tx: &Transaction,
        input_index: usize,
        script_code: &[u8],
        options: SignOptions,
    ) -> Result<Self> {
        match self {
            InputScript::Standard(sb) => Ok(InputScript::Standard(sb.set_all_signatures(
                key_store,
                tx,
                input_index,
                script_code,
                options,
            )?)),
            InputScript::P2SH { script, redeem } => Ok(InputScript::P2SH {
                script: script.set_all_signatures(
                    key_store,
                    tx,
                    input_index,
                    script_code,
                    options,
                )?,
                redeem: redeem.clone(),
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.free_variables().is_empty()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.script().has_variable(name) || self.redeem().map_or(false, |r| r.has_variable(name))
    }

    pub fn type_of(&self, name: &str) -> Result<TypeTag> {
        match self.script().type_of(name) {
            Ok(ty) => Ok(ty),
            Err(_) => match self.redeem() {
                Some(redeem) => redeem.type_of(name),
                None => Err(TemplateError::UnknownVariable(name.to_string())),
            },
        }
    }

    /// Free variables of the arguments and of the redeem script
    pub fn free_variables(&self) -> BTreeMap<String, TypeTag> {
        let mut vars = self.script().free_variables();
        if let Some(redeem) = self.redeem() {
            vars.extend(redeem.free_variables());
        }
        vars
    }

    pub fn variables(&self) -> BTreeMap<String, TypeTag> {
        let mut vars = self.script().variables();
        if let Some(redeem) = self.redeem() {
            vars.extend(redeem.variables());
        }
        vars
    }

    pub fn signature_size(&self) -> usize {
        self.script().signature_size() + self.redeem().map_or(0, OutputScript::signature_size)
    }

    /// Redeem script bytes of a P2SH input
    pub fn redeem_script(&self) -> Result<Option<ByteString>> {
        match self.redeem() {
            Some(redeem) => redeem.redeem_script(),
            None => Ok(None),
        }
    }

    /// Binary scriptSig. A P2SH input ends with a push of its redeem script.
    pub fn build(&self) -> Result<ByteString> {
        let mut out = self.script().build()?;
        if let Some(redeem) = self.redeem_script()? {
            write_push(&mut out, &redeem);
        }
        Ok(out)
    }

    pub fn serialize(&self) -> String {
        self.script().serialize()
    }
}

impl fmt::Display for InputScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputScript::Standard(sb) => write!(f, "{}", sb),
            InputScript::P2SH { script, redeem } => {
                write!(f, "{} <{}>", script, redeem.serialize())
            }
        }
    }
}
