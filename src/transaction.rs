//! Transaction templates: inputs and outputs whose scripts may still hold
//! free variables, completed by binding and finally materialized.

use crate::chunk::{is_p2pkh, is_p2sh, validate_name};
use crate::config::{NetworkType, SignOptions, TemplateConfig};
use crate::constants::*;
use crate::env::Env;
use crate::error::{Result, TemplateError};
use crate::hooks::HookRegistry;
use crate::input_script::InputScript;
use crate::keys::{KeyStore, PrivateKey, Signature};
use crate::output_script::OutputScript;
use crate::primitive::{Primitive, TypeTag};
use crate::sighash::{signature_hash, SigHash};
use crate::types::*;
use log::{debug, trace, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Shared, read-only reference to a parent template
pub type ParentRef = Arc<dyn TransactionTemplate>;

/// Materialized templates keyed by identity, shared across one materialization
pub type MaterializeCache = HashMap<usize, Transaction>;

/// Anything that can act as the parent of an input
pub trait TransactionTemplate: fmt::Debug {
    fn has_free_variables(&self) -> bool;

    /// Parent templates referenced by the inputs
    fn parents(&self) -> Vec<ParentRef>;

    fn is_coinbase(&self) -> bool;

    fn output_count(&self) -> usize;

    /// Ready: no free variables here or in any ancestor.
    fn is_ready(&self) -> bool;

    fn to_transaction(&self, key_store: &dyn KeyStore) -> Result<Transaction> {
        self.to_transaction_cached(key_store, &mut MaterializeCache::new())
    }

    /// Materialize with the ancestors already in `cache` reused, adding the
    /// ones built along the way.
    fn to_transaction_cached(
        &self,
        key_store: &dyn KeyStore,
        cache: &mut MaterializeCache,
    ) -> Result<Transaction>;
}

fn node_id(node: &dyn TransactionTemplate) -> usize {
    node as *const _ as *const () as usize
}

/// Readiness: 𝒯 → {true, false}
///
/// t is ready iff t has no free variables and every parent of t is ready.
/// Shared ancestors are visited once. A template reached again while still
/// on the current path closes a cycle and is not ready.
pub fn template_is_ready(root: &dyn TransactionTemplate) -> bool {
    let mut on_path = HashSet::new();
    let mut done = HashSet::new();
    ready_from(root, &mut on_path, &mut done)
}

/// Materialized `node`, built at most once per `cache`.
pub fn materialize_cached(
    node: &dyn TransactionTemplate,
    key_store: &dyn KeyStore,
    cache: &mut MaterializeCache,
) -> Result<Transaction> {
    let id = node_id(node);
    if let Some(tx) = cache.get(&id) {
        return Ok(tx.clone());
    }
    let tx = node.to_transaction_cached(key_store, cache)?;
    cache.insert(id, tx.clone());
    Ok(tx)
}

fn ready_from(
    node: &dyn TransactionTemplate,
    on_path: &mut HashSet<usize>,
    done: &mut HashSet<usize>,
) -> bool {
    let id = node_id(node);
    if done.contains(&id) {
        return true;
    }
    if !on_path.insert(id) {
        warn!("cycle in transaction template graph");
        return false;
    }
    if node.has_free_variables() {
        return false;
    }
    if !node.is_coinbase() {
        for parent in node.parents() {
            if !ready_from(&*parent, on_path, done) {
                return false;
            }
        }
    }
    on_path.remove(&id);
    done.insert(id);
    true
}

/// A concrete transaction is a template with nothing left to bind.
impl TransactionTemplate for Transaction {
    fn has_free_variables(&self) -> bool {
        false
    }

    fn parents(&self) -> Vec<ParentRef> {
        Vec::new()
    }

    fn is_coinbase(&self) -> bool {
        Transaction::is_coinbase(self)
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn to_transaction_cached(
        &self,
        _key_store: &dyn KeyStore,
        _cache: &mut MaterializeCache,
    ) -> Result<Transaction> {
        Ok(self.clone())
    }
}

/// Input: (parent, output index, script), parent absent for coinbase inputs
#[derive(Debug)]
pub struct Input {
    parent: Option<ParentRef>,
    out_index: u32,
    script: InputScript,
    relative_locktime: Option<u32>,
}

impl Input {
    pub fn parent(&self) -> Option<&ParentRef> {
        self.parent.as_ref()
    }

    pub fn out_index(&self) -> u32 {
        self.out_index
    }

    pub fn script(&self) -> &InputScript {
        &self.script
    }

    pub fn relative_locktime(&self) -> Option<u32> {
        self.relative_locktime
    }

    pub fn is_coinbase(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    script: OutputScript,
    value: u64,
}

impl Output {
    pub fn script(&self) -> &OutputScript {
        &self.script
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

/// Mutable, single-owner transaction template.
///
/// Scripts attached to a builder may only reference variables the builder
/// declares. Binding a variable on the builder pushes the value into every
/// script that still has it free, then fires the hooks that became ready.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    config: TemplateConfig,
    env: Env<Primitive>,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    locktime: Option<u32>,
    hooks: HookRegistry,
}

impl TransactionBuilder {
    pub fn new(network: NetworkType) -> Self {
        Self::with_config(TemplateConfig::for_network(network))
    }

    pub fn with_config(config: TemplateConfig) -> Self {
        TransactionBuilder {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    pub fn add_variable(&mut self, name: &str, ty: TypeTag) -> Result<()> {
        validate_name(name)?;
        self.env.add_variable(name, ty)?;
        trace!("declared transaction variable '{}' of type {}", name, ty);
        Ok(())
    }

    /// Bind free variable `name` on the transaction and on every script using it.
    ///
    /// Either everything is updated or nothing is.
    pub fn bind_variable(&mut self, name: &str, value: Primitive) -> Result<()> {
        if !self.env.is_free(name)? {
            return Err(TemplateError::NotFree(name.to_string()));
        }
        self.env.check_binding(name, &value)?;

        let mut input_scripts = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            input_scripts.push(if input.script.free_variables().contains_key(name) {
                Some(input.script.bind_variable(name, value.clone())?)
            } else {
                None
            });
        }
        let mut output_scripts = Vec::with_capacity(self.outputs.len());
        for output in &self.outputs {
            output_scripts.push(if output.script.free_variables().contains_key(name) {
                Some(output.script.bind_variable(name, value.clone())?)
            } else {
                None
            });
        }

        for (input, script) in self.inputs.iter_mut().zip(input_scripts) {
            if let Some(script) = script {
                input.script = script;
            }
        }
        for (output, script) in self.outputs.iter_mut().zip(output_scripts) {
            if let Some(script) = script {
                output.script = script;
            }
        }
        self.env.bind_variable(name, value)?;
        trace!("bound transaction variable '{}'", name);

        self.hooks.fire_ready(&self.env);
        Ok(())
    }

    /// Variables of a script about to be attached must be declared here with
    /// the same type. Returns the bindings the script still lacks.
    fn adopt(&self, variables: BTreeMap<String, TypeTag>) -> Result<BTreeMap<String, Primitive>> {
        let mut bindings = BTreeMap::new();
        for (name, ty) in variables {
            if !self.env.has_variable(&name) {
                return Err(TemplateError::UndeclaredVariable(name));
            }
            let declared = self.env.type_of(&name)?;
            if declared != ty {
                return Err(TemplateError::TypeConflict {
                    name,
                    existing: declared.to_string(),
                    requested: ty.to_string(),
                });
            }
            if let Some(value) = self.env.value_of(&name)? {
                bindings.insert(name, value.clone());
            }
        }
        Ok(bindings)
    }

    fn push_input(
        &mut self,
        parent: Option<ParentRef>,
        out_index: u32,
        script: InputScript,
        relative_locktime: Option<u32>,
    ) -> Result<()> {
        if let Some(parent) = &parent {
            if !parent.is_ready() {
                return Err(TemplateError::ParentNotReady);
            }
            if out_index as usize >= parent.output_count() {
                return Err(TemplateError::IndexOutOfRange {
                    index: out_index as usize,
                    len: parent.output_count(),
                });
            }
        }
        let bindings = self.adopt(script.free_variables())?;
        let script = script.bind_all(&bindings)?;
        debug!(
            "added {} input {} spending output {}",
            script.kind(),
            self.inputs.len(),
            out_index
        );
        self.inputs.push(Input {
            parent,
            out_index,
            script,
            relative_locktime,
        });
        Ok(())
    }

    /// Spend output `out_index` of `parent`, which must be ready.
    pub fn add_input(&mut self, parent: ParentRef, out_index: u32, script: InputScript) -> Result<()> {
        self.push_input(Some(parent), out_index, script, None)
    }

    /// Like [`add_input`](Self::add_input), with a BIP68 relative locktime in the sequence.
    pub fn add_input_with_locktime(
        &mut self,
        parent: ParentRef,
        out_index: u32,
        script: InputScript,
        relative_locktime: u32,
    ) -> Result<()> {
        self.push_input(Some(parent), out_index, script, Some(relative_locktime))
    }

    /// Input with a null outpoint.
    pub fn add_coinbase_input(&mut self, script: InputScript) -> Result<()> {
        self.push_input(None, COINBASE_INDEX, script, None)
    }

    pub fn add_output(&mut self, script: OutputScript, value: u64) -> Result<()> {
        if value > MAX_MONEY {
            return Err(TemplateError::IllegalState(format!(
                "output value {} exceeds the money supply",
                value
            )));
        }
        let bindings = self.adopt(script.free_variables())?;
        let script = script.bind_all(&bindings)?;
        self.outputs.push(Output { script, value });
        Ok(())
    }

    pub fn set_locktime(&mut self, locktime: u32) {
        self.locktime = Some(locktime);
    }

    pub fn locktime(&self) -> Option<u32> {
        self.locktime
    }

    /// Call `hook` once, as soon as all of `names` are bound.
    ///
    /// Every name must be a free variable of this builder. At most one hook
    /// may watch a given set of names, whatever their order.
    pub fn add_hook_to_variable_binding<I, S, F>(&mut self, names: I, hook: F) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(BTreeMap<String, Primitive>) + 'static,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        for name in &names {
            if !self.env.is_free(name)? {
                return Err(TemplateError::NotFree(name.clone()));
            }
        }
        self.hooks.register(names, Box::new(hook))
    }

    pub fn has_hook<I, S>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        self.hooks.contains(&names)
    }

    /// Forget variable `name`. Fails while any script references it.
    pub fn remove_variable(&mut self, name: &str) -> Result<()> {
        if !self.env.has_variable(name) {
            return Err(TemplateError::UnknownVariable(name.to_string()));
        }
        if self.is_referenced(name) {
            return Err(TemplateError::IllegalState(format!(
                "variable '{}' is used by a script",
                name
            )));
        }
        self.env.remove_variable(name)?;
        let dropped = self.hooks.remove_watching(name);
        if dropped > 0 {
            debug!("dropped {} hooks watching '{}'", dropped, name);
        }
        Ok(())
    }

    /// Remove every declared variable no script references; returns how many went.
    pub fn remove_unused_variables(&mut self) -> usize {
        let unused: Vec<String> = self
            .env
            .variables()
            .into_keys()
            .filter(|name| !self.is_referenced(name))
            .collect();
        for name in &unused {
            if self.env.remove_variable(name).is_ok() {
                self.hooks.remove_watching(name);
            }
        }
        unused.len()
    }

    fn is_referenced(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| i.script.has_variable(name))
            || self.outputs.iter().any(|o| o.script.has_variable(name))
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn input(&self, index: usize) -> Result<&Input> {
        self.inputs.get(index).ok_or(TemplateError::IndexOutOfRange {
            index,
            len: self.inputs.len(),
        })
    }

    pub fn output(&self, index: usize) -> Result<&Output> {
        self.outputs.get(index).ok_or(TemplateError::IndexOutOfRange {
            index,
            len: self.outputs.len(),
        })
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

    pub fn value_of(&self, name: &str) -> Result<Option<&Primitive>> {
        self.env.value_of(name)
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

    pub fn is_ready(&self) -> bool {
        template_is_ready(self)
    }

    /// No input spends a parent output.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.iter().all(Input::is_coinbase)
    }

    /// Transaction with resolved outputs and empty input scripts, plus the
    /// materialized parent of each input.
    fn skeleton(
        &self,
        key_store: &dyn KeyStore,
        cache: &mut MaterializeCache,
    ) -> Result<(Transaction, Vec<Option<Transaction>>)> {
        let mut parents = Vec::with_capacity(self.inputs.len());
        let mut inputs = Vec::with_capacity(self.inputs.len());

        for input in &self.inputs {
            let parent_tx = match &input.parent {
                Some(parent) => Some(materialize_cached(&**parent, key_store, cache)?),
                None => None,
            };

            let prevout = match &parent_tx {
                Some(tx) => {
                    if input.out_index as usize >= tx.outputs.len() {
                        return Err(TemplateError::IndexOutOfRange {
                            index: input.out_index as usize,
                            len: tx.outputs.len(),
                        });
                    }
                    OutPoint {
                        hash: tx.txid(),
                        index: input.out_index,
                    }
                }
                None => OutPoint::null(),
            };
            let sequence = match (input.relative_locktime, self.locktime) {
                (Some(relative), _) => relative,
                (None, Some(_)) => SEQUENCE_LOCKTIME_ENABLED,
                (None, None) => SEQUENCE_FINAL,
            };
            inputs.push(TransactionInput {
                prevout,
                script_sig: Vec::new(),
                sequence,
            });
            parents.push(parent_tx);
        }

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for output in &self.outputs {
            outputs.push(TransactionOutput {
                value: output.value,
                script_pubkey: output.script.script_pubkey()?,
            });
        }

        let tx = Transaction {
            version: self.config.tx_version,
            inputs,
            outputs,
            lock_time: self.locktime.unwrap_or(0),
        };
        Ok((tx, parents))
    }

    /// Script the signatures of input `index` commit to, and whether the
    /// signer's public key follows each signature.
    fn signing_context(&self, index: usize, parent_tx: Option<&Transaction>) -> Result<(ByteString, bool)> {
        let input = self.input(index)?;
        let redeem = input.script.redeem_script()?;
        let spent = match parent_tx.and_then(|tx| tx.outputs.get(input.out_index as usize)) {
            Some(spent) => spent,
            None => return Ok((redeem.unwrap_or_default(), false)),
        };
        match (is_p2sh(&spent.script_pubkey), redeem) {
            (true, Some(redeem)) => Ok((redeem, false)),
            (false, None) => Ok((spent.script_pubkey.clone(), is_p2pkh(&spent.script_pubkey))),
            (true, None) => Err(TemplateError::IllegalState(format!(
                "input {} spends a P2SH output without a redeem script",
                index
            ))),
            (false, Some(_)) => Err(TemplateError::IllegalState(format!(
                "input {} carries a redeem script but its spent output is not P2SH",
                index
            ))),
        }
    }

    /// Materialize: 𝒯 × 𝒦 → 𝒯𝒳
    ///
    /// 1. The template and all of its ancestors must be ready
    /// 2. Materialize each parent once and point the inputs at its outputs
    /// 3. Sequence: relative locktime, else locktime-enabled if a locktime is
    ///    set, else final
    /// 4. Resolve each input's signature placeholders against the spent
    ///    script and build the final input scripts
    pub fn to_transaction(&self, key_store: &dyn KeyStore) -> Result<Transaction> {
        self.to_transaction_in(key_store, &mut MaterializeCache::new())
    }

    /// [`TransactionBuilder::to_transaction`] sharing `cache` with other
    /// materializations, so that every ancestor is built once.
    pub fn to_transaction_in(
        &self,
        key_store: &dyn KeyStore,
        cache: &mut MaterializeCache,
    ) -> Result<Transaction> {
        // 1. Readiness
        if !self.is_ready() {
            let free: Vec<String> = self.env.free_variables().into_keys().collect();
            return Err(TemplateError::NotReady(if free.is_empty() {
                "an ancestor has free variables".to_string()
            } else {
                format!("free variables {:?}", free)
            }));
        }

        self.materialize(key_store, cache)
    }

    fn materialize(&self, key_store: &dyn KeyStore, cache: &mut MaterializeCache) -> Result<Transaction> {
        // 2-3. Outpoints, sequences, outputs
        let (mut tx, parents) = self.skeleton(key_store, cache)?;

        // 4. Signatures
        for (index, input) in self.inputs.iter().enumerate() {
            let (script_code, append_pubkey) = self.signing_context(index, parents[index].as_ref())?;
            let options = SignOptions {
                append_pubkey,
                ..SignOptions::default()
            };
            let signed = input
                .script
                .set_all_signatures(key_store, &tx, index, &script_code, options)?;
            tx.inputs[index].script_sig = signed.build()?;
        }

        debug!(
            "materialized transaction {} ({} inputs, {} outputs)",
            tx.txid_hex(),
            tx.inputs.len(),
            tx.outputs.len()
        );
        Ok(tx)
    }

    /// Detached signature of input `input_index` by `key`.
    ///
    /// Only outputs and parents must be ready: the signed input may still
    /// have the free variable the signature is meant for.
    pub fn sign_input(
        &self,
        key: &PrivateKey,
        key_store: &dyn KeyStore,
        input_index: usize,
        mode: SigHash,
        anyone_can_pay: bool,
    ) -> Result<Signature> {
        let (tx, parents) = self.skeleton(key_store, &mut MaterializeCache::new())?;
        let parent_tx = parents.get(input_index).and_then(Option::as_ref);
        let (script_code, _) = self.signing_context(input_index, parent_tx)?;

        let sighash_type = mode.sighash_type(anyone_can_pay);
        let hash = signature_hash(&tx, input_index, &script_code, sighash_type)?;
        let mut bytes = key.sign_hash(&hash, true)?;
        bytes.push(sighash_type);
        debug!("signed input {} with key {}", input_index, key.key_id());
        Ok(Signature::new(bytes, Some(key.public_key())))
    }
}

impl TransactionTemplate for TransactionBuilder {
    fn has_free_variables(&self) -> bool {
        !self.env.is_ready()
            || self.inputs.iter().any(|i| !i.script.is_ready())
            || self.outputs.iter().any(|o| !o.script.is_ready())
    }

    fn parents(&self) -> Vec<ParentRef> {
        self.inputs.iter().filter_map(|i| i.parent.clone()).collect()
    }

    fn is_coinbase(&self) -> bool {
        TransactionBuilder::is_coinbase(self)
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn is_ready(&self) -> bool {
        TransactionBuilder::is_ready(self)
    }

    fn to_transaction(&self, key_store: &dyn KeyStore) -> Result<Transaction> {
        TransactionBuilder::to_transaction(self, key_store)
    }

    /// Ancestors are checked as they are materialized.
    fn to_transaction_cached(
        &self,
        key_store: &dyn KeyStore,
        cache: &mut MaterializeCache,
    ) -> Result<Transaction> {
        if self.has_free_variables() {
            return Err(TemplateError::NotReady(
                "parent template has free variables".to_string(),
            ));
        }
        self.materialize(key_store, cache)
    }
}

impl fmt::Display for TransactionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "TransactionBuilder ({}, {} free variables)",
            if self.is_coinbase() { "coinbase" } else { "standard" },
            self.env.free_variables().len()
        )?;
        for (i, input) in self.inputs.iter().enumerate() {
            match input.parent {
                Some(_) => writeln!(f, "  in[{}] <- :{} {}", i, input.out_index, input.script)?,
                None => writeln!(f, "  in[{}] <- coinbase {}", i, input.script)?,
            }
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "  out[{}] {} {}", i, output.value, output.script)?;
        }
        if let Some(locktime) = self.locktime {
            writeln!(f, "  locktime {}", locktime)?;
        }
        Ok(())
    }
}
