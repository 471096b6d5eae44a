//! Callbacks fired once when a set of variables becomes fully bound

use crate::env::Env;
use crate::error::{Result, TemplateError};
use crate::primitive::Primitive;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Receives the values of exactly the watched variables
pub type BindingHook = Box<dyn FnOnce(BTreeMap<String, Primitive>)>;

/// Pending hooks keyed by the unordered set of watched names
#[derive(Default)]
pub struct HookRegistry {
    pending: BTreeMap<BTreeSet<String>, BindingHook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, names: BTreeSet<String>, hook: BindingHook) -> Result<()> {
        if names.is_empty() {
            return Err(TemplateError::EmptyHookSet);
        }
        if self.pending.contains_key(&names) {
            return Err(TemplateError::DuplicateHook(names.into_iter().collect()));
        }
        self.pending.insert(names, hook);
        Ok(())
    }

    pub fn contains(&self, names: &BTreeSet<String>) -> bool {
        self.pending.contains_key(names)
    }

    /// Drop every pending hook watching `name`
    pub fn remove_watching(&mut self, name: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|names, _| !names.contains(name));
        before - self.pending.len()
    }

    /// Fire and forget every hook whose variables are all bound in `env`.
    pub fn fire_ready(&mut self, env: &Env<Primitive>) -> usize {
        let ready: Vec<BTreeSet<String>> = self
            .pending
            .keys()
            .filter(|names| names.iter().all(|n| matches!(env.is_bound(n), Ok(true))))
            .cloned()
            .collect();

        let mut fired = 0;
        for names in ready {
            let hook = match self.pending.remove(&names) {
                Some(hook) => hook,
                None => continue,
            };
            let snapshot: BTreeMap<String, Primitive> = names
                .iter()
                .filter_map(|n| match env.value_of(n) {
                    Ok(Some(value)) => Some((n.clone(), value.clone())),
                    _ => None,
                })
                .collect();
            debug!("firing binding hook for {:?}", names);
            hook(snapshot);
            fired += 1;
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.pending.keys()).finish()
    }
}
