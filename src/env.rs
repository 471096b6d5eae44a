//! Registry of declared and bound variables

use crate::error::{Result, TemplateError};
use crate::primitive::{Primitive, TypeTag};
use std::collections::BTreeMap;
use std::fmt;

/// Values that carry a runtime type tag
pub trait Typed {
    type Tag: Copy + Eq + fmt::Debug + fmt::Display;

    fn type_tag(&self) -> Self::Tag;
}

impl Typed for Primitive {
    type Tag = TypeTag;

    fn type_tag(&self) -> TypeTag {
        Primitive::type_tag(self)
    }
}

/// Variables of one value domain: name → (type, optional value).
///
/// Equality compares declarations only, bound values are ignored.
#[derive(Debug, Clone)]
pub struct Env<T: Typed> {
    types: BTreeMap<String, T::Tag>,
    values: BTreeMap<String, T>,
}

impl<T: Typed> Default for Env<T> {
    fn default() -> Self {
        Env {
            types: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }
}

impl<T: Typed + Clone> Env<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name`. Idempotent for the same type.
    pub fn add_variable(&mut self, name: &str, ty: T::Tag) -> Result<()> {
        match self.types.get(name) {
            Some(existing) if *existing == ty => Ok(()),
            Some(existing) => Err(TemplateError::TypeConflict {
                name: name.to_string(),
                existing: existing.to_string(),
                requested: ty.to_string(),
            }),
            None => {
                self.types.insert(name.to_string(), ty);
                Ok(())
            }
        }
    }

    /// Check that `value` could be bound to `name` without changing anything.
    pub fn check_binding(&self, name: &str, value: &T) -> Result<()> {
        let expected = self
            .types
            .get(name)
            .ok_or_else(|| TemplateError::UnknownVariable(name.to_string()))?;
        let found = value.type_tag();
        if found != *expected {
            return Err(TemplateError::TypeMismatch {
                name: name.to_string(),
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    /// Bind `name`, overwriting any previous value.
    pub fn bind_variable(&mut self, name: &str, value: T) -> Result<()> {
        self.check_binding(name, &value)?;
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn is_free(&self, name: &str) -> Result<bool> {
        self.check_declared(name)?;
        Ok(!self.values.contains_key(name))
    }

    pub fn is_bound(&self, name: &str) -> Result<bool> {
        self.check_declared(name)?;
        Ok(self.values.contains_key(name))
    }

    pub fn type_of(&self, name: &str) -> Result<T::Tag> {
        self.types
            .get(name)
            .copied()
            .ok_or_else(|| TemplateError::UnknownVariable(name.to_string()))
    }

    pub fn value_of(&self, name: &str) -> Result<Option<&T>> {
        self.check_declared(name)?;
        Ok(self.values.get(name))
    }

    /// True iff every declared variable is bound
    pub fn is_ready(&self) -> bool {
        self.types.keys().all(|name| self.values.contains_key(name))
    }

    pub fn free_variables(&self) -> BTreeMap<String, T::Tag> {
        self.types
            .iter()
            .filter(|(name, _)| !self.values.contains_key(*name))
            .map(|(name, ty)| (name.clone(), *ty))
            .collect()
    }

    pub fn bound_variables(&self) -> BTreeMap<String, T> {
        self.values.clone()
    }

    /// All declarations, bound or not
    pub fn variables(&self) -> BTreeMap<String, T::Tag> {
        self.types.clone()
    }

    pub fn remove_variable(&mut self, name: &str) -> Result<()> {
        self.check_declared(name)?;
        self.types.remove(name);
        self.values.remove(name);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.types.clear();
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn check_declared(&self, name: &str) -> Result<()> {
        if self.types.contains_key(name) {
            Ok(())
        } else {
            Err(TemplateError::UnknownVariable(name.to_string()))
        }
    }
}

impl<T: Typed> PartialEq for Env<T> {
    fn eq(&self, other: &Self) -> bool {
        self.types == other.types
    }
}

impl<T: Typed> Eq for Env<T> {}

impl<T: Typed + fmt::Display> fmt::Display for Env<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, ty) in &self.types {
            match self.values.get(name) {
                Some(value) => writeln!(f, "{} : {} = {}", name, ty, value)?,
                None => writeln!(f, "{} : {}", name, ty)?,
            }
        }
        Ok(())
    }
}
