//! Code-loading context for one instrumentation run
//!
//! Holds the loaded units and the memoized tracing hook reference. A
//! registry belongs to exactly one run; call [`CodeRegistry::reset`] (or
//! create a new registry) before loading a different artifact.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::{InstrumentError, Result};
use crate::ir::{CodeUnit, MethodRef};

/// Loaded code units in load order
#[derive(Debug, Default)]
pub struct CodeRegistry {
    units: Vec<CodeUnit>,
    index: HashMap<String, usize>,
    support: HashSet<String>,
    hook: Option<MethodRef>,
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application unit; a unit with the same name is replaced
    pub fn add_unit(&mut self, unit: CodeUnit) {
        match self.index.get(&unit.name) {
            Some(&i) => {
                debug!(unit = %unit.name, "replacing previously loaded unit");
                self.units[i] = unit;
            }
            None => {
                self.index.insert(unit.name.clone(), self.units.len());
                self.units.push(unit);
            }
        }
    }

    /// Register a unit of the tracing runtime's own support code
    pub fn add_support_unit(&mut self, unit: CodeUnit) {
        self.support.insert(unit.name.clone());
        self.add_unit(unit);
    }

    pub fn is_support(&self, name: &str) -> bool {
        self.support.contains(name)
    }

    /// Names of every support unit loaded so far
    pub fn support_names(&self) -> impl Iterator<Item = &str> {
        self.support.iter().map(String::as_str)
    }

    pub fn unit(&self, name: &str) -> Option<&CodeUnit> {
        self.index.get(name).map(|&i| &self.units[i])
    }

    pub fn units(&self) -> &[CodeUnit] {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut [CodeUnit] {
        &mut self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Look up the tracing hook method, memoizing the first successful lookup
    pub fn resolve_hook(&mut self, class: &str, method: &str) -> Result<MethodRef> {
        if let Some(hook) = &self.hook {
            if hook.class == class && hook.name == method {
                return Ok(hook.clone());
            }
        }

        let resolved = self
            .unit(class)
            .and_then(|unit| unit.method_by_name(method))
            .map(|m| m.reference(class))
            .ok_or_else(|| InstrumentError::HookUnavailable {
                class: class.to_string(),
                method: method.to_string(),
            })?;

        debug!(hook = %resolved, "resolved tracing hook");
        self.hook = Some(resolved.clone());
        Ok(resolved)
    }

    /// Drop every loaded unit and the hook memo
    pub fn reset(&mut self) {
        self.units.clear();
        self.index.clear();
        self.support.clear();
        self.hook = None;
    }
}
