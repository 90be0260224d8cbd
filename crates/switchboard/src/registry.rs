// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host-side capability registry.
//!
//! A capability is any type that can describe itself as a [`PluginDescriptor`].
//! Registration records the resulting [`Plugin`] keyed by unique name and,
//! when an instance is supplied, keeps it for lookup. Reconciliation against
//! the authority's canonical list assigns ids and adopts plugins the host
//! did not know about; it never removes anything.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Function, Parameter, Plugin};

/// Name given to every function's single output.
pub const RESULT_OUTPUT: &str = "result";

/// Self-description of a capability type.
pub trait Capability: Send + Sync + 'static {
    fn describe() -> PluginDescriptor;
}

#[derive(Debug, Clone, Default)]
pub struct FunctionDescriptor {
    name: String,
    description: String,
    inputs: Vec<Parameter>,
    output: Option<Parameter>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input(mut self, name: &str, kind: &str, description: &str) -> Self {
        self.inputs.push(Parameter::new(name, kind).with_description(description));
        self
    }

    pub fn returns(mut self, kind: &str, description: &str) -> Self {
        self.output = Some(Parameter::new(RESULT_OUTPUT, kind).with_description(description));
        self
    }

    fn into_function(self) -> Function {
        let output = self.output.unwrap_or_else(|| Parameter::new(RESULT_OUTPUT, "string"));
        Function {
            id: None,
            name: self.name,
            description: self.description,
            inputs: self.inputs,
            outputs: vec![output],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PluginDescriptor {
    name: String,
    unique_name: Option<String>,
    description: String,
    functions: Vec<FunctionDescriptor>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn unique_name(mut self, unique_name: impl Into<String>) -> Self {
        self.unique_name = Some(unique_name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn function(mut self, function: FunctionDescriptor) -> Self {
        self.functions.push(function);
        self
    }

    fn into_plugin(self, fallback_unique: String) -> Plugin {
        Plugin {
            id: None,
            unique_name: Some(self.unique_name.unwrap_or(fallback_unique)),
            name: self.name,
            description: self.description,
            functions: self.functions.into_iter().map(FunctionDescriptor::into_function).collect(),
        }
    }
}

/// Unique name derived from the Rust type path, with `::` written as `.`.
pub fn type_unique_name<C: ?Sized>() -> String {
    std::any::type_name::<C>().replace("::", ".")
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub matched: usize,
    pub adopted: usize,
    pub functions_resolved: usize,
}

#[derive(Default)]
pub struct CapabilityRegistry {
    plugins: Vec<Plugin>,
    instances: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability together with the instance that serves it.
    pub fn add_plugin<C: Capability>(&mut self, instance: C) -> Result<&Plugin> {
        let plugin = C::describe().into_plugin(type_unique_name::<C>());
        let key = self.insert(plugin)?;
        self.instances.insert(key, Arc::new(instance));
        self.last()
    }

    /// Register a capability by type only.
    pub fn add_plugin_from_type<C: Capability>(&mut self) -> Result<&Plugin> {
        let plugin = C::describe().into_plugin(type_unique_name::<C>());
        self.insert(plugin)?;
        self.last()
    }

    /// Register a plugin described at runtime. The display name doubles as
    /// the unique name when none is given.
    pub fn add_descriptor(&mut self, descriptor: PluginDescriptor) -> Result<&Plugin> {
        let fallback = descriptor.name.clone();
        self.insert(descriptor.into_plugin(fallback))?;
        self.last()
    }

    fn insert(&mut self, plugin: Plugin) -> Result<String> {
        let key = plugin.unique_name.clone().unwrap_or_else(|| plugin.name.clone());
        if self.plugins.iter().any(|p| p.unique_name.as_deref() == Some(key.as_str())) {
            return Err(Error::DuplicateCapability(key));
        }
        debug!(unique_name = %key, functions = plugin.functions.len(), "capability registered");
        self.plugins.push(plugin);
        Ok(key)
    }

    fn last(&self) -> Result<&Plugin> {
        self.plugins.last().ok_or_else(|| Error::NotFound("plugin".to_owned()))
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn plugin(&self, unique_name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.unique_name.as_deref() == Some(unique_name))
    }

    /// The instance registered for capability type `C`, if any.
    pub fn instance<C: Capability>(&self) -> Option<Arc<C>> {
        let key = C::describe().unique_name.unwrap_or_else(type_unique_name::<C>);
        let any = Arc::clone(self.instances.get(&key)?);
        any.downcast::<C>().ok()
    }

    /// Merge the authority's canonical plugins into the roster.
    ///
    /// Each canonical plugin is matched by unique name, then by name. A match
    /// takes the canonical plugin id and the ids of same-named functions;
    /// unmatched canonical plugins are appended. Applying the same list twice
    /// leaves the roster unchanged.
    pub fn reconcile(&mut self, canonical: &[Plugin]) -> Reconciliation {
        let mut outcome = Reconciliation::default();
        for remote in canonical {
            match remote.position_in(&self.plugins) {
                Some(i) => {
                    let local = &mut self.plugins[i];
                    if remote.id.is_some() {
                        local.id = remote.id.clone();
                    }
                    for remote_fn in &remote.functions {
                        let Some(ref id) = remote_fn.id else { continue };
                        if let Some(local_fn) = local.functions.iter_mut().find(|f| f.name == remote_fn.name) {
                            local_fn.id = Some(id.clone());
                            outcome.functions_resolved += 1;
                        }
                    }
                    outcome.matched += 1;
                }
                None => {
                    debug!(name = %remote.name, "adopting plugin from authority");
                    self.plugins.push(remote.clone());
                    outcome.adopted += 1;
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
