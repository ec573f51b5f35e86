//! Module tree
//!
//! A [`Module`] collects variables, functions, object constructors and child modules. It is
//! mutable until it is sealed; [`Module::seal`] consumes it, registers every callable in the
//! [`FunctionTable`] under the module's dotted path and returns an immutable [`SealedModule`]
//! that each runtime adapter installs into its namespace.
//!
//! A module with an empty name is the top-level module: its members become globals.

use std::collections::HashMap;

use tracing::debug;

use crate::core::error::{BridgeError, BridgeResult};
use crate::dispatch::{Callback, FunctionId, FunctionTable};
use crate::value::Var;

#[derive(Debug, Default)]
pub struct Module {
    name: String,
    variables: HashMap<String, Var>,
    functions: HashMap<String, Callback>,
    objects: HashMap<String, Callback>,
    modules: HashMap<String, Module>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The module whose members are installed as globals.
    pub fn top_level() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_top_level(&self) -> bool {
        self.name.is_empty()
    }

    pub fn add_variable(&mut self, name: impl Into<String>, var: Var) {
        self.variables.insert(name.into(), var);
    }

    pub fn add_callback(&mut self, callback: Callback) {
        self.functions.insert(callback.name().to_string(), callback);
    }

    /// Register an object constructor. Scripts call it like a function; it is expected to
    /// return a `HostObject`.
    pub fn add_object(&mut self, constructor: Callback) {
        self.objects
            .insert(constructor.name().to_string(), constructor);
    }

    /// Nest a module. A child with the same name is replaced.
    pub fn add_module(&mut self, child: Module) {
        self.modules.insert(child.name.clone(), child);
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
            && self.functions.is_empty()
            && self.objects.is_empty()
            && self.modules.is_empty()
    }

    /// Register every callable in `table` and freeze the tree.
    ///
    /// The whole tree is validated before anything is registered, so a rejected module leaves
    /// the table untouched.
    pub fn seal(self, table: &FunctionTable) -> BridgeResult<SealedModule> {
        if !self.is_top_level() {
            validate_name(&self.name)?;
        }
        self.validate_members()?;
        let path = self.name.clone();
        Ok(self.seal_at(path, table))
    }

    fn validate_members(&self) -> BridgeResult<()> {
        self.variables
            .keys()
            .chain(self.functions.keys())
            .chain(self.objects.keys())
            .try_for_each(|name| validate_name(name))?;
        for (name, child) in &self.modules {
            validate_name(name)?;
            child.validate_members()?;
        }
        Ok(())
    }

    fn seal_at(self, path: String, table: &FunctionTable) -> SealedModule {
        let register = |callables: HashMap<String, Callback>| -> Vec<SealedFunction> {
            let mut sealed: Vec<_> = callables
                .into_iter()
                .map(|(name, callback)| {
                    let id = table.register(&path, callback);
                    SealedFunction { name, id }
                })
                .collect();
            sealed.sort_by(|a, b| a.name.cmp(&b.name));
            sealed
        };
        let functions = register(self.functions);
        let objects = register(self.objects);

        let mut variables: Vec<_> = self.variables.into_iter().collect();
        variables.sort_by(|a, b| a.0.cmp(&b.0));

        let mut children = Vec::with_capacity(self.modules.len());
        for (name, child) in self.modules {
            let child_path = if path.is_empty() {
                name
            } else {
                format!("{path}.{name}")
            };
            children.push(child.seal_at(child_path, table));
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(
            target: "bridge",
            path = %path,
            functions = functions.len(),
            objects = objects.len(),
            variables = variables.len(),
            children = children.len(),
            "sealed module"
        );

        SealedModule {
            name: self.name,
            path,
            variables,
            functions,
            objects,
            children,
        }
    }
}

/// Names must be usable as identifiers in every runtime and must not contain the path
/// separator.
fn validate_name(name: &str) -> BridgeResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_alphabetic() || first == '_')
                && chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(BridgeError::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SealedFunction {
    pub name: String,
    pub id: FunctionId,
}

/// Immutable module installed by the runtime adapters.
#[derive(Debug)]
pub struct SealedModule {
    pub name: String,
    /// Dotted path from the root, e.g. `game.math`. Empty for the top-level module.
    pub path: String,
    pub variables: Vec<(String, Var)>,
    pub functions: Vec<SealedFunction>,
    pub objects: Vec<SealedFunction>,
    pub children: Vec<SealedModule>,
}

impl SealedModule {
    pub fn is_top_level(&self) -> bool {
        self.path.is_empty()
    }

    /// Functions and constructors together. Constructors win a name clash.
    pub fn callables(&self) -> impl Iterator<Item = &SealedFunction> {
        self.functions
            .iter()
            .filter(|f| !self.objects.iter().any(|o| o.name == f.name))
            .chain(self.objects.iter())
    }

    /// This module followed by every descendant, depth-first.
    pub fn walk(&self) -> Vec<&SealedModule> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}
