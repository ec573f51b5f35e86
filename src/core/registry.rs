//! Shared bridge state
//!
//! The [`Registry`] is everything the interpreters on every thread need to agree on: the
//! function table, the sealed modules in registration order, the file hooks and the
//! garbage-collection epoch. It is written during setup and read during execution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::config::BridgeConfig;
use crate::core::error::BridgeResult;
use crate::dispatch::{FunctionId, FunctionTable};
use crate::hooks::FileHooks;
use crate::module::{Module, SealedModule};
use crate::value::{Var, VarList};

#[derive(Debug)]
pub struct Registry {
    config: BridgeConfig,
    functions: FunctionTable,
    modules: RwLock<Vec<Arc<SealedModule>>>,
    hooks: FileHooks,
    collect_epoch: AtomicU64,
}

impl Registry {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            functions: FunctionTable::new(),
            modules: RwLock::new(Vec::new()),
            hooks: FileHooks::default(),
            collect_epoch: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn hooks(&self) -> &FileHooks {
        &self.hooks
    }

    /// Seal `module` and queue it for installation in every interpreter.
    pub fn seal(&self, module: Module) -> BridgeResult<Arc<SealedModule>> {
        let sealed = Arc::new(module.seal(&self.functions)?);
        let name = if sealed.is_top_level() {
            "<top-level>"
        } else {
            sealed.path.as_str()
        };
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        modules.push(Arc::clone(&sealed));
        info!(target: "bridge", module = name, total = modules.len(), "module sealed");
        Ok(sealed)
    }

    pub fn module_count(&self) -> usize {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Sealed modules from position `start` on, in registration order.
    pub fn modules_since(&self, start: usize) -> Vec<Arc<SealedModule>> {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        modules.get(start..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub fn call(&self, id: FunctionId, args: VarList) -> BridgeResult<Var> {
        self.functions.call(id, args)
    }

    /// Ask every interpreter to collect garbage on its next entry.
    pub fn request_collect(&self) -> u64 {
        self.collect_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn collect_epoch(&self) -> u64 {
        self.collect_epoch.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Callback;

    #[test]
    fn test_modules_queue_in_order() {
        let registry = Registry::new(BridgeConfig::default());
        let mut first = Module::new("first");
        first.add_callback(Callback::new("f", |_, _| Var::Null));
        registry.seal(first).unwrap();
        registry.seal(Module::new("second")).unwrap();

        assert_eq!(registry.module_count(), 2);
        let pending = registry.modules_since(1);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "second");
        assert!(registry.modules_since(5).is_empty());
    }

    #[test]
    fn test_collect_epoch_advances() {
        let registry = Registry::new(BridgeConfig::default());
        assert_eq!(registry.collect_epoch(), 0);
        assert_eq!(registry.request_collect(), 1);
        assert_eq!(registry.collect_epoch(), 1);
    }
}
