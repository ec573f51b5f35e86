//! Language Binding Layer
//!
//! This module provides one adapter per embedded language behind a single protocol, so the
//! bridge core never needs to know which interpreter it is talking to.
//!
//! Architecture:
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Embedded runtimes                       │
//! │  ┌─────────┐  ┌────────────┐  ┌─────────┐  ┌─────────┐      │
//! │  │   Lua   │  │ JavaScript │  │ Python  │  │   PHP   │      │
//! │  └────┬────┘  └─────┬──────┘  └────┬────┘  └────┬────┘      │
//! │       │             │              │            │ (no engine)│
//! │       v             v              v            v           │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │        Adapters: Var <-> interpreter values         │    │
//! │  └───────────────────────┬─────────────────────────────┘    │
//! │                          │                                  │
//! │                          v                                  │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │              ScriptAdapter protocol                  │    │
//! │  └───────────────────────┬─────────────────────────────┘    │
//! │                          │                                  │
//! │                          v                                  │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │   Registry: function table, sealed modules, hooks   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#[cfg(feature = "javascript")]
pub mod js;
#[cfg(feature = "lua")]
pub mod lua;
pub mod protocol;
#[cfg(feature = "python")]
pub mod python;
pub(crate) mod refs;
pub mod runtime;

pub use protocol::*;
pub use runtime::Runtime;

use std::sync::Arc;

use crate::core::error::{BridgeError, BridgeResult};
use crate::core::registry::Registry;
use crate::module::SealedModule;
use crate::value::{Var, VarList};
use crate::with_feature;

/// One live interpreter of any compiled-in language.
pub enum Adapter {
    #[cfg(feature = "lua")]
    Lua(lua::LuaAdapter),
    #[cfg(feature = "javascript")]
    JavaScript(js::JsAdapter),
    #[cfg(feature = "python")]
    Python(python::PyAdapter),
}

/// Forward a call to whichever adapter is inside.
macro_rules! delegate {
    ($self:ident, $adapter:ident => $call:expr) => {
        match *$self {
            #[cfg(feature = "lua")]
            Adapter::Lua(ref $adapter) => $call,
            #[cfg(feature = "javascript")]
            Adapter::JavaScript(ref $adapter) => $call,
            #[cfg(feature = "python")]
            Adapter::Python(ref $adapter) => $call,
        }
    };
}

impl Adapter {
    /// Start an interpreter for `runtime`.
    pub fn new(runtime: Runtime, registry: Arc<Registry>) -> BridgeResult<Self> {
        match runtime {
            Runtime::Lua => with_feature!(
                "lua",
                { lua::LuaAdapter::new(registry).map(Adapter::Lua) },
                {
                    drop(registry);
                    Err(BridgeError::RuntimeUnavailable(Runtime::Lua))
                }
            ),
            Runtime::JavaScript => with_feature!(
                "javascript",
                { js::JsAdapter::new(registry).map(Adapter::JavaScript) },
                {
                    drop(registry);
                    Err(BridgeError::RuntimeUnavailable(Runtime::JavaScript))
                }
            ),
            Runtime::Python => with_feature!(
                "python",
                { python::PyAdapter::new(registry).map(Adapter::Python) },
                {
                    drop(registry);
                    Err(BridgeError::RuntimeUnavailable(Runtime::Python))
                }
            ),
            Runtime::Php => Err(BridgeError::RuntimeUnavailable(Runtime::Php)),
        }
    }
}

#[allow(unreachable_code, unused_variables)]
impl ScriptAdapter for Adapter {
    fn runtime(&self) -> Runtime {
        delegate!(self, a => a.runtime())
    }

    fn owner_id(&self) -> u64 {
        delegate!(self, a => a.owner_id())
    }

    fn execute(&self, code: &str, file_name: &str) -> BridgeResult<()> {
        delegate!(self, a => a.execute(code, file_name))
    }

    fn eval(&self, code: &str) -> BridgeResult<Var> {
        delegate!(self, a => a.eval(code))
    }

    fn install_module(&self, module: &SealedModule) -> BridgeResult<()> {
        delegate!(self, a => a.install_module(module))
    }

    fn call_function(&self, name: &str, args: VarList) -> BridgeResult<Var> {
        delegate!(self, a => a.call_function(name, args))
    }

    fn var_call(&self, function: &Var, args: VarList) -> BridgeResult<Var> {
        delegate!(self, a => a.var_call(function, args))
    }

    fn object_call(&self, object: &Var, method: &str, args: VarList) -> BridgeResult<Var> {
        delegate!(self, a => a.object_call(object, method, args))
    }

    fn get_property(&self, object: &Var, name: &str) -> BridgeResult<Var> {
        delegate!(self, a => a.get_property(object, name))
    }

    fn set_property(&self, object: &Var, name: &str, value: Var) -> BridgeResult<()> {
        delegate!(self, a => a.set_property(object, name, value))
    }

    fn clear_caches(&self) {
        delegate!(self, a => a.clear_caches())
    }

    fn collect_garbage(&self) {
        delegate!(self, a => a.collect_garbage())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;

    #[test]
    fn test_php_has_no_engine() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        assert!(matches!(
            Adapter::new(Runtime::Php, registry),
            Err(BridgeError::RuntimeUnavailable(Runtime::Php))
        ));
    }

    #[cfg(feature = "lua")]
    #[test]
    fn test_adapter_reports_its_runtime() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        let adapter = Adapter::new(Runtime::Lua, registry).unwrap();
        assert_eq!(adapter.runtime(), Runtime::Lua);
        assert_eq!(adapter.eval("1 + 1").unwrap(), Var::new_i64(2));
    }
}
