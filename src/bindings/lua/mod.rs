//! Lua Binding Adapter using mlua
//!
//! This adapter provides Lua 5.4 support. Host objects are userdata whose `__index` resolves
//! methods from the object's callback table and falls back to its properties. Named modules are
//! registered in `package.preload`, so scripts load them with `require`, and a custom searcher
//! resolves other `require` calls through the file reader hook.

mod convert;
mod module;
mod object;

use std::rc::Rc;
use std::sync::Arc;

use mlua::prelude::*;
use tracing::{debug, trace};

use super::protocol::ScriptAdapter;
use super::refs::RefKeys;
use super::Runtime;
use crate::core::error::{BridgeError, BridgeResult};
use crate::core::registry::Registry;
use crate::module::SealedModule;
use crate::value::{Var, VarList};

impl From<LuaError> for BridgeError {
    fn from(err: LuaError) -> Self {
        BridgeError::script(Runtime::Lua, err.to_string())
    }
}

impl From<BridgeError> for LuaError {
    fn from(err: BridgeError) -> Self {
        LuaError::external(err)
    }
}

/// State shared between the adapter and the native functions it installs.
///
/// Reachable from inside the interpreter through the Lua app data.
pub(crate) struct LuaShared {
    registry: Arc<Registry>,
    keys: RefKeys,
    /// Parked values, keyed by reference key
    refs: LuaTable,
    /// Metatable marking tables that came from a `List`
    list_meta: LuaTable,
    /// Weak-valued cache of host object userdata keyed by object id
    wrappers: LuaTable,
}

/// Fetch the shared state from inside a native function.
fn shared(lua: &Lua) -> LuaResult<Rc<LuaShared>> {
    lua.app_data_ref::<Rc<LuaShared>>()
        .map(|shared| Rc::clone(&shared))
        .ok_or_else(|| LuaError::RuntimeError("script bridge state is not attached".to_string()))
}

pub struct LuaAdapter {
    shared: Rc<LuaShared>,
    lua: Lua,
}

impl LuaAdapter {
    pub fn new(registry: Arc<Registry>) -> BridgeResult<Self> {
        let lua = Lua::new();
        let config = registry.config().lua.clone();
        if let Some(limit) = config.memory_limit {
            lua.set_memory_limit(limit)?;
        }

        let list_meta = lua.create_table()?;
        list_meta.set("__name", "List")?;
        let wrappers = lua.create_table()?;
        let weak_values = lua.create_table()?;
        weak_values.set("__mode", "v")?;
        wrappers.set_metatable(Some(weak_values));

        let shared = Rc::new(LuaShared {
            registry,
            keys: RefKeys::new(Runtime::Lua),
            refs: lua.create_table()?,
            list_meta,
            wrappers,
        });
        let _ = lua.set_app_data(Rc::clone(&shared));
        module::install_searcher(&lua, config.module_extension)?;

        debug!(target: "bridge::lua", owner = shared.keys.owner(), "Lua state created");
        Ok(Self { shared, lua })
    }

    /// Forget parked values whose references were dropped.
    fn release_dropped(&self) {
        let released = self.shared.keys.take_released();
        if released.is_empty() {
            return;
        }
        trace!(target: "bridge::lua", count = released.len(), "releasing parked values");
        for key in released {
            let _ = self.shared.refs.raw_set(key, LuaValue::Nil);
        }
    }

    fn parked(&self, var: &Var) -> BridgeResult<LuaValue> {
        match var.as_script_ref() {
            Some(script_ref) => {
                let key = self.shared.keys.resolve(script_ref)?;
                match self.shared.refs.raw_get::<LuaValue>(key)? {
                    LuaValue::Nil => Err(BridgeError::NotFound(format!("{script_ref:?}"))),
                    value => Ok(value),
                }
            }
            None => Err(BridgeError::TypeMismatch {
                expected: crate::value::VarType::Object,
                found: var.tag(),
            }),
        }
    }

    fn call(&self, function: &LuaFunction, args: LuaMultiValue) -> BridgeResult<Var> {
        let result: LuaValue = function.call(args)?;
        convert::from_lua(&self.shared, result)
    }

    fn arguments(&self, args: VarList) -> BridgeResult<LuaMultiValue> {
        convert::into_lua_multi(&self.lua, &self.shared, args)
    }
}

impl ScriptAdapter for LuaAdapter {
    fn runtime(&self) -> Runtime {
        Runtime::Lua
    }

    fn owner_id(&self) -> u64 {
        self.shared.keys.owner()
    }

    fn execute(&self, code: &str, file_name: &str) -> BridgeResult<()> {
        self.release_dropped();
        self.lua
            .load(code)
            .set_name(format!("@{file_name}"))
            .exec()
            .map_err(|e| BridgeError::from(e).in_file(file_name))
    }

    fn eval(&self, code: &str) -> BridgeResult<Var> {
        self.release_dropped();
        let value: LuaValue = self.lua.load(code).set_name("=eval").eval()?;
        convert::from_lua(&self.shared, value)
    }

    fn install_module(&self, module: &SealedModule) -> BridgeResult<()> {
        module::install(&self.lua, &self.shared, module)
    }

    fn call_function(&self, name: &str, args: VarList) -> BridgeResult<Var> {
        self.release_dropped();
        match self.lua.globals().get::<LuaValue>(name)? {
            LuaValue::Function(function) => {
                let args = self.arguments(args)?;
                self.call(&function, args)
            }
            LuaValue::Nil => Err(BridgeError::NotFound(format!("Lua function `{name}`"))),
            other => Err(BridgeError::script(
                Runtime::Lua,
                format!("`{name}` is a {}, not a function", other.type_name()),
            )),
        }
    }

    fn var_call(&self, function: &Var, args: VarList) -> BridgeResult<Var> {
        self.release_dropped();
        match (function, self.parked(function)?) {
            (Var::Function(_), LuaValue::Function(function)) => {
                let args = self.arguments(args)?;
                self.call(&function, args)
            }
            _ => Err(BridgeError::TypeMismatch {
                expected: crate::value::VarType::Function,
                found: function.tag(),
            }),
        }
    }

    fn object_call(&self, object: &Var, method: &str, args: VarList) -> BridgeResult<Var> {
        if let Var::HostObject(host) = object {
            return host.call_method(Runtime::Lua, method, args);
        }
        self.release_dropped();
        let target = self.parked(object)?;
        let LuaValue::Table(table) = &target else {
            return Err(BridgeError::script(Runtime::Lua, "only tables have methods"));
        };
        match table.get::<LuaValue>(method)? {
            LuaValue::Function(function) => {
                let mut args = self.arguments(args)?;
                args.push_front(target.clone());
                self.call(&function, args)
            }
            _ => Err(BridgeError::MissingMethod {
                type_name: "Lua table".to_string(),
                method: method.to_string(),
            }),
        }
    }

    fn get_property(&self, object: &Var, name: &str) -> BridgeResult<Var> {
        if let Var::HostObject(host) = object {
            return Ok(host.get_property(name));
        }
        match self.parked(object)? {
            LuaValue::Table(table) => convert::from_lua(&self.shared, table.get::<LuaValue>(name)?),
            _ => Err(BridgeError::script(Runtime::Lua, "only tables have properties")),
        }
    }

    fn set_property(&self, object: &Var, name: &str, value: Var) -> BridgeResult<()> {
        if let Var::HostObject(host) = object {
            host.set_property(name, value);
            return Ok(());
        }
        match self.parked(object)? {
            LuaValue::Table(table) => {
                let value = convert::into_lua(&self.lua, &self.shared, &value)?;
                table.set(name, value)?;
                Ok(())
            }
            _ => Err(BridgeError::script(Runtime::Lua, "only tables have properties")),
        }
    }

    fn clear_caches(&self) {
        let ids: Vec<LuaValue> = self
            .shared
            .wrappers
            .clone()
            .pairs::<LuaValue, LuaValue>()
            .flatten()
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            let _ = self.shared.wrappers.raw_set(id, LuaValue::Nil);
        }
    }

    fn collect_garbage(&self) {
        self.release_dropped();
        // A second cycle finalizes objects resurrected by `__gc` during the first.
        for _ in 0..2 {
            if let Err(err) = self.lua.gc_collect() {
                debug!(target: "bridge::lua", %err, "garbage collection failed");
            }
        }
        trace!(target: "bridge::lua", used = self.lua.used_memory(), "collected garbage");
    }
}

impl Drop for LuaAdapter {
    fn drop(&mut self) {
        let _ = self.lua.remove_app_data::<Rc<LuaShared>>();
        debug!(target: "bridge::lua", owner = self.shared.keys.owner(), "Lua state closed");
    }
}
