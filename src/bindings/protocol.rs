//! Unified Adapter Protocol
//!
//! This protocol defines the language-agnostic interface between the bridge core and each
//! embedded interpreter, plus the command/result pair used to drive a runtime from another
//! thread.

use crate::core::error::BridgeResult;
use crate::module::SealedModule;
use crate::value::{Var, VarList};

use super::Runtime;

/// Commands sent to a [`ScriptWorker`](crate::scripting::ScriptWorker)
#[derive(Debug, Clone)]
pub enum ScriptCommand {
    /// Run a chunk of code
    Execute {
        runtime: Runtime,
        code: String,
        file_name: String,
    },
    /// Evaluate an expression and return its value
    Eval { runtime: Runtime, code: String },
    /// Call a global script function by name
    CallFunction {
        runtime: Runtime,
        name: String,
        args: Vec<Var>,
    },
    /// Drop per-thread caches, optionally collecting garbage
    ClearState { collect: bool },
}

/// Result of one [`ScriptCommand`]
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptResult {
    Success,
    Value(Var),
    Error(String),
}

impl ScriptResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ScriptResult::Error(_))
    }
}

impl From<BridgeResult<()>> for ScriptResult {
    fn from(result: BridgeResult<()>) -> Self {
        match result {
            Ok(()) => ScriptResult::Success,
            Err(e) => ScriptResult::Error(e.to_string()),
        }
    }
}

impl From<BridgeResult<Var>> for ScriptResult {
    fn from(result: BridgeResult<Var>) -> Self {
        match result {
            Ok(value) => ScriptResult::Value(value),
            Err(e) => ScriptResult::Error(e.to_string()),
        }
    }
}

/// Trait for language-specific runtime adapters
///
/// An adapter owns one interpreter on one thread. All methods take `&self`: native callbacks
/// may re-enter the same adapter while a call is in flight, so adapters keep their own
/// mutable state behind short-lived borrows.
///
/// Marshalling between [`Var`] and interpreter values lives in each adapter's `convert`
/// module, since interpreter values are tied to the interpreter's own lifetimes.
pub trait ScriptAdapter {
    /// The language this adapter runs
    fn runtime(&self) -> Runtime;

    /// Id stamped into every `Object`/`Function` var this adapter produces
    fn owner_id(&self) -> u64;

    /// Parse and run `code`. Errors carry `file_name`.
    fn execute(&self, code: &str, file_name: &str) -> BridgeResult<()>;

    /// Evaluate an expression and marshal its value out
    fn eval(&self, code: &str) -> BridgeResult<Var>;

    /// Install a sealed module into the interpreter's namespace
    fn install_module(&self, module: &SealedModule) -> BridgeResult<()>;

    /// Call a global function by name
    fn call_function(&self, name: &str, args: VarList) -> BridgeResult<Var>;

    /// Call a `Function` var produced by this adapter
    fn var_call(&self, function: &Var, args: VarList) -> BridgeResult<Var>;

    /// Call a method on an `Object` var produced by this adapter
    fn object_call(&self, object: &Var, method: &str, args: VarList) -> BridgeResult<Var>;

    fn get_property(&self, object: &Var, name: &str) -> BridgeResult<Var>;

    fn set_property(&self, object: &Var, name: &str, value: Var) -> BridgeResult<()>;

    /// Drop caches that only exist to speed up repeated marshalling
    fn clear_caches(&self);

    /// Run a full garbage collection pass
    fn collect_garbage(&self);
}
