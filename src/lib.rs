//! # Script Bridge
//!
//! One value model and one object model for exposing host code to embedded scripting runtimes.
//!
//! ## Features
//!
//! - **Uniform values**: [`Var`] carries integers, floats, strings, lists, script objects,
//!   script functions and host objects across every runtime
//! - **Host objects**: [`PixelObject`] exposes native data with named methods and properties
//! - **Modules**: build a [`Module`] tree once, seal it, and every runtime on every thread
//!   installs it
//! - **Runtimes**: Lua (`mlua`), JavaScript (`rquickjs`) and, behind the `python` feature,
//!   Python (`pyo3`). PHP is recognized but has no engine in this build
//! - **Threads**: interpreter state is per thread; [`ScriptWorker`] drives one from a
//!   dedicated thread
//! - **C boundary**: the `pxs_*` functions in [`ffi`]
//!
//! ## Architecture Design
//!
//! - **Registry**: process-wide function table, sealed module list and file hooks
//! - **Adapters**: one per runtime, marshalling [`Var`] in and out of the interpreter
//! - **Bridge**: the entry point, routing each call to the calling thread's adapter
//!
//! ### Example
//!
//! ```ignore
//! use script_bridge::{Bridge, BridgeConfig, Callback, Module, Runtime, Var};
//!
//! let bridge = Bridge::initialize(BridgeConfig::load_or_default())?;
//! let mut math = Module::new("math2");
//! math.add_callback(Callback::new("double", |args, _| {
//!     let n = args.as_list().and_then(|l| l.get(1)).map_or(0, Var::as_i64);
//!     Var::new_i64(n * 2)
//! }));
//! bridge.add_module(math)?;
//! assert_eq!(bridge.execute(Runtime::Lua, "assert(require('math2').double(21) == 42)", "main.lua"), "");
//! ```
//!
//! ## Modules
//!
//! - [`core`]: bridge entry point, registry and errors
//! - [`value`]: the [`Var`] model
//! - [`bindings`]: runtime adapters
//! - [`scripting`]: built-in `json` module and [`ScriptWorker`]
//! - [`ffi`]: C boundary

/// Core bridge functionality: entry point, registry, per-thread state and errors
#[macro_use]
pub mod core;
/// Language adapters
pub mod bindings;
/// Configuration and logging setup
pub mod config;
/// Function dispatch table and callbacks
pub mod dispatch;
/// C boundary
pub mod ffi;
/// File, directory and write hooks
pub mod hooks;
/// Module tree and sealing
pub mod module;
/// Host pseudo-objects
pub mod object;
/// Built-in script modules and the script worker
pub mod scripting;
/// Cross-runtime value model
pub mod value;

pub use crate::bindings::Runtime;
pub use crate::config::BridgeConfig;
pub use crate::core::{Bridge, BridgeError, BridgeResult};
pub use crate::dispatch::{fail, Callback, Opaque};
pub use crate::module::Module;
pub use crate::object::PixelObject;
pub use crate::scripting::ScriptWorker;
pub use crate::value::{Var, VarList, VarType};
