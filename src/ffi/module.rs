//! Module handles and native callbacks
//!
//! Modules are built behind `u64` handles. Handle `0` names the bridge's implicit top-level
//! module: additions to it are sealed immediately. Any other handle stays mutable until
//! [`pxs_add_module`] seals it or [`pxs_add_submodule`] moves it into a parent; after that the
//! handle is dead and further use fails.

use std::collections::HashMap;
use std::ffi::{c_char, c_void};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::debug;

use super::var::take;
use super::{read_str, set_last_error, with_bridge};
use crate::core::error::{BridgeError, BridgeResult};
use crate::dispatch::{fail, Callback};
use crate::object::PixelObject;
use crate::module::Module;
use crate::value::Var;

/// Handle of the implicit top-level module.
pub const PXS_TOP_LEVEL: u64 = 0;

/// Native callback.
///
/// `args` is a `List` var borrowed for the duration of the call: index 0 is the calling
/// runtime, index 1 is `self` for object methods. The return value is an owned var (null means
/// `Null`). Report errors with [`pxs_fail`].
pub type PxsCallback = unsafe extern "C" fn(args: *mut Var, opaque: *mut c_void) -> *mut Var;

/// Host pointer carried through the bridge without being dereferenced.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HostPtr(pub(crate) *mut c_void);

// SAFETY: the bridge never dereferences the pointer; the host decides which threads use it.
unsafe impl Send for HostPtr {}
unsafe impl Sync for HostPtr {}

impl HostPtr {
    pub(crate) fn get(self) -> *mut c_void {
        self.0
    }
}

static NEXT_MODULE: AtomicU64 = AtomicU64::new(1);

fn modules() -> MutexGuard<'static, HashMap<u64, Module>> {
    static MODULES: OnceLock<Mutex<HashMap<u64, Module>>> = OnceLock::new();
    MODULES
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn discard_all() {
    modules().clear();
}

fn take_module(handle: u64) -> BridgeResult<Module> {
    modules()
        .remove(&handle)
        .ok_or_else(|| BridgeError::NotFound(format!("module handle {handle}")))
}

/// Apply `f` to the module behind `handle`, or to a fresh top-level module sealed right away.
fn with_module(handle: u64, f: impl FnOnce(&mut Module)) -> bool {
    with_bridge(|bridge| {
        if handle == PXS_TOP_LEVEL {
            let mut module = Module::top_level();
            f(&mut module);
            return bridge.add_module(module).map(drop);
        }
        let mut modules = modules();
        let module = modules
            .get_mut(&handle)
            .ok_or_else(|| BridgeError::NotFound(format!("module handle {handle}")))?;
        f(module);
        Ok(())
    })
    .is_some()
}

/// Wrap a C callback as a [`Callback`].
fn native_callback(name: &str, callback: PxsCallback, opaque: *mut c_void) -> Callback {
    let opaque = HostPtr(opaque);
    Callback::new(name, move |args: &Var, _| {
        let argv = Box::into_raw(Box::new(args.clone()));
        // SAFETY: `argv` is live for the call and freed right after; the host owns `opaque`.
        unsafe {
            let result = callback(argv, opaque.get());
            drop(Box::from_raw(argv));
            take(result)
        }
    })
}

/// Create an empty module. Returns its handle, or 0 on error.
///
/// # Safety
/// `name` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pxs_new_module(name: *const c_char) -> u64 {
    let name = match read_str(name) {
        Ok(name) if !name.is_empty() => name,
        Ok(_) => {
            set_last_error(BridgeError::InvalidName(String::new()));
            return 0;
        }
        Err(err) => {
            set_last_error(err);
            return 0;
        }
    };
    with_bridge(|_| {
        let handle = NEXT_MODULE.fetch_add(1, Ordering::Relaxed);
        modules().insert(handle, Module::new(name));
        debug!(target: "bridge::ffi", handle, name, "module created");
        Ok(handle)
    })
    .unwrap_or(0)
}

/// Add a variable. Consumes `value`.
///
/// # Safety
/// `name` must be a valid C string; `value` null or an owned `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_add_variable(module: u64, name: *const c_char, value: *mut Var) -> bool {
    let value = take(value);
    match read_str(name) {
        Ok(name) => with_module(module, |m| m.add_variable(name, value)),
        Err(err) => {
            set_last_error(err);
            false
        }
    }
}

/// Add a function.
///
/// # Safety
/// `name` must be a valid C string; `callback` and `opaque` must stay valid while the bridge
/// lives.
#[no_mangle]
pub unsafe extern "C" fn pxs_add_callback(
    module: u64,
    name: *const c_char,
    callback: PxsCallback,
    opaque: *mut c_void,
) -> bool {
    match read_str(name) {
        Ok(name) => with_module(module, |m| {
            m.add_callback(native_callback(name, callback, opaque))
        }),
        Err(err) => {
            set_last_error(err);
            false
        }
    }
}

/// Add an object constructor. Scripts call it like a function; it should return a var from
/// `pxs_new_host`.
///
/// # Safety
/// Same as [`pxs_add_callback`].
#[no_mangle]
pub unsafe extern "C" fn pxs_add_object(
    module: u64,
    name: *const c_char,
    constructor: PxsCallback,
    opaque: *mut c_void,
) -> bool {
    match read_str(name) {
        Ok(name) => with_module(module, |m| {
            m.add_object(native_callback(name, constructor, opaque))
        }),
        Err(err) => {
            set_last_error(err);
            false
        }
    }
}

/// Move `child` into `parent`. The child handle dies.
#[no_mangle]
pub extern "C" fn pxs_add_submodule(parent: u64, child: u64) -> bool {
    if parent == child {
        set_last_error(BridgeError::InvalidName("a module cannot contain itself".to_string()));
        return false;
    }
    let child = match take_module(child) {
        Ok(child) => child,
        Err(err) => {
            set_last_error(err);
            return false;
        }
    };
    with_module(parent, |m| m.add_module(child))
}

/// Seal a module into the bridge. The handle dies whether or not sealing succeeds.
#[no_mangle]
pub extern "C" fn pxs_add_module(module: u64) -> bool {
    with_bridge(|bridge| {
        let module = take_module(module)?;
        bridge.add_module(module).map(drop)
    })
    .is_some()
}

/// Discard a module that was never sealed.
#[no_mangle]
pub extern "C" fn pxs_free_module(module: u64) {
    modules().remove(&module);
}

/// Add a method to an object from `pxs_new_object`. A method with the same name is replaced.
///
/// # Safety
/// `object` must come from `pxs_new_object` and not have been consumed; `name` must be a valid
/// C string.
#[no_mangle]
pub unsafe extern "C" fn pxs_object_add_callback(
    object: *mut PixelObject,
    name: *const c_char,
    callback: PxsCallback,
    opaque: *mut c_void,
) -> bool {
    let Some(object) = object.as_mut() else {
        set_last_error("null object");
        return false;
    };
    match read_str(name) {
        Ok(name) => {
            object.add_callback(native_callback(name, callback, opaque));
            true
        }
        Err(err) => {
            set_last_error(err);
            false
        }
    }
}

/// Report an error from inside a callback. Return the result (null) from the callback.
///
/// # Safety
/// `message` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pxs_fail(message: *const c_char) -> *mut Var {
    let message = read_str(message).unwrap_or("native callback failed");
    fail(message);
    std::ptr::null_mut()
}
