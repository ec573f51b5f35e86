//! C boundary
//!
//! A flat `pxs_*` surface over one process-wide [`Bridge`]. Conventions:
//!
//! - Strings going in are borrowed NUL-terminated UTF-8. Strings coming out are owned by the
//!   caller and must be released with [`pxs_free_str`].
//! - `*mut Var` returned by a `pxs_*` function is owned by the caller and released with
//!   `pxs_free_var`, unless it is handed back to a function documented as consuming it.
//!   `pxs_list_get` is the exception: it borrows an item from the list.
//! - Failures return null / `false` / `0` and leave a message for [`pxs_last_error`].
//! - Runtimes are passed by their stable discriminant (`Lua = 0`, `Python = 1`,
//!   `JavaScript = 2`, `Php = 3`).

mod module;
mod var;

pub use module::*;
pub use var::*;

use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::bindings::Runtime;
use crate::config::BridgeConfig;
use crate::core::bridge::Bridge;
use crate::core::error::{BridgeError, BridgeResult};
use crate::value::Var;

static BRIDGE: RwLock<Option<Bridge>> = RwLock::new(None);

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Host-owned list of directory entries returned by a [`ReadDirFn`].
#[repr(C)]
pub struct DirHandle {
    pub length: usize,
    pub values: *const *const c_char,
}

/// Returns the file contents or null when the file does not exist. The string stays owned by
/// the host and only needs to live until the call returns.
pub type LoadFileFn = unsafe extern "C" fn(path: *const c_char) -> *const c_char;
/// Returns `true` when the file was written.
pub type WriteFileFn = unsafe extern "C" fn(path: *const c_char, contents: *const c_char) -> bool;
/// Lists the entries of a directory. The handle stays owned by the host.
pub type ReadDirFn = unsafe extern "C" fn(path: *const c_char) -> DirHandle;

pub(crate) fn set_last_error(err: impl ToString) {
    let message = err.to_string();
    debug!(target: "bridge::ffi", %message, "call failed");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// The live bridge, or `Finalized` when none is initialized.
pub(crate) fn current() -> BridgeResult<Bridge> {
    BRIDGE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(BridgeError::Finalized)
}

/// Run `f` against the live bridge, recording any error.
pub(crate) fn with_bridge<R>(f: impl FnOnce(&Bridge) -> BridgeResult<R>) -> Option<R> {
    clear_last_error();
    match current().and_then(|bridge| f(&bridge)) {
        Ok(value) => Some(value),
        Err(err) => {
            set_last_error(err);
            None
        }
    }
}

pub(crate) fn runtime_from(value: u32) -> BridgeResult<Runtime> {
    Runtime::from_i64(i64::from(value))
        .ok_or_else(|| BridgeError::NotFound(format!("runtime {value}")))
}

/// Borrow a C string as `&str`.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn read_str<'a>(ptr: *const c_char) -> BridgeResult<&'a str> {
    if ptr.is_null() {
        return Err(BridgeError::Conversion("null string".to_string()));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| BridgeError::Conversion(e.to_string()))
}

/// Hand a string to the caller. Interior NULs are dropped.
pub(crate) fn into_c_string(text: &str) -> *mut c_char {
    CString::new(text.replace('\0', ""))
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

/// Version of the C surface.
#[no_mangle]
pub extern "C" fn pxs_version() -> u32 {
    1
}

/// Start the process-wide bridge. Configuration comes from `bridge.toml` (or `bridge.json`)
/// and `BRIDGE_*` environment variables. Calling it again while a bridge is live is a no-op.
#[no_mangle]
pub extern "C" fn pxs_initialize() -> bool {
    initialize(BridgeConfig::load_or_default())
}

/// Start the process-wide bridge from a TOML configuration file.
///
/// # Safety
/// `config_path` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pxs_initialize_with_config(config_path: *const c_char) -> bool {
    clear_last_error();
    let config = read_str(config_path).and_then(|path| {
        BridgeConfig::from_toml_file(path).map_err(BridgeError::from)
    });
    match config {
        Ok(config) => initialize(config),
        Err(err) => {
            set_last_error(err);
            false
        }
    }
}

fn initialize(config: BridgeConfig) -> bool {
    clear_last_error();
    let mut slot = BRIDGE.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return true;
    }
    match Bridge::initialize(config) {
        Ok(bridge) => {
            *slot = Some(bridge);
            true
        }
        Err(err) => {
            set_last_error(err);
            false
        }
    }
}

/// Tear down the bridge. Unsealed module handles are discarded; a later
/// [`pxs_initialize`] starts a fresh bridge.
#[no_mangle]
pub extern "C" fn pxs_finalize() {
    let bridge = BRIDGE.write().unwrap_or_else(PoisonError::into_inner).take();
    module::discard_all();
    if let Some(bridge) = bridge {
        bridge.finalize();
    }
}

/// Whether a bridge is live.
#[no_mangle]
pub extern "C" fn pxs_is_initialized() -> bool {
    current().is_ok()
}

/// The message left by the last failing call on this thread, or null.
#[no_mangle]
pub extern "C" fn pxs_last_error() -> *mut c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_deref()
            .map_or(ptr::null_mut(), into_c_string)
    })
}

/// Release a string returned by this library.
///
/// # Safety
/// `string` must be null or come from a `pxs_*` function, and must not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn pxs_free_str(string: *mut c_char) {
    if !string.is_null() {
        drop(CString::from_raw(string));
    }
}

/// Run `code`. Returns an owned string: empty on success, the error message otherwise.
///
/// # Safety
/// `code` and `file_name` must be valid C strings.
#[no_mangle]
pub unsafe extern "C" fn pxs_execute(
    runtime: u32,
    code: *const c_char,
    file_name: *const c_char,
) -> *mut c_char {
    let message = (|| -> BridgeResult<String> {
        let runtime = runtime_from(runtime)?;
        let code = read_str(code)?;
        let file_name = read_str(file_name)?;
        Ok(current()?.execute(runtime, code, file_name))
    })()
    .unwrap_or_else(|err| err.to_string());
    into_c_string(&message)
}

/// Evaluate an expression. Returns an owned `Var`, or null on error.
///
/// # Safety
/// `code` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pxs_eval(runtime: u32, code: *const c_char) -> *mut Var {
    with_bridge(|bridge| bridge.eval(runtime_from(runtime)?, read_str(code)?))
        .map_or(ptr::null_mut(), var::into_raw)
}

/// Call a global script function. `args` is a borrowed `List` var or null.
///
/// # Safety
/// `name` must be a valid C string; `args` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_call_function(
    runtime: u32,
    name: *const c_char,
    args: *const Var,
) -> *mut Var {
    with_bridge(|bridge| {
        bridge.call_function(runtime_from(runtime)?, read_str(name)?, var::arg_list(args)?)
    })
    .map_or(ptr::null_mut(), var::into_raw)
}

/// Call a `Function` var.
///
/// # Safety
/// `function` must be a live `Var`; `args` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_var_call(function: *const Var, args: *const Var) -> *mut Var {
    with_bridge(|bridge| bridge.var_call(var::borrow(function)?, var::arg_list(args)?))
        .map_or(ptr::null_mut(), var::into_raw)
}

/// Call a method on an `Object` or `HostObject` var. `runtime` is the caller's runtime as
/// seen by host methods.
///
/// # Safety
/// `object` must be a live `Var`, `method` a valid C string, `args` null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_object_call(
    runtime: u32,
    object: *const Var,
    method: *const c_char,
    args: *const Var,
) -> *mut Var {
    with_bridge(|bridge| {
        bridge.object_call(
            runtime_from(runtime)?,
            var::borrow(object)?,
            read_str(method)?,
            var::arg_list(args)?,
        )
    })
    .map_or(ptr::null_mut(), var::into_raw)
}

/// Read a property of an `Object` or `HostObject` var.
///
/// # Safety
/// `object` must be a live `Var` and `name` a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pxs_get_property(object: *const Var, name: *const c_char) -> *mut Var {
    with_bridge(|bridge| bridge.get_property(var::borrow(object)?, read_str(name)?))
        .map_or(ptr::null_mut(), var::into_raw)
}

/// Write a property. Consumes `value`.
///
/// # Safety
/// `object` must be a live `Var`, `name` a valid C string, `value` an owned `Var` or null.
#[no_mangle]
pub unsafe extern "C" fn pxs_set_property(
    object: *const Var,
    name: *const c_char,
    value: *mut Var,
) -> bool {
    let value = var::take(value);
    with_bridge(|bridge| bridge.set_property(var::borrow(object)?, read_str(name)?, value))
        .is_some()
}

/// Build the calling thread's interpreters.
#[no_mangle]
pub extern "C" fn pxs_start_thread() -> bool {
    with_bridge(|bridge| bridge.start_thread()).is_some()
}

/// Drop the calling thread's interpreters.
#[no_mangle]
pub extern "C" fn pxs_stop_thread() {
    if let Ok(bridge) = current() {
        bridge.stop_thread();
    }
}

/// Drop per-thread caches; `collect` also schedules garbage collection on every thread.
#[no_mangle]
pub extern "C" fn pxs_clear_state(collect: bool) {
    if let Ok(bridge) = current() {
        bridge.clear_state(collect);
    }
}

/// Install the file reader used by `require`/`import` and `json.load`.
#[no_mangle]
pub extern "C" fn pxs_set_file_reader(reader: LoadFileFn) -> bool {
    with_bridge(|bridge| {
        bridge.set_file_reader(Arc::new(move |path: &str| {
            let path = CString::new(path).ok()?;
            // SAFETY: the host promises `reader` returns null or a valid C string.
            unsafe {
                let contents = reader(path.as_ptr());
                if contents.is_null() {
                    return None;
                }
                CStr::from_ptr(contents).to_str().ok().map(str::to_string)
            }
        }));
        Ok(())
    })
    .is_some()
}

/// Install the file writer used by `json.save`.
#[no_mangle]
pub extern "C" fn pxs_set_file_writer(writer: WriteFileFn) -> bool {
    with_bridge(|bridge| {
        bridge.set_file_writer(Arc::new(move |path: &str, contents: &str| {
            let c_path =
                CString::new(path).map_err(|e| BridgeError::Conversion(e.to_string()))?;
            let c_contents =
                CString::new(contents).map_err(|e| BridgeError::Conversion(e.to_string()))?;
            // SAFETY: both strings outlive the call.
            if unsafe { writer(c_path.as_ptr(), c_contents.as_ptr()) } {
                Ok(())
            } else {
                Err(BridgeError::Callback(format!("cannot write {path}")))
            }
        }));
        Ok(())
    })
    .is_some()
}

/// Install the directory reader used for package lookups.
#[no_mangle]
pub extern "C" fn pxs_set_dir_reader(dir_reader: ReadDirFn) -> bool {
    with_bridge(|bridge| {
        bridge.set_dir_reader(Arc::new(move |path: &str| {
            let Ok(c_path) = CString::new(path) else {
                return Vec::new();
            };
            // SAFETY: the host promises a handle of `length` valid C strings.
            unsafe { dir_entries(&dir_reader(c_path.as_ptr())) }
        }));
        Ok(())
    })
    .is_some()
}

/// # Safety
/// `handle.values` must be null or point to `handle.length` valid C strings.
unsafe fn dir_entries(handle: &DirHandle) -> Vec<String> {
    if handle.values.is_null() || handle.length == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(handle.values, handle.length)
        .iter()
        .filter(|entry| !entry.is_null())
        .filter_map(|&entry| match CStr::from_ptr(entry).to_str() {
            Ok(entry) => Some(entry.to_string()),
            Err(err) => {
                warn!(target: "bridge::ffi", %err, "skipping non UTF-8 directory entry");
                None
            }
        })
        .collect()
}
