//! `Var` construction, inspection and list operations

use std::ffi::{c_char, c_void};
use std::ptr;

use super::{into_c_string, read_str, set_last_error};
use crate::core::error::{BridgeError, BridgeResult};
use crate::object::PixelObject;
use crate::value::{Var, VarList, VarType};

use super::module::HostPtr;

pub(crate) fn into_raw(var: Var) -> *mut Var {
    Box::into_raw(Box::new(var))
}

/// Take ownership of a caller-supplied var. Null reads as `Null`.
///
/// # Safety
/// `var` must be null or an owned pointer from this library.
pub(crate) unsafe fn take(var: *mut Var) -> Var {
    if var.is_null() {
        Var::Null
    } else {
        *Box::from_raw(var)
    }
}

/// # Safety
/// `var` must be null or a live `Var`.
pub(crate) unsafe fn borrow<'a>(var: *const Var) -> BridgeResult<&'a Var> {
    var.as_ref()
        .ok_or_else(|| BridgeError::Conversion("null var".to_string()))
}

/// Arguments for a call: null means none, otherwise a `List` var (copied).
///
/// # Safety
/// `args` must be null or a live `Var`.
pub(crate) unsafe fn arg_list(args: *const Var) -> BridgeResult<VarList> {
    match args.as_ref() {
        None => Ok(VarList::new()),
        Some(var) => var.try_list().cloned(),
    }
}

#[no_mangle]
pub extern "C" fn pxs_new_int(value: i64) -> *mut Var {
    into_raw(Var::new_i64(value))
}

#[no_mangle]
pub extern "C" fn pxs_new_uint(value: u64) -> *mut Var {
    into_raw(Var::new_u64(value))
}

#[no_mangle]
pub extern "C" fn pxs_new_float(value: f64) -> *mut Var {
    into_raw(Var::new_f64(value))
}

#[no_mangle]
pub extern "C" fn pxs_new_bool(value: bool) -> *mut Var {
    into_raw(Var::new_bool(value))
}

#[no_mangle]
pub extern "C" fn pxs_new_null() -> *mut Var {
    into_raw(Var::Null)
}

#[no_mangle]
pub extern "C" fn pxs_new_list() -> *mut Var {
    into_raw(Var::new_list())
}

/// Copy a C string into a new `String` var. Returns null for invalid UTF-8.
///
/// # Safety
/// `value` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pxs_new_string(value: *const c_char) -> *mut Var {
    match read_str(value) {
        Ok(text) => into_raw(Var::new_string(text)),
        Err(err) => {
            set_last_error(err);
            ptr::null_mut()
        }
    }
}

/// Wrap an object from `pxs_new_object`. Consumes `object`; it can gain no more methods.
///
/// # Safety
/// `object` must come from `pxs_new_object` and not have been consumed yet.
#[no_mangle]
pub unsafe extern "C" fn pxs_new_host(object: *mut PixelObject) -> *mut Var {
    if object.is_null() {
        set_last_error("null object");
        return ptr::null_mut();
    }
    into_raw(Var::new_host_object(*Box::from_raw(object)))
}

/// Deep copy of a var. Script references are shared, not duplicated.
///
/// # Safety
/// `var` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_clone_var(var: *const Var) -> *mut Var {
    var.as_ref()
        .map_or(ptr::null_mut(), |var| into_raw(var.clone()))
}

/// Release a var.
///
/// # Safety
/// `var` must be null or an owned pointer from this library, freed at most once.
#[no_mangle]
pub unsafe extern "C" fn pxs_free_var(var: *mut Var) {
    drop(take(var));
}

/// Tag of a var; `Null` for a null pointer.
///
/// # Safety
/// `var` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_var_type(var: *const Var) -> VarType {
    var.as_ref().map_or(VarType::Null, Var::tag)
}

/// # Safety
/// `var` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_var_is(var: *const Var, tag: u32) -> bool {
    var.as_ref().is_some_and(|var| var.tag() as u32 == tag)
}

/// `Int64` value, or 0 for any other tag.
///
/// # Safety
/// `var` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_get_int(var: *const Var) -> i64 {
    var.as_ref().map_or(0, Var::as_i64)
}

/// # Safety
/// `var` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_get_uint(var: *const Var) -> u64 {
    var.as_ref().map_or(0, Var::as_u64)
}

/// # Safety
/// `var` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_get_float(var: *const Var) -> f64 {
    var.as_ref().map_or(0.0, Var::as_f64)
}

/// # Safety
/// `var` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_get_bool(var: *const Var) -> bool {
    var.as_ref().is_some_and(Var::as_bool)
}

/// Owned copy of a `String` var, or null for any other tag.
///
/// # Safety
/// `var` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_get_string(var: *const Var) -> *mut c_char {
    match var.as_ref() {
        Some(Var::String(text)) => into_c_string(text),
        _ => ptr::null_mut(),
    }
}

/// Native pointer behind a `HostObject` var created through `pxs_new_object`, or null.
///
/// # Safety
/// `var` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_get_host(var: *const Var) -> *mut c_void {
    var.as_ref()
        .and_then(Var::as_host_object)
        .and_then(|object| object.with_data(|data: &mut HostPtr| data.0))
        .unwrap_or(ptr::null_mut())
}

/// Instance id of a `HostObject` var, or 0.
///
/// # Safety
/// `var` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_get_object_id(var: *const Var) -> u64 {
    var.as_ref()
        .and_then(Var::as_host_object)
        .map_or(0, |object| object.id())
}

/// Number of items, or -1 when `list` is not a `List`.
///
/// # Safety
/// `list` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_list_len(list: *const Var) -> i64 {
    list.as_ref()
        .and_then(Var::as_list)
        .map_or(-1, |list| list.len() as i64)
}

/// The item at `index` (negative counts from the end), or null.
///
/// The pointer is borrowed from the list: do not free it. Changes made through it, such as
/// `pxs_list_add` on a nested list, are visible in `list`. It is invalidated when `list` is
/// freed or the item is replaced. Use `pxs_clone_var` to keep a copy.
///
/// # Safety
/// `list` must be null or a live `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_list_get(list: *mut Var, index: i64) -> *mut Var {
    list.as_mut()
        .and_then(Var::as_list_mut)
        .and_then(|list| list.get_mut(index))
        .map_or(ptr::null_mut(), |item| item as *mut Var)
}

/// Append `item` (consumed). Returns its index, or -1 when `list` is not a `List`.
///
/// # Safety
/// `list` must be a live `Var`; `item` null or an owned `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_list_add(list: *mut Var, item: *mut Var) -> i64 {
    let item = take(item);
    list.as_mut()
        .and_then(Var::as_list_mut)
        .map_or(-1, |list| list.add(item) as i64)
}

/// Replace the item at `index` with `item` (consumed).
///
/// # Safety
/// `list` must be a live `Var`; `item` null or an owned `Var`.
#[no_mangle]
pub unsafe extern "C" fn pxs_list_set(list: *mut Var, index: i64, item: *mut Var) -> bool {
    let item = take(item);
    list.as_mut()
        .and_then(Var::as_list_mut)
        .is_some_and(|list| list.set(index, item))
}

/// Build a `PixelObject` around host data. `destructor` runs once on `ptr` when the last
/// reference is gone.
///
/// # Safety
/// `type_name` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pxs_new_object(
    ptr: *mut c_void,
    destructor: Option<unsafe extern "C" fn(*mut c_void)>,
    type_name: *const c_char,
) -> *mut PixelObject {
    let type_name = match read_str(type_name) {
        Ok(name) => name,
        Err(err) => {
            set_last_error(err);
            return ptr::null_mut();
        }
    };
    let mut object = PixelObject::new(HostPtr(ptr), type_name);
    if let Some(destructor) = destructor {
        object = object.with_destructor(move |data| {
            if let Some(HostPtr(ptr)) = data.downcast_ref::<HostPtr>() {
                // SAFETY: the host handed us `ptr` together with its destructor.
                unsafe { destructor(*ptr) };
            }
        });
    }
    Box::into_raw(Box::new(object))
}

/// Discard an object that was never wrapped with [`pxs_new_host`]. Its destructor runs.
///
/// # Safety
/// `object` must be null or come from `pxs_new_object` and not have been consumed.
#[no_mangle]
pub unsafe extern "C" fn pxs_free_object(object: *mut PixelObject) {
    if !object.is_null() {
        drop(Box::from_raw(object));
    }
}
