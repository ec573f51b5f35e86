//! C 接口测试
//!
//! 所有测试共享同一个全局桥接，因此用一把锁串行执行。

use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use script_bridge::ffi::*;
use script_bridge::{Var, VarType};

static SERIAL: Mutex<()> = Mutex::new(());
static FREED: AtomicUsize = AtomicUsize::new(0);

const LUA: u32 = 0;
const JAVASCRIPT: u32 = 2;
const PHP: u32 = 3;

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

fn c(text: &str) -> CString {
    CString::new(text).unwrap()
}

/// 取回库返回的字符串并释放
fn take_string(ptr: *mut c_char) -> String {
    assert!(!ptr.is_null());
    let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
    unsafe { pxs_free_str(ptr) };
    text
}

fn execute(runtime: u32, code: &str) -> String {
    let code = c(code);
    let file = c("test");
    take_string(unsafe { pxs_execute(runtime, code.as_ptr(), file.as_ptr()) })
}

fn eval(runtime: u32, code: &str) -> Var {
    let code = c(code);
    let result = unsafe { pxs_eval(runtime, code.as_ptr()) };
    assert!(!result.is_null(), "eval failed: {:?}", last_error());
    unsafe { *Box::from_raw(result) }
}

fn last_error() -> Option<String> {
    let ptr = pxs_last_error();
    (!ptr.is_null()).then(|| take_string(ptr))
}

unsafe extern "C" fn double(args: *mut Var, _opaque: *mut c_void) -> *mut Var {
    let n = pxs_list_get(args, 1);
    let result = pxs_new_int(pxs_get_int(n) * 2);
    result
}

unsafe extern "C" fn add_offset(args: *mut Var, opaque: *mut c_void) -> *mut Var {
    let offset = *(opaque as *const i64);
    let n = pxs_list_get(args, 1);
    let result = pxs_new_int(pxs_get_int(n) + offset);
    result
}

unsafe extern "C" fn always_fails(_args: *mut Var, _opaque: *mut c_void) -> *mut Var {
    pxs_fail(b"native failure\0".as_ptr().cast())
}

unsafe extern "C" fn free_counter(ptr: *mut c_void) {
    drop(Box::from_raw(ptr as *mut i64));
    FREED.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn bump(args: *mut Var, _opaque: *mut c_void) -> *mut Var {
    let this = pxs_list_get(args, 1);
    let count = pxs_get_host(this) as *mut i64;
    *count += 1;
    let result = pxs_new_int(*count);
    result
}

unsafe extern "C" fn make_counter(_args: *mut Var, _opaque: *mut c_void) -> *mut Var {
    let data = Box::into_raw(Box::new(0i64)) as *mut c_void;
    let object = pxs_new_object(data, Some(free_counter), b"Counter\0".as_ptr().cast());
    pxs_object_add_callback(object, b"bump\0".as_ptr().cast(), bump, ptr::null_mut());
    pxs_new_host(object)
}

unsafe extern "C" fn read_file(path: *const c_char) -> *const c_char {
    if CStr::from_ptr(path).to_bytes() == b"greeting.lua" {
        b"return { text = 'hello from a file' }\0".as_ptr().cast()
    } else {
        ptr::null()
    }
}

#[test]
fn test_lifecycle() {
    let _guard = serial();
    assert!(pxs_initialize());
    assert!(pxs_is_initialized());
    assert_eq!(execute(LUA, "x = 1"), "");
    assert!(execute(PHP, "<?php").contains("PHP"));
    assert!(execute(LUA, "error('broken')").contains("broken"));

    pxs_finalize();
    assert!(!pxs_is_initialized());
    assert!(execute(LUA, "x = 1").contains("finalized"));

    assert!(pxs_initialize());
    assert_eq!(eval(LUA, "x"), Var::Null);
    pxs_finalize();
}

#[test]
fn test_module_handles() {
    let _guard = serial();
    assert!(pxs_initialize());
    unsafe {
        let game = pxs_new_module(c("game").as_ptr());
        let math = pxs_new_module(c("math2").as_ptr());
        assert!(game != 0 && math != 0);

        assert!(pxs_add_variable(game, c("title").as_ptr(), pxs_new_string(c("Quest").as_ptr())));
        assert!(pxs_add_callback(math, c("double").as_ptr(), double, ptr::null_mut()));
        assert!(pxs_add_submodule(game, math));
        // 子模块句柄已转移
        assert!(!pxs_add_callback(math, c("double").as_ptr(), double, ptr::null_mut()));

        assert!(pxs_add_module(game));
        // 封装后句柄失效
        assert!(!pxs_add_variable(game, c("late").as_ptr(), pxs_new_null()));
        assert!(last_error().is_some());
        assert!(!pxs_add_module(game));

        let mut offset = 100i64;
        let offset_ptr = &mut offset as *mut i64 as *mut c_void;
        assert!(pxs_add_callback(PXS_TOP_LEVEL, c("add_offset").as_ptr(), add_offset, offset_ptr));

        assert_eq!(
            execute(
                LUA,
                "assert(require('game').title == 'Quest'); assert(require('game.math2').double(4) == 8)"
            ),
            ""
        );
        assert_eq!(eval(JAVASCRIPT, "game.math2.double(5)"), Var::new_i64(10));
        assert_eq!(eval(LUA, "add_offset(1)"), Var::new_i64(101));

        let scratch = pxs_new_module(c("scratch").as_ptr());
        pxs_free_module(scratch);
        assert!(!pxs_add_module(scratch));
        assert_eq!(pxs_new_module(c("").as_ptr()), 0);
    }
    pxs_finalize();
}

#[test]
fn test_var_accessors_and_lists() {
    let _guard = serial();
    unsafe {
        let int = pxs_new_int(-5);
        assert_eq!(pxs_get_int(int), -5);
        assert_eq!(pxs_get_uint(int), 0);
        assert!(pxs_var_is(int, VarType::Int64 as u32));
        assert_eq!(pxs_var_type(int), VarType::Int64);

        let text = pxs_new_string(c("héllo").as_ptr());
        assert_eq!(take_string(pxs_get_string(text)), "héllo");
        assert!(pxs_get_string(int).is_null());

        let list = pxs_new_list();
        assert_eq!(pxs_list_add(list, int), 0);
        assert_eq!(pxs_list_add(list, text), 1);
        assert_eq!(pxs_list_add(list, pxs_new_bool(true)), 2);
        assert_eq!(pxs_list_len(list), 3);

        let last = pxs_list_get(list, -1);
        assert!(pxs_get_bool(last));
        assert!(pxs_list_set(list, 0, pxs_new_float(1.5)));
        let first = pxs_list_get(list, 0);
        assert_eq!(pxs_get_float(first), 1.5);
        assert!(pxs_list_get(list, 3).is_null());
        assert!(!pxs_list_set(list, 7, pxs_new_null()));

        // 取出的元素指向列表内部
        assert_eq!(pxs_list_add(list, pxs_new_list()), 3);
        let inner = pxs_list_get(list, -1);
        assert_eq!(pxs_list_add(inner, pxs_new_int(9)), 0);
        let inner_again = pxs_list_get(list, 3);
        assert_eq!(pxs_list_len(inner_again), 1);
        assert_eq!(pxs_get_int(pxs_list_get(inner_again, 0)), 9);

        let copy = pxs_clone_var(list);
        pxs_free_var(list);
        assert_eq!(pxs_list_len(copy), 4);
        assert_eq!(pxs_list_len(pxs_new_null()), -1);
        pxs_free_var(copy);
        assert_eq!(pxs_var_type(ptr::null()), VarType::Null);
    }
}

#[test]
fn test_native_objects() {
    let _guard = serial();
    assert!(pxs_initialize());
    let before = FREED.load(Ordering::SeqCst);
    unsafe {
        assert!(pxs_add_object(PXS_TOP_LEVEL, c("Counter").as_ptr(), make_counter, ptr::null_mut()));
        assert_eq!(
            execute(LUA, "local c = Counter(); c:bump(); result = c:bump(); c = nil"),
            ""
        );
        assert_eq!(eval(LUA, "result"), Var::new_i64(2));

        let counter = make_counter(ptr::null_mut(), ptr::null_mut());
        assert_ne!(pxs_get_object_id(counter), 0);
        let result = pxs_object_call(LUA, counter, c("bump").as_ptr(), ptr::null());
        assert_eq!(pxs_get_int(result), 1);
        pxs_free_var(result);

        assert!(pxs_set_property(counter, c("label").as_ptr(), pxs_new_string(c("hits").as_ptr())));
        let label = pxs_get_property(counter, c("label").as_ptr());
        assert_eq!(take_string(pxs_get_string(label)), "hits");
        pxs_free_var(label);

        assert!(pxs_object_call(LUA, counter, c("missing").as_ptr(), ptr::null()).is_null());
        assert!(last_error().unwrap().contains("missing"));
        pxs_free_var(counter);
    }
    pxs_stop_thread();
    assert_eq!(FREED.load(Ordering::SeqCst), before + 2);
    pxs_finalize();
}

#[test]
fn test_callback_failures_and_file_hooks() {
    let _guard = serial();
    assert!(pxs_initialize());
    unsafe {
        assert!(pxs_add_callback(PXS_TOP_LEVEL, c("always_fails").as_ptr(), always_fails, ptr::null_mut()));
    }
    let message = execute(JAVASCRIPT, "always_fails();");
    assert!(message.contains("native failure"), "{message}");

    assert!(pxs_set_file_reader(read_file));
    assert_eq!(
        eval(LUA, "require('greeting').text"),
        Var::new_string("hello from a file")
    );
    assert!(execute(LUA, "require('nowhere')").contains("nowhere"));
    pxs_finalize();
}

#[test]
fn test_calls_without_a_bridge_fail() {
    let _guard = serial();
    pxs_finalize();
    assert!(!pxs_start_thread());
    assert!(last_error().unwrap().contains("finalized"));
    assert_eq!(unsafe { pxs_new_module(c("orphan").as_ptr()) }, 0);
    assert!(last_error().is_some());
}
