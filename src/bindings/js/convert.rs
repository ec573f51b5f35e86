use std::sync::Arc;

use rquickjs::{Array, Ctx, IntoJs, Value};

use super::{hidden_object, object, JsShared, REFS_GLOBAL};
use crate::core::error::{BridgeError, BridgeResult};
use crate::value::numeric::{i64_to_f64_exact, u64_to_f64_exact};
use crate::value::{ScriptRef, Var, VarList};

/// Nesting limit for array conversion; also stops self-referencing arrays.
const MAX_DEPTH: usize = 64;

/// Integers that fit `i32` become JS ints, others become doubles when exact.
fn integer<'js>(ctx: &Ctx<'js>, value: f64, small: Option<i32>) -> Value<'js> {
    match small {
        Some(i) => Value::new_int(ctx.clone(), i),
        None => Value::new_float(ctx.clone(), value),
    }
}

pub(super) fn into_js<'js>(ctx: &Ctx<'js>, shared: &Arc<JsShared>, var: &Var) -> BridgeResult<Value<'js>> {
    into_js_at(ctx, shared, var, 0)
}

fn into_js_at<'js>(
    ctx: &Ctx<'js>,
    shared: &Arc<JsShared>,
    var: &Var,
    depth: usize,
) -> BridgeResult<Value<'js>> {
    Ok(match var {
        Var::Int64(i) => integer(ctx, i64_to_f64_exact(*i)?, i32::try_from(*i).ok()),
        Var::UInt64(u) => integer(ctx, u64_to_f64_exact(*u)?, i32::try_from(*u).ok()),
        Var::Float64(f) => Value::new_float(ctx.clone(), *f),
        Var::Bool(b) => Value::new_bool(ctx.clone(), *b),
        Var::Null => Value::new_null(ctx.clone()),
        Var::String(s) => s.as_str().into_js(ctx)?,
        Var::List(list) => {
            if depth >= MAX_DEPTH {
                return Err(BridgeError::Conversion(format!(
                    "lists nested deeper than {MAX_DEPTH} levels"
                )));
            }
            let array = Array::new(ctx.clone())?;
            for (index, item) in list.iter().enumerate() {
                array.set(index, into_js_at(ctx, shared, item, depth + 1)?)?;
            }
            array.into_value()
        }
        Var::HostObject(host) => object::wrap(ctx, host)?,
        Var::Object(script_ref) | Var::Function(script_ref) => {
            let key = shared.keys.resolve(script_ref)?;
            let refs = hidden_object(ctx, REFS_GLOBAL)?;
            let value: Value = refs.get(key.to_string())?;
            if value.is_undefined() {
                return Err(BridgeError::NotFound(format!("{script_ref:?}")));
            }
            value
        }
    })
}

pub(super) fn from_js<'js>(ctx: &Ctx<'js>, shared: &Arc<JsShared>, value: Value<'js>) -> BridgeResult<Var> {
    from_js_at(ctx, shared, value, 0)
}

fn from_js_at<'js>(
    ctx: &Ctx<'js>,
    shared: &Arc<JsShared>,
    value: Value<'js>,
    depth: usize,
) -> BridgeResult<Var> {
    if value.is_undefined() || value.is_null() {
        return Ok(Var::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(Var::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(Var::Int64(i64::from(i)));
    }
    if let Some(f) = value.as_float() {
        return Ok(Var::Float64(f));
    }
    if let Some(s) = value.as_string() {
        return Ok(Var::String(s.to_string()?));
    }
    if let Some(array) = value.as_array() {
        if depth >= MAX_DEPTH {
            return Err(BridgeError::Conversion(format!(
                "arrays nested deeper than {MAX_DEPTH} levels"
            )));
        }
        let mut list = VarList::with_capacity(array.len());
        for item in array.iter::<Value>() {
            list.add(from_js_at(ctx, shared, item?, depth + 1)?);
        }
        return Ok(Var::List(list));
    }
    if value.is_function() {
        return Ok(Var::Function(park(ctx, shared, value)?));
    }
    if let Some(target) = value.as_object() {
        if let Some(host) = object::unwrap(target) {
            return Ok(Var::HostObject(host));
        }
        return Ok(Var::Object(park(ctx, shared, value)?));
    }
    Err(BridgeError::Conversion(format!(
        "a JavaScript {:?} cannot cross the bridge",
        value.type_of()
    )))
}

/// Store a value in the reference table and return its reference.
fn park<'js>(ctx: &Ctx<'js>, shared: &JsShared, value: Value<'js>) -> BridgeResult<ScriptRef> {
    let key = shared.keys.next_key();
    let refs = hidden_object(ctx, REFS_GLOBAL)?;
    refs.set(key.to_string(), value)?;
    Ok(shared.keys.make_ref(key))
}
