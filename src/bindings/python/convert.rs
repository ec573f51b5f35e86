use std::sync::Arc;

use pyo3::prelude::*;
use pyo3::types::{PyBool, PyFloat, PyList, PyLong, PyString, PyTuple};

use super::{object, PyShared};
use crate::core::error::{BridgeError, BridgeResult};
use crate::value::{ScriptRef, Var, VarList};

/// Nesting limit for list conversion; also stops self-referencing lists.
const MAX_DEPTH: usize = 64;

pub(super) fn into_py(py: Python<'_>, shared: &Arc<PyShared>, var: &Var) -> BridgeResult<PyObject> {
    into_py_at(py, shared, var, 0)
}

fn into_py_at(py: Python<'_>, shared: &Arc<PyShared>, var: &Var, depth: usize) -> BridgeResult<PyObject> {
    Ok(match var {
        Var::Int64(i) => i.into_py(py),
        Var::UInt64(u) => u.into_py(py),
        Var::Float64(f) => f.into_py(py),
        Var::Bool(b) => b.into_py(py),
        Var::Null => py.None(),
        Var::String(s) => PyString::new_bound(py, s).into_py(py),
        Var::List(list) => {
            if depth >= MAX_DEPTH {
                return Err(BridgeError::Conversion(format!(
                    "lists nested deeper than {MAX_DEPTH} levels"
                )));
            }
            let items = PyList::empty_bound(py);
            for item in list {
                items.append(into_py_at(py, shared, item, depth + 1)?)?;
            }
            items.into_py(py)
        }
        Var::HostObject(host) => object::wrap(py, shared, host)?,
        Var::Object(script_ref) | Var::Function(script_ref) => {
            let key = shared.keys.resolve(script_ref)?;
            shared
                .refs
                .bind(py)
                .get_item(key)?
                .ok_or_else(|| BridgeError::NotFound(format!("{script_ref:?}")))?
                .unbind()
        }
    })
}

pub(super) fn from_py(py: Python<'_>, shared: &Arc<PyShared>, value: &Bound<'_, PyAny>) -> BridgeResult<Var> {
    from_py_at(py, shared, value, 0)
}

fn from_py_at(
    py: Python<'_>,
    shared: &Arc<PyShared>,
    value: &Bound<'_, PyAny>,
    depth: usize,
) -> BridgeResult<Var> {
    if value.is_none() {
        return Ok(Var::Null);
    }
    // bool is a subclass of int, so it is checked first
    if value.is_instance_of::<PyBool>() {
        return Ok(Var::Bool(value.extract()?));
    }
    if value.is_instance_of::<PyLong>() {
        if let Ok(i) = value.extract::<i64>() {
            return Ok(Var::Int64(i));
        }
        return value.extract::<u64>().map(Var::UInt64).map_err(|_| {
            BridgeError::Conversion(format!("{value} does not fit in a 64-bit integer"))
        });
    }
    if value.is_instance_of::<PyFloat>() {
        return Ok(Var::Float64(value.extract()?));
    }
    if value.is_instance_of::<PyString>() {
        return Ok(Var::String(value.extract()?));
    }
    if value.is_instance_of::<PyList>() || value.is_instance_of::<PyTuple>() {
        if depth >= MAX_DEPTH {
            return Err(BridgeError::Conversion(format!(
                "lists nested deeper than {MAX_DEPTH} levels"
            )));
        }
        let mut list = VarList::new();
        for item in value.iter()? {
            list.add(from_py_at(py, shared, &item?, depth + 1)?);
        }
        return Ok(Var::List(list));
    }
    if let Some(host) = object::unwrap(value) {
        return Ok(Var::HostObject(host));
    }
    if value.is_callable() {
        return Ok(Var::Function(park(py, shared, value)?));
    }
    Ok(Var::Object(park(py, shared, value)?))
}

/// Store a value in the reference table and return its reference.
fn park(py: Python<'_>, shared: &PyShared, value: &Bound<'_, PyAny>) -> BridgeResult<ScriptRef> {
    let key = shared.keys.next_key();
    shared.refs.bind(py).set_item(key, value)?;
    Ok(shared.keys.make_ref(key))
}
