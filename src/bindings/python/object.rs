use std::sync::Arc;

use pyo3::exceptions::{PyAttributeError, PyRuntimeError};
use pyo3::prelude::*;
use pyo3::types::{PyCFunction, PyDict, PyTuple};

use super::{convert, PyShared};
use crate::bindings::Runtime;
use crate::core::error::{BridgeError, BridgeResult};
use crate::object::PixelObject;
use crate::value::Var;

pub(super) fn to_py_err(err: BridgeError) -> PyErr {
    PyRuntimeError::new_err(err.to_string())
}

/// Script-side view of a host object.
#[pyclass(name = "HostObject", module = "script_bridge")]
pub(super) struct PyHostObject {
    object: Arc<PixelObject>,
    shared: Arc<PyShared>,
}

#[pymethods]
impl PyHostObject {
    fn __getattr__(&self, py: Python<'_>, name: &str) -> PyResult<PyObject> {
        if self.object.has_method(name) {
            return method_function(py, &self.shared, Arc::clone(&self.object), name.to_string());
        }
        if name.starts_with("__") {
            return Err(PyAttributeError::new_err(name.to_string()));
        }
        convert::into_py(py, &self.shared, &self.object.get_property(name)).map_err(to_py_err)
    }

    fn __setattr__(&self, py: Python<'_>, name: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        if self.object.has_method(name) {
            return Err(PyAttributeError::new_err(format!(
                "cannot overwrite method `{name}` of {}",
                self.object.type_name()
            )));
        }
        let value = convert::from_py(py, &self.shared, value).map_err(to_py_err)?;
        self.object.set_property(name, value);
        Ok(())
    }

    fn __eq__(&self, other: &Bound<'_, PyAny>) -> bool {
        unwrap(other).is_some_and(|other| Arc::ptr_eq(&other, &self.object))
    }

    fn __hash__(&self) -> u64 {
        self.object.id()
    }

    fn __repr__(&self) -> String {
        format!("{}: {}", self.object.type_name(), self.object.id())
    }
}

/// A callable invoking `method` on `object` with `[runtime, self, args...]`.
fn method_function(
    py: Python<'_>,
    shared: &Arc<PyShared>,
    object: Arc<PixelObject>,
    method: String,
) -> PyResult<PyObject> {
    let shared = Arc::clone(shared);
    let function = PyCFunction::new_closure_bound(
        py,
        None,
        None,
        move |args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<PyObject> {
            let py = args.py();
            let args = args
                .iter()
                .map(|arg| convert::from_py(py, &shared, &arg))
                .collect::<BridgeResult<Vec<Var>>>()
                .map_err(to_py_err)?;
            let result = object
                .call_method(Runtime::Python, &method, args)
                .map_err(to_py_err)?;
            convert::into_py(py, &shared, &result).map_err(to_py_err)
        },
    )?;
    Ok(function.into_py(py))
}

pub(super) fn wrap(py: Python<'_>, shared: &Arc<PyShared>, object: &Arc<PixelObject>) -> BridgeResult<PyObject> {
    let instance = Py::new(
        py,
        PyHostObject {
            object: Arc::clone(object),
            shared: Arc::clone(shared),
        },
    )?;
    Ok(instance.into_py(py))
}

pub(super) fn unwrap(value: &Bound<'_, PyAny>) -> Option<Arc<PixelObject>> {
    let host = value.downcast::<PyHostObject>().ok()?;
    let object = Arc::clone(&host.borrow().object);
    Some(object)
}

#[cfg(test)]
mod tests {
    use super::super::PyAdapter;
    use crate::bindings::protocol::ScriptAdapter;
    use crate::config::BridgeConfig;
    use crate::core::registry::Registry;
    use crate::dispatch::Callback;
    use crate::module::Module;
    use crate::object::PixelObject;
    use crate::value::Var;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_method_shape_properties_and_destruction() {
        let drops = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        let mut module = Module::top_level();
        let counter = Arc::clone(&drops);
        module.add_object(Callback::new("Counter", move |_, _| {
            let drops = Arc::clone(&counter);
            let mut object = PixelObject::new(0_i64, "Counter").with_destructor(move |_| {
                drops.fetch_add(1, Ordering::SeqCst);
            });
            object.add_callback(Callback::new("shape", |args, _| {
                let list = args.as_list().cloned().unwrap_or_default();
                Var::new_i64(list.len() as i64)
            }));
            Var::new_host_object(object)
        }));
        let sealed = registry.seal(module).unwrap();
        let python = PyAdapter::new(registry).unwrap();
        python.install_module(&sealed).unwrap();

        python.execute("c = Counter()\nc.label = 'x'", "c.py").unwrap();
        assert_eq!(python.eval("c.shape(1)").unwrap(), Var::new_i64(3));
        assert_eq!(python.eval("c.label").unwrap(), Var::new_string("x"));
        assert!(python.execute("c.shape = 1", "c.py").is_err());

        python.execute("del c", "c.py").unwrap();
        python.collect_garbage();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
