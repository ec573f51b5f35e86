//! Python Binding Adapter using pyo3
//!
//! The embedded interpreter is process-wide; each adapter gets its own globals dictionary, so
//! scripts on different threads do not see each other's names. Host objects are instances of a
//! native `HostObject` class whose `__getattr__`/`__setattr__` resolve methods and properties.
//! Named modules are registered in `sys.modules` and bound in the adapter's globals.

mod convert;
mod module;
mod object;

use std::sync::Arc;

use pyo3::prelude::*;
use pyo3::types::{PyDict, PyTuple};
use tracing::{debug, trace};

use super::protocol::ScriptAdapter;
use super::refs::RefKeys;
use super::Runtime;
use crate::core::error::{BridgeError, BridgeResult};
use crate::core::registry::Registry;
use crate::module::SealedModule;
use crate::value::{Var, VarList, VarType};

impl From<PyErr> for BridgeError {
    fn from(err: PyErr) -> Self {
        BridgeError::script(Runtime::Python, err.to_string())
    }
}

/// State shared between the adapter and the native functions it installs.
#[derive(Debug)]
pub(crate) struct PyShared {
    registry: Arc<Registry>,
    keys: RefKeys,
    /// Parked values, keyed by reference key
    refs: Py<PyDict>,
}

pub struct PyAdapter {
    shared: Arc<PyShared>,
    globals: Py<PyDict>,
}

impl PyAdapter {
    pub fn new(registry: Arc<Registry>) -> BridgeResult<Self> {
        Python::with_gil(|py| {
            let globals = PyDict::new_bound(py);
            globals.set_item("__builtins__", py.import_bound("builtins")?)?;
            let shared = Arc::new(PyShared {
                registry,
                keys: RefKeys::new(Runtime::Python),
                refs: PyDict::new_bound(py).unbind(),
            });
            debug!(target: "bridge::python", owner = shared.keys.owner(), "Python namespace created");
            Ok(Self {
                shared,
                globals: globals.unbind(),
            })
        })
    }

    /// Forget parked values whose references were dropped.
    fn release_dropped(&self, py: Python<'_>) {
        let released = self.shared.keys.take_released();
        if released.is_empty() {
            return;
        }
        trace!(target: "bridge::python", count = released.len(), "releasing parked values");
        let refs = self.shared.refs.bind(py);
        for key in released {
            let _ = refs.del_item(key);
        }
    }

    fn parked<'py>(&self, py: Python<'py>, var: &Var) -> BridgeResult<Bound<'py, PyAny>> {
        let Some(script_ref) = var.as_script_ref() else {
            return Err(BridgeError::TypeMismatch {
                expected: VarType::Object,
                found: var.tag(),
            });
        };
        let key = self.shared.keys.resolve(script_ref)?;
        self.shared
            .refs
            .bind(py)
            .get_item(key)?
            .ok_or_else(|| BridgeError::NotFound(format!("{script_ref:?}")))
    }

    fn call<'py>(
        &self,
        py: Python<'py>,
        function: &Bound<'py, PyAny>,
        args: VarList,
    ) -> BridgeResult<Var> {
        let args = args
            .iter()
            .map(|arg| convert::into_py(py, &self.shared, arg))
            .collect::<BridgeResult<Vec<PyObject>>>()?;
        let result = function.call1(PyTuple::new_bound(py, args))?;
        convert::from_py(py, &self.shared, &result)
    }
}

impl ScriptAdapter for PyAdapter {
    fn runtime(&self) -> Runtime {
        Runtime::Python
    }

    fn owner_id(&self) -> u64 {
        self.shared.keys.owner()
    }

    fn execute(&self, code: &str, file_name: &str) -> BridgeResult<()> {
        Python::with_gil(|py| {
            self.release_dropped(py);
            let builtins = py.import_bound("builtins")?;
            let run = || -> PyResult<()> {
                let compiled = builtins
                    .getattr("compile")?
                    .call1((code, file_name, "exec"))?;
                builtins
                    .getattr("exec")?
                    .call1((compiled, self.globals.bind(py).clone()))?;
                Ok(())
            };
            run().map_err(|e| BridgeError::from(e).in_file(file_name))
        })
    }

    fn eval(&self, code: &str) -> BridgeResult<Var> {
        Python::with_gil(|py| {
            self.release_dropped(py);
            let value = py.eval_bound(code, Some(self.globals.bind(py)), None)?;
            convert::from_py(py, &self.shared, &value)
        })
    }

    fn install_module(&self, sealed: &SealedModule) -> BridgeResult<()> {
        Python::with_gil(|py| module::install(py, &self.shared, self.globals.bind(py), sealed))
    }

    fn call_function(&self, name: &str, args: VarList) -> BridgeResult<Var> {
        Python::with_gil(|py| {
            self.release_dropped(py);
            let Some(function) = self.globals.bind(py).get_item(name)? else {
                return Err(BridgeError::NotFound(format!("Python function `{name}`")));
            };
            if !function.is_callable() {
                return Err(BridgeError::script(
                    Runtime::Python,
                    format!("`{name}` is not callable"),
                ));
            }
            self.call(py, &function, args)
        })
    }

    fn var_call(&self, function: &Var, args: VarList) -> BridgeResult<Var> {
        Python::with_gil(|py| {
            self.release_dropped(py);
            let callee = self.parked(py, function)?;
            if !matches!(function, Var::Function(_)) || !callee.is_callable() {
                return Err(BridgeError::TypeMismatch {
                    expected: VarType::Function,
                    found: function.tag(),
                });
            }
            self.call(py, &callee, args)
        })
    }

    fn object_call(&self, object: &Var, method: &str, args: VarList) -> BridgeResult<Var> {
        if let Var::HostObject(host) = object {
            return host.call_method(Runtime::Python, method, args);
        }
        Python::with_gil(|py| {
            self.release_dropped(py);
            let target = self.parked(py, object)?;
            match target.getattr(method) {
                Ok(bound) if bound.is_callable() => self.call(py, &bound, args),
                _ => Err(BridgeError::MissingMethod {
                    type_name: target
                        .get_type()
                        .name()
                        .map(|name| format!("Python {name}"))
                        .unwrap_or_else(|_| "Python object".to_string()),
                    method: method.to_string(),
                }),
            }
        })
    }

    fn get_property(&self, object: &Var, name: &str) -> BridgeResult<Var> {
        if let Var::HostObject(host) = object {
            return Ok(host.get_property(name));
        }
        Python::with_gil(|py| {
            let target = self.parked(py, object)?;
            let value = target.getattr(name)?;
            convert::from_py(py, &self.shared, &value)
        })
    }

    fn set_property(&self, object: &Var, name: &str, value: Var) -> BridgeResult<()> {
        if let Var::HostObject(host) = object {
            host.set_property(name, value);
            return Ok(());
        }
        Python::with_gil(|py| {
            let target = self.parked(py, object)?;
            target.setattr(name, convert::into_py(py, &self.shared, &value)?)?;
            Ok(())
        })
    }

    fn clear_caches(&self) {
        // Host objects are wrapped per crossing; there is nothing cached to drop.
    }

    fn collect_garbage(&self) {
        Python::with_gil(|py| {
            self.release_dropped(py);
            let collected = py
                .import_bound("gc")
                .and_then(|gc| gc.call_method0("collect"))
                .and_then(|n| n.extract::<usize>());
            match collected {
                Ok(count) => trace!(target: "bridge::python", count, "collected garbage"),
                Err(err) => debug!(target: "bridge::python", %err, "garbage collection failed"),
            }
        });
    }
}

impl Drop for PyAdapter {
    fn drop(&mut self) {
        Python::with_gil(|py| {
            self.globals.bind(py).clear();
            self.shared.refs.bind(py).clear();
        });
        debug!(target: "bridge::python", owner = self.shared.keys.owner(), "Python namespace closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::dispatch::Callback;
    use crate::module::Module;

    fn adapter() -> PyAdapter {
        PyAdapter::new(Arc::new(Registry::new(BridgeConfig::default()))).unwrap()
    }

    #[test]
    fn test_execute_and_eval() {
        let python = adapter();
        python.execute("x = 40 + 2", "ok.py").unwrap();
        assert_eq!(python.eval("x").unwrap(), Var::new_i64(42));
        assert_eq!(python.eval("'hi' + '!'").unwrap(), Var::new_string("hi!"));
        assert_eq!(python.eval("None").unwrap(), Var::Null);
        assert_eq!(python.eval("True").unwrap(), Var::new_bool(true));
        assert_eq!(python.eval("2 ** 64 - 1").unwrap(), Var::new_u64(u64::MAX));
        assert!(python.eval("2 ** 64").is_err());

        let err = python.execute("raise ValueError('boom')", "bad.py").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bad.py"), "{message}");
        assert!(message.contains("boom"), "{message}");
    }

    #[test]
    fn test_functions_and_objects() {
        let python = adapter();
        python
            .execute(
                "class Box:\n    def __init__(self):\n        self.n = 1\n    def bump(self, by):\n        self.n += by\n        return self.n\n\ndef make():\n    return Box()\n",
                "box.py",
            )
            .unwrap();
        let boxed = python.call_function("make", VarList::new()).unwrap();
        assert!(boxed.is(VarType::Object));
        assert_eq!(
            python.object_call(&boxed, "bump", vec![Var::new_i64(2)].into()).unwrap(),
            Var::new_i64(3)
        );
        python.set_property(&boxed, "n", Var::new_i64(10)).unwrap();
        assert_eq!(python.get_property(&boxed, "n").unwrap(), Var::new_i64(10));

        let double = python.eval("lambda v: v * 2").unwrap();
        assert_eq!(
            python.var_call(&double, vec![Var::new_i64(4)].into()).unwrap(),
            Var::new_i64(8)
        );
    }

    #[test]
    fn test_installed_functions_receive_runtime_first() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        let mut module = Module::top_level();
        module.add_callback(Callback::new("first_arg", |args, _| {
            args.as_list().and_then(|l| l.get(0)).cloned().unwrap_or_default()
        }));
        let sealed = registry.seal(module).unwrap();

        let python = PyAdapter::new(registry).unwrap();
        python.install_module(&sealed).unwrap();
        assert_eq!(python.eval("first_arg('x')").unwrap(), Runtime::Python.as_var());
    }
}
