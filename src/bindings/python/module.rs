use std::sync::Arc;

use pyo3::prelude::*;
use pyo3::types::{PyCFunction, PyDict, PyModule, PyTuple};
use tracing::debug;

use super::object::to_py_err;
use super::{convert, PyShared};
use crate::bindings::Runtime;
use crate::core::error::BridgeResult;
use crate::dispatch::FunctionId;
use crate::module::SealedModule;
use crate::value::VarList;

/// Attribute marking modules installed by the bridge.
const MARKER: &str = "__pxs_module__";

/// Install a sealed module.
///
/// Members of the top-level module are bound in `globals`. A named module becomes a Python
/// module registered in `sys.modules` under its dotted path, each child under its own path,
/// and is bound in `globals` under its name.
pub(super) fn install(
    py: Python<'_>,
    shared: &Arc<PyShared>,
    globals: &Bound<'_, PyDict>,
    module: &SealedModule,
) -> BridgeResult<()> {
    if module.is_top_level() {
        for (name, var) in &module.variables {
            globals.set_item(name.as_str(), convert::into_py(py, shared, var)?)?;
        }
        for callable in module.callables() {
            globals.set_item(callable.name.as_str(), native_function(py, shared, callable.id)?)?;
        }
        for child in &module.children {
            globals.set_item(child.name.as_str(), build(py, shared, child)?)?;
        }
    } else {
        globals.set_item(module.name.as_str(), build(py, shared, module)?)?;
    }
    debug!(target: "bridge::python", module = %module.path, "module installed");
    Ok(())
}

fn build<'py>(
    py: Python<'py>,
    shared: &Arc<PyShared>,
    module: &SealedModule,
) -> BridgeResult<Bound<'py, PyModule>> {
    let target = PyModule::new_bound(py, &module.path)?;
    for (name, var) in &module.variables {
        target.setattr(name.as_str(), convert::into_py(py, shared, var)?)?;
    }
    for callable in module.callables() {
        target.setattr(callable.name.as_str(), native_function(py, shared, callable.id)?)?;
    }
    for child in &module.children {
        target.setattr(child.name.as_str(), build(py, shared, child)?)?;
    }
    target.setattr(MARKER, true)?;

    // Never shadow a module the interpreter already provides, such as the standard `json`.
    let modules = py.import_bound("sys")?.getattr("modules")?;
    let replaceable = match modules.get_item(module.path.as_str()) {
        Ok(existing) => existing.hasattr(MARKER)?,
        Err(_) => true,
    };
    if replaceable {
        modules.set_item(module.path.as_str(), &target)?;
    }
    Ok(target)
}

/// A Python callable dispatching to a registered callback.
fn native_function(py: Python<'_>, shared: &Arc<PyShared>, id: FunctionId) -> PyResult<PyObject> {
    let shared = Arc::clone(shared);
    let function = PyCFunction::new_closure_bound(
        py,
        None,
        None,
        move |args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<PyObject> {
            let py = args.py();
            let mut argv = VarList::with_capacity(args.len() + 1);
            argv.add(Runtime::Python.as_var());
            for arg in args.iter() {
                argv.add(convert::from_py(py, &shared, &arg).map_err(to_py_err)?);
            }
            let result = shared.registry.call(id, argv).map_err(to_py_err)?;
            convert::into_py(py, &shared, &result).map_err(to_py_err)
        },
    )?;
    Ok(function.into_py(py))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::PyAdapter;
    use crate::bindings::protocol::ScriptAdapter;
    use crate::config::BridgeConfig;
    use crate::core::registry::Registry;
    use crate::dispatch::Callback;
    use crate::module::Module;
    use crate::value::Var;

    #[test]
    fn test_named_modules_are_importable() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        let mut game = Module::new("pxgame");
        game.add_variable("title", Var::new_string("demo"));
        let mut math = Module::new("math2");
        math.add_callback(Callback::new("double", |args, _| {
            let n = args.as_list().and_then(|l| l.get(1)).map_or(0, Var::as_i64);
            Var::new_i64(n * 2)
        }));
        game.add_module(math);
        let sealed = registry.seal(game).unwrap();

        let python = PyAdapter::new(registry).unwrap();
        python.install_module(&sealed).unwrap();
        assert_eq!(python.eval("pxgame.title").unwrap(), Var::new_string("demo"));
        python
            .execute("import pxgame.math2\nresult = pxgame.math2.double(21)", "m.py")
            .unwrap();
        assert_eq!(python.eval("result").unwrap(), Var::new_i64(42));
    }
}
