use std::sync::Arc;

use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use tracing::debug;

use super::{convert, throw, JsShared};
use crate::bindings::Runtime;
use crate::core::error::BridgeResult;
use crate::dispatch::FunctionId;
use crate::module::SealedModule;
use crate::value::VarList;

/// Install a sealed module.
///
/// Members of the top-level module become globals; a named module becomes a global namespace
/// object whose children are nested namespace objects.
pub(super) fn install<'js>(ctx: &Ctx<'js>, shared: &Arc<JsShared>, module: &SealedModule) -> BridgeResult<()> {
    let globals = ctx.globals();
    if module.is_top_level() {
        fill_members(ctx, shared, &globals, module)?;
        for child in &module.children {
            globals.set(child.name.as_str(), namespace(ctx, shared, child)?)?;
        }
    } else {
        globals.set(module.name.as_str(), namespace(ctx, shared, module)?)?;
    }
    debug!(target: "bridge::js", module = %module.path, "module installed");
    Ok(())
}

fn namespace<'js>(ctx: &Ctx<'js>, shared: &Arc<JsShared>, module: &SealedModule) -> BridgeResult<Object<'js>> {
    let object = Object::new(ctx.clone())?;
    fill_members(ctx, shared, &object, module)?;
    for child in &module.children {
        object.set(child.name.as_str(), namespace(ctx, shared, child)?)?;
    }
    Ok(object)
}

fn fill_members<'js>(
    ctx: &Ctx<'js>,
    shared: &Arc<JsShared>,
    target: &Object<'js>,
    module: &SealedModule,
) -> BridgeResult<()> {
    for (name, var) in &module.variables {
        target.set(name.as_str(), convert::into_js(ctx, shared, var)?)?;
    }
    for callable in module.callables() {
        target.set(callable.name.as_str(), native_function(ctx, shared, callable.id)?)?;
    }
    Ok(())
}

/// A JavaScript function dispatching to a registered callback.
fn native_function<'js>(ctx: &Ctx<'js>, shared: &Arc<JsShared>, id: FunctionId) -> rquickjs::Result<Function<'js>> {
    let shared = Arc::clone(shared);
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, Rest(args): Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let mut argv = VarList::with_capacity(args.len() + 1);
            argv.add(Runtime::JavaScript.as_var());
            for arg in args {
                argv.add(convert::from_js(&ctx, &shared, arg).map_err(|e| throw(&ctx, e))?);
            }
            let result = shared.registry.call(id, argv).map_err(|e| throw(&ctx, e))?;
            convert::into_js(&ctx, &shared, &result).map_err(|e| throw(&ctx, e))
        },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::JsAdapter;
    use crate::bindings::protocol::ScriptAdapter;
    use crate::config::BridgeConfig;
    use crate::core::registry::Registry;
    use crate::dispatch::Callback;
    use crate::module::Module;
    use crate::value::Var;

    #[test]
    fn test_named_modules_become_namespaces() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        let mut game = Module::new("game");
        game.add_variable("title", Var::new_string("demo"));
        let mut math = Module::new("math2");
        math.add_callback(Callback::new("double", |args, _| {
            let n = args.as_list().and_then(|l| l.get(1)).map_or(0, Var::as_i64);
            Var::new_i64(n * 2)
        }));
        game.add_module(math);
        let sealed = registry.seal(game).unwrap();

        let js = JsAdapter::new(registry).unwrap();
        js.install_module(&sealed).unwrap();
        assert_eq!(js.eval("game.title").unwrap(), Var::new_string("demo"));
        assert_eq!(js.eval("game.math2.double(21)").unwrap(), Var::new_i64(42));
        assert_eq!(js.eval("typeof title").unwrap(), Var::new_string("undefined"));
    }

    #[test]
    fn test_large_integers_fail_instead_of_rounding() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        let mut module = Module::top_level();
        module.add_variable("small", Var::new_i64(7));
        module.add_variable("safe", Var::new_i64(1 << 40));
        let sealed = registry.seal(module).unwrap();
        let js = JsAdapter::new(Arc::clone(&registry)).unwrap();
        js.install_module(&sealed).unwrap();
        assert_eq!(js.eval("small + safe").unwrap(), Var::new_f64((7 + (1_i64 << 40)) as f64));

        let mut huge = Module::top_level();
        huge.add_variable("huge", Var::new_i64(i64::MAX));
        let sealed = registry.seal(huge).unwrap();
        assert!(js.install_module(&sealed).is_err());
    }
}
