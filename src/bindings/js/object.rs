use std::sync::Arc;

use rquickjs::class::Trace;
use rquickjs::prelude::Rest;
use rquickjs::{Class, Ctx, Function, Object, Value};

use super::{convert, throw, JsShared, WRAP_GLOBAL};
use crate::bindings::Runtime;
use crate::core::error::{BridgeError, BridgeResult};
use crate::object::PixelObject;
use crate::value::Var;

/// Property under which a proxy exposes its native handle.
const HANDLE_KEY: &str = "__pxs_handle__";

/// Builds the proxy factory from the native `get` and `set` hooks.
const PROXY_SHIM: &str = r#"
(function (get, set) {
    return function (handle) {
        return new Proxy(handle, {
            get(target, key) {
                if (key === "__pxs_handle__") return target;
                return typeof key === "string" ? get(target, key) : undefined;
            },
            set(target, key, value) {
                if (typeof key !== "string") return false;
                set(target, key, value);
                return true;
            },
        });
    };
})
"#;

/// Native handle keeping a host object alive while the interpreter references it.
#[derive(Trace)]
#[rquickjs::class]
pub(super) struct HostRef {
    #[qjs(skip_trace)]
    object: Arc<PixelObject>,
}

/// The function that wraps a handle in its proxy.
pub(super) fn proxy_factory<'js>(ctx: &Ctx<'js>, shared: &Arc<JsShared>) -> rquickjs::Result<Function<'js>> {
    let make: Function = ctx.eval(PROXY_SHIM)?;
    make.call((getter(ctx, shared)?, setter(ctx, shared)?))
}

fn getter<'js>(ctx: &Ctx<'js>, shared: &Arc<JsShared>) -> rquickjs::Result<Function<'js>> {
    let shared = Arc::clone(shared);
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, handle: Class<'js, HostRef>, key: String| -> rquickjs::Result<Value<'js>> {
            let object = Arc::clone(&handle.borrow().object);
            if object.has_method(&key) {
                return method_function(&ctx, &shared, object, key).map(|f| f.into_value());
            }
            if key == "toString" {
                let text = format!("{}: {}", object.type_name(), object.id());
                return Function::new(ctx.clone(), move || text.clone()).map(|f| f.into_value());
            }
            match object.get_property(&key) {
                Var::Null => Ok(Value::new_undefined(ctx.clone())),
                property => convert::into_js(&ctx, &shared, &property).map_err(|e| throw(&ctx, e)),
            }
        },
    )
}

fn setter<'js>(ctx: &Ctx<'js>, shared: &Arc<JsShared>) -> rquickjs::Result<Function<'js>> {
    let shared = Arc::clone(shared);
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, handle: Class<'js, HostRef>, key: String, value: Value<'js>| -> rquickjs::Result<()> {
            let object = Arc::clone(&handle.borrow().object);
            if object.has_method(&key) {
                let message = format!("cannot overwrite method `{key}` of {}", object.type_name());
                return Err(throw(&ctx, BridgeError::script(Runtime::JavaScript, message)));
            }
            let value = convert::from_js(&ctx, &shared, value).map_err(|e| throw(&ctx, e))?;
            object.set_property(key, value);
            Ok(())
        },
    )
}

/// A function calling `method` on `object`. `this` is ignored, so detached method references
/// behave the same as `obj.method(...)`.
fn method_function<'js>(
    ctx: &Ctx<'js>,
    shared: &Arc<JsShared>,
    object: Arc<PixelObject>,
    method: String,
) -> rquickjs::Result<Function<'js>> {
    let shared = Arc::clone(shared);
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, Rest(args): Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let args = args
                .into_iter()
                .map(|arg| convert::from_js(&ctx, &shared, arg))
                .collect::<BridgeResult<Vec<Var>>>()
                .map_err(|e| throw(&ctx, e))?;
            let result = object
                .call_method(Runtime::JavaScript, &method, args)
                .map_err(|e| throw(&ctx, e))?;
            convert::into_js(&ctx, &shared, &result).map_err(|e| throw(&ctx, e))
        },
    )
}

/// A fresh proxy around `object`.
pub(super) fn wrap<'js>(ctx: &Ctx<'js>, object: &Arc<PixelObject>) -> BridgeResult<Value<'js>> {
    let handle = Class::instance(
        ctx.clone(),
        HostRef {
            object: Arc::clone(object),
        },
    )?;
    let factory: Function = ctx.globals().get(WRAP_GLOBAL)?;
    Ok(factory.call((handle,))?)
}

/// The host object behind a proxy, if `target` is one.
pub(super) fn unwrap(target: &Object<'_>) -> Option<Arc<PixelObject>> {
    let handle = target.get::<_, Class<HostRef>>(HANDLE_KEY).ok()?;
    let object = Arc::clone(&handle.borrow().object);
    Some(object)
}

#[cfg(test)]
mod tests {
    use super::super::JsAdapter;
    use crate::bindings::protocol::ScriptAdapter;
    use crate::config::BridgeConfig;
    use crate::core::registry::Registry;
    use crate::dispatch::Callback;
    use crate::module::Module;
    use crate::object::PixelObject;
    use crate::value::Var;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn with_counter(drops: Arc<AtomicUsize>) -> JsAdapter {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        let mut module = Module::top_level();
        module.add_object(Callback::new("Counter", move |_, _| {
            let drops = Arc::clone(&drops);
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
        let js = JsAdapter::new(registry).unwrap();
        js.install_module(&sealed).unwrap();
        js
    }

    #[test]
    fn test_method_call_shape() {
        let js = with_counter(Arc::new(AtomicUsize::new(0)));
        js.execute("var c = Counter();", "c.js").unwrap();
        // runtime + self + 1 argument
        assert_eq!(js.eval("c.shape(1)").unwrap(), Var::new_i64(3));
        assert_eq!(js.eval("var f = c.shape; f(1)").unwrap(), Var::new_i64(3));
    }

    #[test]
    fn test_properties_round_trip_through_the_proxy() {
        let js = with_counter(Arc::new(AtomicUsize::new(0)));
        js.execute("var c = Counter(); c.label = 'x';", "c.js").unwrap();
        assert_eq!(js.eval("c.label").unwrap(), Var::new_string("x"));
        assert_eq!(js.eval("c.missing === undefined").unwrap(), Var::new_bool(true));
        assert!(js.execute("c.shape = 1;", "c.js").is_err());
        assert!(js.eval("String(c)").unwrap().as_str().starts_with("Counter: "));

        let c = js.eval("c").unwrap();
        let host = c.as_host_object().unwrap();
        assert_eq!(host.get_property("label"), Var::new_string("x"));
        host.set_property("label", Var::new_string("y"));
        assert_eq!(js.eval("c.label").unwrap(), Var::new_string("y"));
    }

    #[test]
    fn test_destructor_runs_once_after_collection() {
        let drops = Arc::new(AtomicUsize::new(0));
        let js = with_counter(Arc::clone(&drops));
        js.execute("(function () { var c = Counter(); c.shape(); })();", "c.js")
            .unwrap();
        js.collect_garbage();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        drop(js);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
