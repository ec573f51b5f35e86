//! JavaScript Binding Adapter using rquickjs
//!
//! This adapter provides JavaScript scripting support using QuickJS. Host objects reach scripts
//! as a `Proxy` around a native handle: the proxy's `get` trap resolves methods from the
//! object's callback table and falls back to its properties, the `set` trap writes properties.
//! Named modules become global namespace objects.
//!
//! The QuickJS runtime lock is not re-entrant. A native callback that runs JavaScript on the
//! thread it was called from reuses the context already entered by the outer call.

mod convert;
mod module;
mod object;

use std::cell::Cell;
use std::sync::Arc;

use rquickjs::prelude::{Rest, This};
use rquickjs::{Context, Ctx, Exception, Object, Value};
use tracing::{debug, trace, warn};

use super::protocol::ScriptAdapter;
use super::refs::RefKeys;
use super::Runtime;
use crate::core::error::{BridgeError, BridgeResult};
use crate::core::registry::Registry;
use crate::module::SealedModule;
use crate::value::{Var, VarList, VarType};

/// Global holding parked script values, keyed by reference key.
const REFS_GLOBAL: &str = "__pxs_refs__";
/// Global holding the host object proxy factory.
const WRAP_GLOBAL: &str = "__pxs_wrap__";

impl From<rquickjs::Error> for BridgeError {
    fn from(err: rquickjs::Error) -> Self {
        BridgeError::script(Runtime::JavaScript, err.to_string())
    }
}

/// State shared between the adapter and the native functions it installs.
#[derive(Debug)]
pub(crate) struct JsShared {
    registry: Arc<Registry>,
    keys: RefKeys,
}

/// Raise a bridge error as a JavaScript exception.
fn throw(ctx: &Ctx<'_>, err: BridgeError) -> rquickjs::Error {
    Exception::throw_message(ctx, &err.to_string())
}

/// Turn an interpreter error into a script error, reading the pending exception if any.
fn script_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> BridgeError {
    let message = match err {
        rquickjs::Error::Exception => describe_exception(&ctx.catch()),
        other => other.to_string(),
    };
    BridgeError::script(Runtime::JavaScript, message)
}

fn describe_exception(value: &Value<'_>) -> String {
    if let Some(object) = value.as_object() {
        let name = object.get::<_, Option<String>>("name").ok().flatten();
        let message = object.get::<_, Option<String>>("message").ok().flatten();
        match (name, message) {
            (Some(name), Some(message)) => return format!("{name}: {message}"),
            (None, Some(message)) => return message,
            _ => {}
        }
    }
    if let Some(text) = value.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }
    format!("uncaught {:?}", value.type_of())
}

fn hidden_object<'js>(ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Object<'js>> {
    ctx.globals().get(name)
}

pub struct JsAdapter {
    shared: Arc<JsShared>,
    busy: Cell<bool>,
    context: Context,
    runtime: rquickjs::Runtime,
}

impl JsAdapter {
    pub fn new(registry: Arc<Registry>) -> BridgeResult<Self> {
        let config = registry.config().javascript.clone();
        let runtime = rquickjs::Runtime::new()?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        let context = Context::full(&runtime)?;

        let shared = Arc::new(JsShared {
            registry,
            keys: RefKeys::new(Runtime::JavaScript),
        });
        context.with(|ctx| -> BridgeResult<()> {
            let globals = ctx.globals();
            globals
                .set(REFS_GLOBAL, Object::new(ctx.clone())?)
                .map_err(|e| script_error(&ctx, e))?;
            let factory = object::proxy_factory(&ctx, &shared).map_err(|e| script_error(&ctx, e))?;
            globals
                .set(WRAP_GLOBAL, factory)
                .map_err(|e| script_error(&ctx, e))?;
            Ok(())
        })?;

        debug!(target: "bridge::js", owner = shared.keys.owner(), "JavaScript context created");
        Ok(Self {
            shared,
            busy: Cell::new(false),
            context,
            runtime,
        })
    }

    /// Enter the context. Nested entry from a native callback reuses the outer entry.
    fn with<R>(&self, f: impl FnOnce(Ctx<'_>) -> BridgeResult<R>) -> BridgeResult<R> {
        if self.busy.replace(true) {
            trace!(target: "bridge::js", "re-entering the running context");
            // SAFETY: `busy` stays true only while an outer call on this thread is inside
            // `context.with`, so that frame holds the runtime lock and the context outlives us.
            let ctx = unsafe { Ctx::from_raw(self.context.as_raw()) };
            return f(ctx);
        }
        let result = self.context.with(|ctx| {
            release_dropped(&ctx, &self.shared);
            f(ctx)
        });
        self.busy.set(false);
        result
    }
}

/// Forget parked values whose references were dropped.
fn release_dropped(ctx: &Ctx<'_>, shared: &JsShared) {
    let released = shared.keys.take_released();
    if released.is_empty() {
        return;
    }
    trace!(target: "bridge::js", count = released.len(), "releasing parked values");
    let Ok(refs) = hidden_object(ctx, REFS_GLOBAL) else {
        return;
    };
    for key in released {
        let _ = refs.remove(key.to_string());
    }
}

/// Fetch a parked value by reference.
fn parked<'js>(ctx: &Ctx<'js>, shared: &JsShared, var: &Var) -> BridgeResult<Value<'js>> {
    let Some(script_ref) = var.as_script_ref() else {
        return Err(BridgeError::TypeMismatch {
            expected: VarType::Object,
            found: var.tag(),
        });
    };
    let key = shared.keys.resolve(script_ref)?;
    let refs = hidden_object(ctx, REFS_GLOBAL)?;
    let value: Value = refs.get(key.to_string())?;
    if value.is_undefined() {
        return Err(BridgeError::NotFound(format!("{script_ref:?}")));
    }
    Ok(value)
}

fn arguments<'js>(ctx: &Ctx<'js>, shared: &Arc<JsShared>, args: VarList) -> BridgeResult<Vec<Value<'js>>> {
    args.iter().map(|arg| convert::into_js(ctx, shared, arg)).collect()
}

impl ScriptAdapter for JsAdapter {
    fn runtime(&self) -> Runtime {
        Runtime::JavaScript
    }

    fn owner_id(&self) -> u64 {
        self.shared.keys.owner()
    }

    fn execute(&self, code: &str, file_name: &str) -> BridgeResult<()> {
        self.with(|ctx| {
            ctx.eval::<(), _>(code)
                .map_err(|e| script_error(&ctx, e).in_file(file_name))
        })
    }

    fn eval(&self, code: &str) -> BridgeResult<Var> {
        self.with(|ctx| {
            let value: Value = ctx.eval(code).map_err(|e| script_error(&ctx, e))?;
            convert::from_js(&ctx, &self.shared, value)
        })
    }

    fn install_module(&self, sealed: &SealedModule) -> BridgeResult<()> {
        self.with(|ctx| module::install(&ctx, &self.shared, sealed))
    }

    fn call_function(&self, name: &str, args: VarList) -> BridgeResult<Var> {
        self.with(|ctx| {
            let value: Value = ctx.globals().get(name)?;
            if value.is_undefined() {
                return Err(BridgeError::NotFound(format!("JavaScript function `{name}`")));
            }
            let Some(function) = value.as_function() else {
                return Err(BridgeError::script(
                    Runtime::JavaScript,
                    format!("`{name}` is not a function"),
                ));
            };
            let args = arguments(&ctx, &self.shared, args)?;
            let result: Value = function
                .call((Rest(args),))
                .map_err(|e| script_error(&ctx, e))?;
            convert::from_js(&ctx, &self.shared, result)
        })
    }

    fn var_call(&self, function: &Var, args: VarList) -> BridgeResult<Var> {
        self.with(|ctx| {
            let value = parked(&ctx, &self.shared, function)?;
            let (Var::Function(_), Some(callee)) = (function, value.as_function()) else {
                return Err(BridgeError::TypeMismatch {
                    expected: VarType::Function,
                    found: function.tag(),
                });
            };
            let args = arguments(&ctx, &self.shared, args)?;
            let result: Value = callee
                .call((Rest(args),))
                .map_err(|e| script_error(&ctx, e))?;
            convert::from_js(&ctx, &self.shared, result)
        })
    }

    fn object_call(&self, object: &Var, method: &str, args: VarList) -> BridgeResult<Var> {
        if let Var::HostObject(host) = object {
            return host.call_method(Runtime::JavaScript, method, args);
        }
        self.with(|ctx| {
            let value = parked(&ctx, &self.shared, object)?;
            let Some(target) = value.as_object() else {
                return Err(BridgeError::script(Runtime::JavaScript, "only objects have methods"));
            };
            let member: Value = target.get(method)?;
            let Some(function) = member.as_function() else {
                return Err(BridgeError::MissingMethod {
                    type_name: "JavaScript object".to_string(),
                    method: method.to_string(),
                });
            };
            let args = arguments(&ctx, &self.shared, args)?;
            let result: Value = function
                .call((This(target.clone()), Rest(args)))
                .map_err(|e| script_error(&ctx, e))?;
            convert::from_js(&ctx, &self.shared, result)
        })
    }

    fn get_property(&self, object: &Var, name: &str) -> BridgeResult<Var> {
        if let Var::HostObject(host) = object {
            return Ok(host.get_property(name));
        }
        self.with(|ctx| {
            let value = parked(&ctx, &self.shared, object)?;
            let Some(target) = value.as_object() else {
                return Err(BridgeError::script(Runtime::JavaScript, "only objects have properties"));
            };
            let property: Value = target.get(name).map_err(|e| script_error(&ctx, e))?;
            convert::from_js(&ctx, &self.shared, property)
        })
    }

    fn set_property(&self, object: &Var, name: &str, value: Var) -> BridgeResult<()> {
        if let Var::HostObject(host) = object {
            host.set_property(name, value);
            return Ok(());
        }
        self.with(|ctx| {
            let parked_value = parked(&ctx, &self.shared, object)?;
            let Some(target) = parked_value.as_object() else {
                return Err(BridgeError::script(Runtime::JavaScript, "only objects have properties"));
            };
            let value = convert::into_js(&ctx, &self.shared, &value)?;
            target.set(name, value).map_err(|e| script_error(&ctx, e))
        })
    }

    fn clear_caches(&self) {
        // Proxies are created per crossing; there is nothing cached to drop.
    }

    fn collect_garbage(&self) {
        if self.busy.get() {
            warn!(target: "bridge::js", "skipping garbage collection while the interpreter is running");
            return;
        }
        // Entering the context is enough to release dropped references.
        let _ = self.with(|_| Ok(()));
        self.runtime.run_gc();
        trace!(target: "bridge::js", "collected garbage");
    }
}

impl Drop for JsAdapter {
    fn drop(&mut self) {
        debug!(target: "bridge::js", owner = self.shared.keys.owner(), "JavaScript context closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::dispatch::Callback;
    use crate::module::Module;

    fn adapter() -> JsAdapter {
        JsAdapter::new(Arc::new(Registry::new(BridgeConfig::default()))).unwrap()
    }

    #[test]
    fn test_execute_reports_file_name() {
        let js = adapter();
        assert!(js.execute("var x = 1 + 1;", "ok.js").is_ok());
        let err = js.execute("throw new Error('boom');", "bad.js").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bad.js"), "{message}");
        assert!(message.contains("boom"), "{message}");
        assert!(js.execute("this is not javascript", "syntax.js").is_err());
    }

    #[test]
    fn test_eval_values() {
        let js = adapter();
        assert_eq!(js.eval("40 + 2").unwrap(), Var::new_i64(42));
        assert_eq!(js.eval("1.5").unwrap(), Var::new_f64(1.5));
        assert_eq!(js.eval("'hi' + '!'").unwrap(), Var::new_string("hi!"));
        assert_eq!(js.eval("null").unwrap(), Var::Null);
        assert_eq!(js.eval("undefined").unwrap(), Var::Null);
        let list = js.eval("[1, 'two', true]").unwrap();
        assert!(list.equivalent(&Var::from(vec![
            Var::new_i64(1),
            Var::new_string("two"),
            Var::new_bool(true),
        ])));
        assert!(js.eval("({ name: 'x' })").unwrap().is(VarType::Object));
        assert!(js.eval("(function () {})").unwrap().is(VarType::Function));
    }

    #[test]
    fn test_call_function_and_var_call() {
        let js = adapter();
        js.execute("function add(a, b) { return a + b; } var twice = (f) => (x) => f(f(x));", "f.js")
            .unwrap();
        let args: VarList = vec![Var::new_i64(2), Var::new_i64(3)].into();
        assert_eq!(js.call_function("add", args).unwrap(), Var::new_i64(5));
        assert!(matches!(
            js.call_function("missing", VarList::new()),
            Err(BridgeError::NotFound(_))
        ));

        let inc = js.eval("(x) => x + 1").unwrap();
        let twice = js.call_function("twice", vec![inc].into()).unwrap();
        assert_eq!(js.var_call(&twice, vec![Var::new_i64(1)].into()).unwrap(), Var::new_i64(3));
    }

    #[test]
    fn test_script_object_methods_and_properties() {
        let js = adapter();
        let counter = js
            .eval("({ n: 1, bump(by) { this.n += by; return this.n; } })")
            .unwrap();
        assert_eq!(
            js.object_call(&counter, "bump", vec![Var::new_i64(4)].into()).unwrap(),
            Var::new_i64(5)
        );
        assert_eq!(js.get_property(&counter, "n").unwrap(), Var::new_i64(5));
        js.set_property(&counter, "n", Var::new_i64(10)).unwrap();
        assert_eq!(
            js.object_call(&counter, "bump", vec![Var::new_i64(1)].into()).unwrap(),
            Var::new_i64(11)
        );
        assert!(matches!(
            js.object_call(&counter, "nope", VarList::new()),
            Err(BridgeError::MissingMethod { .. })
        ));
    }

    #[test]
    fn test_installed_functions_receive_runtime_first() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        let mut module = Module::top_level();
        module.add_callback(Callback::new("first_arg", |args, _| {
            args.as_list().and_then(|l| l.get(0)).cloned().unwrap_or_default()
        }));
        let sealed = registry.seal(module).unwrap();

        let js = JsAdapter::new(registry).unwrap();
        js.install_module(&sealed).unwrap();
        assert_eq!(js.eval("first_arg('x')").unwrap(), Runtime::JavaScript.as_var());
    }

    #[test]
    fn test_foreign_references_are_rejected() {
        let js = adapter();
        let other = adapter();
        let function = other.eval("(function () { return 1; })").unwrap();
        assert!(matches!(
            js.var_call(&function, VarList::new()),
            Err(BridgeError::Capability { .. })
        ));
    }

    #[test]
    fn test_callback_errors_become_exceptions() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        let mut module = Module::top_level();
        module.add_callback(Callback::new("explode", |_, _| crate::dispatch::fail("nope")));
        let sealed = registry.seal(module).unwrap();

        let js = JsAdapter::new(registry).unwrap();
        js.install_module(&sealed).unwrap();
        assert_eq!(
            js.eval("(function () { try { explode(); return 'no'; } catch (e) { return 'caught'; } })()")
                .unwrap(),
            Var::new_string("caught")
        );
        let err = js.execute("explode();", "cb.js").unwrap_err();
        assert!(err.to_string().contains("nope"), "{err}");
    }
}
