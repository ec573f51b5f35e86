//! Function dispatch
//!
//! Every native function reachable from a script is a [`Callback`]: a name, a closure taking
//! the argument list and an [`Opaque`] user value, and that opaque value. Sealed modules
//! register their callbacks in the [`FunctionTable`] under `(module path, name)` and the
//! adapters only ever hold the resulting [`FunctionId`].
//!
//! Callbacks report errors out-of-band: they return [`fail`], which records a message for the
//! current call and yields `Null`. The adapter then raises the message as a script error.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::core::error::{BridgeError, BridgeResult};
use crate::value::{Var, VarList};

/// Signature of every native callback.
///
/// `args` is always a `List`: index 0 is the calling runtime, index 1 is `self` for object
/// methods, the script arguments follow.
pub type CallbackFn = dyn Fn(&Var, &Opaque) -> Var + Send + Sync;

thread_local! {
    static PENDING_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Report an error from inside a callback. Returns the `Null` the callback should return.
pub fn fail(message: impl Into<String>) -> Var {
    let message = message.into();
    PENDING_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
    Var::Null
}

fn take_pending_error() -> Option<String> {
    PENDING_ERROR.with(|slot| slot.borrow_mut().take())
}

fn restore_pending_error(message: Option<String>) {
    PENDING_ERROR.with(|slot| *slot.borrow_mut() = message);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// User data handed back to a callback on every call.
#[derive(Clone, Default)]
pub struct Opaque(Option<Arc<dyn Any + Send + Sync>>);

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Opaque(Some(Arc::new(value)))
    }

    pub fn none() -> Self {
        Opaque(None)
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|value| value.downcast_ref::<T>())
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Opaque(..)"),
            None => f.write_str("Opaque(None)"),
        }
    }
}

/// A named native function plus its opaque user data.
#[derive(Clone)]
pub struct Callback {
    name: String,
    func: Arc<CallbackFn>,
    opaque: Opaque,
}

impl Callback {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Var, &Opaque) -> Var + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
            opaque: Opaque::none(),
        }
    }

    pub fn with_opaque(mut self, opaque: Opaque) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn opaque(&self) -> &Opaque {
        &self.opaque
    }

    /// Run the callback.
    ///
    /// A message recorded with [`fail`] and a panic both turn into [`BridgeError::Callback`].
    /// An error still pending from an enclosing callback survives a nested call.
    pub fn invoke(&self, args: VarList) -> BridgeResult<Var> {
        let outer = take_pending_error();
        let args = Var::List(args);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.func)(&args, &self.opaque)));
        let reported = take_pending_error();
        restore_pending_error(outer);

        match outcome {
            Ok(result) => match reported {
                Some(message) => {
                    debug!(target: "bridge", callback = %self.name, %message, "callback failed");
                    Err(BridgeError::Callback(message))
                }
                None => Ok(result),
            },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(target: "bridge", callback = %self.name, %message, "callback panicked");
                Err(BridgeError::Callback(format!(
                    "`{}` panicked: {message}",
                    self.name
                )))
            }
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("name", &self.name)
            .field("opaque", &self.opaque)
            .finish()
    }
}

/// Index into the [`FunctionTable`]. Stable for the life of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(usize);

impl FunctionId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Default)]
struct TableInner {
    entries: Vec<Callback>,
    by_name: HashMap<(String, String), FunctionId>,
}

/// Process-wide `(scope, name) → callback` table.
///
/// Entries are only ever added or replaced. Registering an existing key replaces the callback
/// in place and keeps its id, so interpreters that already installed the name pick up the new
/// binding on their next call.
#[derive(Default)]
pub struct FunctionTable {
    inner: RwLock<TableInner>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, scope: &str, callback: Callback) -> FunctionId {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let key = (scope.to_string(), callback.name().to_string());
        if let Some(&id) = inner.by_name.get(&key) {
            debug!(target: "bridge", scope, name = callback.name(), "replacing callback");
            inner.entries[id.0] = callback;
            return id;
        }
        let id = FunctionId(inner.entries.len());
        inner.entries.push(callback);
        inner.by_name.insert(key, id);
        id
    }

    pub fn lookup(&self, scope: &str, name: &str) -> Option<FunctionId> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_name
            .get(&(scope.to_string(), name.to_string()))
            .copied()
    }

    pub fn get(&self, id: FunctionId) -> Option<Callback> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(id.0).cloned()
    }

    /// Invoke a registered callback. The table lock is released before the callback runs.
    pub fn call(&self, id: FunctionId, args: VarList) -> BridgeResult<Var> {
        let callback = self
            .get(id)
            .ok_or_else(|| BridgeError::NotFound(format!("function #{}", id.0)))?;
        callback.invoke(args)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_first() -> Callback {
        Callback::new("echo", |args, _| {
            args.as_list()
                .and_then(|list| list.get(1))
                .cloned()
                .unwrap_or_default()
        })
    }

    #[test]
    fn test_invoke_passes_opaque() {
        let callback = Callback::new("scale", |args, opaque| {
            let factor = opaque.get::<i64>().copied().unwrap_or(1);
            let value = args.as_list().and_then(|l| l.get(1)).map_or(0, Var::as_i64);
            Var::new_i64(value * factor)
        })
        .with_opaque(Opaque::new(3_i64));

        let args: VarList = vec![Var::Null, Var::new_i64(5)].into();
        assert_eq!(callback.invoke(args), Ok(Var::new_i64(15)));
    }

    #[test]
    fn test_fail_is_reported_once() {
        let callback = Callback::new("broken", |_, _| fail("bad input"));
        assert_eq!(
            callback.invoke(VarList::new()),
            Err(BridgeError::Callback("bad input".to_string()))
        );
        assert_eq!(echo_first().invoke(VarList::new()), Ok(Var::Null));
    }

    #[test]
    fn test_panics_are_caught() {
        let callback = Callback::new("explode", |_, _| panic!("kaboom"));
        match callback.invoke(VarList::new()) {
            Err(BridgeError::Callback(message)) => assert!(message.contains("kaboom")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_registration_replaces_in_place() {
        let table = FunctionTable::new();
        let first = table.register("math", Callback::new("f", |_, _| Var::new_i64(1)));
        let second = table.register("math", Callback::new("f", |_, _| Var::new_i64(2)));
        let other = table.register("", Callback::new("f", |_, _| Var::new_i64(3)));

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(table.len(), 2);
        assert_eq!(table.call(first, VarList::new()), Ok(Var::new_i64(2)));
        assert_eq!(table.lookup("", "f"), Some(other));
        assert_eq!(table.lookup("math", "g"), None);
    }
}
