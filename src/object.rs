//! Host pseudo-objects
//!
//! A [`PixelObject`] is one instance of a host-defined pseudo-class: opaque native data, a
//! type name, a table of named methods and a bag of properties. Constructors registered with
//! `Module::add_object` build one per call and return it as `Var::HostObject`.
//!
//! Methods can only be added while the object is still uniquely owned, i.e. before it is
//! wrapped in a `Var`. Properties stay mutable for the object's whole life. The native data is
//! released exactly once, when the last `Var` or runtime wrapper referring to it goes away.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::bindings::Runtime;
use crate::core::error::{BridgeError, BridgeResult};
use crate::dispatch::Callback;
use crate::value::{HostHandle, Var, VarList};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

pub struct PixelObject {
    id: u64,
    type_name: String,
    handle: HostHandle,
    methods: HashMap<String, Callback>,
    properties: Mutex<HashMap<String, Var>>,
}

impl PixelObject {
    pub fn new<T: Any + Send>(data: T, type_name: impl Into<String>) -> Self {
        Self::from_handle(HostHandle::new(data), type_name)
    }

    pub fn from_handle(handle: HostHandle, type_name: impl Into<String>) -> Self {
        Self {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            type_name: type_name.into(),
            handle,
            methods: HashMap::new(),
            properties: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a destructor that runs on the native data when the object is released.
    pub fn with_destructor<F>(mut self, destructor: F) -> Self
    where
        F: FnOnce(&mut (dyn Any + Send)) + Send + 'static,
    {
        let handle = std::mem::replace(&mut self.handle, HostHandle::new(()));
        self.handle = handle.with_destructor(destructor);
        self
    }

    /// Add a method. A method with the same name is replaced.
    pub fn add_callback(&mut self, callback: Callback) {
        self.methods.insert(callback.name().to_string(), callback);
    }

    /// Unique id of this instance, stable for its whole life.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn handle(&self) -> &HostHandle {
        &self.handle
    }

    pub fn method(&self, name: &str) -> Option<&Callback> {
        self.methods.get(name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Borrow the native data as `T` for the duration of `f`.
    pub fn with_data<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.handle.with(f)
    }

    /// Invoke a method with the argument list `[runtime, self, args...]`.
    pub fn call_method<I>(self: &Arc<Self>, runtime: Runtime, name: &str, args: I) -> BridgeResult<Var>
    where
        I: IntoIterator<Item = Var>,
    {
        let callback = self.methods.get(name).ok_or_else(|| BridgeError::MissingMethod {
            type_name: self.type_name.clone(),
            method: name.to_string(),
        })?;
        let mut argv = VarList::new();
        argv.add(runtime.as_var());
        argv.add(Var::HostObject(Arc::clone(self)));
        for arg in args {
            argv.add(arg);
        }
        callback.invoke(argv)
    }

    /// Read a property. Missing properties read as `Null`.
    pub fn get_property(&self, name: &str) -> Var {
        self.lock_properties().get(name).cloned().unwrap_or_default()
    }

    /// Write a property. Setting `Null` removes it.
    pub fn set_property(&self, name: impl Into<String>, value: Var) {
        let name = name.into();
        let mut properties = self.lock_properties();
        if value.is_null() {
            properties.remove(&name);
        } else {
            properties.insert(name, value);
        }
    }

    /// Snapshot of every property, in no particular order.
    pub fn properties(&self) -> Vec<(String, Var)> {
        self.lock_properties()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    fn lock_properties(&self) -> std::sync::MutexGuard<'_, HashMap<String, Var>> {
        self.properties.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PixelObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.method_names().collect();
        methods.sort_unstable();
        f.debug_struct("PixelObject")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("methods", &methods)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::fail;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        hits: i64,
    }

    fn counter_object(drops: Arc<AtomicUsize>) -> PixelObject {
        let mut object = PixelObject::new(Counter { hits: 0 }, "Counter").with_destructor(
            move |_| {
                drops.fetch_add(1, Ordering::SeqCst);
            },
        );
        object.add_callback(Callback::new("hit", |args, _| {
            let Some(this) = args.as_list().and_then(|l| l.get(1)).and_then(Var::as_host_object)
            else {
                return fail("hit called without self");
            };
            let by = args.as_list().and_then(|l| l.get(2)).map_or(1, Var::as_i64);
            this.with_data(|c: &mut Counter| {
                c.hits += by;
                Var::new_i64(c.hits)
            })
            .unwrap_or_default()
        }));
        object
    }

    #[test]
    fn test_call_method_shape() {
        let drops = Arc::new(AtomicUsize::new(0));
        let object = Arc::new(counter_object(Arc::clone(&drops)));

        assert_eq!(object.call_method(Runtime::Lua, "hit", []), Ok(Var::new_i64(1)));
        assert_eq!(
            object.call_method(Runtime::JavaScript, "hit", [Var::new_i64(4)]),
            Ok(Var::new_i64(5))
        );
        assert!(matches!(
            object.call_method(Runtime::Lua, "missing", []),
            Err(BridgeError::MissingMethod { .. })
        ));
    }

    #[test]
    fn test_destructor_runs_once_after_last_owner() {
        let drops = Arc::new(AtomicUsize::new(0));
        let var = Var::new_host_object(counter_object(Arc::clone(&drops)));
        let copy = var.clone();

        drop(var);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(copy);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_method_registration_wins() {
        let mut object = PixelObject::new((), "Thing");
        object.add_callback(Callback::new("name", |_, _| Var::new_string("first")));
        object.add_callback(Callback::new("name", |_, _| Var::new_string("second")));
        let object = Arc::new(object);

        assert_eq!(
            object.call_method(Runtime::Lua, "name", []),
            Ok(Var::new_string("second"))
        );
    }

    #[test]
    fn test_properties() {
        let object = PixelObject::new((), "Bag");
        object.set_property("size", Var::new_i64(3));
        assert_eq!(object.get_property("size"), Var::new_i64(3));
        object.set_property("size", Var::Null);
        assert!(object.get_property("size").is_null());
        assert!(object.properties().is_empty());
    }
}
