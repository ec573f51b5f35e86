//! Single-owner native handles
//!
//! Two release hooks live here:
//!
//! - [`HostHandle`] owns the native data behind a [`PixelObject`](crate::object::PixelObject)
//!   and runs its destructor exactly once, when the handle is dropped.
//! - [`ReleaseGuard`] is the deleter carried by `Object`/`Function` vars. It tells the owning
//!   adapter that a script value parked on the native side is no longer referenced.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::bindings::Runtime;

/// Destructor run on the native data when its [`HostHandle`] is dropped.
pub type Destructor = Box<dyn FnOnce(&mut (dyn Any + Send)) + Send>;

/// Owned native data plus an optional destructor.
///
/// The data is dropped (and the destructor called first, if any) exactly once. Access goes
/// through [`HostHandle::with`], which locks the data for the duration of the closure, so a
/// callback must not re-enter the same object while it holds the data.
pub struct HostHandle {
    data: Mutex<Box<dyn Any + Send>>,
    destructor: Mutex<Option<Destructor>>,
}

impl HostHandle {
    pub fn new<T: Any + Send>(data: T) -> Self {
        Self {
            data: Mutex::new(Box::new(data)),
            destructor: Mutex::new(None),
        }
    }

    /// Attach a destructor. Replaces any previous one.
    pub fn with_destructor<F>(self, destructor: F) -> Self
    where
        F: FnOnce(&mut (dyn Any + Send)) + Send + 'static,
    {
        *self
            .destructor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(destructor));
        self
    }

    /// Borrow the data mutably as `T`. Returns `None` when the data is another type.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        guard.downcast_mut::<T>().map(f)
    }

    pub fn is<T: Any>(&self) -> bool {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is::<T>()
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        let destructor = self
            .destructor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(destructor) = destructor {
            let data = self.data.get_mut().unwrap_or_else(PoisonError::into_inner);
            destructor(data.as_mut());
        }
    }
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandle").finish_non_exhaustive()
    }
}

/// Runs a release closure once, when the last clone of the owning reference is dropped.
pub struct ReleaseGuard {
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ReleaseGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// A guard with nothing to release.
    pub fn noop() -> Self {
        Self {
            release: Mutex::new(None),
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let release = self
            .release
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(release) = release {
            release();
        }
    }
}

/// Reference to a value that lives inside one runtime on one thread.
///
/// Used as the payload of `Var::Object` and `Var::Function`. The value itself stays parked in
/// the adapter that produced it; the reference only carries the slot key. Clones share the
/// slot, which is released when the last clone is dropped.
#[derive(Clone)]
pub struct ScriptRef {
    runtime: Runtime,
    owner: u64,
    key: u64,
    guard: Arc<ReleaseGuard>,
}

impl ScriptRef {
    pub fn new(runtime: Runtime, owner: u64, key: u64, guard: ReleaseGuard) -> Self {
        Self {
            runtime,
            owner,
            key,
            guard: Arc::new(guard),
        }
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime
    }

    /// Identifier of the adapter instance that owns the slot.
    ///
    /// Every interpreter started on every thread gets a fresh owner id, so a reference can
    /// only be resolved by the interpreter that created it.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn belongs_to(&self, owner: u64) -> bool {
        self.owner == owner
    }
}

impl PartialEq for ScriptRef {
    fn eq(&self, other: &Self) -> bool {
        self.runtime == other.runtime && self.owner == other.owner && self.key == other.key
    }
}

impl fmt::Debug for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptRef({}#{}@{})", self.runtime, self.key, self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_destructor_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = HostHandle::new(41_i32).with_destructor(move |data| {
            assert_eq!(data.downcast_ref::<i32>(), Some(&42));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.with(|n: &mut i32| *n += 1);
        assert!(handle.is::<i32>());
        assert!(handle.with(|_: &mut String| ()).is_none());

        drop(handle);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_script_ref_releases_with_last_clone() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let script_ref = ScriptRef::new(
            Runtime::Lua,
            1,
            7,
            ReleaseGuard::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let copy = script_ref.clone();
        assert_eq!(copy, script_ref);

        drop(script_ref);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(copy);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
