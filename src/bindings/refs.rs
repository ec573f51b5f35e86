//! Bookkeeping for script values parked on the native side
//!
//! When an adapter hands a script table, object or function to native code it stores the value
//! inside its own interpreter under a numeric key and returns a [`ScriptRef`] carrying that key.
//! Dropping the last clone of the reference does not touch the interpreter: it queues the key
//! on the owning thread, and the adapter deletes queued keys the next time it runs. Releases
//! that happen on another thread, or after the adapter is gone, are ignored; those values go
//! away with the interpreter.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use crate::core::error::{BridgeError, BridgeResult};
use crate::value::{ReleaseGuard, ScriptRef};

use super::Runtime;

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Release queues of the adapters alive on this thread, by owner.
    static RELEASED: RefCell<HashMap<u64, Vec<u64>>> = RefCell::new(HashMap::new());
}

/// Key allocator for one adapter instance.
#[derive(Debug)]
pub(crate) struct RefKeys {
    runtime: Runtime,
    owner: u64,
    thread: ThreadId,
    next_key: AtomicU64,
}

impl RefKeys {
    pub fn new(runtime: Runtime) -> Self {
        let owner = NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed);
        let _ = RELEASED.try_with(|released| {
            if let Ok(mut released) = released.try_borrow_mut() {
                released.insert(owner, Vec::new());
            }
        });
        Self {
            runtime,
            owner,
            thread: thread::current().id(),
            next_key: AtomicU64::new(1),
        }
    }

    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn next_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    /// Build the reference for a freshly stored key.
    pub fn make_ref(&self, key: u64) -> ScriptRef {
        let owner = self.owner;
        let thread = self.thread;
        let guard = ReleaseGuard::new(move || {
            if thread::current().id() != thread {
                return;
            }
            let _ = RELEASED.try_with(|released| {
                if let Ok(mut released) = released.try_borrow_mut() {
                    if let Some(queue) = released.get_mut(&owner) {
                        queue.push(key);
                    }
                }
            });
        });
        ScriptRef::new(self.runtime, owner, key, guard)
    }

    /// The key of a reference created by this adapter.
    ///
    /// References from another runtime, thread or interpreter instance cannot be resolved.
    pub fn resolve(&self, script_ref: &ScriptRef) -> BridgeResult<u64> {
        if script_ref.belongs_to(self.owner) {
            Ok(script_ref.key())
        } else if script_ref.runtime() != self.runtime {
            Err(BridgeError::capability(
                self.runtime,
                format!("a value owned by {}", script_ref.runtime()),
            ))
        } else {
            Err(BridgeError::capability(
                self.runtime,
                "a value owned by another interpreter instance",
            ))
        }
    }

    /// Keys whose references were dropped on this thread since the last call.
    pub fn take_released(&self) -> Vec<u64> {
        RELEASED
            .try_with(|released| {
                released
                    .try_borrow_mut()
                    .ok()
                    .and_then(|mut released| released.get_mut(&self.owner).map(std::mem::take))
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

impl Drop for RefKeys {
    fn drop(&mut self) {
        let _ = RELEASED.try_with(|released| {
            if let Ok(mut released) = released.try_borrow_mut() {
                released.remove(&self.owner);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_keys_are_queued_per_owner() {
        let keys = RefKeys::new(Runtime::Lua);
        let other = RefKeys::new(Runtime::Lua);

        let first = keys.make_ref(keys.next_key());
        let second = keys.make_ref(keys.next_key());
        let foreign = other.make_ref(other.next_key());
        assert_eq!(keys.resolve(&first), Ok(1));
        assert!(keys.resolve(&foreign).is_err());

        drop(first);
        drop(second.clone());
        assert_eq!(keys.take_released(), vec![1]);
        drop(second);
        drop(foreign);
        assert_eq!(keys.take_released(), vec![2]);
        assert_eq!(other.take_released(), vec![1]);
    }

    #[test]
    fn test_dropped_owner_stops_queueing() {
        let keys = RefKeys::new(Runtime::JavaScript);
        let owner = keys.owner();
        let survivor = keys.make_ref(keys.next_key());
        drop(keys);

        drop(survivor);
        let queued = RELEASED.with(|released| released.borrow().contains_key(&owner));
        assert!(!queued);
    }

    #[test]
    fn test_foreign_runtime_is_a_capability_gap() {
        let lua = RefKeys::new(Runtime::Lua);
        let js = RefKeys::new(Runtime::JavaScript);
        let js_ref = js.make_ref(js.next_key());
        assert_eq!(
            lua.resolve(&js_ref),
            Err(BridgeError::capability(
                Runtime::Lua,
                "a value owned by JavaScript"
            ))
        );
    }
}
