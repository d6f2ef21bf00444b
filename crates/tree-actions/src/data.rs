//! Per-invocation scratch storage for interceptors.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique token naming one slot of a [`ContextData`] bag.
///
/// Each interceptor mints its own keys, so two interceptors never read each
/// other's entries by accident.
pub struct DataKey<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DataKey<T> {
    pub fn new() -> Self {
        Self {
            id: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for DataKey<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for DataKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DataKey<T> {}

impl<T> fmt::Debug for DataKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataKey({})", self.id)
    }
}

/// Typed key/value bag attached to an action context.
///
/// Cloning the bag shares it: flow steps hold clones of their spawn's bag, so
/// an entry written during one step is visible in every later step.
#[derive(Clone, Default)]
pub struct ContextData {
    slots: Rc<RefCell<HashMap<u64, Box<dyn Any>>>>,
}

impl ContextData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, returning the previous entry.
    pub fn insert<T: 'static>(&self, key: DataKey<T>, value: T) -> Option<T> {
        self.slots
            .borrow_mut()
            .insert(key.id, Box::new(value))
            .and_then(|old| old.downcast().ok())
            .map(|old| *old)
    }

    /// A clone of the entry stored under `key`.
    pub fn get<T: Clone + 'static>(&self, key: DataKey<T>) -> Option<T> {
        self.slots
            .borrow()
            .get(&key.id)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn contains<T: 'static>(&self, key: DataKey<T>) -> bool {
        self.slots.borrow().contains_key(&key.id)
    }

    pub fn remove<T: 'static>(&self, key: DataKey<T>) -> Option<T> {
        self.slots
            .borrow_mut()
            .remove(&key.id)
            .and_then(|old| old.downcast().ok())
            .map(|old| *old)
    }

    /// Run `f` against the entry under `key`, creating it with `init` first
    /// if it is missing. The bag is not borrowed while `f` runs.
    pub fn update<T: 'static, R>(&self, key: DataKey<T>, init: impl FnOnce() -> T, f: impl FnOnce(&mut T) -> R) -> R {
        let taken = self.slots.borrow_mut().remove(&key.id);
        let mut value = taken
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
            .unwrap_or_else(init);
        let out = f(&mut value);
        self.slots.borrow_mut().insert(key.id, Box::new(value));
        out
    }

    /// Returns true if both handles point at the same bag.
    pub fn ptr_eq(&self, other: &ContextData) -> bool {
        Rc::ptr_eq(&self.slots, &other.slots)
    }
}

impl fmt::Debug for ContextData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextData")
            .field("entries", &self.slots.borrow().len())
            .finish()
    }
}
