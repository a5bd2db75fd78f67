//! Concurrent object pool with scoped handles.
//!
//! Workers acquire exclusive access to a pooled object through a guard that
//! pushes the object back on drop, on all exit paths. Entries are heap-owned
//! so the pool itself never requires its payload to be copyable.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// A multi-producer/multi-consumer pool of heap-owned scratch objects.
///
/// `acquire_with` pops an entry or builds a fresh one from the supplied
/// closure when the pool is empty, so the pool grows to the peak number of
/// concurrent workers and is then reused across stages.
pub struct Pool<T> {
    items: Mutex<Vec<Box<T>>>,
}

impl<T> Pool<T> {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Acquires an entry, constructing one with `init` if none is cached.
    pub fn acquire_with<F>(&self, init: F) -> PoolGuard<'_, T>
    where
        F: FnOnce() -> T,
    {
        let cached = self.items.lock().expect("pool mutex poisoned").pop();
        let item = cached.unwrap_or_else(|| Box::new(init()));
        PoolGuard {
            pool: self,
            item: Some(item),
        }
    }

    /// Number of currently cached (idle) entries.
    pub fn idle_count(&self) -> usize {
        self.items.lock().expect("pool mutex poisoned").len()
    }

    fn release(&self, item: Box<T>) {
        self.items.lock().expect("pool mutex poisoned").push(item);
    }
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped handle to a pooled object. Returns the object on drop.
pub struct PoolGuard<'a, T> {
    pool: &'a Pool<T>,
    item: Option<Box<T>>,
}

impl<T> Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_deref().expect("pool guard already released")
    }
}

impl<T> DerefMut for PoolGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_deref_mut().expect("pool guard already released")
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
