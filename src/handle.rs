//! Handle-based storage for native resources.
//!
//! Native closures, open files and promises cannot cross the host boundary
//! as raw references, so the host only ever sees a [`Handle`]. Handles come
//! from a monotonic counter and are never reused, even after release.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{RegistrationError, Result};

/// Opaque handle to a resource stored in a [`HandleRegistry`]. Zero is never
/// issued.
pub type Handle = u64;

/// A thread-safe table from handles to resources.
pub struct HandleRegistry<T> {
    next: AtomicU64,
    storage: RwLock<HashMap<Handle, T>>,
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            storage: RwLock::new(HashMap::new()),
        }
    }

    /// Store `resource` and return its new handle.
    ///
    /// Fails with `TooManyHandles` once the counter is exhausted instead of
    /// wrapping around.
    pub fn allocate(&self, resource: T) -> Result<Handle> {
        let handle = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .map_err(|_| RegistrationError::TooManyHandles)?;
        self.storage.write().insert(handle, resource);
        Ok(handle)
    }

    /// Run `f` with the resource behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not live. A stale or forged handle means the
    /// caller invoked something it does not own.
    pub fn with<F, R>(&self, handle: Handle, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let storage = self.storage.read();
        match storage.get(&handle) {
            Some(resource) => f(resource),
            None => panic!("invalid handle {}", handle),
        }
    }

    /// Remove the resource behind `handle`, if any. Releasing twice is
    /// harmless.
    pub fn release(&self, handle: Handle) -> Option<T> {
        self.storage.write().remove(&handle)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.storage.read().contains_key(&handle)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.read().is_empty()
    }
}

impl<T: Clone> HandleRegistry<T> {
    /// A copy of the resource behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not live, like [`with`](Self::with).
    pub fn lookup(&self, handle: Handle) -> T {
        self.with(handle, T::clone)
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HandleRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("next", &self.next.load(Ordering::Relaxed))
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
impl<T> HandleRegistry<T> {
    fn starting_at(next: u64) -> Self {
        Self {
            next: AtomicU64::new(next),
            storage: RwLock::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_handles_are_unique_and_nonzero() {
        let registry = HandleRegistry::new();
        let handles: HashSet<_> = (0..1000).map(|i| registry.allocate(i).unwrap()).collect();
        assert_eq!(handles.len(), 1000);
        assert!(!handles.contains(&0));
    }

    #[test]
    fn test_release_is_idempotent_and_never_reused() {
        let registry = HandleRegistry::new();
        let a = registry.allocate("a").unwrap();
        assert_eq!(registry.release(a), Some("a"));
        assert_eq!(registry.release(a), None);
        let b = registry.allocate("b").unwrap();
        assert_ne!(a, b);
        assert!(!registry.contains(a));
        assert_eq!(registry.lookup(b), "b");
    }

    #[test]
    #[should_panic(expected = "invalid handle")]
    fn test_lookup_miss_panics() {
        let registry: HandleRegistry<u8> = HandleRegistry::new();
        registry.lookup(42);
    }

    #[test]
    fn test_exhaustion_fails_without_wrapping() {
        let registry = HandleRegistry::starting_at(u64::MAX - 1);
        assert_eq!(registry.allocate(()).unwrap(), u64::MAX - 1);
        assert!(registry.allocate(()).is_err());
        assert!(registry.allocate(()).is_err());
        assert_eq!(registry.len(), 1);
    }
}
