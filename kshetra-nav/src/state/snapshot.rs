//! Atomic publication of immutable values.

use std::sync::Arc;

use parking_lot::RwLock;

/// Holds the current version of a value behind an `Arc`.
///
/// The writer replaces the whole `Arc` in one assignment; readers clone the
/// `Arc` and keep a complete version for as long as they hold it. The lock
/// is only held for the pointer swap or clone.
#[derive(Debug)]
pub struct SnapshotCell<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.inner.read())
    }

    pub fn store(&self, value: T) {
        self.store_arc(Arc::new(value));
    }

    pub fn store_arc(&self, value: Arc<T>) {
        *self.inner.write() = value;
    }
}

impl<T: Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
