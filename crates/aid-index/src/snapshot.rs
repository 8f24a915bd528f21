//! Copy-on-write publication of immutable snapshots.

use parking_lot::{Mutex, RwLock};
use std::ops::Deref;
use std::sync::Arc;

/// A published value tagged with a monotonically increasing version.
#[derive(Debug)]
pub struct Snapshot<T> {
    version: u64,
    value: T,
}

impl<T> Snapshot<T> {
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Holder of the current snapshot.
///
/// Readers take an `Arc` to the current snapshot and keep using it for as
/// long as they like. Writers serialize on an internal lock, edit a private
/// clone and swap it in; a failed edit publishes nothing.
#[derive(Debug)]
pub struct SnapshotCell<T> {
    current: RwLock<Arc<Snapshot<T>>>,
    writer: Mutex<()>,
}

impl<T: Clone> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot { version: 0, value })),
            writer: Mutex::new(()),
        }
    }

    /// The currently published snapshot.
    pub fn load(&self) -> Arc<Snapshot<T>> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Apply `f` to a copy of the current value and publish the result.
    ///
    /// Returns `f`'s output together with the new version. When `f` fails the
    /// current snapshot is left in place.
    pub fn update<R, E, F>(&self, f: F) -> Result<(R, u64), E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
    {
        let _guard = self.writer.lock();
        let base = self.load();
        let mut next = base.value.clone();
        let out = f(&mut next)?;
        let version = base.version + 1;
        *self.current.write() = Arc::new(Snapshot {
            version,
            value: next,
        });
        Ok((out, version))
    }

    /// Publish `value` unconditionally.
    pub fn replace(&self, value: T) -> u64 {
        let _guard = self.writer.lock();
        let mut slot = self.current.write();
        let version = slot.version + 1;
        *slot = Arc::new(Snapshot { version, value });
        version
    }
}
