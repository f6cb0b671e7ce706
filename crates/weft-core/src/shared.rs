//! Lazily created, reference-counted process resources.
//!
//! Some resources (a hardware decoder context, a device session) must exist
//! once per process and only while something uses them. A
//! [`SharedResource`] is passed explicitly to whoever needs it; the first
//! [`acquire`](SharedResource::acquire) creates the value under the slot's
//! mutex and the last dropped [`ResourceHandle`] destroys it.
//!
//! The slot also records an owner id for resources that serve one user at a
//! time, see [`claim`](SharedResource::claim).

use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, WeftError};

struct Slot<T> {
    value: Option<Arc<T>>,
    users: usize,
    owner: Option<String>,
}

/// Cloneable handle to a process-wide slot.
pub struct SharedResource<T> {
    name: Arc<str>,
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Clone for SharedResource<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for SharedResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("SharedResource")
            .field("name", &self.name)
            .field("users", &slot.users)
            .field("owner", &slot.owner)
            .finish()
    }
}

impl<T: Send + Sync> SharedResource<T> {
    /// An empty slot.
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            slot: Arc::new(Mutex::new(Slot {
                value: None,
                users: 0,
                owner: None,
            })),
        }
    }

    /// Get the resource, creating it with `init` if nobody holds it.
    ///
    /// Creation runs under the slot mutex so concurrent first users see a
    /// single value. A failed `init` leaves the slot empty.
    pub fn acquire(&self, init: impl FnOnce() -> Result<T>) -> Result<ResourceHandle<T>> {
        let mut slot = self.slot.lock();
        let value = match &slot.value {
            Some(value) => Arc::clone(value),
            None => {
                let value = Arc::new(init().map_err(|e| {
                    WeftError::Resource(format!("{}: {e}", self.name))
                })?);
                debug!(resource = %self.name, "Shared resource created");
                slot.value = Some(Arc::clone(&value));
                value
            }
        };
        slot.users += 1;
        Ok(ResourceHandle {
            resource: self.clone(),
            value,
        })
    }

    /// Number of live handles.
    pub fn users(&self) -> usize {
        self.slot.lock().users
    }

    /// Whether the value currently exists.
    pub fn is_live(&self) -> bool {
        self.slot.lock().value.is_some()
    }

    /// Take exclusive use for `owner`. Succeeds if unowned or already held by
    /// `owner`.
    pub fn claim(&self, owner: &str) -> bool {
        let mut slot = self.slot.lock();
        match &slot.owner {
            Some(current) if current != owner => false,
            _ => {
                slot.owner = Some(owner.to_owned());
                true
            }
        }
    }

    /// Give up exclusive use. Only the current owner can release.
    pub fn release(&self, owner: &str) -> bool {
        let mut slot = self.slot.lock();
        if slot.owner.as_deref() == Some(owner) {
            slot.owner = None;
            true
        } else {
            false
        }
    }

    /// The current exclusive owner.
    pub fn owner(&self) -> Option<String> {
        self.slot.lock().owner.clone()
    }
}

/// A counted use of a [`SharedResource`].
pub struct ResourceHandle<T> {
    resource: SharedResource<T>,
    value: Arc<T>,
}

impl<T> Deref for ResourceHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> ResourceHandle<T> {
    /// The value itself, for work that outlives a borrow of the handle.
    /// The count of users is not affected.
    pub fn share(&self) -> Arc<T> {
        Arc::clone(&self.value)
    }
}

impl<T> Drop for ResourceHandle<T> {
    fn drop(&mut self) {
        let last = {
            let mut slot = self.resource.slot.lock();
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slot.owner = None;
                slot.value.take()
            } else {
                None
            }
        };
        // Destroy outside the lock; our own reference goes right after this
        if last.is_some() {
            drop(last);
            debug!(resource = %self.resource.name, "Shared resource released");
        }
    }
}
