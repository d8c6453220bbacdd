//! The records of every object known to the validator.
//!
//! Records are stored behind an [`Arc`] and a [`Mutex`] each, keyed by the object's handle.
//! Looking up a record only holds the lock of the map for as long as it takes to clone the
//! `Arc`, so a record can be locked and mutated without blocking lookups of other records.
//!
//! Records never own each other. When a record needs to refer to another object, for example a
//! command buffer to the secondary command buffers it executes, it stores the handle and looks
//! the other record up again when needed. A handle that can no longer be found was destroyed,
//! and whatever depended on it has already been reported.

use crate::{
    command_buffer::{CommandBufferState, CommandPoolState},
    queue::QueueState,
    sync::{fence::FenceState, semaphore::SemaphoreState},
    ObjectRef,
};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;
use std::{hash::Hash, sync::Arc};

/// How the validator synchronizes concurrent calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LockingMode {
    /// Every entry point takes one process-wide lock: shared for calls that only validate,
    /// exclusive for calls that change the model.
    #[default]
    Coarse,

    /// Entry points only lock the records they touch.
    ///
    /// Semaphore checks and updates are still serialized with each other, because whether
    /// another queue is already waiting on a semaphore is a fact about all queues at once.
    FineGrained,
}

/// How a resource is shared between queue families.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sharing {
    /// The resource is owned by one queue family at a time.
    ///
    /// `None` means that no queue family has acquired ownership yet, in which case the first
    /// queue family to use it becomes the owner.
    Exclusive { queue_family_index: Option<u32> },

    /// The resource can be used by every queue family in the list at the same time.
    Concurrent(SmallVec<[u32; 4]>),
}

impl Sharing {
    /// Returns whether a queue of `queue_family_index` may access the resource.
    pub fn is_accessible_from(&self, queue_family_index: u32) -> bool {
        match self {
            Sharing::Exclusive {
                queue_family_index: None,
            } => true,
            Sharing::Exclusive {
                queue_family_index: Some(owner),
            } => *owner == queue_family_index,
            Sharing::Concurrent(queue_family_indices) => {
                queue_family_indices.contains(&queue_family_index)
            }
        }
    }
}

/// The tracked state of a resource that command buffers can use, such as a buffer or an image.
#[derive(Debug)]
pub struct ResourceState {
    object: ObjectRef,
    sharing: Sharing,
}

impl ResourceState {
    pub(crate) fn new(object: ObjectRef, sharing: Sharing) -> Self {
        ResourceState { object, sharing }
    }

    #[inline]
    pub fn object(&self) -> ObjectRef {
        self.object
    }

    #[inline]
    pub fn sharing(&self) -> &Sharing {
        &self.sharing
    }

    /// Gives ownership of an exclusive resource that has no owner yet to `queue_family_index`.
    pub(crate) fn set_owner_if_unowned(&mut self, queue_family_index: u32) {
        if let Sharing::Exclusive {
            queue_family_index: owner @ None,
        } = &mut self.sharing
        {
            *owner = Some(queue_family_index);
        }
    }

    /// Transfers ownership of an exclusive resource to `queue_family_index`.
    pub(crate) fn set_owner(&mut self, queue_family_index: u32) {
        if let Sharing::Exclusive {
            queue_family_index: owner,
        } = &mut self.sharing
        {
            *owner = Some(queue_family_index);
        }
    }
}

/// The records of one kind of object.
pub struct Records<K, T> {
    inner: RwLock<foldhash::HashMap<K, Arc<Mutex<T>>>>,
}

impl<K: Copy + Eq + Hash, T> Records<K, T> {
    fn new() -> Self {
        Records {
            inner: RwLock::new(foldhash::HashMap::default()),
        }
    }

    fn get(&self, key: K) -> Option<Arc<Mutex<T>>> {
        self.inner.read().get(&key).cloned()
    }

    fn insert(&self, key: K, value: T) -> Option<Arc<Mutex<T>>> {
        self.inner.write().insert(key, Arc::new(Mutex::new(value)))
    }

    fn remove(&self, key: K) -> Option<Arc<Mutex<T>>> {
        self.inner.write().remove(&key)
    }

    fn snapshot(&self) -> Vec<(K, Arc<Mutex<T>>)> {
        self.inner
            .read()
            .iter()
            .map(|(&key, value)| (key, value.clone()))
            .collect()
    }
}

mod private {
    pub trait Sealed {}
}

/// A kind of object that has records in the [`Registry`].
pub trait Tracked: private::Sealed + Sized {
    /// The key that the records are looked up with.
    type Key: Copy + Eq + Hash;

    #[doc(hidden)]
    fn records(registry: &Registry) -> &Records<Self::Key, Self>;
}

macro_rules! impl_tracked {
    ($($state:ty => $key:ty, $field:ident;)+) => {
        $(
            impl private::Sealed for $state {}

            impl Tracked for $state {
                type Key = $key;

                #[inline]
                fn records(registry: &Registry) -> &Records<Self::Key, Self> {
                    &registry.$field
                }
            }
        )+
    };
}

impl_tracked! {
    CommandPoolState => ash::vk::CommandPool, command_pools;
    CommandBufferState => ash::vk::CommandBuffer, command_buffers;
    QueueState => ash::vk::Queue, queues;
    SemaphoreState => ash::vk::Semaphore, semaphores;
    FenceState => ash::vk::Fence, fences;
    ResourceState => ObjectRef, resources;
}

/// Owns the records of every live object.
pub struct Registry {
    locking: LockingMode,
    global: RwLock<()>,
    sync: Mutex<()>,

    command_pools: Records<ash::vk::CommandPool, CommandPoolState>,
    command_buffers: Records<ash::vk::CommandBuffer, CommandBufferState>,
    queues: Records<ash::vk::Queue, QueueState>,
    semaphores: Records<ash::vk::Semaphore, SemaphoreState>,
    fences: Records<ash::vk::Fence, FenceState>,
    resources: Records<ObjectRef, ResourceState>,
}

impl Registry {
    pub fn new(locking: LockingMode) -> Self {
        Registry {
            locking,
            global: RwLock::new(()),
            sync: Mutex::new(()),
            command_pools: Records::new(),
            command_buffers: Records::new(),
            queues: Records::new(),
            semaphores: Records::new(),
            fences: Records::new(),
            resources: Records::new(),
        }
    }

    #[inline]
    pub fn locking(&self) -> LockingMode {
        self.locking
    }

    /// Looks up the record of `key`.
    ///
    /// Returns `None` if the object is unknown or was destroyed.
    #[inline]
    pub fn get<T: Tracked>(&self, key: T::Key) -> Option<Arc<Mutex<T>>> {
        T::records(self).get(key)
    }

    /// Inserts a record for `key`, returning the previous record if there was one.
    pub(crate) fn insert<T: Tracked>(&self, key: T::Key, value: T) -> Option<Arc<Mutex<T>>> {
        T::records(self).insert(key, value)
    }

    pub(crate) fn remove<T: Tracked>(&self, key: T::Key) -> Option<Arc<Mutex<T>>> {
        T::records(self).remove(key)
    }

    /// Returns every record of one kind that exists at the time of the call.
    pub(crate) fn all<T: Tracked>(&self) -> Vec<(T::Key, Arc<Mutex<T>>)> {
        T::records(self).snapshot()
    }

    /// Locks the registry for a call that only reads the model.
    pub(crate) fn lock_shared(&self) -> RegistryGuard<'_> {
        match self.locking {
            LockingMode::Coarse => RegistryGuard {
                _shared: Some(self.global.read()),
                _exclusive: None,
            },
            LockingMode::FineGrained => RegistryGuard::unlocked(),
        }
    }

    /// Locks the registry for a call that changes the model.
    pub(crate) fn lock_exclusive(&self) -> RegistryGuard<'_> {
        match self.locking {
            LockingMode::Coarse => RegistryGuard {
                _shared: None,
                _exclusive: Some(self.global.write()),
            },
            LockingMode::FineGrained => RegistryGuard::unlocked(),
        }
    }

    /// Serializes checks and updates of semaphore state, in every locking mode.
    ///
    /// Must be taken after [`lock_shared`](Self::lock_shared) or
    /// [`lock_exclusive`](Self::lock_exclusive), and before any record is locked.
    pub(crate) fn serialize_sync(&self) -> MutexGuard<'_, ()> {
        self.sync.lock()
    }
}

impl Default for Registry {
    #[inline]
    fn default() -> Self {
        Registry::new(LockingMode::default())
    }
}

/// Holds the registry-wide lock taken by an entry point, if any.
pub(crate) struct RegistryGuard<'a> {
    _shared: Option<RwLockReadGuard<'a, ()>>,
    _exclusive: Option<RwLockWriteGuard<'a, ()>>,
}

impl RegistryGuard<'_> {
    fn unlocked() -> Self {
        RegistryGuard {
            _shared: None,
            _exclusive: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{queue::QueueFlags, Handle};

    #[test]
    fn lookup_unknown() {
        let registry = Registry::default();
        assert!(registry
            .get::<QueueState>(ash::vk::Queue::from_raw(1))
            .is_none());
    }

    #[test]
    fn insert_and_remove() {
        let registry = Registry::default();
        let queue = ash::vk::Queue::from_raw(1);
        registry.insert(queue, QueueState::new(queue, 0, QueueFlags::GRAPHICS));

        let state = registry.get::<QueueState>(queue).unwrap();
        assert_eq!(state.lock().queue_family_index(), 0);

        assert!(registry.remove::<QueueState>(queue).is_some());
        assert!(registry.get::<QueueState>(queue).is_none());

        // The removed record stays usable by whoever still holds it.
        assert_eq!(state.lock().flags(), QueueFlags::GRAPHICS);
    }

    #[test]
    fn sharing() {
        let concurrent = Sharing::Concurrent([0, 2].into_iter().collect());
        assert!(concurrent.is_accessible_from(2));
        assert!(!concurrent.is_accessible_from(1));

        let mut resource = ResourceState::new(
            ObjectRef::new(ash::vk::Buffer::from_raw(3)),
            Sharing::Exclusive {
                queue_family_index: None,
            },
        );
        assert!(resource.sharing().is_accessible_from(5));

        resource.set_owner_if_unowned(1);
        assert!(resource.sharing().is_accessible_from(1));
        assert!(!resource.sharing().is_accessible_from(5));

        resource.set_owner_if_unowned(5);
        assert!(!resource.sharing().is_accessible_from(5));

        resource.set_owner(5);
        assert!(resource.sharing().is_accessible_from(5));
    }

    #[test]
    fn fine_grained_does_not_lock() {
        let registry = Registry::new(LockingMode::FineGrained);
        let _exclusive = registry.lock_exclusive();
        let _another = registry.lock_exclusive();
        let _sync = registry.serialize_sync();
    }
}
