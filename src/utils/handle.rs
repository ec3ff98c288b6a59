//! Generation-checked handles given out to the host.
//!
//! Every object reachable by the host registers a slot in a [`HandleTable`].
//! A [`Handle`] remembers the slot index and the generation the slot had at
//! registration. Releasing a slot or disposing the whole table bumps the
//! generation, so every outstanding [`Handle`] fails to upgrade afterwards
//! with a [`HandleDetachedError`] instead of reaching freed state.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use tracerr::Traced;

use crate::utils::HandleDetachedError;

/// Index and generation of a slot in a [`HandleTable`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct HandleKey {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    occupied: bool,
}

/// Arena of generation-counted slots.
///
/// The table holds no objects, only liveness information about them.
#[derive(Debug, Default)]
pub struct HandleTable {
    slots: RefCell<Vec<Slot>>,
    free: RefCell<Vec<usize>>,
    disposed: Cell<bool>,
}

impl HandleTable {
    /// Creates a new empty [`HandleTable`].
    #[inline]
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Occupies a slot and returns its [`HandleKey`].
    ///
    /// Keys registered after [`HandleTable::dispose()`] are never live.
    pub fn register(&self) -> HandleKey {
        if self.disposed.get() {
            return HandleKey {
                index: usize::MAX,
                generation: 0,
            };
        }
        let mut slots = self.slots.borrow_mut();
        if let Some(index) = self.free.borrow_mut().pop() {
            let slot = &mut slots[index];
            slot.occupied = true;
            HandleKey {
                index,
                generation: slot.generation,
            }
        } else {
            slots.push(Slot {
                generation: 0,
                occupied: true,
            });
            HandleKey {
                index: slots.len() - 1,
                generation: 0,
            }
        }
    }

    /// Frees the slot of the provided [`HandleKey`].
    ///
    /// Returns `false` if the key was stale already.
    pub fn release(&self, key: HandleKey) -> bool {
        if !self.is_live(key) {
            return false;
        }
        let mut slots = self.slots.borrow_mut();
        let slot = &mut slots[key.index];
        slot.generation += 1;
        slot.occupied = false;
        self.free.borrow_mut().push(key.index);
        true
    }

    /// Indicates whether the provided [`HandleKey`] still refers to its slot.
    #[must_use]
    pub fn is_live(&self, key: HandleKey) -> bool {
        if self.disposed.get() {
            return false;
        }
        self.slots.borrow().get(key.index).map_or(false, |slot| {
            slot.occupied && slot.generation == key.generation
        })
    }

    /// Invalidates every registered [`HandleKey`].
    pub fn dispose(&self) {
        self.disposed.set(true);
        for slot in self.slots.borrow_mut().iter_mut() {
            slot.generation += 1;
            slot.occupied = false;
        }
        self.free.borrow_mut().clear();
    }

    /// Indicates whether [`HandleTable::dispose()`] was called.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Number of currently live slots.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.borrow().iter().filter(|s| s.occupied).count()
    }
}

/// Registration of an object in a [`HandleTable`].
///
/// Releases its slot on [`Drop`], so the owning object invalidates its
/// handles when it goes away.
pub struct HandleSlot {
    key: HandleKey,
    table: Weak<HandleTable>,
}

impl HandleSlot {
    /// Registers a new slot in the provided [`HandleTable`].
    #[must_use]
    pub fn new(table: &Rc<HandleTable>) -> Self {
        Self {
            key: table.register(),
            table: Rc::downgrade(table),
        }
    }

    /// Creates a [`Handle`] to the provided object guarded by this slot.
    #[must_use]
    pub fn handle<T: ?Sized>(&self, obj: Weak<T>) -> Handle<T> {
        Handle {
            key: self.key,
            table: Weak::clone(&self.table),
            obj,
        }
    }

    /// Returns a [`Weak`] reference to the [`HandleTable`] of this slot.
    #[inline]
    #[must_use]
    pub fn table(&self) -> Weak<HandleTable> {
        Weak::clone(&self.table)
    }
}

impl Drop for HandleSlot {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.release(self.key);
        }
    }
}

impl fmt::Debug for HandleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleSlot").field("key", &self.key).finish()
    }
}

/// Host-facing reference to an object.
pub struct Handle<T: ?Sized> {
    key: HandleKey,
    table: Weak<HandleTable>,
    obj: Weak<T>,
}

impl<T: ?Sized> Handle<T> {
    /// Returns the referenced object.
    ///
    /// # Errors
    ///
    /// With [`HandleDetachedError`] if the [`HandleTable`] is gone or
    /// disposed, the slot was released, or the object was dropped.
    pub fn upgrade(&self) -> Result<Rc<T>, Traced<HandleDetachedError>> {
        let table = upgrade_or_detached!(self.table)?;
        if !table.is_live(self.key) {
            return Err(tracerr::new!(HandleDetachedError));
        }
        upgrade_or_detached!(self.obj)
    }

    /// Indicates whether [`Handle::upgrade()`] would succeed.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.upgrade().is_ok()
    }

    /// Returns the [`HandleKey`] of this [`Handle`].
    #[inline]
    #[must_use]
    pub fn key(&self) -> HandleKey {
        self.key
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            table: Weak::clone(&self.table),
            obj: Weak::clone(&self.obj),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    #[test]
    fn released_slot_is_reused_with_new_generation() {
        let table = HandleTable::new();
        let first = table.register();
        assert!(table.is_live(first));

        assert!(table.release(first));
        assert!(!table.is_live(first));
        assert!(!table.release(first));

        let second = table.register();
        assert_eq!(second.index, first.index);
        assert_ne!(second.generation, first.generation);
        assert!(table.is_live(second));
        assert!(!table.is_live(first));
    }

    #[test]
    fn dispose_invalidates_every_handle() {
        let table = HandleTable::new();
        let obj = Rc::new(5_u8);
        let slot = HandleSlot::new(&table);
        let handle = slot.handle(Rc::downgrade(&obj));
        assert_eq!(*handle.upgrade().unwrap(), 5);

        table.dispose();

        assert!(table.is_disposed());
        assert_eq!(
            handle.upgrade().unwrap_err().into_inner(),
            HandleDetachedError
        );
        assert!(!table.is_live(table.register()));
    }

    #[test]
    fn dropping_slot_releases_handles() {
        let table = HandleTable::new();
        let obj = Rc::new(());
        let slot = HandleSlot::new(&table);
        let handle = slot.handle(Rc::downgrade(&obj));
        assert_eq!(table.live_count(), 1);

        drop(slot);

        assert!(!handle.is_live());
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn dropped_object_detaches_handle() {
        let table = HandleTable::new();
        let slot = HandleSlot::new(&table);
        let obj = Rc::new(1);
        let handle = slot.handle(Rc::downgrade(&obj));

        drop(obj);

        assert!(handle.upgrade().is_err());
    }

    #[test]
    fn dropped_table_detaches_handle() {
        let table = HandleTable::new();
        let slot = HandleSlot::new(&table);
        let obj = Rc::new(1);
        let handle = slot.handle(Rc::downgrade(&obj));

        drop(table);

        assert!(handle.upgrade().is_err());
        drop(slot);
    }
}
