use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::network::ConnectionId;
use crate::{AppError, AppResult};

const FREE: u64 = 0;

struct Slot<T> {
    owner: AtomicU64,
    value: T,
}

/// Fixed arena of per-index state shared by all connections of a protocol.
///
/// A slot is claimed by exactly one connection for as long as its guard lives.
/// Observers outside the engine may read any slot through [`SlotTable::get`];
/// values therefore use interior mutability (atomics) for whatever they track.
pub struct SlotTable<T> {
    slots: Box<[Slot<T>]>,
}

impl<T: Send + Sync> SlotTable<T> {
    pub fn new(len: usize, mut init: impl FnMut(usize) -> T) -> Arc<Self> {
        let slots = (0..len)
            .map(|index| Slot {
                owner: AtomicU64::new(FREE),
                value: init(index),
            })
            .collect();
        Arc::new(SlotTable { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).map(|slot| &slot.value)
    }

    /// The connection currently holding `index`, if any.
    pub fn owner(&self, index: usize) -> Option<ConnectionId> {
        self.slots
            .get(index)
            .map(|slot| slot.owner.load(Ordering::Acquire))
            .filter(|owner| *owner != FREE)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|slot| &slot.value)
    }

    pub fn claim(self: &Arc<Self>, index: usize, owner: ConnectionId) -> AppResult<SlotGuard<T>> {
        if owner == FREE {
            return Err(AppError::InvalidValue(
                "connection id 0 cannot own a slot".to_string(),
            ));
        }
        let slot = self.slots.get(index).ok_or_else(|| {
            AppError::InvalidValue(format!(
                "slot index {} out of range 0..{}",
                index,
                self.slots.len()
            ))
        })?;
        slot.owner
            .compare_exchange(FREE, owner, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|current| {
                AppError::IllegalStateError(format!(
                    "slot {} already owned by connection {}",
                    index, current
                ))
            })?;
        Ok(SlotGuard {
            table: Arc::clone(self),
            index,
        })
    }
}

impl<T> fmt::Debug for SlotTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotTable")
            .field("len", &self.slots.len())
            .finish()
    }
}

/// Exclusive claim on one slot; released on drop.
pub struct SlotGuard<T> {
    table: Arc<SlotTable<T>>,
    index: usize,
}

impl<T> SlotGuard<T> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Deref for SlotGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.table.slots[self.index].value
    }
}

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        self.table.slots[self.index]
            .owner
            .store(FREE, Ordering::Release);
    }
}

impl<T> fmt::Debug for SlotGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotGuard")
            .field("index", &self.index)
            .finish()
    }
}
