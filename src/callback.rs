//! Interrupt callbacks.
//!
//! A callback is anything that can be invoked from interrupt context through a
//! shared reference. Plain functions and non-capturing closures qualify
//! through the blanket impl; drivers that react to interrupts (the ultrasonic
//! edge handler, for one) implement [`Callable`] themselves.

use crate::Error;
use core::cell::Cell;
use critical_section::Mutex;

pub trait Callable: Sync {
    fn call(&self);
}

impl<F> Callable for F
where
    F: Fn() + Sync,
{
    fn call(&self) {
        self()
    }
}

pub type Callback = &'static dyn Callable;

/// Fixed table of callback slots, one per interrupt source.
pub struct CallbackRegistry<const N: usize> {
    slots: Mutex<Cell<[Option<Callback>; N]>>,
}

impl<const N: usize> CallbackRegistry<N> {
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(Cell::new([None; N])),
        }
    }

    /// Stores `callback` in `slot`, returning whatever it replaced.
    pub fn register(&self, slot: usize, callback: Callback) -> Result<Option<Callback>, Error> {
        self.replace(slot, Some(callback))
    }

    pub fn unregister(&self, slot: usize) -> Result<Option<Callback>, Error> {
        self.replace(slot, None)
    }

    pub fn get(&self, slot: usize) -> Option<Callback> {
        critical_section::with(|cs| self.slots.borrow(cs).get().get(slot).copied().flatten())
    }

    /// Runs the callback in `slot`, if any. Returns whether one ran.
    ///
    /// The callback is copied out under the lock and invoked after it is
    /// released, so it may re-register itself or its neighbours.
    pub fn invoke(&self, slot: usize) -> bool {
        match self.get(slot) {
            Some(callback) => {
                callback.call();
                true
            }
            None => false,
        }
    }

    fn replace(&self, slot: usize, callback: Option<Callback>) -> Result<Option<Callback>, Error> {
        if slot >= N {
            return Err(Error::InvalidSlot(slot));
        }
        Ok(critical_section::with(|cs| {
            let cell = self.slots.borrow(cs);
            let mut slots = cell.get();
            let previous = core::mem::replace(&mut slots[slot], callback);
            cell.set(slots);
            previous
        }))
    }
}
