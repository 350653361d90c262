//! Synchronization primitives for the persistent solver workers.

use parking_lot::{Condvar, Mutex};
use std::{cell::UnsafeCell, ops::Range};

/// A one-slot mailbox that a thread can block on until a value is posted.
///
/// Posting overwrites any value that hasn't been taken yet,
/// so posting twice before a take wakes the waiter only once.
#[derive(Debug)]
pub(crate) struct Signal<T> {
    slot: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    pub fn post(&self, value: T) {
        *self.slot.lock() = Some(value);
        self.cond.notify_one();
    }

    /// Block until a value is available and take it out of the slot.
    pub fn wait_take(&self) -> T {
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            self.cond.wait(&mut slot);
        }
    }
}

/// A fixed-size buffer shared between the driver thread and the workers.
///
/// Access is only synchronized externally through the phase protocol of the parallel solver:
/// during a phase each element is either read by any number of threads
/// or written by exactly one, never both.
pub(crate) struct SharedBuffer<T> {
    cells: Box<[UnsafeCell<T>]>,
}

// SAFETY: all access goes through the unsafe methods below
// whose callers uphold the no-concurrent-write-and-access rule
unsafe impl<T: Send + Sync> Sync for SharedBuffer<T> {}

impl<T: Copy> SharedBuffer<T> {
    pub fn new(len: usize, value: T) -> Self {
        Self {
            cells: (0..len).map(|_| UnsafeCell::new(value)).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// View the whole buffer.
    ///
    /// # Safety
    ///
    /// No thread may write to any element while the returned slice is alive.
    #[inline]
    pub unsafe fn slice_all(&self) -> &[T] {
        // UnsafeCell<T> has the same layout as T
        std::slice::from_raw_parts(self.cells.as_ptr() as *const T, self.cells.len())
    }

    /// View a range of the buffer.
    ///
    /// # Safety
    ///
    /// No thread may write to the range while the returned slice is alive.
    #[inline]
    pub unsafe fn slice(&self, range: Range<usize>) -> &[T] {
        let cells = &self.cells[range];
        std::slice::from_raw_parts(cells.as_ptr() as *const T, cells.len())
    }

    /// Mutably view a range of the buffer.
    ///
    /// # Safety
    ///
    /// No other thread may read or write the range while the returned slice is alive.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, range: Range<usize>) -> &mut [T] {
        let cells = &self.cells[range];
        std::slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), cells.len())
    }
}
