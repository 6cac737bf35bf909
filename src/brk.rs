//! Sources of break memory.
//!
//! The heap only needs one thing from the host: a break it can query and push
//! forward. [`SystemBreak`] is the real process break (`sbrk(2)`).
//! [`ReservedBreak`] reserves a fixed span up front and emulates a break
//! inside it, which keeps independent heaps (tests, embedders that do not own
//! the process break) from stepping on each other.

use std::ptr::NonNull;

use crate::{
    config::HeapConfig,
    error::{AllocError, Result},
    kernel,
    utils::checked_align,
};

/// A break the heap can grow.
///
/// # Safety
///
/// The span `[prev, prev + increment)` returned by [`ProgramBreak::advance`]
/// must be readable, writable, and owned by the caller for as long as the
/// implementor lives. The break must never move backwards.
pub unsafe trait ProgramBreak {
    /// The current break, or `None` if it cannot be queried.
    fn current(&mut self) -> Option<NonNull<u8>>;

    /// Moves the break forward by `increment` bytes and returns the previous
    /// break, i.e. the start of the new memory. `None` means no more memory.
    fn advance(&mut self, increment: usize) -> Option<NonNull<u8>>;
}

/// The process break, driven through `sbrk(2)`.
///
/// Memory obtained this way is never given back to the operating system.
/// Only one heap per process should use it, and the break is not synchronized
/// with other users (such as the libc `malloc`).
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct SystemBreak {
    _private: (),
}

#[cfg(unix)]
impl SystemBreak {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(unix)]
unsafe impl ProgramBreak for SystemBreak {
    fn current(&mut self) -> Option<NonNull<u8>> {
        kernel::program_break()
    }

    fn advance(&mut self, increment: usize) -> Option<NonNull<u8>> {
        kernel::move_break(increment)
    }
}

/// A break emulated inside one fixed reservation.
///
/// The whole capacity is mapped when the value is created and released when it
/// is dropped, so every pointer handed out by a heap on top of it dies with
/// the heap.
#[derive(Debug)]
pub struct ReservedBreak {
    base: NonNull<u8>,
    capacity: usize,
    len: usize,
}

// The reservation is exclusively owned.
unsafe impl Send for ReservedBreak {}

impl ReservedBreak {
    /// Reserves at least `capacity` bytes, rounded up to the page size.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let capacity = checked_align(capacity.max(1), kernel::page_size())
            .ok_or(AllocError::SizeOverflow)?;

        let base = unsafe { kernel::request_memory(capacity) }
            .ok_or(AllocError::OutOfMemory { requested: capacity })?;

        Ok(Self {
            base,
            capacity,
            len: 0,
        })
    }

    /// Reserves [`HeapConfig::arena_capacity`] bytes.
    pub fn from_config(config: &HeapConfig) -> Result<Self> {
        Self::with_capacity(config.arena_capacity)
    }

    /// Bytes reserved.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes between the start of the reservation and the break.
    pub fn used(&self) -> usize {
        self.len
    }
}

unsafe impl ProgramBreak for ReservedBreak {
    fn current(&mut self) -> Option<NonNull<u8>> {
        Some(unsafe { self.base.add(self.len) })
    }

    fn advance(&mut self, increment: usize) -> Option<NonNull<u8>> {
        if increment > self.capacity - self.len {
            return None;
        }

        let prev = unsafe { self.base.add(self.len) };
        self.len += increment;

        Some(prev)
    }
}

impl Drop for ReservedBreak {
    fn drop(&mut self) {
        unsafe { kernel::return_memory(self.base.as_ptr(), self.capacity) }
    }
}
