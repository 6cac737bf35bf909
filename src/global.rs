//! Sharing a [`Heap`] across threads.
//!
//! [`Heap`] itself has no synchronization. [`LockedHeap`] puts the whole heap
//! (free-list head, break and every structural operation) behind one
//! [`parking_lot::Mutex`] and exposes the classic pointer-in, pointer-out
//! interface, plus [`GlobalAlloc`] so it can be installed with
//! `#[global_allocator]`.
//!
//! The lock is only ever taken with `try_lock` in a spin loop. Parking a
//! contended thread may allocate, which would re-enter the allocator.

use std::{
    alloc::{GlobalAlloc, Layout},
    hint,
    ptr::{self, NonNull},
};

use parking_lot::{Mutex, MutexGuard};

use crate::{
    block::ALIGNMENT,
    brk::ProgramBreak,
    heap::{Heap, HeapStats},
};

pub struct LockedHeap<B: ProgramBreak> {
    inner: Mutex<Heap<B>>,
}

impl<B: ProgramBreak> LockedHeap<B> {
    pub const fn new(brk: B) -> Self {
        Self {
            inner: parking_lot::const_mutex(Heap::new(brk)),
        }
    }

    /// Exclusive access to the underlying heap.
    pub fn lock(&self) -> MutexGuard<'_, Heap<B>> {
        loop {
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            hint::spin_loop();
        }
    }

    /// Allocates `size` bytes. Null on failure.
    pub fn malloc(&self, size: usize) -> *mut u8 {
        self.lock()
            .allocate(size)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Allocates `count * size` zeroed bytes. Null on failure or overflow.
    pub fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        self.lock()
            .allocate_zeroed(count, size)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Resizes the block behind `ptr`, `malloc` when `ptr` is null. Null on
    /// failure, in which case `ptr` stays valid.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this heap.
    pub unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        unsafe {
            self.lock()
                .reallocate(NonNull::new(ptr), new_size)
                .map_or(ptr::null_mut(), NonNull::as_ptr)
        }
    }

    /// Frees the block behind `ptr`. Null, invalid and corrupted pointers are
    /// ignored here; the heap has already logged the latter two.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this heap.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let _ = unsafe { self.lock().free(NonNull::new(ptr)) };
    }

    pub fn stats(&self) -> HeapStats {
        self.lock().stats()
    }
}

/// Blocks are [`ALIGNMENT`] aligned, stricter layouts are refused with null.
unsafe impl<B: ProgramBreak + Send> GlobalAlloc for LockedHeap<B> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.malloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.free(ptr) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.calloc(1, layout.size())
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        unsafe { LockedHeap::realloc(self, ptr, new_size) }
    }
}
