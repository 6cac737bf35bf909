//! # brkalloc - a break-based free-list allocator
//!
//! `malloc`, `calloc`, `realloc` and `free` on top of the program break. Memory
//! is obtained by pushing the break forward and, once freed, reused through a
//! free list before the break is touched again.
//!
//! ## How It Works
//!
//! ```text
//!   Program Memory Layout:
//!
//!   High Address ┌─────────────────────┐
//!                │       Stack         │ ↓ grows down
//!                │                     │
//!                │         ▲           │
//!                │       Heap          │ ↑ grows up (sbrk)
//!                ├─────────────────────┤ ← Program Break
//!                │   Uninitialized     │
//!                │       Data          │
//!                ├─────────────────────┤
//!                │       Text          │
//!   Low Address  └─────────────────────┘
//! ```
//!
//! Every block handed out carries a 16 byte header with its size and a
//! sentinel ([`MAGIC`]) used to catch corrupted headers and double frees:
//!
//! ```text
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Header             │         User Data              │
//!   │  size: N              │                                │
//!   │  magic: 0x01234567    │       N bytes usable           │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! When a block is freed its header is rewritten in place as a free-list node
//! `(size, next)` and pushed at the head of the list. Freeing always merges the
//! block with free blocks directly before and after it in memory, so the list
//! never holds two adjacent blocks. Allocation walks the list first-fit,
//! splitting the chosen block when the leftover can hold a header of its own,
//! and grows the break only when nothing fits. The break never moves back.
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── heap      - Heap: allocate / allocate_zeroed / reallocate / free
//!   ├── freelist  - split, neighbour search, remove, coalesce (internal)
//!   ├── block     - header and free-node records (internal)
//!   ├── region    - offset <-> address translation (internal)
//!   ├── brk       - ProgramBreak, SystemBreak (sbrk), ReservedBreak
//!   ├── kernel    - mmap / VirtualAlloc / sbrk wrappers (internal)
//!   ├── global    - LockedHeap, GlobalAlloc
//!   └── config    - HeapConfig
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkalloc::{Heap, ReservedBreak};
//!
//! let mut heap = Heap::new(ReservedBreak::with_capacity(1 << 20).unwrap());
//!
//! let ptr = heap.allocate(64).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 64);
//!     heap.free(Some(ptr)).unwrap();
//! }
//!
//! // The freed block is reused instead of growing the break.
//! let again = heap.allocate(64).unwrap();
//! assert_eq!(ptr, again);
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded core**: [`Heap`] has no synchronization, use
//!   [`LockedHeap`] to share one.
//! - **No trimming**: memory is never returned to the operating system.
//! - **16 byte alignment**: stricter layouts are refused by [`LockedHeap`].

mod block;
mod brk;
mod config;
mod error;
mod freelist;
mod global;
mod heap;
mod kernel;
mod region;
mod utils;

pub use block::{ALIGNMENT, HEADER_SIZE, MAGIC};
#[cfg(unix)]
pub use brk::SystemBreak;
pub use brk::{ProgramBreak, ReservedBreak};
pub use config::{ARENA_CAPACITY_ENV, DEFAULT_ARENA_CAPACITY, HeapConfig, parse_capacity};
pub use error::{AllocError, Result};
pub use global::LockedHeap;
pub use heap::{Heap, HeapStats};
