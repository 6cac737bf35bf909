//! Allocator error type.

/// Result type for heap operations.
pub type Result<T> = std::result::Result<T, AllocError>;

/// Errors reported by [`crate::Heap`] operations.
///
/// Offsets are relative to the heap's origin (see [`crate::Heap::free_blocks`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The program break could not be advanced far enough.
    #[error("out of memory: could not grow the heap for {requested} bytes")]
    OutOfMemory { requested: usize },

    /// A size computation overflowed `usize`.
    #[error("requested size overflows the address space")]
    SizeOverflow,

    /// The header in front of a pointer does not carry the live sentinel.
    /// Either the header was overwritten or the block is not live (double free).
    #[error("memory corruption detected: header at offset {offset:#x} has magic {found:#x}")]
    Corrupted { offset: usize, found: usize },

    /// The pointer cannot belong to this heap: it is misaligned or outside the region.
    #[error("pointer {addr:#x} was not handed out by this heap")]
    InvalidPointer { addr: usize },

    /// Split was asked to carve `target` bytes out of a block that cannot
    /// also hold a header for the remainder.
    #[error("block of {size} bytes is too small to split at {target}")]
    TooSmall { size: usize, target: usize },

    /// Two free-list nodes are address-contiguous, coalescing was skipped.
    #[error("free blocks at offsets {left:#x} and {right:#x} are adjacent but not merged")]
    Uncoalesced { left: usize, right: usize },
}
