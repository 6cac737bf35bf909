use std::mem;

use static_assertions::const_assert;

use crate::utils::align;

/// Every block start (and therefore every payload) is a multiple of this.
pub const ALIGNMENT: usize = 16;

/// Sentinel stamped into the header of every live block.
///
/// The value is odd on purpose: free-list links are offsets that are always a
/// multiple of [`ALIGNMENT`], so a freed header can never read back as live.
pub const MAGIC: usize = 0x0123_4567;

/// Link value of the last node of the free list.
pub(crate) const NIL: usize = usize::MAX;

/// Space taken by the metadata in front of every block, padded so the payload
/// that follows keeps the [`ALIGNMENT`] of the block start.
pub const HEADER_SIZE: usize = align(mem::size_of::<RawRecord>(), ALIGNMENT);

const_assert!(HEADER_SIZE % ALIGNMENT == 0);
const_assert!(MAGIC % 2 == 1);
const_assert!(NIL != MAGIC);

/// The two words written at the start of every block. How the second word is
/// read depends on the state of the block:
///
/// ```text
///         Live block                      Free block
/// +---------------------+        +---------------------+ <------+
/// |        size         |        |        size         |        |
/// +---------------------+        +---------------------+        | -> HEADER_SIZE
/// |       MAGIC         |        |  next (offset/NIL)  |        |
/// +---------------------+        +---------------------+ <------+
/// |       Content       |        |     (unused)        |
/// |         ...         |        |        ...          |
/// +---------------------+        +---------------------+
/// ```
///
/// The same memory is reused in place when a block changes state, so the free
/// list costs no extra storage. Nothing outside [`crate::region`] ever sees a
/// `RawRecord`, it is always decoded into a [`Header`] or a [`FreeNode`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawRecord {
    size: usize,
    word: usize,
}

/// Metadata of a block currently handed to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    /// Usable payload size in bytes.
    pub size: usize,
    /// Must equal [`MAGIC`] for the block to be considered live.
    pub magic: usize,
}

/// Metadata of a block sitting on the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeNode {
    /// Payload size, the header is not included.
    pub size: usize,
    /// Offset of the successor in list order.
    pub next: Option<usize>,
}

/// A block record together with its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Block {
    Live(Header),
    Free(FreeNode),
}

impl Header {
    /// Header of a freshly handed out block of `size` bytes.
    pub fn live(size: usize) -> Self {
        Self { size, magic: MAGIC }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }
}

impl FreeNode {
    /// Offset one past the end of the node starting at `offset`.
    #[inline]
    pub fn end(&self, offset: usize) -> usize {
        block_end(offset, self.size)
    }
}

/// Offset one past the last payload byte of a block of `size` bytes at `offset`.
#[inline]
pub(crate) fn block_end(offset: usize, size: usize) -> usize {
    offset + HEADER_SIZE + size
}

impl Block {
    pub fn encode(self) -> RawRecord {
        match self {
            Block::Live(header) => RawRecord {
                size: header.size,
                word: header.magic,
            },
            Block::Free(node) => RawRecord {
                size: node.size,
                word: node.next.unwrap_or(NIL),
            },
        }
    }
}

impl RawRecord {
    pub fn as_header(self) -> Header {
        Header {
            size: self.size,
            magic: self.word,
        }
    }

    pub fn as_node(self) -> FreeNode {
        FreeNode {
            size: self.size,
            next: match self.word {
                NIL => None,
                next => Some(next),
            },
        }
    }
}
