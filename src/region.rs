use std::ptr;

use crate::{
    block::{ALIGNMENT, Block, HEADER_SIZE, RawRecord},
    utils::align_down,
};

/// The contiguous stretch of address space the heap hands blocks out of.
///
/// Blocks are never tracked by raw pointer. Each one is identified by the
/// offset of its header from `origin`, the first break the heap ever saw
/// rounded down to [`ALIGNMENT`]. Neighbour discovery, splitting and merging
/// are all plain integer arithmetic on those offsets, and only this type turns
/// an offset back into memory.
///
/// ```text
///  origin                                                     origin + top
///    |                                                              |
///    v                                                              v
///    +--------+---------+--------+-----------+--------+-------------+
///    | Header | payload | Header |  payload  | Header |   payload   |
///    +--------+---------+--------+-----------+--------+-------------+
///    0                  48                   112
/// ```
///
/// The break only moves forward, so `origin` stays below every block ever
/// handed out. Memory between `origin` and `top` that another user of the
/// break claimed is never part of a block and so never gets merged.
#[derive(Debug)]
pub(crate) struct Region {
    /// Address offset zero maps to. `None` until the heap first grows.
    origin: Option<usize>,
    /// Offset one past the end of the highest block handed out.
    top: usize,
}

impl Region {
    pub const fn new() -> Self {
        Self {
            origin: None,
            top: 0,
        }
    }

    /// Fixes the origin from the first observed break. Later calls are no-ops.
    pub fn anchor(&mut self, brk: usize) {
        if self.origin.is_none() {
            self.origin = Some(align_down(brk, ALIGNMENT));
        }
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    /// Records that the block ending at `end` now belongs to the heap.
    pub fn extend_to(&mut self, end: usize) {
        self.top = self.top.max(end);
    }

    /// Offset of `addr`, if it lies at or above the origin.
    pub fn offset_of(&self, addr: usize) -> Option<usize> {
        addr.checked_sub(self.origin?)
    }

    /// Pointer to the byte at `offset`.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *mut u8 {
        (self.origin.unwrap_or(0) + offset) as *mut u8
    }

    /// Pointer to the payload of the block whose header is at `offset`.
    #[inline]
    pub fn payload(&self, offset: usize) -> *mut u8 {
        self.ptr_at(offset + HEADER_SIZE)
    }

    /// Maps a payload address back to its header offset, rejecting addresses
    /// that are misaligned or whose header would not lie inside the region.
    pub fn header_offset(&self, addr: usize) -> Option<usize> {
        if addr % ALIGNMENT != 0 {
            return None;
        }

        let offset = self.offset_of(addr)?.checked_sub(HEADER_SIZE)?;
        if offset + HEADER_SIZE > self.top {
            return None;
        }

        Some(offset)
    }

    /// Reads the record at `offset`.
    ///
    /// **SAFETY**: `offset` must be a block start below [`Region::top`], which
    /// is always aligned and backed by memory obtained from the break.
    #[inline]
    pub unsafe fn load(&self, offset: usize) -> RawRecord {
        debug_assert!(offset + HEADER_SIZE <= self.top);
        unsafe { ptr::read(self.ptr_at(offset).cast::<RawRecord>()) }
    }

    /// Writes `block` at `offset`.
    ///
    /// **SAFETY**: same as [`Region::load`].
    #[inline]
    pub unsafe fn store(&self, offset: usize, block: Block) {
        debug_assert!(offset + HEADER_SIZE <= self.top);
        unsafe { ptr::write(self.ptr_at(offset).cast::<RawRecord>(), block.encode()) }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::block::{FreeNode, Header};

    /// Boxed, 16 byte aligned stand-in for break memory, used by the module tests.
    #[repr(C, align(16))]
    pub(crate) struct Scratch(pub [u8; 1024]);

    impl Scratch {
        pub fn new() -> Box<Self> {
            Box::new(Scratch([0; 1024]))
        }

        pub fn region(&mut self) -> Region {
            let mut region = Region::new();
            region.anchor(self.0.as_mut_ptr() as usize);
            region.extend_to(self.0.len());
            region
        }
    }

    #[test]
    fn origin_is_fixed_by_first_anchor() {
        let mut region = Region::new();
        assert_eq!(None, region.offset_of(0x1000));

        region.anchor(0x1008);
        region.anchor(0x9000);

        assert_eq!(Some(0x10), region.offset_of(0x1010));
        assert_eq!(None, region.offset_of(0xff0));
    }

    #[test]
    fn header_offset_validates_bounds_and_alignment() {
        let mut region = Region::new();
        region.anchor(0x1000);
        region.extend_to(0x100);

        assert_eq!(Some(0), region.header_offset(0x1000 + HEADER_SIZE));
        assert_eq!(Some(0x40), region.header_offset(0x1040 + HEADER_SIZE));
        // Misaligned.
        assert_eq!(None, region.header_offset(0x1000 + HEADER_SIZE + 1));
        // Header would start before the origin.
        assert_eq!(None, region.header_offset(0x1000));
        // Past the top.
        assert_eq!(None, region.header_offset(0x1100 + HEADER_SIZE));
    }

    #[test]
    fn records_round_trip_through_memory() {
        let mut scratch = Scratch::new();
        let region = scratch.region();

        unsafe {
            region.store(0, Block::Live(Header::live(32)));
            region.store(
                64,
                Block::Free(FreeNode {
                    size: 16,
                    next: Some(0),
                }),
            );

            assert!(region.load(0).as_header().is_valid());
            assert_eq!(32, region.load(0).as_header().size);
            assert_eq!(Some(0), region.load(64).as_node().next);
        }
    }
}
