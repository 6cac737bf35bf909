use std::ptr::{self, NonNull};

use tracing::{debug, trace, warn};

use crate::{
    block::{ALIGNMENT, Block, HEADER_SIZE, Header, block_end},
    brk::ProgramBreak,
    error::{AllocError, Result},
    freelist::FreeList,
    region::Region,
    utils::checked_align,
};

/// Snapshot of the heap's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes obtained from the break so far, padding included. Never shrinks.
    pub footprint: usize,
    /// Number of nodes on the free list.
    pub free_blocks: usize,
    /// Payload bytes sitting on the free list.
    pub free_bytes: usize,
}

/// A first-fit, address-coalescing free-list allocator on top of a
/// [`ProgramBreak`].
///
/// Every block handed out is preceded by a header carrying its size and the
/// [`crate::MAGIC`] sentinel:
///
/// ```text
/// +---------------------------+
/// | Header   | Actual memory  |
/// +---------------------------+
///            ^
///            +-- pointer returned to the user
/// ```
///
/// Allocation looks at the free list first and only grows the break when no
/// node fits. Freeing turns the header into a free-list node and merges it with
/// its free neighbours right away. Memory is never returned to the break.
///
/// A `Heap` is a plain single-threaded value; wrap it in [`crate::LockedHeap`]
/// to share it.
#[derive(Debug)]
pub struct Heap<B: ProgramBreak> {
    brk: B,
    region: Region,
    free_list: FreeList,
    footprint: usize,
}

impl<B: ProgramBreak> Heap<B> {
    pub const fn new(brk: B) -> Self {
        Self {
            brk,
            region: Region::new(),
            free_list: FreeList::new(),
            footprint: 0,
        }
    }

    /// The break this heap grows.
    pub fn brk(&self) -> &B {
        &self.brk
    }

    /// Allocates at least `size` bytes, aligned to [`ALIGNMENT`].
    ///
    /// The request is rounded up to [`ALIGNMENT`]. The free list is searched
    /// first-fit; a fitting node is split when the leftover can hold a header
    /// and used whole otherwise. Falls back to growing the break.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        let (offset, _) = self.allocate_block(size)?;
        self.payload(offset)
    }

    /// Allocates `count * size` bytes and zeroes the whole block.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Result<NonNull<u8>> {
        let total = count.checked_mul(size).ok_or(AllocError::SizeOverflow)?;
        let (offset, usable) = self.allocate_block(total)?;
        let ptr = self.payload(offset)?;

        unsafe { ptr.as_ptr().write_bytes(0, usable) };

        Ok(ptr)
    }

    /// Moves the contents of `ptr` into a block of `new_size` bytes.
    ///
    /// A `None` pointer behaves like [`Heap::allocate`]. The source header is
    /// validated before anything is allocated; on any error the source block is
    /// left untouched. `min(old size, new_size)` bytes are copied and the
    /// source is freed.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap and not freed since. Misuse
    /// is detected on a best-effort basis only.
    pub unsafe fn reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Result<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(new_size);
        };

        let (offset, header) = self.live_block(ptr)?;
        let fresh = self.allocate(new_size)?;

        let count = header.size.min(new_size);
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), count);
        }

        trace!(from = offset, count, new_size, "reallocated block");
        self.release(offset, header);

        Ok(fresh)
    }

    /// Returns the block behind `ptr` to the free list. `None` is a no-op.
    ///
    /// An invalid or corrupted header is reported as an error and nothing
    /// is freed.
    ///
    /// # Safety
    ///
    /// Same as [`Heap::reallocate`].
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) -> Result<()> {
        let Some(ptr) = ptr else {
            return Ok(());
        };

        let (offset, header) = self.live_block(ptr)?;
        self.release(offset, header);

        Ok(())
    }

    /// Usable bytes behind `ptr`, which may exceed what was requested.
    ///
    /// # Safety
    ///
    /// Same as [`Heap::reallocate`].
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize> {
        self.live_block(ptr).map(|(_, header)| header.size)
    }

    pub fn stats(&self) -> HeapStats {
        let (free_blocks, free_bytes) = self
            .free_list
            .iter(&self.region)
            .fold((0, 0), |(count, bytes), (_, node)| (count + 1, bytes + node.size));

        HeapStats {
            footprint: self.footprint,
            free_blocks,
            free_bytes,
        }
    }

    /// `(offset, payload size)` of every free-list node, in list order.
    pub fn free_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.free_list
            .iter(&self.region)
            .map(|(offset, node)| (offset, node.size))
    }

    /// Verifies that no two free-list nodes are address-contiguous.
    pub fn check(&self) -> Result<()> {
        match self.free_list.find_contiguous(&self.region) {
            Some((left, right)) => Err(AllocError::Uncoalesced { left, right }),
            None => Ok(()),
        }
    }

    /// Takes a block of at least `size` bytes and stamps a live header on it.
    /// Returns the header offset and the usable size.
    fn allocate_block(&mut self, size: usize) -> Result<(usize, usize)> {
        let size = checked_align(size, ALIGNMENT).ok_or(AllocError::SizeOverflow)?;

        let (offset, size) = match self.take_free(size) {
            Some(block) => block,
            None => (self.grow(size)?, size),
        };

        unsafe { self.region.store(offset, Block::Live(Header::live(size))) };
        trace!(offset, size, "allocated block");

        Ok((offset, size))
    }

    /// First-fit search of the free list. The chosen node is split down to
    /// `size` when possible and unlinked.
    fn take_free(&mut self, size: usize) -> Option<(usize, usize)> {
        if self.free_list.is_empty() {
            return None;
        }

        let (offset, node) = self.free_list.first_fit(&self.region, size)?;

        let size = match self.free_list.split(&self.region, offset, size) {
            Ok(_) => size,
            Err(_) => node.size,
        };
        self.free_list.remove(&self.region, offset);

        Some((offset, size))
    }

    /// Gets a fresh block of `size` payload bytes from the break and returns
    /// its header offset.
    ///
    /// The break is padded so the header starts on an [`ALIGNMENT`] boundary.
    fn grow(&mut self, size: usize) -> Result<usize> {
        let out_of_memory = AllocError::OutOfMemory { requested: size };

        let brk = self.brk.current().ok_or(out_of_memory)?.as_ptr() as usize;
        self.region.anchor(brk);

        let padding = checked_align(brk, ALIGNMENT).ok_or(out_of_memory)? - brk;
        let increment = size
            .checked_add(padding)
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .ok_or(AllocError::SizeOverflow)?;

        let Some(prev) = self.brk.advance(increment) else {
            warn!(requested = size, increment, "break exhausted");
            return Err(out_of_memory);
        };
        let prev = prev.as_ptr() as usize;
        self.footprint += increment;

        // Someone else may have moved the break since we asked for it.
        let header = checked_align(prev, ALIGNMENT).ok_or(out_of_memory)?;
        if header - prev > padding {
            warn!(expected = brk, found = prev, "break moved during growth");
            return Err(out_of_memory);
        }

        let offset = self.region.offset_of(header).ok_or(out_of_memory)?;
        self.region.extend_to(block_end(offset, size));

        debug!(offset, size, padding, increment, "grew heap");

        Ok(offset)
    }

    /// Resolves `ptr` to its header and checks the sentinel.
    fn live_block(&self, ptr: NonNull<u8>) -> Result<(usize, Header)> {
        let addr = ptr.as_ptr() as usize;

        let Some(offset) = self.region.header_offset(addr) else {
            warn!(addr, "pointer does not belong to this heap");
            return Err(AllocError::InvalidPointer { addr });
        };

        let header = unsafe { self.region.load(offset) }.as_header();
        let in_bounds = header
            .size
            .checked_add(offset + HEADER_SIZE)
            .is_some_and(|end| end <= self.region.top());

        if !header.is_valid() || !in_bounds {
            warn!(offset, magic = header.magic, "memory corruption detected");
            return Err(AllocError::Corrupted {
                offset,
                found: header.magic,
            });
        }

        Ok((offset, header))
    }

    /// Pushes a validated live block on the free list, merges it with its
    /// neighbours and makes the result the new head.
    fn release(&mut self, offset: usize, header: Header) {
        self.free_list.push(&self.region, offset, header.size);

        let merged = self.free_list.coalesce(&self.region, offset);
        self.free_list.move_to_front(&self.region, merged);

        trace!(offset, size = header.size, merged, "freed block");
    }

    fn payload(&self, offset: usize) -> Result<NonNull<u8>> {
        let ptr = self.region.payload(offset);
        NonNull::new(ptr).ok_or(AllocError::InvalidPointer { addr: ptr as usize })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MAGIC, brk::ReservedBreak};

    fn heap() -> Heap<ReservedBreak> {
        Heap::new(ReservedBreak::with_capacity(1 << 20).unwrap())
    }

    /// Overwrites the sentinel of the block behind `ptr`.
    unsafe fn smash_magic(ptr: NonNull<u8>, value: usize) {
        unsafe {
            let header = ptr.as_ptr().sub(HEADER_SIZE).cast::<usize>();
            header.add(1).write(value);
        }
    }

    /// Break that starts `skew` bytes past a page boundary.
    struct SkewedBreak(ReservedBreak);

    impl SkewedBreak {
        fn new(skew: usize) -> Self {
            let mut inner = ReservedBreak::with_capacity(1 << 20).unwrap();
            inner.advance(skew).unwrap();
            Self(inner)
        }
    }

    unsafe impl ProgramBreak for SkewedBreak {
        fn current(&mut self) -> Option<NonNull<u8>> {
            self.0.current()
        }

        fn advance(&mut self, increment: usize) -> Option<NonNull<u8>> {
            self.0.advance(increment)
        }
    }

    /// Break that somebody else bumps by `shift` bytes right before our
    /// first growth, after we looked at it.
    struct RacedBreak {
        inner: ReservedBreak,
        shift: usize,
    }

    unsafe impl ProgramBreak for RacedBreak {
        fn current(&mut self) -> Option<NonNull<u8>> {
            self.inner.current()
        }

        fn advance(&mut self, increment: usize) -> Option<NonNull<u8>> {
            if self.shift > 0 {
                self.inner.advance(std::mem::take(&mut self.shift))?;
            }
            self.inner.advance(increment)
        }
    }

    #[test]
    fn basic_alloc() {
        let mut heap = heap();
        let block = heap.allocate(4).unwrap().cast::<u32>();

        unsafe {
            block.as_ptr().write(23);
            assert_eq!(23, *block.as_ptr());
        }
        assert_eq!(0, block.as_ptr() as usize % ALIGNMENT);
    }

    #[test]
    fn growth_stamps_header_and_rounds_size() {
        let mut heap = heap();
        let ptr = heap.allocate(10).unwrap();

        unsafe {
            assert_eq!(Ok(16), heap.usable_size(ptr));
        }
        assert_eq!(HEADER_SIZE + 16, heap.stats().footprint);
        assert_eq!(HEADER_SIZE + 16, heap.brk().used());
    }

    #[test]
    fn space_for_free_block_is_used() {
        let mut heap = heap();

        let first_block = heap.allocate(4).unwrap();
        let _ = heap.allocate(8).unwrap();
        let _ = heap.allocate(8).unwrap();

        unsafe { heap.free(Some(first_block)).unwrap() };

        let footprint = heap.stats().footprint;
        let second_block = heap.allocate(4).unwrap();

        assert_eq!(first_block, second_block);
        assert_eq!(footprint, heap.stats().footprint);
    }

    #[test]
    fn large_free_block_is_split() {
        let mut heap = heap();

        let big = heap.allocate(256).unwrap();
        let _guard = heap.allocate(16).unwrap();
        unsafe { heap.free(Some(big)).unwrap() };

        let small = heap.allocate(64).unwrap();
        assert_eq!(big, small);

        let stats = heap.stats();
        assert_eq!(1, stats.free_blocks);
        assert_eq!(256 - 64 - HEADER_SIZE, stats.free_bytes);
    }

    #[test]
    fn exact_fit_is_used_whole() {
        let mut heap = heap();

        let ptr = heap.allocate(48).unwrap();
        let _guard = heap.allocate(16).unwrap();
        unsafe { heap.free(Some(ptr)).unwrap() };

        let again = heap.allocate(40).unwrap();
        assert_eq!(ptr, again);
        unsafe {
            assert_eq!(Ok(48), heap.usable_size(again));
        }
        assert_eq!(0, heap.stats().free_blocks);
    }

    #[test]
    fn header_sized_leftover_becomes_empty_node() {
        let mut heap = heap();

        let ptr = heap.allocate(32 + HEADER_SIZE).unwrap();
        let _guard = heap.allocate(16).unwrap();
        unsafe { heap.free(Some(ptr)).unwrap() };

        let again = heap.allocate(32).unwrap();
        assert_eq!(ptr, again);
        assert_eq!(
            vec![(HEADER_SIZE + 32, 0)],
            heap.free_blocks().collect::<Vec<_>>()
        );

        // Freeing it again swallows the empty node.
        unsafe { heap.free(Some(again)).unwrap() };
        assert_eq!(
            vec![(0, 32 + HEADER_SIZE)],
            heap.free_blocks().collect::<Vec<_>>()
        );
    }

    #[test]
    fn zeroed_allocation_clears_reused_memory() {
        let mut heap = heap();

        let dirty = heap.allocate(64).unwrap();
        unsafe {
            dirty.as_ptr().write_bytes(0xAA, 64);
            heap.free(Some(dirty)).unwrap();
        }

        let clean = heap.allocate_zeroed(8, 8).unwrap();
        assert_eq!(dirty, clean);

        let bytes = unsafe { std::slice::from_raw_parts(clean.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn zeroed_allocation_checks_overflow() {
        let mut heap = heap();

        assert_eq!(
            Err(AllocError::SizeOverflow),
            heap.allocate_zeroed(usize::MAX, 2)
        );
        assert_eq!(0, heap.stats().footprint);
    }

    #[test]
    fn out_of_memory_is_reported() {
        let mut heap = Heap::new(ReservedBreak::with_capacity(4096).unwrap());
        let capacity = heap.brk().capacity();

        assert_eq!(
            Err(AllocError::OutOfMemory {
                requested: capacity
            }),
            heap.allocate(capacity)
        );
        assert_eq!(0, heap.stats().footprint);

        // Smaller requests still work afterwards.
        assert!(heap.allocate(capacity - HEADER_SIZE).is_ok());
        assert!(heap.allocate(0).is_err());
    }

    #[test]
    fn oversized_request_overflows() {
        let mut heap = heap();

        assert_eq!(Err(AllocError::SizeOverflow), heap.allocate(usize::MAX));
    }

    #[test]
    fn free_of_none_is_noop() {
        let mut heap = heap();

        unsafe {
            assert_eq!(Ok(()), heap.free(None));
        }
        assert_eq!(HeapStats::default(), heap.stats());
    }

    #[test]
    fn double_free_is_reported() {
        let mut heap = heap();
        let ptr = heap.allocate(32).unwrap();

        unsafe {
            heap.free(Some(ptr)).unwrap();
            assert!(matches!(
                heap.free(Some(ptr)),
                Err(AllocError::Corrupted { offset: 0, .. })
            ));
        }
        assert_eq!(1, heap.stats().free_blocks);
    }

    #[test]
    fn foreign_and_misaligned_pointers_are_rejected() {
        let mut heap = heap();
        let ptr = heap.allocate(32).unwrap();

        let mut local = 0u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();

        unsafe {
            assert!(matches!(
                heap.free(Some(foreign)),
                Err(AllocError::InvalidPointer { .. })
            ));

            let misaligned = NonNull::new(ptr.as_ptr().add(1)).unwrap();
            assert!(matches!(
                heap.free(Some(misaligned)),
                Err(AllocError::InvalidPointer { .. })
            ));

            assert_eq!(Ok(()), heap.free(Some(ptr)));
        }
    }

    #[test]
    fn corrupted_header_is_left_alone() {
        let mut heap = heap();
        let ptr = heap.allocate(32).unwrap();
        let neighbour = heap.allocate(32).unwrap();
        unsafe { heap.free(Some(neighbour)).unwrap() };

        unsafe {
            ptr.as_ptr().write_bytes(7, 32);
            smash_magic(ptr, 0xdead_beef);

            assert_eq!(
                Err(AllocError::Corrupted {
                    offset: 0,
                    found: 0xdead_beef
                }),
                heap.free(Some(ptr))
            );
            assert_eq!(
                Err(AllocError::Corrupted {
                    offset: 0,
                    found: 0xdead_beef
                }),
                heap.reallocate(Some(ptr), 64)
            );
        }

        // Neither call touched the free list or the contents.
        assert_eq!(vec![(HEADER_SIZE + 32, 32)], heap.free_blocks().collect::<Vec<_>>());
        assert_eq!(Ok(()), heap.check());
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 32) };
        assert!(bytes.iter().all(|&b| b == 7));

        // Restoring the sentinel makes the block freeable again.
        unsafe {
            smash_magic(ptr, MAGIC);
            assert_eq!(Ok(()), heap.free(Some(ptr)));
        }
        assert_eq!(1, heap.stats().free_blocks);
    }

    #[test]
    fn reallocate_copies_and_frees_source() {
        let mut heap = heap();
        let ptr = heap.allocate(16).unwrap();

        unsafe {
            for i in 0..16 {
                *ptr.as_ptr().add(i) = i as u8;
            }

            let grown = heap.reallocate(Some(ptr), 64).unwrap();
            assert_ne!(ptr, grown);

            let bytes = std::slice::from_raw_parts(grown.as_ptr(), 16);
            assert_eq!((0..16).collect::<Vec<u8>>(), bytes);
            assert_eq!(Ok(64), heap.usable_size(grown));
        }

        assert_eq!(vec![(0, 16)], heap.free_blocks().collect::<Vec<_>>());
    }

    #[test]
    fn reallocate_failure_keeps_source() {
        let mut heap = Heap::new(ReservedBreak::with_capacity(4096).unwrap());
        let capacity = heap.brk().capacity();
        let ptr = heap.allocate(32).unwrap();

        unsafe {
            ptr.as_ptr().write_bytes(3, 32);

            assert!(matches!(
                heap.reallocate(Some(ptr), capacity),
                Err(AllocError::OutOfMemory { .. })
            ));
            assert_eq!(Ok(32), heap.usable_size(ptr));
            assert_eq!(3, *ptr.as_ptr().add(31));
        }
        assert_eq!(0, heap.stats().free_blocks);
    }

    #[test]
    fn free_coalesces_and_installs_head() {
        let mut heap = heap();

        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        let c = heap.allocate(16).unwrap();
        let d = heap.allocate(16).unwrap();
        let _guard = heap.allocate(16).unwrap();

        unsafe {
            heap.free(Some(a)).unwrap();
            heap.free(Some(c)).unwrap();
            assert_eq!(2, heap.stats().free_blocks);

            // `b` bridges `a` and `c`; `d` then extends the merged block.
            heap.free(Some(b)).unwrap();
            heap.free(Some(d)).unwrap();
        }

        let block = HEADER_SIZE + 16;
        assert_eq!(
            vec![(0, 4 * block - HEADER_SIZE)],
            heap.free_blocks().collect::<Vec<_>>()
        );
        assert_eq!(Ok(()), heap.check());
    }

    #[test]
    fn zero_sized_blocks_are_distinct() {
        let mut heap = heap();

        let a = heap.allocate(0).unwrap();
        let b = heap.allocate(0).unwrap();
        assert_ne!(a, b);

        unsafe {
            assert_eq!(Ok(0), heap.usable_size(a));
            heap.free(Some(a)).unwrap();
            heap.free(Some(b)).unwrap();
        }
        assert_eq!(vec![(0, HEADER_SIZE)], heap.free_blocks().collect::<Vec<_>>());
    }

    #[test]
    fn misaligned_break_is_padded() {
        let mut heap = Heap::new(SkewedBreak::new(8));

        let a = heap.allocate(24).unwrap();
        let b = heap.allocate(40).unwrap();

        assert_eq!(0, a.as_ptr() as usize % ALIGNMENT);
        assert_eq!(0, b.as_ptr() as usize % ALIGNMENT);
        unsafe {
            assert_eq!(Ok(32), heap.usable_size(a));
            assert_eq!(Ok(48), heap.usable_size(b));
        }

        // 8 bytes of padding in front of the first header, none after.
        assert_eq!(8 + HEADER_SIZE + 32 + HEADER_SIZE + 48, heap.stats().footprint);
        assert_eq!(8 + heap.stats().footprint, heap.brk().0.used());

        unsafe {
            heap.free(Some(a)).unwrap();
            heap.free(Some(b)).unwrap();
        }
        assert_eq!(
            vec![(16, 32 + HEADER_SIZE + 48)],
            heap.free_blocks().collect::<Vec<_>>()
        );
    }

    #[test]
    fn break_moved_during_growth_is_out_of_memory() {
        let mut heap = Heap::new(RacedBreak {
            inner: ReservedBreak::with_capacity(1 << 20).unwrap(),
            shift: 8,
        });

        assert_eq!(
            Err(AllocError::OutOfMemory { requested: 32 }),
            heap.allocate(32)
        );
        assert_eq!(0, heap.stats().free_blocks);

        // The next growth sees the moved break and pads around it.
        let ptr = heap.allocate(32).unwrap();
        assert_eq!(0, ptr.as_ptr() as usize % ALIGNMENT);
        unsafe { heap.free(Some(ptr)).unwrap() };
        assert_eq!(Ok(()), heap.check());
    }

    #[test]
    fn adjacent_free_nodes_fail_check() {
        let mut heap = heap();
        let _ = heap.allocate(16).unwrap();
        let _ = heap.allocate(16).unwrap();

        // Bypass free so nothing gets merged.
        heap.free_list.push(&heap.region, 0, 16);
        heap.free_list.push(&heap.region, HEADER_SIZE + 16, 16);

        assert_eq!(
            Err(AllocError::Uncoalesced {
                left: 0,
                right: HEADER_SIZE + 16,
            }),
            heap.check()
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn system_break_reuses_freed_block() {
        use crate::brk::SystemBreak;

        let mut heap = Heap::new(SystemBreak::new());

        let p = heap.allocate(100).unwrap();
        assert_eq!(0, p.as_ptr() as usize % ALIGNMENT);
        unsafe {
            p.as_ptr().write_bytes(0x5A, 100);
            heap.free(Some(p)).unwrap();
        }

        let footprint = heap.stats().footprint;
        let q = heap.allocate(100).unwrap();

        assert_eq!(p, q);
        assert_eq!(footprint, heap.stats().footprint);
        unsafe { heap.free(Some(q)).unwrap() };
    }
}
