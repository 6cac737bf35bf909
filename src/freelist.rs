use tracing::debug;

use crate::{
    block::{Block, FreeNode, HEADER_SIZE},
    error::{AllocError, Result},
    region::Region,
};

/// Singly linked list of free blocks.
///
/// The nodes live inside the freed blocks themselves: when a block is freed its
/// header is rewritten in place as a [`FreeNode`] and pushed at the head. The
/// list only stores the head offset.
///
/// ```text
///   head --> [ size | next ] --> [ size | next ] --> [ size | NIL ]
///             offset 0x200        offset 0x000        offset 0x480
/// ```
///
/// List order is insertion order, not address order.
///
/// Address order is recovered on demand by [`FreeList::find_prev`] and
/// [`FreeList::find_next`], which scan the whole list. Every free coalesces
/// eagerly, so no two nodes of the list are ever address-contiguous.
///
/// All methods take the [`Region`] the offsets refer to, and every offset in
/// the list must be a block start inside that region.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: Option<usize>,
}

/// Iterator over `(offset, node)` pairs in list order.
pub(crate) struct Iter<'a> {
    region: &'a Region,
    current: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = (usize, FreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.current?;
        let node = unsafe { self.region.load(offset) }.as_node();
        self.current = node.next;

        Some((offset, node))
    }
}

impl FreeList {
    /// Creates a new empty List
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// It tells whether the FreeList is empty or not.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn iter<'a>(&self, region: &'a Region) -> Iter<'a> {
        Iter {
            region,
            current: self.head,
        }
    }

    fn node(region: &Region, offset: usize) -> FreeNode {
        unsafe { region.load(offset) }.as_node()
    }

    fn write(region: &Region, offset: usize, node: FreeNode) {
        unsafe { region.store(offset, Block::Free(node)) }
    }

    /// Turns the block at `offset` into a free node of `size` bytes and links it
    /// in as the new head.
    pub fn push(&mut self, region: &Region, offset: usize, size: usize) {
        Self::write(
            region,
            offset,
            FreeNode {
                size,
                next: self.head,
            },
        );
        self.head = Some(offset);
    }

    /// Returns the first node, in list order, able to hold `size` bytes.
    ///
    /// This is first-fit: the first block on the [`FreeList`] that we can use,
    /// not the one that wastes the least.
    pub fn first_fit(&self, region: &Region, size: usize) -> Option<(usize, FreeNode)> {
        self.iter(region).find(|(_, node)| node.size >= size)
    }

    /// Carves the node at `offset` into a left piece of exactly `target` bytes
    /// and a free remainder right after it.
    ///
    /// The remainder takes over the node's successor and the left piece links
    /// to the remainder, so unlinking the left piece afterwards leaves the
    /// remainder where the original node was. Fails with
    /// [`AllocError::TooSmall`] when there is no room for the remainder's
    /// header; the caller then has to use the node whole.
    pub fn split(&self, region: &Region, offset: usize, target: usize) -> Result<usize> {
        let node = Self::node(region, offset);

        let needed = target.checked_add(HEADER_SIZE).ok_or(AllocError::SizeOverflow)?;
        if node.size < needed {
            return Err(AllocError::TooSmall {
                size: node.size,
                target,
            });
        }

        let rest = offset + HEADER_SIZE + target;
        Self::write(
            region,
            rest,
            FreeNode {
                size: node.size - needed,
                next: node.next,
            },
        );
        Self::write(
            region,
            offset,
            FreeNode {
                size: target,
                next: Some(rest),
            },
        );

        Ok(offset)
    }

    /// Finds the node that ends exactly where the block at `offset` starts.
    pub fn find_prev(&self, region: &Region, offset: usize) -> Option<usize> {
        self.iter(region)
            .find(|(start, node)| node.end(*start) == offset)
            .map(|(start, _)| start)
    }

    /// Finds the node that starts exactly where the node at `offset` ends.
    pub fn find_next(&self, region: &Region, offset: usize) -> Option<usize> {
        let end = Self::node(region, offset).end(offset);

        self.iter(region)
            .find(|(start, _)| *start == end)
            .map(|(start, _)| start)
    }

    /// Unlinks the node at `offset`. Returns whether it was on the list.
    pub fn remove(&mut self, region: &Region, offset: usize) -> bool {
        let Some(head) = self.head else {
            return false;
        };

        if head == offset {
            self.head = Self::node(region, offset).next;
            return true;
        }

        let mut current = head;
        loop {
            let mut node = Self::node(region, current);
            match node.next {
                Some(next) if next == offset => {
                    node.next = Self::node(region, offset).next;
                    Self::write(region, current, node);
                    return true;
                }
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    /// Merges the node at `offset` with its address-contiguous free
    /// neighbours and returns the offset of the merged node.
    ///
    /// If a node ends where this one starts, it absorbs this one and becomes
    /// the merged block. Then a node starting where the (possibly merged) block
    /// ends is absorbed in turn. Absorbed nodes are unlinked from the list.
    pub fn coalesce(&mut self, region: &Region, offset: usize) -> usize {
        let mut merged = offset;

        if let Some(prev) = self.find_prev(region, offset) {
            let block = Self::node(region, offset);
            self.remove(region, offset);

            // Reload, unlinking may have rewritten `prev`'s link.
            let mut node = Self::node(region, prev);
            node.size += HEADER_SIZE + block.size;
            Self::write(region, prev, node);

            debug!(prev, offset, size = node.size, "merged with previous block");
            merged = prev;
        }

        if let Some(next) = self.find_next(region, merged) {
            let absorbed = Self::node(region, next);
            self.remove(region, next);

            let mut node = Self::node(region, merged);
            node.size += HEADER_SIZE + absorbed.size;
            Self::write(region, merged, node);

            debug!(offset = merged, next, size = node.size, "merged with next block");
        }

        merged
    }

    /// Moves the node at `offset` to the head of the list.
    pub fn move_to_front(&mut self, region: &Region, offset: usize) {
        if self.head == Some(offset) {
            return;
        }

        if self.remove(region, offset) {
            let size = Self::node(region, offset).size;
            self.push(region, offset, size);
        }
    }

    /// Returns the first pair of nodes found to be address-contiguous.
    pub fn find_contiguous(&self, region: &Region) -> Option<(usize, usize)> {
        self.iter(region).find_map(|(start, node)| {
            let end = node.end(start);
            self.iter(region)
                .find(|(other, _)| *other == end)
                .map(|(other, _)| (start, other))
        })
    }
}
