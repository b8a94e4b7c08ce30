use crate::header::{header_of, next_header, payload_of, BlockFlags, BlockHeader};
use crate::region::RegionTable;
use crate::{HeapRegion, HEADER_SIZE, PTR_SIZE, TINY_HEAP_SIZE};
use core::fmt;
use core::ptr::{self, null_mut};

/// Errors produced while acquiring a new heap region.
#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    /// The OS refused to advance the program break.
    #[error("program break could not be extended")]
    BreakFailed,
    /// The fixed region registry has no slot left. This is a
    /// programming-limit error, not a transient shortage.
    #[error("heap region table exhausted")]
    RegionTableFull,
}

/// Point-in-time heap counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Payload bytes managed across all regions.
    pub total_bytes: usize,
    /// Payload bytes currently on the free ring.
    pub free_bytes: usize,
    /// Number of blocks on the free ring.
    pub free_blocks: usize,
    /// Number of registered regions.
    pub regions: usize,
}

/// Free-list heap manager.
///
/// Free blocks form a circular singly-linked ring. `free_list` is the
/// rotating search cursor: after every successful fit it parks on the
/// predecessor of the block just handed out, so the next search continues
/// where the last one left off instead of restarting from a fixed head.
///
/// A region starts life as one free block spanning its whole payload.
/// Allocation carves blocks off the high end of a fitting free block, which
/// leaves the ring untouched; only an exact fit unlinks a node. Freeing
/// reinserts a block in address order and merges it with physically
/// adjacent free neighbors on both sides.
///
/// An empty ring is represented by a null cursor. That state occurs before
/// the first region is acquired and again whenever an exact fit unlinks the
/// last free node; [`Heap::ensure_seeded`] re-seeds it on demand.
pub struct Heap {
    regions: RegionTable,
    free_list: *mut BlockHeader,
}

impl Heap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: RegionTable::new(),
            free_list: null_mut(),
        }
    }

    /// Whether the free ring currently has at least one node.
    #[inline]
    #[must_use]
    pub fn has_free_blocks(&self) -> bool {
        !self.free_list.is_null()
    }

    /// Number of registered regions.
    #[inline]
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// The region at `index`, in registration order.
    #[inline]
    #[must_use]
    pub fn region(&self, index: usize) -> HeapRegion {
        self.regions.get(index)
    }

    /// Acquire a fresh region of at least `size` payload bytes from the OS
    /// and register it.
    ///
    /// The OS request adds one pointer plus one header of slack: the
    /// pointer covers the alignment shift of the region head, and the
    /// slack keeps successive regions from ever lining up exactly, so the
    /// coalescer cannot merge blocks across a region boundary.
    ///
    /// The returned header spans the whole region as a single self-looped
    /// free block. It is not yet linked into the ring; the caller either
    /// makes it the ring ([`Heap::ensure_seeded`]) or publishes it through
    /// [`Heap::free_block`] ([`Heap::grow`]).
    pub fn add_region(&mut self, size: usize) -> Result<*mut BlockHeader, HeapError> {
        if self.regions.is_full() {
            return Err(HeapError::RegionTableFull);
        }
        let size = size.max(TINY_HEAP_SIZE);
        let raw = crate::brk::extend_break(size + PTR_SIZE + HEADER_SIZE)
            .ok_or(HeapError::BreakFailed)?;
        let head = crate::align_up(raw as usize, PTR_SIZE) as *mut BlockHeader;
        // SAFETY: `head` starts a fresh, exclusively owned range large
        // enough for a header plus `size` payload bytes.
        unsafe {
            ptr::write(
                head,
                BlockHeader {
                    flags: BlockFlags::new(),
                    size,
                    next_free: head,
                },
            );
        }
        self.regions.register(head, size);
        log::debug!(
            "region {} registered: {size} payload bytes at {head:p}",
            self.regions.len()
        );
        Ok(head)
    }

    /// Seed the ring with one minimum-size region if it is currently empty.
    pub fn ensure_seeded(&mut self) -> Result<(), HeapError> {
        if self.free_list.is_null() {
            self.free_list = self.add_region(TINY_HEAP_SIZE)?;
        }
        Ok(())
    }

    /// Acquire a new region and publish it to the ring by freeing its
    /// payload.
    pub fn grow(&mut self, size: usize) -> Result<(), HeapError> {
        let head = self.add_region(size)?;
        // SAFETY: the fresh region head is a valid, unshared block.
        unsafe {
            self.free_block(payload_of(head));
        }
        Ok(())
    }

    /// First-fit search with rotating cursor.
    ///
    /// Starting at the cursor's successor, advance until a free block of at
    /// least `asize + HEADER_SIZE` bytes is found or the search completes
    /// one full revolution. `asize` must already be pointer-aligned.
    ///
    /// An exact fit is unlinked from the ring and handed out whole, so its
    /// recorded size stays `asize + HEADER_SIZE`. A larger block is split:
    /// the free node shrinks in place and the allocation is carved off its
    /// high end, which needs no ring pointer surgery at all. On success the
    /// cursor parks on the predecessor and the block is flagged allocated.
    pub fn find_fit(&mut self, asize: usize) -> Option<*mut BlockHeader> {
        if self.free_list.is_null() {
            return None;
        }
        let need = asize + HEADER_SIZE;
        // SAFETY: the ring invariants hold between public calls; every
        // node visited is a live free header inside a registered region.
        unsafe {
            let mut prev = self.free_list;
            let mut p = (*prev).next_free;
            loop {
                if (*p).size >= need {
                    if (*p).size == need {
                        if ptr::eq((*p).next_free, p) {
                            // Last free node: the ring empties.
                            self.free_list = null_mut();
                        } else {
                            (*prev).next_free = (*p).next_free;
                            self.free_list = prev;
                        }
                    } else {
                        (*p).size -= need;
                        p = next_header(p);
                        (*p).size = asize;
                        self.free_list = prev;
                    }
                    (*p).flags = BlockFlags::new().with_alloc(true);
                    return Some(p);
                }
                if ptr::eq(p, self.free_list) {
                    // Full revolution without a fit.
                    return None;
                }
                prev = p;
                p = (*p).next_free;
            }
        }
    }

    /// Return a block to the ring, coalescing with physically adjacent free
    /// neighbors on both sides.
    ///
    /// The ring is kept in address order between its minimum and maximum
    /// nodes; the insertion search locates the free predecessor `hit` such
    /// that `hit < target < hit.next_free`, with a wrap guard for targets
    /// outside that interval and for the one-node ring. Afterwards the
    /// cursor parks on `hit` and the block's flags are cleared.
    ///
    /// # Safety
    /// `payload` must be the payload address of a block owned by this heap
    /// that is not currently on the ring: either one produced by
    /// [`Heap::find_fit`] and not yet freed, or the payload of a fresh
    /// region head. Freeing any other pointer, or the same block twice,
    /// corrupts the ring.
    pub unsafe fn free_block(&mut self, payload: *mut u8) {
        // SAFETY: per the contract, `payload` denotes a live block header
        // and every ring node is a live free header.
        unsafe {
            let target = header_of(payload);
            if self.free_list.is_null() {
                (*target).next_free = target;
                (*target).flags = BlockFlags::new();
                self.free_list = target;
                return;
            }

            let mut hit = self.free_list;
            loop {
                let next = (*hit).next_free;
                if hit < target && target < next {
                    break;
                }
                // Wrap node, or one-node ring: target sits outside the
                // covered interval.
                if hit >= next && (target > hit || target < next) {
                    break;
                }
                hit = next;
            }

            let hit_next = (*hit).next_free;
            if ptr::eq(next_header(target), hit_next) {
                // Absorb the right neighbor.
                (*target).size += (*hit_next).size + HEADER_SIZE;
                (*target).next_free = (*hit_next).next_free;
                if ptr::eq(hit_next, hit) {
                    // The absorbed node was the ring's only member; the
                    // ring must re-thread through the surviving block, not
                    // through the header now interior to it.
                    (*target).next_free = target;
                    (*target).flags = BlockFlags::new();
                    self.free_list = target;
                    return;
                }
            } else {
                (*target).next_free = hit_next;
            }

            if ptr::eq(next_header(hit), target) {
                // Absorb target into the left neighbor.
                (*hit).size += (*target).size + HEADER_SIZE;
                (*hit).next_free = (*target).next_free;
            } else {
                (*hit).next_free = target;
            }

            self.free_list = hit;
            (*target).flags = BlockFlags::new();
        }
    }

    /// Resolve `addr` to the header of the enclosing block, free or
    /// allocated.
    ///
    /// Resolution is two-staged: the region registry (with its hit cache)
    /// narrows the search to one region, then a linear walk over that
    /// region's header chain finds the block whose payload range contains
    /// `addr`. Words pointing at a header itself, or into no registered
    /// region, do not resolve.
    pub fn find_block(&mut self, addr: usize) -> Option<*mut BlockHeader> {
        let region = self.regions.find(addr)?;
        let end = region.slot() as usize + region.size();
        let mut p = region.slot();
        // SAFETY: the header chain partitions the region; every header
        // visited lies strictly below `end`.
        unsafe {
            while (p as usize) < end {
                let next = next_header(p);
                let payload = p as usize + HEADER_SIZE;
                if payload <= addr && addr < next as usize {
                    return Some(p);
                }
                p = next;
            }
        }
        None
    }

    /// Current heap counters.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut total_bytes = 0;
        for i in 0..self.regions.len() {
            total_bytes += self.regions.get(i).size();
        }

        let mut free_bytes = 0;
        let mut free_blocks = 0;
        if !self.free_list.is_null() {
            // SAFETY: the ring is a finite cycle of live free headers.
            unsafe {
                let start = self.free_list;
                let mut p = start;
                loop {
                    free_bytes += (*p).size;
                    free_blocks += 1;
                    p = (*p).next_free;
                    if ptr::eq(p, start) {
                        break;
                    }
                }
            }
        }

        HeapStats {
            total_bytes,
            free_bytes,
            free_blocks,
            regions: self.regions.len(),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        write!(
            f,
            "Heap({} regions, {}/{} bytes free in {} blocks)",
            stats.regions, stats.free_bytes, stats.total_bytes, stats.free_blocks
        )
    }
}
