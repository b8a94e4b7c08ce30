//! The sweep phase.

use crate::collector::Collector;
use gc_heap::{next_header, payload_of};

impl Collector {
    /// Walk every registered region in address order, clear the mark on
    /// live blocks and return unmarked allocated blocks to the free ring.
    ///
    /// Returns the number of blocks reclaimed.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for i in 0..self.heap.region_count() {
            let region = self.heap.region(i);
            let end = region.slot() as usize + region.size();
            let mut p = region.slot();
            // SAFETY: each region's header chain partitions the region.
            // The successor is recomputed after a free: coalescing may
            // have grown the block's recorded size, and the grown size is
            // exactly what skips the absorbed free neighbor.
            unsafe {
                while (p as usize) < end {
                    if (*p).is_alloc() {
                        if (*p).is_marked() {
                            (*p).set_marked(false);
                        } else {
                            self.heap.free_block(payload_of(p));
                            freed += 1;
                        }
                    }
                    p = next_header(p);
                }
            }
        }
        freed
    }
}
