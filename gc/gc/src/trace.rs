//! Root scanning and the conservative mark engine.
//!
//! A collection walks three root sources in a fixed order: the captured
//! callee-saved register file, the native stack between the recorded outer
//! bound and a freshly probed inner bound, and every registered root
//! range. The register capture precedes the stack probe so that any live
//! pointer whose only copy sits in a register is in the scanned buffer by
//! the time the stack bounds are fixed.

use crate::collector::Collector;
use gc_heap::{align_up, HEADER_SIZE, PTR_SIZE};
use gc_registers::{stack_pointer, RegisterSnapshot};

impl Collector {
    /// Run one full collection cycle and return the number of blocks swept
    /// back onto the free ring.
    ///
    /// Collections are synchronous, uninterruptible and infallible. Every
    /// mark set during the cycle is cleared again by the sweep, so outside
    /// of `collect` no block ever carries a mark.
    pub fn collect(&mut self) -> usize {
        self.mark_registers();
        self.mark_stack();
        self.mark_root_ranges();
        let freed = self.sweep();
        log::debug!("collection finished: {freed} blocks reclaimed");
        freed
    }

    fn mark_registers(&mut self) {
        let snapshot = RegisterSnapshot::capture();
        for &word in snapshot.words() {
            self.mark_word(word);
        }
    }

    fn mark_stack(&mut self) {
        if self.stack_start == 0 {
            // `init` never ran; there is no outer bound to scan from.
            return;
        }
        self.stack_end = stack_pointer();
        let (lo, hi) = if self.stack_start > self.stack_end {
            (self.stack_end, self.stack_start)
        } else {
            (self.stack_start, self.stack_end)
        };
        self.mark_range(lo, hi);
    }

    fn mark_root_ranges(&mut self) {
        for i in 0..self.root_ranges_used {
            let range = self.root_ranges[i];
            self.mark_range(range.start, range.end);
        }
    }

    /// Scan every pointer-aligned word in `[start, end)` as a candidate
    /// root. The bounds are aligned inwards, so a ragged tail is skipped
    /// rather than read across.
    fn mark_range(&mut self, start: usize, end: usize) {
        let mut cursor = align_up(start, PTR_SIZE);
        let end = end & !(PTR_SIZE - 1);
        while cursor < end {
            // SAFETY: the caller vouches that `[start, end)` is readable;
            // the cursor stays aligned and below `end`. The read is
            // volatile because stack slots being scanned are dead as far
            // as the optimizer is concerned.
            let word = unsafe { (cursor as *const usize).read_volatile() };
            self.mark_word(word);
            cursor += PTR_SIZE;
        }
    }

    /// Decide whether `word` addresses an allocated payload and, if so,
    /// mark the block and recurse over its contents.
    ///
    /// Free blocks pin nothing, and an already-marked block terminates the
    /// recursion, which also breaks pointer cycles.
    fn mark_word(&mut self, word: usize) {
        let Some(header) = self.heap.find_block(word) else {
            return;
        };
        // SAFETY: `find_block` yields a live header inside a registered
        // region; payload bounds derive from its intact size field.
        unsafe {
            if !(*header).is_alloc() || (*header).is_marked() {
                return;
            }
            (*header).set_marked(true);
            log::trace!(
                "marked block {header:p} ({} bytes) via {word:#x}",
                (*header).size()
            );
            let payload = header as usize + HEADER_SIZE;
            self.mark_range(payload, payload + (*header).size());
        }
    }
}
