//! # Free-List Heap over the Program Break
//!
//! This crate provides the heap half of the collector: memory acquisition
//! from the OS, per-block metadata, the region registry, and the circular
//! free list with first-fit search, splitting and coalescing.
//!
//! ## Architecture Overview
//!
//! The heap is built from three layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Heap                           │
//! │    • rotating first-fit search over the free ring   │
//! │    • block splitting and neighbor coalescing        │
//! │    • on-demand region growth                        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Region Registry                     │
//! │    • fixed table of every acquired region           │
//! │    • address-to-region resolution with a hit cache  │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Program-Break Extension                │
//! │    • contiguous ranges from `sbrk`                  │
//! │    • regions are never returned to the OS           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! * Every block starts at a pointer-aligned address; header and payload
//!   sizes are multiples of the pointer size.
//! * The free list is a circular singly-linked ring threaded through free
//!   blocks only. Allocated blocks are invisible to ring traversal but
//!   physically interleaved.
//! * No two physically adjacent blocks are both free after a
//!   [`Heap::free_block`] call.
//! * Each region's header chain is a complete partition of the region, so
//!   walking [`next_header`] links from the region head visits every block.
//!
//! ## Safety Model
//!
//! Block headers are a layout contract over raw heap memory, not owned
//! values. All traversal and mutation happens through raw pointers inside
//! `unsafe` blocks; the [`Heap`] type is the boundary that upholds the ring
//! and chain invariants. The heap is strictly single-threaded and the types
//! here are deliberately neither `Send` nor `Sync`.

mod brk;
mod header;
mod heap;
mod region;

pub use header::{header_of, next_header, payload_of, BlockFlags, BlockHeader};
pub use heap::{Heap, HeapError, HeapStats};
pub use region::{HeapRegion, RegionTable};

/// Machine pointer size. All block sizes and scanned addresses are aligned
/// to this grain.
pub const PTR_SIZE: usize = size_of::<usize>();

/// Size of the metadata prefix carried by every block, free or allocated.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Minimum payload size of a region acquired from the OS. Smaller growth
/// requests are rounded up to this grain.
pub const TINY_HEAP_SIZE: usize = 0x4000;

/// Capacity of the region registry. Exceeding it is a programming-limit
/// error, not a transient one.
pub const HEAP_LIMIT: usize = 10_000;

/// Align `value` upwards to `align` (must be a power of two).
///
/// ```rust
/// assert_eq!(gc_heap::align_up(0x17, 8), 0x18);
/// assert_eq!(gc_heap::align_up(0x18, 8), 0x18);
/// ```
#[inline]
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + (align - 1)) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_is_idempotent_on_aligned_values() {
        for v in (0..0x100usize).step_by(PTR_SIZE) {
            assert_eq!(align_up(v, PTR_SIZE), v);
        }
    }

    #[test]
    fn alignment_rounds_up_to_pointer_grain() {
        assert_eq!(align_up(1, PTR_SIZE), PTR_SIZE);
        assert_eq!(align_up(PTR_SIZE + 1, PTR_SIZE), 2 * PTR_SIZE);
        assert_eq!(align_up(0, PTR_SIZE), 0);
    }

    #[test]
    fn header_size_is_pointer_aligned() {
        assert_eq!(HEADER_SIZE % PTR_SIZE, 0);
    }
}
