//! # Conservative Mark-Sweep Garbage Collector
//!
//! A tracing, conservative, mark-and-sweep collector paired with the
//! free-list heap of the `gc-heap` crate. Allocation hands out raw payload
//! blocks; when a fit search exhausts the free ring, the collector scans
//! the register file, the native stack and any registered root ranges,
//! marks every block conservatively reachable from them, sweeps the rest
//! back onto the ring and only then grows the heap.
//!
//! ## Conservatism
//!
//! The root set is *any* pointer-aligned bit pattern that happens to
//! address an allocated payload. Words are scanned untyped, so a pointer
//! stashed in an integer variable still pins its block. False positives
//! are tolerated; false negatives are forbidden.
//!
//! ## Threading
//!
//! The collector is strictly single-threaded: every public operation runs
//! to completion on the calling thread, none are reentrant, and the
//! conservative stack scan only covers the thread that called
//! [`Collector::init`]. The type is neither `Send` nor `Sync`, which pins
//! this contract into the type system.
//!
//! ## Usage
//!
//! ```rust
//! use gc::Collector;
//!
//! let mut gc = Box::new(Collector::new());
//! gc.init();
//!
//! let p = gc.alloc(64).expect("out of memory");
//! unsafe { p.as_ptr().write_bytes(0, 64) };
//!
//! // Blocks can be released explicitly, or left for a future collection
//! // to reclaim once nothing on the stack points at them anymore.
//! unsafe { gc.free(p) };
//! ```

mod collector;
mod sweep;
mod trace;

pub use collector::{Collector, ROOT_RANGES_LIMIT};
pub use gc_heap::{HeapStats, HEADER_SIZE, HEAP_LIMIT, PTR_SIZE, TINY_HEAP_SIZE};
