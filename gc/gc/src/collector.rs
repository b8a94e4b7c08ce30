use core::ptr::NonNull;
use gc_heap::{align_up, payload_of, BlockHeader, Heap, HeapError, HeapStats};
use gc_heap::{HEADER_SIZE, PTR_SIZE};
use gc_registers::stack_pointer;

/// Capacity of the externally registered root-range table.
pub const ROOT_RANGES_LIMIT: usize = 1_000;

/// A half-open address range scanned for roots on every collection.
#[derive(Clone, Copy)]
pub(crate) struct RootRange {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl RootRange {
    const EMPTY: Self = Self { start: 0, end: 0 };
}

/// The collector context: heap, root sources and stack bounds.
///
/// All state that classic implementations keep in process-wide globals
/// lives here instead, passed into every entry point. The context is large
/// (the region registry is a fixed inline table), so long-lived instances
/// are best boxed or kept in a `static`.
///
/// # Contract
///
/// * Single-threaded only; no operation is reentrant. In particular,
///   [`Collector::alloc`] must not be called from inside a mark phase and
///   signal handlers must not allocate.
/// * [`Collector::init`] must run before the first collection can scan the
///   stack, and it must run in a frame that encloses every later frame
///   holding managed pointers. Locals of the frame that calls `init`, and
///   of anything above it, are outside the scanned range.
pub struct Collector {
    pub(crate) heap: Heap,
    pub(crate) root_ranges: [RootRange; ROOT_RANGES_LIMIT],
    pub(crate) root_ranges_used: usize,
    pub(crate) stack_start: usize,
    pub(crate) stack_end: usize,
}

impl Collector {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heap: Heap::new(),
            root_ranges: [RootRange::EMPTY; ROOT_RANGES_LIMIT],
            root_ranges_used: 0,
            stack_start: 0,
            stack_end: 0,
        }
    }

    /// Record the outer bound of the stack scan.
    ///
    /// Inlined into the caller so the recorded stack pointer belongs to the
    /// calling frame: every function entered after `init` returns lives
    /// below the recorded bound and is therefore scanned during
    /// collections. Call this once, from the outermost frame that will
    /// hold managed pointers.
    #[inline(always)]
    pub fn init(&mut self) {
        self.stack_start = stack_pointer();
    }

    /// Allocate `size` payload bytes and return the payload address.
    ///
    /// The size is aligned up to the pointer grain. A zero-size request
    /// returns `None`. When the fit search exhausts the ring, one
    /// collection cycle runs and the search retries; if it still fails,
    /// the heap grows by a fresh region and the search retries once more.
    /// `None` after that means the OS refused to extend the program break.
    ///
    /// Exhaustion of the region registry aborts the process: the registry
    /// bound is a programming limit, not a transient shortage.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let asize = align_up(size, PTR_SIZE);

        if let Err(err) = self.heap.ensure_seeded() {
            return Self::out_of_memory(&err);
        }
        if let Some(block) = self.heap.find_fit(asize) {
            return Some(Self::payload_ptr(block));
        }

        self.collect();
        if let Some(block) = self.heap.find_fit(asize) {
            return Some(Self::payload_ptr(block));
        }

        if let Err(err) = self.heap.grow(asize + 2 * HEADER_SIZE) {
            return Self::out_of_memory(&err);
        }
        self.heap.find_fit(asize).map(Self::payload_ptr)
    }

    /// Return a block to the free ring, coalescing with adjacent free
    /// neighbors.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`Collector::alloc`] on this
    /// collector and must not have been freed since, whether explicitly or
    /// by a collection that observed it unreachable.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        // SAFETY: forwarded contract.
        unsafe {
            self.heap.free_block(ptr.as_ptr());
        }
    }

    /// Register `[start, end)` as a root range scanned by every collection.
    ///
    /// Aborts the process when the fixed range table is full.
    pub fn register_root(&mut self, start: *const u8, end: *const u8) {
        if self.root_ranges_used == ROOT_RANGES_LIMIT {
            log::error!("root range table exhausted ({ROOT_RANGES_LIMIT} entries)");
            std::process::abort();
        }
        self.root_ranges[self.root_ranges_used] = RootRange {
            start: start as usize,
            end: end as usize,
        };
        self.root_ranges_used += 1;
    }

    /// Current heap counters.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }

    fn payload_ptr(block: *mut BlockHeader) -> NonNull<u8> {
        // SAFETY: `find_fit` only returns non-null headers of live blocks.
        unsafe { NonNull::new_unchecked(payload_of(block)) }
    }

    fn out_of_memory(err: &HeapError) -> Option<NonNull<u8>> {
        match err {
            HeapError::BreakFailed => {
                log::debug!("allocation failed: {err}");
                None
            }
            HeapError::RegionTableFull => {
                log::error!("fatal: {err}");
                std::process::abort();
            }
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gc_heap::{header_of, TINY_HEAP_SIZE};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// The program break is process-global and the test harness is
    /// threaded; every test that allocates takes this lock.
    static BRK_LOCK: Mutex<()> = Mutex::new(());

    fn serial() -> MutexGuard<'static, ()> {
        BRK_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the stack region just below the caller with zeroes so
    /// word scans cannot resurrect pointer values left behind by dead
    /// frames.
    #[inline(never)]
    fn scrub_stack() {
        let mut fill = [0usize; 1024];
        core::hint::black_box(&mut fill);
    }

    #[test]
    fn zero_size_allocations_yield_null() {
        let mut gc = Box::new(Collector::new());
        assert!(gc.alloc(0).is_none());
        assert_eq!(gc.stats().regions, 0);
    }

    #[test]
    fn allocation_triple_coalesces_back_to_one_block() {
        let _guard = serial();
        let mut gc = Box::new(Collector::new());
        let p1 = gc.alloc(0x17).expect("p1");
        let p2 = gc.alloc(0x19).expect("p2");
        let p3 = gc.alloc(0x23).expect("p3");
        unsafe {
            gc.free(p1);
            gc.free(p2);
            gc.free(p3);
        }
        let stats = gc.stats();
        assert_eq!(stats.regions, 1);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, TINY_HEAP_SIZE);
    }

    #[test]
    fn oversized_requests_grow_a_second_region() {
        let _guard = serial();
        let mut gc = Box::new(Collector::new());
        gc.init();
        let p = gc.alloc(TINY_HEAP_SIZE + 0x80).expect("grown allocation");
        let stats = gc.stats();
        assert_eq!(stats.regions, 2);
        assert!(gc.heap.region(1).contains(p.as_ptr() as usize));
        unsafe {
            gc.free(p);
        }
        let grown = TINY_HEAP_SIZE + 0x80 + 2 * HEADER_SIZE;
        assert_eq!(gc.stats().free_bytes, TINY_HEAP_SIZE + grown);
    }

    #[test]
    fn whole_seed_region_is_allocatable_and_the_heap_reseeds() {
        let _guard = serial();
        let mut gc = Box::new(Collector::new());
        gc.init();
        let p1 = gc
            .alloc(TINY_HEAP_SIZE - HEADER_SIZE)
            .expect("whole-region allocation");
        assert_eq!(gc.stats().regions, 1);
        assert_eq!(gc.stats().free_blocks, 0);

        // The drained ring reseeds on the next request.
        let p2 = gc.alloc(0x10).expect("reseeded allocation");
        assert_eq!(gc.stats().regions, 2);

        unsafe {
            gc.free(p1);
            gc.free(p2);
        }
        let stats = gc.stats();
        assert_eq!(stats.free_bytes, 2 * TINY_HEAP_SIZE);
        assert_eq!(stats.free_blocks, 2);
    }

    #[inline(never)]
    fn alloc_and_forget(gc: &mut Collector) -> usize {
        let p = gc.alloc(0x100).expect("allocation");
        // Return the header address: it is not a payload pointer, so its
        // presence on the caller's stack pins nothing.
        unsafe { header_of(p.as_ptr()) as usize }
    }

    #[test]
    fn collection_reclaims_unreachable_blocks() {
        let _guard = serial();
        let mut gc = Box::new(Collector::new());
        gc.init();
        let header_addr = alloc_and_forget(&mut gc);
        scrub_stack();
        let freed = gc.collect();
        assert_eq!(freed, 1);
        let header = header_addr as *mut BlockHeader;
        unsafe {
            assert!(!(*header).is_alloc());
        }
        // Everything coalesced back into the seed block.
        let stats = gc.stats();
        assert_eq!(stats.free_bytes, TINY_HEAP_SIZE);
        assert_eq!(stats.free_blocks, 1);
    }

    #[inline(never)]
    fn hold_and_collect(gc: &mut Collector) {
        let q = gc.alloc(0x100).expect("allocation");
        core::hint::black_box(&q);
        let freed = gc.collect();
        assert_eq!(freed, 0);
        unsafe {
            let header = header_of(q.as_ptr());
            assert!((*header).is_alloc());
            assert!(!(*header).is_marked());
        }
        core::hint::black_box(&q);
        unsafe {
            gc.free(q);
        }
    }

    #[test]
    fn collection_keeps_stack_reachable_blocks() {
        let _guard = serial();
        let mut gc = Box::new(Collector::new());
        gc.init();
        // The held pointer lives in a frame strictly below the recorded
        // stack bound, so the scan must find and pin it.
        hold_and_collect(&mut gc);
    }

    #[test]
    fn registered_root_ranges_pin_blocks() {
        let _guard = serial();
        let mut gc = Box::new(Collector::new());
        // No `init` on purpose: collections must cope without a recorded
        // stack bound by skipping the stack scan.
        let p = gc.alloc(0x40).expect("allocation");
        let slot = [p.as_ptr() as usize];
        let start = slot.as_ptr().cast::<u8>();
        // SAFETY: one element past the array start stays in bounds.
        let end = unsafe { start.add(size_of::<usize>()) };
        gc.register_root(start, end);

        let freed = gc.collect();
        assert_eq!(freed, 0);
        unsafe {
            assert!((*header_of(p.as_ptr())).is_alloc());
        }
        core::hint::black_box(&slot);
    }

    #[inline(never)]
    fn churn(gc: &mut Collector, rounds: usize) -> NonNull<u8> {
        let mut p = gc.alloc(0x100).expect("allocation");
        for _ in 1..rounds {
            p = gc.alloc(0x100).expect("allocation");
        }
        core::hint::black_box(&p);
        p
    }

    #[test]
    fn load_test_retains_only_the_live_block() {
        let _guard = serial();
        let mut gc = Box::new(Collector::new());
        gc.init();
        let last = churn(&mut gc, 2000);
        unsafe {
            assert!((*header_of(last.as_ptr())).is_alloc());
        }
        // Collections ran during the churn and probed the inner bound.
        assert_ne!(gc.stack_end, 0);
        assert_ne!(gc.stack_end, gc.stack_start);
        // Dead blocks were reclaimed instead of piling up region by region.
        assert!(gc.stats().regions < 50, "regions: {}", gc.stats().regions);
    }
}
