//! Allocation accounting.
//!
//! `CountingAllocator` wraps the system allocator and keeps process-wide
//! counters that the runtime stats reporter reads each tick. A binary opts in
//! with:
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: runhttp::observability::CountingAllocator = runhttp::observability::CountingAllocator;
//! ```
//!
//! Without it every counter stays at zero.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

static ALLOCATED: AtomicU64 = AtomicU64::new(0);
static TOTAL_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static MALLOCS: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);

/// Global allocator that counts allocations and live bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountingAllocator;

impl CountingAllocator {
    #[inline]
    fn record_alloc(size: usize) {
        ALLOCATED.fetch_add(size as u64, Ordering::Relaxed);
        TOTAL_ALLOCATED.fetch_add(size as u64, Ordering::Relaxed);
        MALLOCS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_free(size: usize) {
        ALLOCATED.fetch_sub(size as u64, Ordering::Relaxed);
        FREES.fetch_add(1, Ordering::Relaxed);
    }
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            Self::record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            Self::record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        Self::record_free(layout.size());
    }

    // Counted as a free of the old block plus an allocation of the new one.
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            Self::record_free(layout.size());
            Self::record_alloc(new_size);
        }
        new_ptr
    }
}

/// Point-in-time copy of the allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationCounters {
    /// Bytes currently allocated.
    pub allocated: u64,
    /// Bytes allocated over the process lifetime, even if freed.
    pub total_allocated: u64,
    /// Number of allocations.
    pub mallocs: u64,
    /// Number of deallocations.
    pub frees: u64,
}

pub fn allocation_counters() -> AllocationCounters {
    AllocationCounters {
        allocated: ALLOCATED.load(Ordering::Relaxed),
        total_allocated: TOTAL_ALLOCATED.load(Ordering::Relaxed),
        mallocs: MALLOCS.load(Ordering::Relaxed),
        frees: FREES.load(Ordering::Relaxed),
    }
}
