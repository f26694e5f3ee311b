//! Heap accounting for the agent process.
//!
//! [`TrackingAllocator`] wraps the system allocator and keeps lock-free
//! counters that [`crate::runtime::RuntimeCollector`] turns into gauges. The
//! agent binary installs it with `#[global_allocator]`.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

const SMALL_ALLOC_LIMIT: usize = 256;
const MEDIUM_ALLOC_LIMIT: usize = 64 * 1024;
/// Smallest chunk the system allocator hands out.
const MIN_CHUNK: usize = 16;

/// Bytes an allocation occupies on the heap once rounded to chunk size.
fn footprint(size: usize, align: usize) -> u64 {
    size.max(1).next_multiple_of(align.max(MIN_CHUNK)) as u64
}

/// A point-in-time copy of the allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Bytes currently allocated.
    pub live_bytes: u64,
    /// Heap footprint of the live allocations, chunk rounding included.
    pub heap_bytes: u64,
    /// Highest value `live_bytes` has reached.
    pub peak_bytes: u64,
    /// Cumulative bytes handed out, including growth through `realloc`.
    pub total_allocated: u64,
    /// Cumulative bytes returned, including shrinkage through `realloc`.
    pub total_freed: u64,
    pub mallocs: u64,
    pub frees: u64,
    pub reallocs: u64,
    pub zeroed_allocs: u64,
    pub largest_alloc: u64,
    pub small_allocs: u64,
    pub medium_allocs: u64,
    pub large_allocs: u64,
}

impl AllocStats {
    /// Allocations not yet freed.
    pub fn live_objects(&self) -> u64 {
        self.mallocs.saturating_sub(self.frees)
    }
}

pub struct TrackingAllocator {
    live_bytes: AtomicU64,
    heap_bytes: AtomicU64,
    peak_bytes: AtomicU64,
    total_allocated: AtomicU64,
    total_freed: AtomicU64,
    mallocs: AtomicU64,
    frees: AtomicU64,
    reallocs: AtomicU64,
    zeroed_allocs: AtomicU64,
    largest_alloc: AtomicU64,
    small_allocs: AtomicU64,
    medium_allocs: AtomicU64,
    large_allocs: AtomicU64,
}

impl TrackingAllocator {
    pub const fn new() -> Self {
        Self {
            live_bytes: AtomicU64::new(0),
            heap_bytes: AtomicU64::new(0),
            peak_bytes: AtomicU64::new(0),
            total_allocated: AtomicU64::new(0),
            total_freed: AtomicU64::new(0),
            mallocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            reallocs: AtomicU64::new(0),
            zeroed_allocs: AtomicU64::new(0),
            largest_alloc: AtomicU64::new(0),
            small_allocs: AtomicU64::new(0),
            medium_allocs: AtomicU64::new(0),
            large_allocs: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> AllocStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        AllocStats {
            live_bytes: load(&self.live_bytes),
            heap_bytes: load(&self.heap_bytes),
            peak_bytes: load(&self.peak_bytes),
            total_allocated: load(&self.total_allocated),
            total_freed: load(&self.total_freed),
            mallocs: load(&self.mallocs),
            frees: load(&self.frees),
            reallocs: load(&self.reallocs),
            zeroed_allocs: load(&self.zeroed_allocs),
            largest_alloc: load(&self.largest_alloc),
            small_allocs: load(&self.small_allocs),
            medium_allocs: load(&self.medium_allocs),
            large_allocs: load(&self.large_allocs),
        }
    }

    fn grow(&self, bytes: u64) {
        let live = self.live_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.peak_bytes.fetch_max(live, Ordering::Relaxed);
        self.total_allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    fn shrink(&self, bytes: u64) {
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
        self.total_freed.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_alloc(&self, layout: Layout) {
        let size = layout.size();
        self.grow(size as u64);
        self.heap_bytes
            .fetch_add(footprint(size, layout.align()), Ordering::Relaxed);
        self.mallocs.fetch_add(1, Ordering::Relaxed);
        self.largest_alloc.fetch_max(size as u64, Ordering::Relaxed);
        let class = if size <= SMALL_ALLOC_LIMIT {
            &self.small_allocs
        } else if size <= MEDIUM_ALLOC_LIMIT {
            &self.medium_allocs
        } else {
            &self.large_allocs
        };
        class.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for TrackingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            self.record_alloc(layout);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            self.record_alloc(layout);
            self.zeroed_allocs.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        self.shrink(layout.size() as u64);
        self.heap_bytes
            .fetch_sub(footprint(layout.size(), layout.align()), Ordering::Relaxed);
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            self.reallocs.fetch_add(1, Ordering::Relaxed);
            self.largest_alloc.fetch_max(new_size as u64, Ordering::Relaxed);
            let old_size = layout.size();
            self.heap_bytes
                .fetch_sub(footprint(old_size, layout.align()), Ordering::Relaxed);
            self.heap_bytes
                .fetch_add(footprint(new_size, layout.align()), Ordering::Relaxed);
            if new_size >= old_size {
                self.grow((new_size - old_size) as u64);
            } else {
                self.shrink((old_size - new_size) as u64);
            }
        }
        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_alloc_and_free() {
        let tracker = TrackingAllocator::new();
        let layout = Layout::from_size_align(100, 8).unwrap();
        unsafe {
            let ptr = tracker.alloc(layout);
            assert!(!ptr.is_null());
            let stats = tracker.stats();
            assert_eq!(stats.live_bytes, 100);
            assert_eq!(stats.heap_bytes, 112);
            assert_eq!(stats.mallocs, 1);
            assert_eq!(stats.small_allocs, 1);
            assert_eq!(stats.live_objects(), 1);
            tracker.dealloc(ptr, layout);
        }
        let stats = tracker.stats();
        assert_eq!(stats.live_bytes, 0);
        assert_eq!(stats.heap_bytes, 0);
        assert_eq!(stats.peak_bytes, 100);
        assert_eq!(stats.total_allocated, 100);
        assert_eq!(stats.total_freed, 100);
        assert_eq!(stats.live_objects(), 0);
    }

    #[test]
    fn realloc_tracks_growth_and_size_class() {
        let tracker = TrackingAllocator::new();
        let layout = Layout::from_size_align(1024, 8).unwrap();
        unsafe {
            let ptr = tracker.alloc_zeroed(layout);
            assert!(!ptr.is_null());
            let grown = tracker.realloc(ptr, layout, 128 * 1024);
            assert!(!grown.is_null());
            let stats = tracker.stats();
            assert_eq!(stats.live_bytes, 128 * 1024);
            assert_eq!(stats.reallocs, 1);
            assert_eq!(stats.zeroed_allocs, 1);
            assert_eq!(stats.medium_allocs, 1);
            assert_eq!(stats.largest_alloc, 128 * 1024);
            tracker.dealloc(grown, Layout::from_size_align(128 * 1024, 8).unwrap());
        }
        assert_eq!(tracker.stats().live_bytes, 0);
        assert_eq!(tracker.stats().heap_bytes, 0);
    }

    #[test]
    fn heap_footprint_rounds_to_chunks() {
        assert_eq!(footprint(0, 1), 16);
        assert_eq!(footprint(17, 8), 32);
        assert_eq!(footprint(40, 64), 64);

        let tracker = TrackingAllocator::new();
        let layout = Layout::from_size_align(3, 1).unwrap();
        unsafe {
            let ptr = tracker.alloc(layout);
            assert!(!ptr.is_null());
            let stats = tracker.stats();
            assert_eq!((stats.live_bytes, stats.heap_bytes), (3, 16));
            tracker.dealloc(ptr, layout);
        }
    }
}
