//! The allocator façade: a free index and a break provider behind
//! `alloc`/`free`.

use crate::brk::BreakProvider;
use crate::chunk::{
    merged_units, size_to_units, total_units, ChunkRef, ChunkStatus, CHUNK_UNIT, FOOTER_UNITS,
    MIN_SPLIT_OVERHEAD,
};
use crate::index::FreeIndex;
use crate::region::Region;

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use log::{debug, warn};
use spin::Mutex;

/// The break is advanced by at least this many payload units (16 KiB) per
/// grow, so small allocations don't take the trip through the provider every
/// time.
pub const MIN_GROW_UNITS: u32 = 1024;

/// A heap over the memory served by `P`, with free chunks tracked by `I`.
///
/// The index variant is picked at construction time through the type
/// parameter; both variants get the exact same split/coalesce/grow
/// machinery. The heap region itself is only created on the first `alloc`.
///
/// Not internally synchronized; wrap in [`LockedHeap`] to share.
pub struct Heap<I, P> {
    index: I,
    provider: P,
    region: Option<Region>,
}

impl<I: FreeIndex, P: BreakProvider> Heap<I, P> {
    pub fn new(provider: P) -> Heap<I, P>
    where
        I: Default,
    {
        Heap::with_index(I::default(), provider)
    }

    pub fn with_index(index: I, provider: P) -> Heap<I, P> {
        Heap { index, provider, region: None }
    }

    /// Allocates `size` bytes and returns a `CHUNK_UNIT`-aligned pointer to
    /// them, or `None` when `size` is zero or memory is exhausted.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let required = size_to_units(size)?;

        if self.region.is_none() {
            let base = self.provider.grow(0)?;
            debug!("heap region starts at {:p}", base.as_ptr());
            // SAFETY: `base` is the provider's current break; the provider
            // contract gives contiguity, alignment and validity from here on.
            self.region = Some(unsafe { Region::from_base(base) });
        }
        self.debug_check();

        let payload = {
            let region = self.region.as_mut().unwrap();
            let index = &mut self.index;

            let c = match index.find(region, required) {
                Some(c) => c,
                None => Self::grow_heap(index, region, &mut self.provider, required)?,
            };
            debug_assert!(region.header(c).units() >= required);

            let c = if region.header(c).units() > required + MIN_SPLIT_OVERHEAD {
                Self::split_chunk(index, region, c, required)
            } else {
                index.remove(region, c);
                region.header_mut(c).set_status(ChunkStatus::InUse);
                region.set_footer(c);
                c
            };
            region.payload(c)
        };

        self.debug_check();
        Some(payload)
    }

    /// Returns `ptr`'s chunk to the heap, coalescing it with any free
    /// neighbor.
    ///
    /// `ptr` must be null or a pointer obtained from `alloc` and not freed
    /// since. Null is a no-op; anything else that fails validation is
    /// dropped on the floor with a diagnostic.
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        self.debug_check();
        self.free_chunk(ptr);
        self.debug_check();
    }

    fn free_chunk(&mut self, ptr: *mut u8) {
        let Some(region) = self.region.as_mut() else {
            warn!("free: {ptr:p} does not belong to this heap; ignoring");
            return;
        };
        let Some(c) = region.chunk_from_payload(ptr) else {
            warn!("free: {ptr:p} does not belong to this heap; ignoring");
            return;
        };
        if region.header(c).status() != Some(ChunkStatus::InUse) {
            warn!("free: {ptr:p} is not allocated (double free?); ignoring");
            return;
        }
        if !region.is_valid(c) {
            warn!("free: {ptr:p} has a corrupt boundary tag; ignoring");
            return;
        }
        Self::release(&mut self.index, region, c);
    }

    /// Grows the region by a fresh chunk big enough for `required` units and
    /// releases it into the index, merging with a trailing free chunk if
    /// there is one. Returns the resulting (indexed) chunk.
    fn grow_heap(
        index: &mut I,
        region: &mut Region,
        provider: &mut P,
        required: u32,
    ) -> Option<ChunkRef> {
        let payload_units = required.max(MIN_GROW_UNITS);
        let total = total_units(payload_units);
        if !region.has_room(total) {
            return None;
        }
        let bytes = total as usize * CHUNK_UNIT;
        let at = provider.grow(bytes)?;
        debug!("break advanced by {bytes} bytes for a {payload_units}-unit chunk");
        let c = region.append_chunk(at, payload_units);
        Some(Self::release(index, region, c))
    }

    /// Marks `c` free, absorbs free neighbors, and indexes the result.
    fn release(index: &mut I, region: &mut Region, c: ChunkRef) -> ChunkRef {
        let is_free = |region: &Region, c: ChunkRef| {
            region.header(c).status() == Some(ChunkStatus::Free)
        };
        let below = region.prev_adjacent(c).filter(|&p| is_free(region, p));
        let above = region.next_adjacent(c).filter(|&n| is_free(region, n));

        let mut first = c;
        let mut units = region.header(c).units();
        if let Some(p) = below {
            index.remove(region, p);
            units = merged_units(region.header(p).units(), units);
            first = p;
        }
        if let Some(n) = above {
            index.remove(region, n);
            units = merged_units(units, region.header(n).units());
        }

        let header = region.header_mut(first);
        header.set_units(units);
        header.set_status(ChunkStatus::Free);
        header.clear_free_links();
        region.set_footer(first);
        index.insert(region, first);
        first
    }

    /// Splits `required` units off the top of free chunk `c`. The remainder
    /// keeps the lower addresses (and so its place in the region), goes back
    /// into the index, and the upper part is returned in-use.
    fn split_chunk(index: &mut I, region: &mut Region, c: ChunkRef, required: u32) -> ChunkRef {
        index.remove(region, c);

        let remainder = region.header(c).units() - required - 1 - FOOTER_UNITS;
        {
            let header = region.header_mut(c);
            header.set_units(remainder);
            header.set_status(ChunkStatus::Free);
        }
        region.set_footer(c);

        let upper = region.next_adjacent(c).unwrap();
        {
            let header = region.header_mut(upper);
            header.set_units(required);
            header.set_status(ChunkStatus::InUse);
            header.clear_free_links();
        }
        region.set_footer(upper);

        index.insert(region, c);
        upper
    }

    fn debug_check(&self) {
        #[cfg(debug_assertions)]
        self.check();
    }

    /// Asserts every structural invariant of the heap and its index.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn check(&self) {
        let Some(region) = &self.region else {
            return;
        };
        region.check_walk();
        self.index.check(region);
        let free_chunks = region
            .chunks()
            .filter(|&c| region.header(c).status() == Some(ChunkStatus::Free))
            .count();
        assert_eq!(
            self.index.count(region),
            free_chunks,
            "free index does not match the heap's free chunks"
        );
    }
}

/// A [`Heap`] behind a spinlock, usable as a `#[global_allocator]`.
///
/// Alignments above `CHUNK_UNIT` are not supported and fail the allocation.
pub struct LockedHeap<I, P>(Mutex<Heap<I, P>>);

impl<I, P> LockedHeap<I, P> {
    pub const fn new(heap: Heap<I, P>) -> LockedHeap<I, P> {
        LockedHeap(Mutex::new(heap))
    }

    pub fn get(&self) -> spin::MutexGuard<'_, Heap<I, P>> {
        self.0.lock()
    }
}

unsafe impl<I: FreeIndex, P: BreakProvider> GlobalAlloc for LockedHeap<I, P> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > CHUNK_UNIT {
            return core::ptr::null_mut();
        }
        match self.get().alloc(layout.size()) {
            Some(p) => p.as_ptr(),
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.get().free(ptr);
    }
}
