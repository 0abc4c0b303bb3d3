//! The heap region: the contiguous span of memory the allocator carves up.
//!
//! All raw address arithmetic lives here. Everything else in the crate deals
//! in [`ChunkRef`] unit offsets and goes through this module to touch memory.

use crate::chunk::{
    total_units, ChunkFooter, ChunkHeader, ChunkRef, ChunkStatus, CHUNK_UNIT, FOOTER_UNITS,
};

use core::ptr::{self, NonNull};

/// Offsets must stay below the free-link sentinel.
const MAX_REGION_UNITS: u32 = u32::MAX - 1;

/// The span `[base, base + len_units * CHUNK_UNIT)`, tiled exactly by chunks.
///
/// `base` is the break at initialization time and never moves; the region
/// only ever grows at the top, one whole chunk at a time.
pub struct Region {
    base: NonNull<u8>,
    len_units: u32,
}

// SAFETY: the region has exclusive ownership of the chunk memory it was
// grown over; the only other handles to it are the raw payload pointers the
// allocator hands out, which do not alias the headers and footers accessed
// through `&self`/`&mut self`.
unsafe impl Send for Region {}

impl Region {
    /// Creates an empty region starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be the current break of the provider that will back this
    /// region, aligned to `CHUNK_UNIT`. All memory later passed to
    /// [`Region::append_chunk`] must start exactly at the region's current
    /// end and remain valid for the life of the region.
    pub unsafe fn from_base(base: NonNull<u8>) -> Region {
        assert_eq!(base.as_ptr() as usize % CHUNK_UNIT, 0);
        Region { base, len_units: 0 }
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len_units(&self) -> u32 {
        self.len_units
    }

    pub fn is_empty(&self) -> bool {
        self.len_units == 0
    }

    /// Whether the region can take on `extra` more units without its offsets
    /// overflowing.
    pub fn has_room(&self, extra: u32) -> bool {
        match self.len_units.checked_add(extra) {
            Some(n) => n <= MAX_REGION_UNITS,
            None => false,
        }
    }

    fn unit_ptr(&self, offset_units: u32) -> *mut u8 {
        debug_assert!(offset_units <= self.len_units);
        // SAFETY: in-bounds offset into the region's span.
        unsafe { self.base.as_ptr().add(offset_units as usize * CHUNK_UNIT) }
    }

    pub fn header(&self, c: ChunkRef) -> &ChunkHeader {
        debug_assert!(c.offset_units() < self.len_units);
        // SAFETY: every field of `ChunkHeader` is a plain integer, so the
        // view is well-formed whatever the bytes hold; `&self` guarantees no
        // concurrent header writes.
        unsafe { &*(self.unit_ptr(c.offset_units()) as *const ChunkHeader) }
    }

    pub fn header_mut(&mut self, c: ChunkRef) -> &mut ChunkHeader {
        debug_assert!(c.offset_units() < self.len_units);
        // SAFETY: as in `header`; `&mut self` guarantees uniqueness.
        unsafe { &mut *(self.unit_ptr(c.offset_units()) as *mut ChunkHeader) }
    }

    /// Rewrites `c`'s footer from its header. Must be called after any change
    /// to the chunk's `units` so the back-reference stays at the chunk's end.
    pub fn set_footer(&mut self, c: ChunkRef) {
        let footer_offset = c.offset_units() + 1 + self.header(c).units();
        debug_assert!(footer_offset + FOOTER_UNITS <= self.len_units);
        let footer = self.unit_ptr(footer_offset) as *mut ChunkFooter;
        // SAFETY: in bounds per the assertion above; footers are only ever
        // accessed through `&self`/`&mut self`.
        unsafe { ptr::write(footer, ChunkFooter::new(c.offset_units())) };
    }

    unsafe fn footer_at(&self, offset_units: u32) -> &ChunkFooter {
        &*(self.unit_ptr(offset_units) as *const ChunkFooter)
    }

    /// Whole-chunk size of `c` in units.
    pub fn chunk_total_units(&self, c: ChunkRef) -> u32 {
        total_units(self.header(c).units())
    }

    /// The chunk starting right after `c`, or `None` if `c` is the last one.
    pub fn next_adjacent(&self, c: ChunkRef) -> Option<ChunkRef> {
        let next = c.offset_units() + self.chunk_total_units(c);
        if next >= self.len_units {
            return None;
        }
        Some(ChunkRef::new(next))
    }

    /// The chunk ending right before `c`, found through its footer, or `None`
    /// if `c` is the first one.
    pub fn prev_adjacent(&self, c: ChunkRef) -> Option<ChunkRef> {
        if c.offset_units() == 0 {
            return None;
        }
        // SAFETY: a non-first chunk always has its predecessor's footer in
        // the unit(s) right below its header.
        let footer = unsafe { self.footer_at(c.offset_units() - FOOTER_UNITS) };
        let prev = footer.header_offset();
        debug_assert!(prev < c.offset_units());
        Some(ChunkRef::new(prev))
    }

    /// The first payload byte of `c`.
    pub fn payload(&self, c: ChunkRef) -> NonNull<u8> {
        debug_assert!(c.offset_units() + 1 < self.len_units);
        // SAFETY: the payload starts one unit past the in-bounds header.
        unsafe { NonNull::new_unchecked(self.unit_ptr(c.offset_units() + 1)) }
    }

    /// Maps a payload pointer back to its chunk. `None` for pointers that are
    /// misaligned or outside the region; the result still needs validation
    /// before it is trusted as a live chunk.
    pub fn chunk_from_payload(&self, ptr: *mut u8) -> Option<ChunkRef> {
        let addr = ptr as usize;
        if addr % CHUNK_UNIT != 0 {
            return None;
        }
        let base = self.base.as_ptr() as usize;
        let end = base + self.len_units as usize * CHUNK_UNIT;
        if addr <= base || addr >= end {
            return None;
        }
        Some(ChunkRef::new(((addr - base) / CHUNK_UNIT - 1) as u32))
    }

    /// Structural sanity of `c`: in bounds, positive size that fits the
    /// region, a recognizable status and a footer that points back at the
    /// header.
    pub fn is_valid(&self, c: ChunkRef) -> bool {
        let offset = c.offset_units();
        if offset >= self.len_units {
            return false;
        }
        let header = self.header(c);
        if header.units() == 0 || header.status().is_none() {
            return false;
        }
        let remaining = self.len_units - offset;
        if total_units(header.units()) > remaining {
            return false;
        }
        let footer_offset = offset + 1 + header.units();
        // SAFETY: `footer_offset + FOOTER_UNITS <= len_units` per the size
        // check above.
        let footer = unsafe { self.footer_at(footer_offset) };
        footer.header_offset() == offset
    }

    /// Appends a fresh free chunk with `payload_units` of payload at the new
    /// break `at`, which must continue the region exactly where it ends.
    pub fn append_chunk(&mut self, at: NonNull<u8>, payload_units: u32) -> ChunkRef {
        // Double-check the provider honored its contiguity contract.
        assert_eq!(at.as_ptr(), self.unit_ptr(self.len_units));
        let total = total_units(payload_units);
        assert!(self.has_room(total));

        let c = ChunkRef::new(self.len_units);
        self.len_units += total;
        // SAFETY: the chunk span is in bounds now that the length covers it.
        unsafe {
            ptr::write(
                self.unit_ptr(c.offset_units()) as *mut ChunkHeader,
                ChunkHeader::new_free(payload_units),
            );
        }
        self.set_footer(c);
        c
    }

    /// Iterates all chunks in address order by following boundary tags.
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            region: self,
            next: (!self.is_empty()).then_some(ChunkRef::new(0)),
        }
    }

    /// Asserts the region-wide invariants: every chunk valid, chunks tile the
    /// region exactly, and no two free chunks touch.
    pub(crate) fn check_walk(&self) {
        let mut offset = 0;
        let mut prev_free = false;
        while offset < self.len_units {
            let c = ChunkRef::new(offset);
            assert!(self.is_valid(c), "corrupt chunk at unit offset {offset}");
            let free = self.header(c).status() == Some(ChunkStatus::Free);
            assert!(!(free && prev_free), "uncoalesced free chunks at unit offset {offset}");
            prev_free = free;
            offset += self.chunk_total_units(c);
        }
        assert_eq!(offset, self.len_units, "chunks do not tile the region");
    }
}

pub struct Chunks<'a> {
    region: &'a Region,
    next: Option<ChunkRef>,
}

impl Iterator for Chunks<'_> {
    type Item = ChunkRef;

    fn next(&mut self) -> Option<ChunkRef> {
        let c = self.next?;
        self.next = self.region.next_adjacent(c);
        Some(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brk::{BreakProvider, ReservedBreak};
    use crate::chunk::ChunkStatus;

    use pretty_assertions::assert_eq;
    use std::ptr;
    use std::vec::Vec;

    fn grown_region(payload_units: &[u32]) -> (Region, Vec<ChunkRef>, ReservedBreak) {
        let mut brk = ReservedBreak::with_capacity(1 << 20);
        let base = brk.grow(0).unwrap();
        let mut region = unsafe { Region::from_base(base) };
        let chunks = payload_units
            .iter()
            .map(|&units| {
                let bytes = total_units(units) as usize * CHUNK_UNIT;
                let at = brk.grow(bytes).unwrap();
                region.append_chunk(at, units)
            })
            .collect();
        (region, chunks, brk)
    }

    #[test]
    fn append_creates_valid_free_chunks() {
        let (region, chunks, _brk) = grown_region(&[4, 1, 100]);

        assert_eq!(region.len_units(), (4 + 2) + (1 + 2) + (100 + 2));
        for (&c, &units) in chunks.iter().zip(&[4u32, 1, 100]) {
            assert!(region.is_valid(c));
            assert_eq!(region.header(c).units(), units);
            assert_eq!(region.header(c).status(), Some(ChunkStatus::Free));
        }
        region.check_walk();
    }

    #[test]
    fn adjacency_goes_both_ways() {
        let (region, chunks, _brk) = grown_region(&[4, 1, 100]);

        assert_eq!(region.next_adjacent(chunks[0]), Some(chunks[1]));
        assert_eq!(region.next_adjacent(chunks[1]), Some(chunks[2]));
        assert_eq!(region.next_adjacent(chunks[2]), None);

        assert_eq!(region.prev_adjacent(chunks[0]), None);
        assert_eq!(region.prev_adjacent(chunks[1]), Some(chunks[0]));
        assert_eq!(region.prev_adjacent(chunks[2]), Some(chunks[1]));
    }

    #[test]
    fn payload_round_trips() {
        let (region, chunks, _brk) = grown_region(&[4, 1]);

        for &c in &chunks {
            let p = region.payload(c);
            assert_eq!(p.as_ptr() as usize % CHUNK_UNIT, 0);
            assert_eq!(region.chunk_from_payload(p.as_ptr()), Some(c));
        }
    }

    #[test]
    fn foreign_pointers_do_not_map() {
        let (region, _chunks, _brk) = grown_region(&[4]);
        let base = region.base().as_ptr();

        // The base itself is a header, not a payload.
        assert_eq!(region.chunk_from_payload(base), None);
        // Misaligned.
        assert_eq!(region.chunk_from_payload(unsafe { base.add(17) }), None);
        // Outside the region.
        let end = unsafe { base.add(region.len_units() as usize * CHUNK_UNIT) };
        assert_eq!(region.chunk_from_payload(end), None);
        assert_eq!(region.chunk_from_payload(ptr::null_mut()), None);
    }

    #[test]
    fn footer_rewrite_follows_resize() {
        let (mut region, chunks, _brk) = grown_region(&[10]);
        let c = chunks[0];

        region.header_mut(c).set_units(7);
        assert!(!region.is_valid(c), "stale footer should fail validation");
        region.set_footer(c);
        assert!(region.is_valid(c));
    }

    #[test]
    fn walk_iterates_in_address_order() {
        let (region, chunks, _brk) = grown_region(&[4, 1, 100, 9]);
        let walked: Vec<_> = region.chunks().collect();
        assert_eq!(walked, chunks);
    }
}
