//! Variant A: a single free list kept in ascending address order.
//!
//! The ordering is what makes coalescing cheap to reason about: a chunk's
//! coalescing candidates are always its immediate list neighbors. The cost
//! is the O(n) walk on insert and first-fit search.

use super::FreeIndex;
use crate::chunk::{ChunkRef, ChunkStatus};
use crate::region::Region;

/// An address-ordered doubly-linked list of free chunks.
#[derive(Default)]
pub struct SortedList {
    head: Option<ChunkRef>,
}

impl SortedList {
    pub const fn new() -> SortedList {
        SortedList { head: None }
    }
}

impl FreeIndex for SortedList {
    fn insert(&mut self, region: &mut Region, c: ChunkRef) {
        debug_assert_eq!(region.header(c).status(), Some(ChunkStatus::Free));
        debug_assert_eq!(region.header(c).next_free(), None);
        debug_assert_eq!(region.header(c).prev_free(), None);

        // Find the neighbors-to-be: `before` is the last chunk below `c`,
        // `after` the first above it.
        let mut before = None;
        let mut after = self.head;
        while let Some(x) = after {
            debug_assert_ne!(x, c, "chunk inserted twice");
            if x > c {
                break;
            }
            before = Some(x);
            after = region.header(x).next_free();
        }

        match before {
            None => self.head = Some(c),
            Some(b) => region.header_mut(b).set_next_free(Some(c)),
        }
        {
            let header = region.header_mut(c);
            header.set_prev_free(before);
            header.set_next_free(after);
        }
        if let Some(a) = after {
            region.header_mut(a).set_prev_free(Some(c));
        }
    }

    fn remove(&mut self, region: &mut Region, c: ChunkRef) {
        let (prev, next) = {
            let header = region.header(c);
            (header.prev_free(), header.next_free())
        };

        match prev {
            None => {
                debug_assert_eq!(self.head, Some(c));
                self.head = next;
            }
            Some(p) => region.header_mut(p).set_next_free(next),
        }
        if let Some(n) = next {
            region.header_mut(n).set_prev_free(prev);
        }
        region.header_mut(c).clear_free_links();
    }

    fn find(&self, region: &Region, units: u32) -> Option<ChunkRef> {
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if region.header(c).units() >= units {
                return Some(c);
            }
            cursor = region.header(c).next_free();
        }
        None
    }

    fn count(&self, region: &Region) -> usize {
        let mut n = 0;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            n += 1;
            cursor = region.header(c).next_free();
        }
        n
    }

    fn check(&self, region: &Region) {
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            assert!(region.is_valid(c));
            assert_eq!(
                region.header(c).status(),
                Some(ChunkStatus::Free),
                "non-free chunk in the free list"
            );
            assert!(prev < Some(c), "free list out of address order");
            assert_eq!(region.header(c).prev_free(), prev, "free list back-link mismatch");
            prev = Some(c);
            cursor = region.header(c).next_free();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brk::{BreakProvider, ReservedBreak};
    use crate::chunk::{total_units, CHUNK_UNIT};

    use itertools::Itertools;
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

    fn collect(list: &SortedList, region: &Region) -> Vec<ChunkRef> {
        let mut out = Vec::new();
        let mut cursor = list.head;
        while let Some(c) = cursor {
            out.push(c);
            cursor = region.header(c).next_free();
        }
        out
    }

    #[test]
    fn insert_keeps_address_order() {
        let (mut region, chunks, _brk) = grown_region(&[4, 4, 4, 4]);
        let mut list = SortedList::new();

        // Insert out of address order.
        for &i in &[2usize, 0, 3, 1] {
            list.insert(&mut region, chunks[i]);
            list.check(&region);
        }

        let collected = collect(&list, &region);
        assert_eq!(collected, chunks);
        assert!(collected.iter().tuple_windows().all(|(a, b)| a < b));
    }

    #[test]
    fn remove_head_middle_tail() {
        let (mut region, chunks, _brk) = grown_region(&[4, 4, 4]);
        let mut list = SortedList::new();
        for &c in &chunks {
            list.insert(&mut region, c);
        }

        list.remove(&mut region, chunks[1]);
        list.check(&region);
        assert_eq!(collect(&list, &region), [chunks[0], chunks[2]]);

        list.remove(&mut region, chunks[0]);
        list.check(&region);
        assert_eq!(collect(&list, &region), [chunks[2]]);

        list.remove(&mut region, chunks[2]);
        list.check(&region);
        assert_eq!(list.head, None);
        assert_eq!(list.count(&region), 0);
    }

    #[test]
    fn find_is_first_fit_in_address_order() {
        let (mut region, chunks, _brk) = grown_region(&[2, 8, 4, 16]);
        let mut list = SortedList::new();
        for &c in &chunks {
            list.insert(&mut region, c);
        }

        // The lowest-address chunk that fits wins, not the best fit.
        assert_eq!(list.find(&region, 1), Some(chunks[0]));
        assert_eq!(list.find(&region, 3), Some(chunks[1]));
        assert_eq!(list.find(&region, 4), Some(chunks[1]));
        assert_eq!(list.find(&region, 9), Some(chunks[3]));
        assert_eq!(list.find(&region, 17), None);
    }
}
