//! Variant B: size-segregated free lists.
//!
//! Thirty-two buckets of coarse geometric size classes. Insertion pushes at
//! the bucket head; search scans the request's own bucket first-fit, then
//! takes the head of the first non-empty larger bucket (anything there is
//! large enough by construction, and oversized picks get split by the
//! caller anyway).

use super::FreeIndex;
use crate::chunk::{ChunkRef, ChunkStatus, CHUNK_UNIT};
use crate::region::Region;

pub const NUM_BINS: usize = 32;

/// Bucket for a request or chunk of `size` bytes.
pub fn bin_index(size: usize) -> usize {
    let units = size.div_ceil(CHUNK_UNIT);
    bin_of_units(units.min(u32::MAX as usize) as u32)
}

/// Bucket by payload units: four geometric classes up to 32 units, then
/// logarithmic classes, clamped to the last bucket.
fn bin_of_units(units: u32) -> usize {
    match units {
        0..=4 => 0,
        5..=8 => 1,
        9..=16 => 2,
        17..=32 => 3,
        _ => (4 + (units - 1).ilog2() as usize).min(NUM_BINS - 1),
    }
}

/// An array of doubly-linked free lists, one per size class.
pub struct SegregatedBins {
    bins: [Option<ChunkRef>; NUM_BINS],
}

impl Default for SegregatedBins {
    fn default() -> SegregatedBins {
        SegregatedBins::new()
    }
}

impl SegregatedBins {
    pub const fn new() -> SegregatedBins {
        SegregatedBins { bins: [None; NUM_BINS] }
    }

    fn bin_of(region: &Region, c: ChunkRef) -> usize {
        bin_of_units(region.header(c).units())
    }
}

impl FreeIndex for SegregatedBins {
    fn insert(&mut self, region: &mut Region, c: ChunkRef) {
        debug_assert_eq!(region.header(c).status(), Some(ChunkStatus::Free));
        debug_assert_eq!(region.header(c).next_free(), None);
        debug_assert_eq!(region.header(c).prev_free(), None);

        let bin = Self::bin_of(region, c);
        let head = self.bins[bin];
        {
            let header = region.header_mut(c);
            header.set_prev_free(None);
            header.set_next_free(head);
        }
        if let Some(h) = head {
            region.header_mut(h).set_prev_free(Some(c));
        }
        self.bins[bin] = Some(c);
    }

    fn remove(&mut self, region: &mut Region, c: ChunkRef) {
        let (prev, next) = {
            let header = region.header(c);
            (header.prev_free(), header.next_free())
        };

        match prev {
            None => {
                let bin = Self::bin_of(region, c);
                debug_assert_eq!(self.bins[bin], Some(c));
                self.bins[bin] = next;
            }
            Some(p) => region.header_mut(p).set_next_free(next),
        }
        if let Some(n) = next {
            region.header_mut(n).set_prev_free(prev);
        }
        region.header_mut(c).clear_free_links();
    }

    fn find(&self, region: &Region, units: u32) -> Option<ChunkRef> {
        let first = bin_of_units(units);

        // The request's own bucket mixes sizes, so it needs a first-fit scan.
        let mut cursor = self.bins[first];
        while let Some(c) = cursor {
            if region.header(c).units() >= units {
                return Some(c);
            }
            cursor = region.header(c).next_free();
        }

        // Any chunk in a larger bucket is big enough for the request.
        self.bins[first + 1..].iter().find_map(|&head| head)
    }

    fn count(&self, region: &Region) -> usize {
        let mut n = 0;
        for &head in &self.bins {
            let mut cursor = head;
            while let Some(c) = cursor {
                n += 1;
                cursor = region.header(c).next_free();
            }
        }
        n
    }

    fn check(&self, region: &Region) {
        for (bin, &head) in self.bins.iter().enumerate() {
            let mut prev = None;
            let mut cursor = head;
            while let Some(c) = cursor {
                assert!(region.is_valid(c));
                assert_eq!(
                    region.header(c).status(),
                    Some(ChunkStatus::Free),
                    "non-free chunk in bin {bin}"
                );
                assert_eq!(Self::bin_of(region, c), bin, "chunk filed in the wrong bin");
                assert_eq!(region.header(c).prev_free(), prev, "bin back-link mismatch");
                prev = Some(c);
                cursor = region.header(c).next_free();
            }
        }
    }
}
