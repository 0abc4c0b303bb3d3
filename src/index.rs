//! Free-chunk indexes: the structures that find free chunks for allocation.
//!
//! Both variants thread their links through the chunk headers themselves, so
//! indexing a chunk costs no memory beyond the header it already has.

pub mod bins;
pub mod sorted;

use crate::chunk::ChunkRef;
use crate::region::Region;

/// Tracks every free chunk, each exactly once.
///
/// Callers keep the pairing in sync: a chunk is inserted exactly when it
/// becomes free and removed exactly when it stops being free (allocation or
/// absorption into a merge).
pub trait FreeIndex {
    /// Adds free chunk `c`. Its status must already be free and its links
    /// clear.
    fn insert(&mut self, region: &mut Region, c: ChunkRef);

    /// Unlinks `c`, which must be indexed. Its links are cleared; its status
    /// is left for the caller to update.
    fn remove(&mut self, region: &mut Region, c: ChunkRef);

    /// A free chunk with at least `units` of payload, or `None`. Does not
    /// unlink the result.
    fn find(&self, region: &Region, units: u32) -> Option<ChunkRef>;

    /// Number of indexed chunks. For validation; counts by walking.
    fn count(&self, region: &Region) -> usize;

    /// Asserts the index's own invariants (link symmetry, ordering or bucket
    /// placement, every entry free and valid).
    fn check(&self, region: &Region);
}
