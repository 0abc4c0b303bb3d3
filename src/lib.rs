//! A boundary-tag heap allocator over a program-break growth primitive.
//!
//! The heap is one contiguous region obtained from a [`brk::BreakProvider`]
//! in large increments and tiled by variable-sized chunks. Each chunk
//! carries a header and a footer (the boundary tags), so both neighbors of a
//! freed chunk can be found in constant time and merged with it. Free chunks
//! are tracked by one of two interchangeable indexes: a single
//! address-sorted list ([`index::sorted::SortedList`]) or an array of size
//! classes ([`index::bins::SegregatedBins`]). [`heap::Heap`] ties the three
//! together behind `alloc` and `free`.

#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod brk;
pub mod chunk;
pub mod heap;
pub mod index;
pub mod region;
