//! Distributed LCP-aware string sorting.
//!
//! Sorts byte strings spread over the PEs of a cluster into a globally
//! ordered distributed sequence. The pieces: an LCP-aware k-way loser tree
//! that skips character work the LCPs already paid for, a multi-level
//! distributed merge sort over a sub-communicator hierarchy, a robust
//! distributed quicksort (RQuick) built on binary-tree median selection,
//! and permutation machinery so the space-efficient variant can sort
//! indices instead of shipping every byte.
//!
//! All cross-PE traffic goes through the [`comm::Communicator`] trait; the
//! bundled [`comm::LocalComm`] runs a whole cluster as threads of one
//! process, which is how the tests and the demo binary drive everything.

#[cfg(test)]
#[macro_use]
extern crate quickcheck_macros;

pub mod comm;
pub mod exchange;
pub mod measure;
pub mod merge;
pub mod merge_sort;
pub mod multi_level;
pub mod permutation;
pub mod radix;
pub mod rquick;
pub mod sample;
pub mod space_efficient;
pub mod strings;
pub mod types;

pub use crate::merge_sort::{DefaultMergeSort, DistributedMergeSort, MergeSortConfig};
pub use crate::multi_level::Subcommunicators;
pub use crate::space_efficient::SpaceEfficientSort;
pub use crate::strings::{StringContainer, StringView};
pub use crate::types::{Lcp, Origin, OriginTag, Untracked};
