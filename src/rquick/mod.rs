//! Robust distributed quicksort.
//!
//! Sorts strings across a communicator without pre-computed splitters:
//! binary-tree median selection picks a pivot within provable bounds of the
//! true global median with high probability, every PE partitions its sorted
//! run by it, an all-to-all ships the halves apart, and the group recurses
//! into halves of itself until it is alone. The recursion is an iterative
//! loop over shrinking sub-communicators, so stack depth stays bounded.

mod data;
mod median;

pub use data::{Data, TemporaryBuffers};
pub use median::{select as select_median, RandomBitStore};

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::comm::Communicator;
use super::exchange::{alltoall_strings, ExchangeConfig};
use super::merge::{lower_bound, merge_runs};
use super::radix::{LocalSorter, RadixSorter};
use super::strings::{common_prefix, StringContainer};
use super::types::OriginTag;

/// Base tag of the median-selection traffic; columns use +1 and +2.
pub const TAG_MEDIAN: u16 = 0x0060;

#[derive(Copy, Clone, Debug)]
pub struct RQuickConfig {
    /// Ship LCP columns alongside point-to-point string traffic.
    pub lcp_aware: bool,
    /// Per-PE candidate budget of the median selection.
    pub median_candidates: usize,
    /// Run id mixed with the rank into each PE's PRNG seed, so replays are
    /// reproducible.
    pub seed: u64,
}

impl Default for RQuickConfig {
    fn default() -> Self {
        RQuickConfig {
            lcp_aware: true,
            median_candidates: 128,
            seed: 0,
        }
    }
}

/// Sort the distributed string set; afterwards every PE holds a locally
/// sorted run and the concatenation over ranks is globally ordered under
/// the (bytes, origin) order.
pub fn sort<T: OriginTag, C: Communicator>(
    container: &mut StringContainer<T>,
    comm: &C,
    config: &RQuickConfig,
) {
    RadixSorter.sort(container, 0, 0);
    sort_presorted(container, comm, config);
}

/// Sort when the local run is already sorted with a valid LCP column.
pub fn sort_presorted<T: OriginTag, C: Communicator>(
    container: &mut StringContainer<T>,
    comm: &C,
    config: &RQuickConfig,
) {
    debug_assert!(container.check_order());

    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(comm.rank() as u64));
    let mut bits = RandomBitStore::new();
    let mut buffers = TemporaryBuffers::new(config.lcp_aware);
    let budget = config.median_candidates.max(1);

    let mut comm = comm.clone();
    while comm.size() > 1 {
        let candidates = sample_candidates(container, budget);
        let (median, median_tag) = median::select(
            &candidates,
            &mut buffers,
            budget,
            &mut rng,
            &mut bits,
            TAG_MEDIAN,
            &comm,
        );

        // strings below the median go to the lower half of the group,
        // the rest to the upper half, spread evenly within each half.
        let split = lower_bound(container, &median, median_tag);
        let size = comm.size();
        let lower = size / 2;
        let mut send_counts = Vec::with_capacity(size);
        spread(split, lower, &mut send_counts);
        spread(container.len() - split, size - lower, &mut send_counts);

        let recv_counts =
            alltoall_strings(container, &send_counts, &comm, ExchangeConfig::default());
        merge_runs(container, &recv_counts, 0, false);

        comm = if comm.rank() < lower {
            comm.range(0, lower)
        } else {
            comm.range(lower, size - lower)
        };
    }
}

/// Up to `budget` evenly spaced strings of the sorted local run, with a
/// fresh LCP column.
fn sample_candidates<T: OriginTag>(
    container: &StringContainer<T>,
    budget: usize,
) -> StringContainer<T> {
    let mut sample = StringContainer::new();
    let count = Ord::min(container.len(), budget);
    for j in 0..count {
        let at = j * container.len() / count;
        let lcp = if sample.is_empty() {
            0
        } else {
            common_prefix(sample.str_bytes(sample.len() - 1), container.str_bytes(at))
        };
        sample.push_str(container.str_bytes(at), lcp, container.tags()[at]);
    }
    sample
}

fn spread(count: usize, parts: usize, out: &mut Vec<usize>) {
    for p in 0..parts {
        out.push(count / parts + (p < count % parts) as usize);
    }
}
