use super::comm::Communicator;
use super::merge::lower_bound;
use super::multi_level::Level;
use super::rquick::{self, RQuickConfig};
use super::strings::StringContainer;
use super::types::OriginTag;

/// Base tag of the splitter allgather; the origin column uses +1.
const TAG_SPLITTERS: u16 = 0x0070;

/// Draws local splitter candidates for a k-way partition.
pub trait SamplePolicy {
    fn sample_splitters<T: OriginTag, C: Communicator>(
        &self,
        container: &StringContainer<T>,
        parts: usize,
        max_length: usize,
        comm: &C,
    ) -> StringContainer<T>;
}

/// Evenly spaced candidates from the sorted local run, lightly oversampled
/// and clipped to the maximum splitter length.
#[derive(Copy, Clone, Debug)]
pub struct UniformSampling {
    pub oversampling: usize,
}

impl Default for UniformSampling {
    fn default() -> Self {
        UniformSampling { oversampling: 2 }
    }
}

impl SamplePolicy for UniformSampling {
    fn sample_splitters<T: OriginTag, C: Communicator>(
        &self,
        container: &StringContainer<T>,
        parts: usize,
        max_length: usize,
        _comm: &C,
    ) -> StringContainer<T> {
        let mut sample = StringContainer::new();
        if parts < 2 {
            return sample;
        }
        let count = Ord::min(container.len(), self.oversampling.max(1) * (parts - 1));
        for j in 0..count {
            let at = (j + 1) * container.len() / (count + 1);
            let s = container.str_bytes(at);
            let clip = Ord::min(s.len(), max_length);
            sample.push_str(&s[..clip], 0, container.tags()[at]);
        }
        sample
    }
}

/// Computes, for each target group of a partition step, how many of the
/// local strings belong to it.
pub trait PartitionPolicy {
    fn compute_partition<T: OriginTag, C: Communicator>(
        &self,
        container: &StringContainer<T>,
        parts: usize,
        max_length: usize,
        comm: &C,
    ) -> Vec<usize>;

    /// Variant with a caller-supplied sample, for quantile computation.
    fn compute_partition_with_sample<T: OriginTag, C: Communicator>(
        &self,
        container: &StringContainer<T>,
        sample: StringContainer<T>,
        parts: usize,
        comm: &C,
    ) -> Vec<usize>;
}

/// Sample-based partitioning: the local candidates are sorted globally with
/// RQuick, the `parts - 1` strings at even global ranks become splitters on
/// every PE, and the sorted local run is cut by binary search. Ties fall by
/// the (bytes, origin) order, keeping the partition total-order-respecting
/// on indexed sets.
#[derive(Clone, Debug, Default)]
pub struct SampleSplitterPartition<S: SamplePolicy> {
    pub sampler: S,
    pub rquick: RQuickConfig,
}

impl<S: SamplePolicy> PartitionPolicy for SampleSplitterPartition<S> {
    fn compute_partition<T: OriginTag, C: Communicator>(
        &self,
        container: &StringContainer<T>,
        parts: usize,
        max_length: usize,
        comm: &C,
    ) -> Vec<usize> {
        if parts < 2 {
            return vec![container.len(); parts.max(1)];
        }
        let sample = self
            .sampler
            .sample_splitters(container, parts, max_length, comm);
        self.compute_partition_with_sample(container, sample, parts, comm)
    }

    fn compute_partition_with_sample<T: OriginTag, C: Communicator>(
        &self,
        container: &StringContainer<T>,
        mut sample: StringContainer<T>,
        parts: usize,
        comm: &C,
    ) -> Vec<usize> {
        if parts < 2 {
            return vec![container.len(); parts.max(1)];
        }

        rquick::sort(&mut sample, comm, &self.rquick);

        let local = sample.len() as u64;
        let offset = comm.exscan_sum(local);
        let total = comm.allreduce_sum(local);
        if total == 0 {
            // nothing to split anywhere.
            let mut sizes = vec![0; parts];
            sizes[parts - 1] = container.len();
            return sizes;
        }

        // ship the splitters this PE owns to everyone; concatenation by
        // owner rank keeps them globally sorted.
        let mut chars = Vec::new();
        let mut origins = Vec::new();
        for j in 1..parts as u64 {
            let pos = j * total / parts as u64;
            if pos >= offset && pos < offset + local {
                let i = (pos - offset) as usize;
                chars.extend_from_slice(sample.str_bytes(i));
                chars.push(0);
                origins.push(sample.tags()[i].pack());
            }
        }
        let (split_chars, _) = comm.alltoallv(
            &repeat_to_all(&chars, comm.size()),
            &vec![chars.len(); comm.size()],
            TAG_SPLITTERS,
        );
        let (split_origins, _) = comm.alltoallv_u64s(
            &repeat_u64s_to_all(&origins, comm.size()),
            &vec![origins.len(); comm.size()],
            TAG_SPLITTERS + 1,
        );

        let mut splitters = StringContainer::<T>::new();
        let mut pos = 0;
        while pos < split_chars.len() {
            let nul = split_chars[pos..]
                .iter()
                .position(|&b| b == 0)
                .expect("malformed splitter stream")
                + pos;
            let tag = if T::TRACKED {
                T::unpack(split_origins[splitters.len()])
            } else {
                T::default()
            };
            splitters.push_str(&split_chars[pos..nul], 0, tag);
            pos = nul + 1;
        }
        assert_eq!(splitters.len(), parts - 1, "splitter count mismatch");

        let mut sizes = Vec::with_capacity(parts);
        let mut prev = 0;
        for j in 0..parts - 1 {
            let bound = lower_bound(container, splitters.str_bytes(j), splitters.tags()[j]);
            debug_assert!(bound >= prev);
            sizes.push(bound - prev);
            prev = bound;
        }
        sizes.push(container.len() - prev);
        sizes
    }
}

fn repeat_to_all(payload: &[u8], size: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() * size);
    for _ in 0..size {
        buf.extend_from_slice(payload);
    }
    buf
}

fn repeat_u64s_to_all(payload: &[u64], size: usize) -> Vec<u64> {
    let mut buf = Vec::with_capacity(payload.len() * size);
    for _ in 0..size {
        buf.extend_from_slice(payload);
    }
    buf
}

/// Turns per-group interval sizes into per-PE send counts over a level's
/// exchange communicator.
pub trait RedistributionPolicy {
    fn compute_send_counts<C: Communicator>(
        &self,
        interval_sizes: &[usize],
        level: &Level<C>,
    ) -> Vec<usize>;
}

/// Every group interval goes wholesale to the group member at the sender's
/// own in-group position. No balancing, no splitting.
#[derive(Copy, Clone, Debug, Default)]
pub struct NaiveRedistribution;

impl RedistributionPolicy for NaiveRedistribution {
    fn compute_send_counts<C: Communicator>(
        &self,
        interval_sizes: &[usize],
        level: &Level<C>,
    ) -> Vec<usize> {
        assert_eq!(interval_sizes.len(), level.num_groups());
        let group_size = level.group_size;
        let position = level.comm_orig.rank() % group_size;

        let mut counts = vec![0; level.comm_exchange.size()];
        for (group, &size) in interval_sizes.iter().enumerate() {
            counts[group * group_size + position] = size;
        }
        counts
    }
}

/// Group intervals split evenly by string count across their group's PEs.
#[derive(Copy, Clone, Debug, Default)]
pub struct SimpleStringRedistribution;

impl RedistributionPolicy for SimpleStringRedistribution {
    fn compute_send_counts<C: Communicator>(
        &self,
        interval_sizes: &[usize],
        level: &Level<C>,
    ) -> Vec<usize> {
        assert_eq!(interval_sizes.len(), level.num_groups());
        let group_size = level.group_size;

        let mut counts = Vec::with_capacity(level.comm_exchange.size());
        for &size in interval_sizes {
            for p in 0..group_size {
                counts.push(size / group_size + (p < size % group_size) as usize);
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::super::comm::run_cluster;
    use super::super::multi_level::Subcommunicators;
    use super::super::radix::{LocalSorter, RadixSorter};
    use super::super::types::Untracked;
    use super::*;

    #[test]
    fn partition_respects_global_order() {
        // every PE holds the same spread of strings; partitioning into
        // comm.size() parts must place each string's bucket consistently.
        let out = run_cluster(4, |comm| {
            let strings: Vec<String> = (0..26u8)
                .map(|c| String::from_utf8(vec![b'a' + c; 3]).unwrap())
                .collect();
            let mut container = StringContainer::<Untracked>::from_strings(&strings);
            RadixSorter.sort(&mut container, 0, 0);

            let policy = SampleSplitterPartition {
                sampler: UniformSampling::default(),
                rquick: RQuickConfig::default(),
            };
            policy.compute_partition(&container, comm.size(), 100, &comm)
        });
        for sizes in &out {
            assert_eq!(sizes.iter().sum::<usize>(), 26);
            assert_eq!(sizes.len(), 4);
        }
        // identical local sets see identical splitters, so identical cuts.
        assert!(out.iter().all(|sizes| sizes == &out[0]));
        // the sample is drawn uniformly, so no bucket may swallow the set.
        assert!(out[0].iter().all(|&s| s < 26));
    }

    #[test]
    fn empty_input_partitions_to_zeroes() {
        let out = run_cluster(2, |comm| {
            let container = StringContainer::<Untracked>::new();
            let policy = SampleSplitterPartition {
                sampler: UniformSampling::default(),
                rquick: RQuickConfig::default(),
            };
            policy.compute_partition(&container, 2, 100, &comm)
        });
        assert!(out.iter().all(|sizes| sizes == &vec![0, 0]));
    }

    #[test]
    fn redistribution_policies_cover_all_strings() {
        let out = run_cluster(4, |comm| {
            let comms = Subcommunicators::new(comm, &[2]);
            let level = &comms.levels()[0];
            let intervals = vec![5, 3];
            (
                NaiveRedistribution.compute_send_counts(&intervals, level),
                SimpleStringRedistribution.compute_send_counts(&intervals, level),
                level.comm_orig.rank(),
            )
        });
        for (naive, simple, rank) in out {
            assert_eq!(naive.iter().sum::<usize>(), 8);
            assert_eq!(simple.iter().sum::<usize>(), 8);
            assert_eq!(simple, vec![3, 2, 2, 1]);
            let position = rank % 2;
            assert_eq!(naive[position], 5);
            assert_eq!(naive[2 + position], 3);
        }
    }
}
