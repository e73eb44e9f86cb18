use super::comm::Communicator;
use super::measure::MeasuringSink;
use super::merge_sort::DistributedMergeSort;
use super::multi_level::Subcommunicators;
use super::radix::LocalSorter;
use super::sample::{PartitionPolicy, RedistributionPolicy, SamplePolicy};
use super::strings::StringContainer;
use super::types::Origin;

/// The distributed permutation a space-efficient sort produces: for each
/// final local position the origin of the string that belongs there, laid
/// out as one fragment per quantile. Quantile q's global slice is the
/// concatenation of fragment q over all PE ranks.
pub struct DistributedPermutation {
    pub origins: Vec<Origin>,
    pub fragment_sizes: Vec<usize>,
}

impl DistributedPermutation {
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn fragment(&self, q: usize) -> &[Origin] {
        let offset: usize = self.fragment_sizes[..q].iter().sum();
        &self.origins[offset..offset + self.fragment_sizes[q]]
    }
}

/// Sorts when the raw string data must not be replicated wholesale during
/// the all-to-all: the locally sorted run is cut into character-volume
/// bounded quantiles, each quantile is materialized with (PE, index) origin
/// tags and merge-sorted across the cluster, and only the origin
/// permutation is kept. At no point is more than one quantile's worth of
/// strings in flight.
pub struct SpaceEfficientSort<SP, S, P, R> {
    pub sampler: SP,
    pub sorter: DistributedMergeSort<S, P, R>,
    pub quantile_size: usize,
}

impl<SP, S, P, R> SpaceEfficientSort<SP, S, P, R>
where
    SP: SamplePolicy,
    S: LocalSorter,
    P: PartitionPolicy,
    R: RedistributionPolicy,
{
    pub fn new(sampler: SP, sorter: DistributedMergeSort<S, P, R>, quantile_size: usize) -> Self {
        SpaceEfficientSort {
            sampler,
            sorter,
            quantile_size: quantile_size.max(1),
        }
    }

    /// Sort and return the distributed permutation. Tags are overwritten
    /// with each string's (rank, position) identity before sorting; the
    /// string bytes themselves stay put.
    pub fn sort<C: Communicator>(
        &self,
        container: &mut StringContainer<Origin>,
        comms: &Subcommunicators<C>,
        sink: &mut dyn MeasuringSink,
    ) -> DistributedPermutation {
        let comm_root = comms.comm_root();
        container.stamp_origins(comm_root.rank());

        sink.add("chars_in_set", container.char_size() as u64);
        sink.start("sort_locally");
        self.sorter.local_sorter.sort(container, 0, 0);
        sink.stop("sort_locally");

        if comm_root.size() == 1 {
            return DistributedPermutation {
                origins: container.tags().to_vec(),
                fragment_sizes: vec![container.len()],
            };
        }

        sink.start("compute_quantiles");
        let (sizes, offsets) = self.compute_quantiles(container, comm_root);
        sink.stop("compute_quantiles");

        let mut origins = Vec::with_capacity(container.len());
        let mut fragment_sizes = Vec::with_capacity(sizes.len());
        for q in 0..sizes.len() {
            sink.add("quantile_strings", sizes[q] as u64);

            // materialize the quantile: its strings, LCPs and origins, with
            // the junction LCP zeroed.
            let mut quantile = StringContainer::<Origin>::new();
            for i in offsets[q]..offsets[q] + sizes[q] {
                let lcp = if i == offsets[q] {
                    0
                } else {
                    container.lcps()[i]
                };
                quantile.push_str(container.str_bytes(i), lcp, container.tags()[i]);
            }

            self.sorter.sort(&mut quantile, comms, sink);
            fragment_sizes.push(quantile.len());
            origins.extend_from_slice(quantile.tags());
        }

        DistributedPermutation {
            origins,
            fragment_sizes,
        }
    }

    /// Cut the local sorted run into globally aligned quantiles. The count
    /// comes from the maximum local character volume, so every PE executes
    /// the same number of collective rounds.
    fn compute_quantiles<C: Communicator>(
        &self,
        container: &StringContainer<Origin>,
        comm: &C,
    ) -> (Vec<usize>, Vec<usize>) {
        let volume = (container.char_size() - container.len()) as u64;
        let max_volume = comm.allreduce_max(volume);
        let num_quantiles = ((max_volume + self.quantile_size as u64 - 1)
            / self.quantile_size as u64)
            .max(1) as usize;

        let sizes = if num_quantiles == 1 {
            vec![container.len()]
        } else {
            let sample =
                self.sampler
                    .sample_splitters(container, num_quantiles, usize::MAX, comm);
            self.sorter
                .partition
                .compute_partition_with_sample(container, sample, num_quantiles, comm)
        };

        let mut offsets = Vec::with_capacity(sizes.len());
        let mut sum = 0;
        for &size in &sizes {
            offsets.push(sum);
            sum += size;
        }
        (sizes, offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::super::comm::run_cluster;
    use super::super::measure::NoSink;
    use super::super::merge_sort::DefaultMergeSort;
    use super::super::multi_level::Subcommunicators;
    use super::super::sample::UniformSampling;
    use super::super::types::OriginTag;
    use super::*;

    fn space_efficient(quantile_size: usize) -> SpaceEfficientSort<
        UniformSampling,
        super::super::radix::RadixSorter,
        super::super::sample::SampleSplitterPartition<UniformSampling>,
        super::super::sample::SimpleStringRedistribution,
    > {
        SpaceEfficientSort::new(
            UniformSampling::default(),
            DefaultMergeSort::default(),
            quantile_size,
        )
    }

    fn gather_sorted(per_pe: Vec<Vec<String>>, quantile_size: usize) -> Vec<String> {
        let pes = per_pe.len();
        let inputs = per_pe.clone();
        let out = run_cluster(pes, move |comm| {
            let mut container =
                StringContainer::<Origin>::from_strings(&per_pe[comm.rank()]);
            let comms = Subcommunicators::single_level(comm);
            let permutation =
                space_efficient(quantile_size).sort(&mut container, &comms, &mut NoSink);
            permutation
                .fragment_sizes
                .iter()
                .scan(0, |offset, &size| {
                    let fragment = permutation.origins[*offset..*offset + size].to_vec();
                    *offset += size;
                    Some(fragment)
                })
                .collect::<Vec<Vec<Origin>>>()
        });

        // quantile q's global slice is fragment q over all ranks; applying
        // the permutation to the inputs must reproduce the sorted order.
        let quantiles = out[0].len();
        assert!(out.iter().all(|f| f.len() == quantiles));
        let mut result = Vec::new();
        for q in 0..quantiles {
            for fragments in &out {
                for origin in &fragments[q] {
                    result.push(inputs[origin.pe()][origin.index() as usize].clone());
                }
            }
        }
        result
    }

    #[test]
    fn single_quantile_matches_sequential_sort() {
        let per_pe = vec![
            vec!["pear".to_string(), "fig".to_string(), "lime".to_string()],
            vec!["date".to_string(), "kiwi".to_string()],
        ];
        let mut expected: Vec<String> = per_pe.iter().flatten().cloned().collect();
        expected.sort();
        assert_eq!(gather_sorted(per_pe, 1 << 20), expected);
    }

    #[test]
    fn many_quantiles_match_sequential_sort() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(77);
        let per_pe: Vec<Vec<String>> = (0..3)
            .map(|_| {
                (0..120)
                    .map(|_| {
                        let len = rng.gen_range(1..=8);
                        (0..len).map(|_| rng.gen_range('a'..='e')).collect()
                    })
                    .collect()
            })
            .collect();
        let mut expected: Vec<String> = per_pe.iter().flatten().cloned().collect();
        expected.sort();

        // a tight quantile budget forces several rounds.
        let got = gather_sorted(per_pe, 64);
        assert_eq!(got, expected);
    }

    #[test]
    fn permutation_covers_every_input_once() {
        let per_pe = vec![
            vec!["b".to_string(), "a".to_string(), "a".to_string()],
            vec!["a".to_string(), "c".to_string()],
        ];
        let out = run_cluster(2, move |comm| {
            let mut container =
                StringContainer::<Origin>::from_strings(&per_pe[comm.rank()]);
            let comms = Subcommunicators::single_level(comm);
            let permutation = space_efficient(4).sort(&mut container, &comms, &mut NoSink);
            permutation.origins
        });
        let mut all: Vec<(usize, u64)> = out
            .into_iter()
            .flatten()
            .map(|o| (o.pe(), o.index()))
            .collect();
        all.sort_unstable();
        assert_eq!(all, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1)]);
    }
}
