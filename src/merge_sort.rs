use super::comm::Communicator;
use super::exchange::{alltoall_strings, ExchangeConfig};
use super::measure::MeasuringSink;
use super::merge::merge_runs;
use super::multi_level::Subcommunicators;
use super::permutation::{NoPermutationBuilder, PermutationBuilder};
use super::radix::{LocalSorter, RadixSorter};
use super::rquick::{self, RQuickConfig};
use super::sample::{
    PartitionPolicy, RedistributionPolicy, SampleSplitterPartition, SimpleStringRedistribution,
    UniformSampling,
};
use super::strings::StringContainer;
use super::types::OriginTag;

#[derive(Clone, Debug, Default)]
pub struct MergeSortConfig {
    pub exchange: ExchangeConfig,
    pub rquick: RQuickConfig,
    /// Skip the hierarchy and let RQuick sort globally after the local
    /// sort. Not usable together with a permutation builder, which needs
    /// the hierarchy's exchanges to record provenance.
    pub rquick_global_sort: bool,
}

/// Distributed merge sort: local radix sort, then per hierarchy level
/// (sample -> partition -> all-to-all -> k-way LCP merge), innermost level
/// last. Afterwards every PE holds its final slice of the global order.
pub struct DistributedMergeSort<S, P, R> {
    pub local_sorter: S,
    pub partition: P,
    pub redistribution: R,
    pub config: MergeSortConfig,
}

/// The default policy stack.
pub type DefaultMergeSort =
    DistributedMergeSort<RadixSorter, SampleSplitterPartition<UniformSampling>, SimpleStringRedistribution>;

impl Default for DefaultMergeSort {
    fn default() -> Self {
        DistributedMergeSort {
            local_sorter: RadixSorter,
            partition: SampleSplitterPartition::default(),
            redistribution: SimpleStringRedistribution,
            config: MergeSortConfig::default(),
        }
    }
}

impl<S: LocalSorter, P: PartitionPolicy, R: RedistributionPolicy> DistributedMergeSort<S, P, R> {
    /// In-place sort; postcondition: each PE's slice is locally sorted and
    /// globally ordered relative to its neighbours.
    pub fn sort<T: OriginTag, C: Communicator>(
        &self,
        container: &mut StringContainer<T>,
        comms: &Subcommunicators<C>,
        sink: &mut dyn MeasuringSink,
    ) {
        self.sort_with_builder(container, comms, &mut NoPermutationBuilder, sink);
    }

    /// Sort while feeding every exchange to a permutation builder.
    pub fn sort_with_builder<T, C, B>(
        &self,
        container: &mut StringContainer<T>,
        comms: &Subcommunicators<C>,
        builder: &mut B,
        sink: &mut dyn MeasuringSink,
    ) where
        T: OriginTag,
        C: Communicator,
        B: PermutationBuilder<T>,
    {
        assert!(
            !(B::RECORDS && self.config.rquick_global_sort),
            "the RQuick fallback records no provenance"
        );

        sink.add("chars_in_set", container.char_size() as u64);
        sink.start("sort_locally");
        self.local_sorter.sort(container, 0, 0);
        sink.stop("sort_locally");
        builder.record_local(container);

        let comm_root = comms.comm_root();
        if comm_root.size() == 1 {
            return;
        }

        if self.config.rquick_global_sort {
            sink.start("rquick_global");
            rquick::sort_presorted(container, comm_root, &self.config.rquick);
            sink.stop("rquick_global");
            return;
        }

        // splitters stay selective without exploding comm volume when their
        // length tracks the global LCP average.
        sink.start("avg_lcp");
        let lcp_sum = comm_root.allreduce_sum(container.lcps().iter().sum());
        let count = comm_root.allreduce_sum(container.len() as u64);
        let splitter_max_length = (100 * (lcp_sum / count.max(1) + 5)) as usize;
        sink.stop("avg_lcp");

        for level in comms.levels() {
            sink.start("partial_sorting");
            sink.add("num_groups", level.num_groups() as u64);
            let interval_sizes = self.partition.compute_partition(
                container,
                level.num_groups(),
                splitter_max_length,
                &level.comm_orig,
            );
            let send_counts = self
                .redistribution
                .compute_send_counts(&interval_sizes, level);
            assert_eq!(send_counts.len(), level.comm_exchange.size());
            self.exchange_and_merge(container, &send_counts, &level.comm_exchange, builder, sink);
            sink.stop("partial_sorting");
        }

        sink.start("final_sorting");
        let comm = comms.comm_final();
        let send_counts =
            self.partition
                .compute_partition(container, comm.size(), splitter_max_length, comm);
        self.exchange_and_merge(container, &send_counts, comm, builder, sink);
        sink.stop("final_sorting");
    }

    fn exchange_and_merge<T, C, B>(
        &self,
        container: &mut StringContainer<T>,
        send_counts: &[usize],
        comm: &C,
        builder: &mut B,
        sink: &mut dyn MeasuringSink,
    ) where
        T: OriginTag,
        C: Communicator,
        B: PermutationBuilder<T>,
    {
        sink.start("exchange_and_merge");
        let compressed = self.config.exchange.compress_prefixes;

        let recv_counts = alltoall_strings(container, send_counts, comm, self.config.exchange);
        let result = merge_runs(container, &recv_counts, 0, compressed);
        if compressed {
            container.extend_prefix(&result.saved_lcps);
        }
        builder.push(result.sources, recv_counts);

        sink.add("local_num_strings", container.len() as u64);
        sink.stop("exchange_and_merge");
    }
}
