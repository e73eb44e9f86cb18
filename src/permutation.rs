use super::comm::Communicator;
use super::multi_level::Subcommunicators;
use super::strings::StringContainer;
use super::types::{Origin, OriginTag};

/// Base tag of the backward index traffic.
const TAG_PERMUTE: u16 = 0x0080;

/// A permutation maps every original (PE, local index) input position to
/// its global sorted rank; `apply` writes the global rank of each original
/// local string into the caller's slice. Applying with a global offset of 0
/// fills the slices with a bijection onto 0..N.

/// Flat (rank, index) pairs, one per final local string.
pub struct SimplePermutation {
    ranks: Vec<usize>,
    strings: Vec<u64>,
}

impl SimplePermutation {
    pub fn new(ranks: Vec<usize>, strings: Vec<u64>) -> Self {
        assert_eq!(ranks.len(), strings.len());
        SimplePermutation { ranks, strings }
    }

    /// Read the origin tags of a sorted container.
    pub fn from_container(container: &StringContainer<Origin>) -> Self {
        SimplePermutation {
            ranks: container.tags().iter().map(|t| t.pe()).collect(),
            strings: container.tags().iter().map(|t| t.index()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    pub fn strings(&self) -> &[u64] {
        &self.strings
    }

    /// Ship (local index, global rank) pairs home in one shot and scatter
    /// them into `out`, which is indexed by original local index.
    pub fn apply<C: Communicator>(
        &self,
        out: &mut [u64],
        global_index_offset: u64,
        comms: &Subcommunicators<C>,
    ) {
        let comm = comms.comm_root();
        let mut counts = vec![0usize; comm.size()];
        for &rank in &self.ranks {
            counts[rank] += 1;
        }
        let mut offsets = exclusive_scan(&counts);

        let local_offset = comm.exscan_sum(self.len() as u64);
        let base = global_index_offset + local_offset;

        let mut send = vec![0u64; 2 * self.len()];
        for i in 0..self.len() {
            let slot = offsets[self.ranks[i]];
            offsets[self.ranks[i]] += 1;
            send[2 * slot] = self.strings[i];
            send[2 * slot + 1] = base + i as u64;
        }
        let pair_counts: Vec<usize> = counts.iter().map(|&c| 2 * c).collect();
        let (recv, _) = comm.alltoallv_u64s(&send, &pair_counts, TAG_PERMUTE);

        for pair in recv.chunks_exact(2) {
            out[pair[0] as usize] = pair[1];
        }
    }
}

/// Where each merged string of one exchange came from: per-string source
/// ranks in merged order, plus the per-source receive counts.
pub struct RemotePermutation {
    pub ranks: Vec<u32>,
    pub counts: Vec<usize>,
}

/// The space-efficient representation: the local sort permutation plus one
/// [`RemotePermutation`] per exchange. Applying walks the exchanges
/// backward, so nothing but the per-level provenance is ever shipped
/// forward.
pub struct MultiLevelPermutation {
    local: Vec<u64>,
    remotes: Vec<RemotePermutation>,
}

impl MultiLevelPermutation {
    pub fn new(local: Vec<u64>, remotes: Vec<RemotePermutation>) -> Self {
        MultiLevelPermutation { local, remotes }
    }

    pub fn depth(&self) -> usize {
        self.remotes.len()
    }

    pub fn local(&self) -> &[u64] {
        &self.local
    }

    pub fn remote(&self, level: usize) -> &RemotePermutation {
        &self.remotes[level]
    }

    pub fn apply<C: Communicator>(
        &self,
        out: &mut [u64],
        global_index_offset: u64,
        comms: &Subcommunicators<C>,
    ) {
        if comms.comm_root().size() == 1 {
            for (i, &original) in self.local.iter().enumerate() {
                out[original as usize] = global_index_offset + i as u64;
            }
            return;
        }
        let comm_root = comms.comm_root();
        self.apply_inner(out, comms, move |ranks, offsets, send| {
            let local_offset = comm_root.exscan_sum(ranks.len() as u64);
            let base = global_index_offset + local_offset;
            for (i, &rank) in ranks.iter().enumerate() {
                let slot = offsets[rank as usize];
                offsets[rank as usize] += 1;
                send[slot] = base + i as u64;
            }
        });
    }

    /// Walk levels innermost to outermost, each round returning every
    /// string's global index to the PE it arrived from, exactly mirroring
    /// the forward exchanges. `compute` seeds the innermost round.
    fn apply_inner<C, F>(&self, out: &mut [u64], comms: &Subcommunicators<C>, compute: F)
    where
        C: Communicator,
        F: FnOnce(&[u32], &mut [usize], &mut [u64]),
    {
        assert_eq!(
            self.remotes.len(),
            comms.depth(),
            "permutation depth does not match the hierarchy"
        );

        let mut compute = Some(compute);
        let mut recv: Vec<u64> = Vec::new();
        for (level, remote) in self.remotes.iter().enumerate().rev() {
            let innermost = level == self.remotes.len() - 1;
            let mut offsets = exclusive_scan(&remote.counts);
            let mut send = vec![0u64; remote.ranks.len()];

            if let Some(compute) = compute.take() {
                compute(&remote.ranks, &mut offsets, &mut send);
            } else {
                assert_eq!(recv.len(), remote.ranks.len(), "level size mismatch");
                for (i, &rank) in remote.ranks.iter().enumerate() {
                    let slot = offsets[rank as usize];
                    offsets[rank as usize] += 1;
                    send[slot] = recv[i];
                }
            }

            let comm = if innermost {
                comms.comm_final()
            } else {
                &comms.levels()[level].comm_exchange
            };
            let (r, _) = comm.alltoallv_u64s(&send, &remote.counts, TAG_PERMUTE);
            recv = r;
        }

        assert_eq!(recv.len(), self.local.len());
        for (i, &global_index) in recv.iter().enumerate() {
            out[self.local[i] as usize] = global_index;
        }
    }
}

/// [`MultiLevelPermutation`] plus a byte offset per final position; the
/// global rank of position j is the global offset plus the exclusive prefix
/// sum of the offsets, letting equal strings take adjacent distinct ranks
/// without shipping full (PE, index) tuples.
pub struct NonUniquePermutation {
    inner: MultiLevelPermutation,
    index_offsets: Vec<u8>,
}

impl NonUniquePermutation {
    pub fn new(inner: MultiLevelPermutation, index_offsets: Vec<u8>) -> Self {
        if let Some(last) = inner.remotes.last() {
            assert_eq!(last.ranks.len(), index_offsets.len());
        }
        NonUniquePermutation {
            inner,
            index_offsets,
        }
    }

    pub fn index_offsets(&self) -> &[u8] {
        &self.index_offsets
    }

    pub fn apply<C: Communicator>(
        &self,
        out: &mut [u64],
        global_index_offset: u64,
        comms: &Subcommunicators<C>,
    ) {
        if comms.comm_root().size() == 1 {
            let mut current = global_index_offset;
            for (i, &original) in self.inner.local.iter().enumerate() {
                out[original as usize] = current;
                current += self.index_offsets[i] as u64;
            }
            return;
        }
        let comm_root = comms.comm_root();
        let index_offsets = &self.index_offsets;
        self.inner.apply_inner(out, comms, move |ranks, offsets, send| {
            let local_sum: u64 = index_offsets.iter().map(|&o| o as u64).sum();
            let local_offset = comm_root.exscan_sum(local_sum);
            let mut current = global_index_offset + local_offset;
            for (i, &rank) in ranks.iter().enumerate() {
                let slot = offsets[rank as usize];
                offsets[rank as usize] += 1;
                send[slot] = current;
                current += index_offsets[i] as u64;
            }
        });
    }
}

/// Observes a sort and accumulates a permutation: the local sort order once
/// up front, then one provenance record per exchange.
pub trait PermutationBuilder<T: OriginTag> {
    /// Whether this builder records anything; drivers refuse configurations
    /// that cannot feed a recording builder.
    const RECORDS: bool;

    fn record_local(&mut self, container: &StringContainer<T>);
    fn push(&mut self, sources: Vec<u32>, recv_counts: Vec<usize>);
}

/// Records nothing.
pub struct NoPermutationBuilder;

impl<T: OriginTag> PermutationBuilder<T> for NoPermutationBuilder {
    const RECORDS: bool = false;

    fn record_local(&mut self, _container: &StringContainer<T>) {}
    fn push(&mut self, _sources: Vec<u32>, _recv_counts: Vec<usize>) {}
}

/// Accumulates a [`MultiLevelPermutation`].
#[derive(Default)]
pub struct MultiLevelBuilder {
    local: Vec<u64>,
    remotes: Vec<RemotePermutation>,
}

impl MultiLevelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> MultiLevelPermutation {
        MultiLevelPermutation::new(self.local, self.remotes)
    }
}

impl PermutationBuilder<Origin> for MultiLevelBuilder {
    const RECORDS: bool = true;

    fn record_local(&mut self, container: &StringContainer<Origin>) {
        self.local = container.tags().iter().map(|t| t.index()).collect();
    }

    fn push(&mut self, sources: Vec<u32>, recv_counts: Vec<usize>) {
        self.remotes.push(RemotePermutation {
            ranks: sources,
            counts: recv_counts,
        });
    }
}

/// Accumulates a [`NonUniquePermutation`] with unit strides.
#[derive(Default)]
pub struct NonUniqueBuilder {
    inner: MultiLevelBuilder,
}

impl NonUniqueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> NonUniquePermutation {
        let stride = self
            .inner
            .remotes
            .last()
            .map(|r| r.ranks.len())
            .unwrap_or_else(|| self.inner.local.len());
        let inner = self.inner.finish();
        NonUniquePermutation::new(inner, vec![1; stride])
    }
}

impl PermutationBuilder<Origin> for NonUniqueBuilder {
    const RECORDS: bool = true;

    fn record_local(&mut self, container: &StringContainer<Origin>) {
        self.inner.record_local(container);
    }

    fn push(&mut self, sources: Vec<u32>, recv_counts: Vec<usize>) {
        self.inner.push(sources, recv_counts);
    }
}

fn exclusive_scan(counts: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(counts.len());
    let mut sum = 0;
    for &count in counts {
        offsets.push(sum);
        sum += count;
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::super::comm::run_cluster;
    use super::super::measure::NoSink;
    use super::super::merge_sort::DefaultMergeSort;
    use super::*;

    #[test]
    fn simple_permutation_returns_global_ranks() {
        let per_pe = vec![vec!["pear", "fig"], vec!["date", "kiwi"]];
        let out = run_cluster(2, move |comm| {
            let mut container =
                StringContainer::<Origin>::from_strings(&per_pe[comm.rank()]);
            container.stamp_origins(comm.rank());
            let comms = Subcommunicators::single_level(comm);
            DefaultMergeSort::default().sort(&mut container, &comms, &mut NoSink);

            let mut out = vec![u64::MAX; 2];
            SimplePermutation::from_container(&container).apply(&mut out, 0, &comms);
            out
        });
        // inputs: PE0 = pear, fig; PE1 = date, kiwi.
        // sorted: date, fig, kiwi, pear.
        assert_eq!(out[0], vec![3, 1]);
        assert_eq!(out[1], vec![0, 2]);
    }

    #[test]
    fn simple_permutation_respects_global_offset() {
        let out = run_cluster(2, |comm| {
            let mut container = StringContainer::<Origin>::from_strings(&["x"]);
            container.stamp_origins(comm.rank());
            let comms = Subcommunicators::single_level(comm);
            DefaultMergeSort::default().sort(&mut container, &comms, &mut NoSink);

            let mut out = vec![u64::MAX; 1];
            SimplePermutation::from_container(&container).apply(&mut out, 10, &comms);
            out
        });
        let mut all: Vec<u64> = out.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, vec![10, 11]);
    }
}
