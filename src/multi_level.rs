use super::comm::Communicator;

/// One level of the hierarchy: the communicator whose strings it
/// partitions, the communicator its all-to-all runs on, and the size of
/// the groups the PEs fall into afterwards.
pub struct Level<C> {
    pub comm_orig: C,
    pub comm_exchange: C,
    pub group_size: usize,
}

impl<C: Communicator> Level<C> {
    #[inline(always)]
    pub fn num_groups(&self) -> usize {
        self.comm_orig.size() / self.group_size
    }
}

/// Descending hierarchy of sub-communicators, coarsest first: each level's
/// exchange scatters the strings of one group onto its sub-groups, and the
/// final communicator (the innermost group) runs the last one-PE-per-group
/// exchange.
pub struct Subcommunicators<C> {
    levels: Vec<Level<C>>,
    comm_final: C,
    comm_root: C,
}

impl<C: Communicator> Subcommunicators<C> {
    /// Build the hierarchy from the group sizes after each level, coarsest
    /// first. Every size must strictly divide the size before it.
    pub fn new(comm_root: C, group_sizes: &[usize]) -> Self {
        let mut levels = Vec::with_capacity(group_sizes.len());
        let mut comm = comm_root.clone();
        for &group_size in group_sizes {
            assert!(group_size > 0 && group_size < comm.size());
            assert_eq!(comm.size() % group_size, 0, "group sizes must divide");

            let group = comm.rank() / group_size;
            let next = comm.range(group * group_size, group_size);
            levels.push(Level {
                comm_orig: comm.clone(),
                comm_exchange: comm,
                group_size,
            });
            comm = next;
        }
        Subcommunicators {
            levels,
            comm_final: comm,
            comm_root,
        }
    }

    /// A hierarchy with no intermediate levels: one exchange over the whole
    /// communicator.
    pub fn single_level(comm_root: C) -> Self {
        Self::new(comm_root, &[])
    }

    #[inline(always)]
    pub fn comm_root(&self) -> &C {
        &self.comm_root
    }

    #[inline(always)]
    pub fn comm_final(&self) -> &C {
        &self.comm_final
    }

    #[inline(always)]
    pub fn levels(&self) -> &[Level<C>] {
        &self.levels
    }

    /// Number of exchanges a sort performs: the levels plus the final one.
    #[inline(always)]
    pub fn depth(&self) -> usize {
        self.levels.len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::super::comm::run_cluster;
    use super::*;

    #[test]
    fn two_level_hierarchy() {
        let out = run_cluster(8, |comm| {
            let comms = Subcommunicators::new(comm, &[4, 2]);
            let shape: Vec<(usize, usize, usize)> = comms
                .levels()
                .iter()
                .map(|l| (l.comm_orig.size(), l.num_groups(), l.group_size))
                .collect();
            (shape, comms.comm_final().size(), comms.depth())
        });
        for (rank, (shape, final_size, depth)) in out.into_iter().enumerate() {
            assert_eq!(shape, vec![(8, 2, 4), (4, 2, 2)], "rank {}", rank);
            assert_eq!(final_size, 2);
            assert_eq!(depth, 3);
        }
    }

    #[test]
    fn final_comm_groups_neighbours() {
        let out = run_cluster(4, |comm| {
            let me = comm.rank();
            let comms = Subcommunicators::new(comm, &[2]);
            // ranks {0,1} and {2,3} end up in the same final group.
            let data = if comms.comm_final().rank() == 0 {
                vec![me as u8]
            } else {
                Vec::new()
            };
            comms.comm_final().bcast(0, data)
        });
        assert_eq!(out, vec![vec![0], vec![0], vec![2], vec![2]]);
    }
}
