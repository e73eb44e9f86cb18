use super::comm::Communicator;
use super::strings::StringContainer;
use super::types::OriginTag;

/// Base tag of the string exchange; the index column uses +1, the LCP
/// column +2.
pub const TAG_EXCHANGE: u16 = 0x0010;

/// Compile-once shape of the string all-to-all.
#[derive(Copy, Clone, Debug, Default)]
pub struct ExchangeConfig {
    /// Ship each string without the prefix it shares with its predecessor
    /// in the same send bucket. The receiver's container stays compressed
    /// until [`StringContainer::extend_prefix`] runs after the merge.
    pub compress_prefixes: bool,
}

/// Exchange strings by per-destination counts, which must cover the
/// container's (sorted) strings as contiguous buckets in rank order.
///
/// Three parallel arrays travel per chunk: NUL-separated bytes, packed
/// origins (tracked sets only) and LCPs. The container is rebuilt with the
/// received chunks concatenated in source-rank order, junction LCPs zeroed;
/// the per-source string counts are returned for the merge and the
/// permutation builder.
pub fn alltoall_strings<T: OriginTag, C: Communicator>(
    container: &mut StringContainer<T>,
    send_counts: &[usize],
    comm: &C,
    config: ExchangeConfig,
) -> Vec<usize> {
    assert_eq!(send_counts.len(), comm.size());
    assert_eq!(send_counts.iter().sum::<usize>(), container.len());

    let counts: Vec<u64> = send_counts.iter().map(|&c| c as u64).collect();
    let recv_counts: Vec<usize> = comm
        .alltoall_counts(&counts)
        .iter()
        .map(|&c| c as usize)
        .collect();

    // bucket heads ship whole with their LCP zeroed; concatenation at the
    // receiver destroys their prior LCP guarantee anyway.
    let mut char_buf = Vec::with_capacity(container.char_size());
    let mut char_counts = Vec::with_capacity(comm.size());
    let mut lcp_col = Vec::with_capacity(container.len());
    let mut tag_col = Vec::with_capacity(if T::TRACKED { container.len() } else { 0 });
    let mut offset = 0;
    for &count in send_counts {
        let mark = char_buf.len();
        for i in offset..offset + count {
            let lcp = if i == offset { 0 } else { container.lcps()[i] };
            let strip = if config.compress_prefixes {
                lcp as usize
            } else {
                0
            };
            char_buf.extend_from_slice(&container.str_bytes(i)[strip..]);
            char_buf.push(0);
            lcp_col.push(lcp);
            if T::TRACKED {
                tag_col.push(container.tags()[i].pack());
            }
        }
        char_counts.push(char_buf.len() - mark);
        offset += count;
    }

    let (recv_chars, recv_char_counts) = comm.alltoallv(&char_buf, &char_counts, TAG_EXCHANGE);
    let recv_tags = if T::TRACKED {
        comm.alltoallv_u64s(&tag_col, send_counts, TAG_EXCHANGE + 1).0
    } else {
        Vec::new()
    };
    let (recv_lcps, _) = comm.alltoallv_u64s(&lcp_col, send_counts, TAG_EXCHANGE + 2);
    assert_eq!(recv_lcps.len(), recv_counts.iter().sum::<usize>());

    let mut rebuilt = StringContainer::new();
    let mut pos = 0;
    let mut string = 0;
    for (src, &count) in recv_counts.iter().enumerate() {
        let chunk_end = pos + recv_char_counts[src];
        for j in 0..count {
            let nul = recv_chars[pos..chunk_end]
                .iter()
                .position(|&b| b == 0)
                .expect("malformed string stream")
                + pos;
            let lcp = if j == 0 { 0 } else { recv_lcps[string] };
            let tag = if T::TRACKED {
                T::unpack(recv_tags[string])
            } else {
                T::default()
            };
            rebuilt.push_str(&recv_chars[pos..nul], lcp, tag);
            pos = nul + 1;
            string += 1;
        }
        assert_eq!(pos, chunk_end, "string count does not match chunk size");
    }

    *container = rebuilt;
    recv_counts
}

#[cfg(test)]
mod tests {
    use super::super::comm::run_cluster;
    use super::super::types::{Origin, Untracked};
    use super::*;

    #[test]
    fn round_robin_exchange() {
        let out = run_cluster(3, |comm| {
            // rank r holds "r0" < "r1" < "r2", bucket i goes to rank i.
            let me = comm.rank();
            let strings: Vec<String> = (0..3).map(|i| format!("{}{}", me, i)).collect();
            let mut container = StringContainer::<Untracked>::from_strings(&strings);
            let recv_counts =
                alltoall_strings(&mut container, &[1, 1, 1], &comm, ExchangeConfig::default());
            assert_eq!(recv_counts, vec![1, 1, 1]);
            (0..container.len())
                .map(|i| String::from_utf8(container.str_bytes(i).to_vec()).unwrap())
                .collect::<Vec<_>>()
        });
        assert_eq!(out[0], vec!["00", "10", "20"]);
        assert_eq!(out[1], vec!["01", "11", "21"]);
        assert_eq!(out[2], vec!["02", "12", "22"]);
    }

    #[test]
    fn origins_survive_exchange() {
        let out = run_cluster(2, |comm| {
            let mut container = StringContainer::<Origin>::from_strings(&["aa", "ab"]);
            container.stamp_origins(comm.rank());
            // everyone keeps the first string, sends the second to rank 1.
            let counts = if comm.rank() == 0 { vec![1, 1] } else { vec![0, 2] };
            alltoall_strings(&mut container, &counts, &comm, ExchangeConfig::default());
            container.tags().to_vec()
        });
        assert_eq!(out[0], vec![Origin::origin(0, 0)]);
        assert_eq!(
            out[1],
            vec![
                Origin::origin(0, 1),
                Origin::origin(1, 0),
                Origin::origin(1, 1)
            ]
        );
    }

    #[test]
    fn compressed_exchange_strips_prefixes() {
        let out = run_cluster(2, |comm| {
            let mut container = if comm.rank() == 0 {
                let mut c = StringContainer::<Untracked>::from_strings(&["abc", "abd"]);
                c.lcps_mut()[1] = 2;
                c
            } else {
                StringContainer::new()
            };
            let counts = if comm.rank() == 0 { vec![0, 2] } else { vec![0, 0] };
            let config = ExchangeConfig {
                compress_prefixes: true,
            };
            alltoall_strings(&mut container, &counts, &comm, config);
            (0..container.len())
                .map(|i| (container.str_bytes(i).to_vec(), container.lcps()[i]))
                .collect::<Vec<_>>()
        });
        assert!(out[0].is_empty());
        // head shipped whole, follower stripped to its suffix past the LCP.
        assert_eq!(out[1], vec![(b"abc".to_vec(), 0), (b"d".to_vec(), 2)]);
    }
}
