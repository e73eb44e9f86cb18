use rand::rngs::StdRng;
use rand::Rng;

use super::super::comm::Communicator;
use super::super::strings::{cmp_tagged, common_prefix, StringContainer};
use super::super::types::OriginTag;
use super::data::TemporaryBuffers;

/// Buffered 64-bit PRNG output handed out one bit at a time, for the
/// unbiased center choice in median selection.
pub struct RandomBitStore {
    bits: u64,
    remaining: u32,
}

impl RandomBitStore {
    pub fn new() -> Self {
        RandomBitStore {
            bits: 0,
            remaining: 0,
        }
    }

    pub fn next_bit(&mut self, rng: &mut StdRng) -> bool {
        if self.remaining == 0 {
            self.bits = rng.gen();
            self.remaining = 64;
        }
        let bit = self.bits & 1;
        self.bits >>= 1;
        self.remaining -= 1;
        bit == 1
    }
}

impl Default for RandomBitStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Binary-tree median selection.
///
/// PE `r` with `t` trailing zero bits receives candidate runs from
/// `r + 2^i` for `i < t`, each time merging and keeping the middle `n`
/// strings, then passes its survivors to `r - 2^t`; the root does
/// `ceil(log2 P)` rounds and broadcasts the final median. Odd-sized
/// overlaps choose between the two central windows by a random bit, so no
/// side is systematically favoured. Partners past the group size simply do
/// not exist and are skipped, which makes non-power-of-two groups work.
///
/// `candidates` must be sorted and hold at most `n` strings. Returns the
/// median's bytes and origin; an empty global set yields the empty string.
pub fn select<T: OriginTag, C: Communicator>(
    candidates: &StringContainer<T>,
    buffers: &mut TemporaryBuffers<T>,
    n: usize,
    rng: &mut StdRng,
    bits: &mut RandomBitStore,
    tag: u16,
    comm: &C,
) -> (Vec<u8>, T) {
    assert!(candidates.len() <= n);
    debug_assert!(candidates.check_order());

    let rank = comm.rank();
    let iterations = if rank > 0 {
        rank.trailing_zeros() as usize
    } else {
        log2_ceil(comm.size())
    };

    let mut survivors = candidates.clone();
    for i in 0..iterations {
        let source = rank + (1 << i);
        if source >= comm.size() {
            continue;
        }
        buffers.recv_data.recv(source, tag, comm);
        buffers.recv_data.read_into(&mut buffers.recv_strings);

        merge_sorted(&survivors, &buffers.recv_strings, &mut buffers.merge_strings);
        let merged = buffers.merge_strings.len();
        let (offset, keep) = if merged <= n {
            (0, merged)
        } else {
            let surplus = merged - n;
            let shift = if surplus % 2 == 1 && bits.next_bit(rng) {
                1
            } else {
                0
            };
            (surplus / 2 + shift, n)
        };

        survivors.clear();
        for j in offset..offset + keep {
            let lcp = if j == offset {
                0
            } else {
                buffers.merge_strings.lcps()[j]
            };
            survivors.push_str(
                buffers.merge_strings.str_bytes(j),
                lcp,
                buffers.merge_strings.tags()[j],
            );
        }
    }

    if rank == 0 {
        buffers.median_strings.clear();
        if survivors.is_empty() {
            buffers.median_strings.push_str(b"", 0, T::default());
        } else {
            let len = survivors.len();
            let at = if len % 2 == 0 {
                len / 2 - bits.next_bit(rng) as usize
            } else {
                len / 2
            };
            buffers
                .median_strings
                .push_str(survivors.str_bytes(at), 0, survivors.tags()[at]);
        }
        buffers.recv_data.write(&buffers.median_strings);
    } else {
        let target = rank - (1 << rank.trailing_zeros());
        buffers.send_data.write(&survivors);
        buffers.send_data.send(target, tag, comm);
    }
    buffers.recv_data.bcast_single(0, comm);
    buffers.recv_data.read_into(&mut buffers.median_strings);

    (
        buffers.median_strings.str_bytes(0).to_vec(),
        buffers.median_strings.tags()[0],
    )
}

/// Two-pointer merge of sorted containers into `dest`, recomputing the LCP
/// column on the way out.
fn merge_sorted<T: OriginTag>(
    a: &StringContainer<T>,
    b: &StringContainer<T>,
    dest: &mut StringContainer<T>,
) {
    debug_assert!(a.check_order() && b.check_order());
    dest.clear();

    let (mut i, mut j) = (0, 0);
    let mut push = |s: &[u8], t: T, dest: &mut StringContainer<T>| {
        let lcp = if dest.is_empty() {
            0
        } else {
            common_prefix(dest.str_bytes(dest.len() - 1), s)
        };
        dest.push_str(s, lcp, t);
    };
    while i < a.len() && j < b.len() {
        if cmp_tagged(a.str_bytes(i), a.tags()[i], b.str_bytes(j), b.tags()[j])
            != std::cmp::Ordering::Greater
        {
            push(a.str_bytes(i), a.tags()[i], dest);
            i += 1;
        } else {
            push(b.str_bytes(j), b.tags()[j], dest);
            j += 1;
        }
    }
    while i < a.len() {
        push(a.str_bytes(i), a.tags()[i], dest);
        i += 1;
    }
    while j < b.len() {
        push(b.str_bytes(j), b.tags()[j], dest);
        j += 1;
    }
}

fn log2_ceil(x: usize) -> usize {
    x.next_power_of_two().trailing_zeros() as usize
}
