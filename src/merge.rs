use std::cmp::Ordering;

use super::strings::{cmp_tagged, common_prefix, StringContainer, StringView};
use super::types::{Lcp, OriginTag};

/// Cursor over one sorted run inside a container.
struct Stream<'a, T: OriginTag> {
    views: &'a [StringView],
    lcps: &'a [Lcp],
    tags: &'a [T],
    pos: usize,
}

impl<'a, T: OriginTag> Stream<'a, T> {
    fn unused() -> Self {
        Stream {
            views: &[],
            lcps: &[],
            tags: &[],
            pos: 0,
        }
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.pos >= self.views.len()
    }

    #[inline(always)]
    fn head(&self) -> StringView {
        self.views[self.pos]
    }

    /// LCP of the head against its predecessor in this run.
    #[inline(always)]
    fn head_lcp(&self) -> Lcp {
        self.lcps[self.pos]
    }

    #[inline(always)]
    fn head_tag(&self) -> T {
        self.tags[self.pos]
    }
}

#[derive(Copy, Clone, Default)]
struct Node {
    idx: usize,
    lcp: Lcp,
}

/// LCP-aware k-way tournament tree over sorted runs.
///
/// Internal nodes hold the loser of their last match together with
/// lcp(winner, loser); a rising contender is ordered against a defender by
/// LCP alone whenever the two values differ, so character work happens only
/// when the stored LCPs tie. Runs play up the tree starting from
/// `known_common_lcp`, the caller's lower bound on the whole input.
///
/// In compressed mode each string is stored without its leading
/// `head_lcp` bytes and character offsets shift accordingly.
pub struct LoserTree<'a, T: OriginTag> {
    bytes: &'a [u8],
    streams: Vec<Stream<'a, T>>,
    ids: Vec<u32>,
    nodes: Vec<Node>,
    k: usize,
    compressed: bool,
}

impl<'a, T: OriginTag> LoserTree<'a, T> {
    /// `runs` are (offset, size, id) triples of non-empty sorted runs in
    /// `container`; there must be at least two. The id of each emitted
    /// string's source run is reported back by [`LoserTree::merge`].
    pub fn new(
        container: &'a StringContainer<T>,
        runs: &[(usize, usize, u32)],
        known_common_lcp: Lcp,
        compressed: bool,
    ) -> Self {
        assert!(runs.len() >= 2);
        let k = runs.len().next_power_of_two();

        let mut streams = Vec::with_capacity(k + 1);
        let mut ids = Vec::with_capacity(k + 1);
        streams.push(Stream::unused());
        ids.push(u32::MAX);
        for &(offset, size, id) in runs {
            assert!(size > 0);
            streams.push(Stream {
                views: &container.views()[offset..offset + size],
                lcps: &container.lcps()[offset..offset + size],
                tags: &container.tags()[offset..offset + size],
                pos: 0,
            });
            ids.push(id);
        }
        while streams.len() < k + 1 {
            streams.push(Stream::unused());
            ids.push(u32::MAX);
        }

        let mut tree = LoserTree {
            bytes: container.bytes(),
            streams,
            ids,
            nodes: vec![Node::default(); k + 1],
            k,
            compressed,
        };
        tree.init(known_common_lcp);
        tree
    }

    fn init(&mut self, known_common_lcp: Lcp) {
        for stream in 1..=self.k {
            let mut contender = Node {
                idx: stream,
                lcp: known_common_lcp,
            };
            let mut node = self.k + stream;
            while node % 2 == 0 && node > 2 {
                node >>= 1;
                Self::play(
                    self.bytes,
                    &self.streams,
                    &mut contender,
                    &mut self.nodes[node],
                    self.compressed,
                );
            }
            self.nodes[(node + 1) / 2] = contender;
        }
    }

    /// Emit all strings in sorted order. Returns the reordered columns, the
    /// source run id of every output string and, in compressed mode, each
    /// output string's head LCP within its source run (needed to restore
    /// the stripped prefixes).
    pub fn merge(mut self) -> (Vec<StringView>, Vec<Lcp>, Vec<T>, Vec<u32>, Vec<Lcp>) {
        let total: usize = self.streams.iter().map(|s| s.views.len()).sum();
        let mut out_views = Vec::with_capacity(total);
        let mut out_lcps = Vec::with_capacity(total);
        let mut out_tags = Vec::with_capacity(total);
        let mut sources = Vec::with_capacity(total);
        let mut saved_lcps = Vec::with_capacity(if self.compressed { total } else { 0 });

        for _ in 0..total {
            let winner = self.nodes[1].idx;
            let stream = &mut self.streams[winner];
            debug_assert!(!stream.is_empty());

            out_views.push(stream.head());
            out_lcps.push(self.nodes[1].lcp);
            out_tags.push(stream.head_tag());
            sources.push(self.ids[winner]);
            if self.compressed {
                saved_lcps.push(stream.head_lcp());
            }
            stream.pos += 1;

            // the next head's LCP against the string just emitted is its
            // head LCP within its own run.
            let mut contender = self.nodes[1];
            if !self.streams[winner].is_empty() {
                contender.lcp = self.streams[winner].head_lcp();
            }

            let mut node = winner + self.k;
            while node > 2 {
                node = (node + 1) / 2;
                Self::play(
                    self.bytes,
                    &self.streams,
                    &mut contender,
                    &mut self.nodes[node],
                    self.compressed,
                );
            }
            self.nodes[1] = contender;
        }

        (out_views, out_lcps, out_tags, sources, saved_lcps)
    }

    /// Play one match: `contender` rises from below against the `defender`
    /// stored in a node. Afterwards the node holds the loser (the larger
    /// head) with lcp(winner, loser), and the contender carries the winner
    /// upward. An exhausted stream counts as +infinity.
    fn play(
        bytes: &[u8],
        streams: &[Stream<'a, T>],
        contender: &mut Node,
        defender: &mut Node,
        compressed: bool,
    ) {
        let defender_stream = &streams[defender.idx];
        if defender_stream.is_empty() {
            return;
        }
        let contender_stream = &streams[contender.idx];
        if contender_stream.is_empty() {
            std::mem::swap(defender, contender);
            return;
        }

        if defender.lcp > contender.lcp {
            // the defender agrees longer with the common ancestor, so it is
            // strictly smaller; no character work.
            std::mem::swap(defender, contender);
        } else if defender.lcp == contender.lcp {
            // compare characters starting at the agreed offset.
            let mut lcp = defender.lcp;
            loop {
                let d = Self::char_at(bytes, defender_stream, lcp, compressed);
                let c = Self::char_at(bytes, contender_stream, lcp, compressed);
                if d != 0 && d == c {
                    lcp += 1;
                    continue;
                }
                if d < c {
                    std::mem::swap(defender, contender);
                } else if d == c {
                    // both exhausted: equal strings, order by origin.
                    if T::TRACKED
                        && streams[defender.idx].head_tag().pack()
                            < streams[contender.idx].head_tag().pack()
                    {
                        std::mem::swap(defender, contender);
                    }
                }
                defender.lcp = lcp;
                break;
            }
        }
        // else: the contender agrees longer, keeps winning, and climbs with
        // its LCP unchanged.

        debug_assert!(Self::check_match(bytes, streams, contender, defender, compressed));
    }

    /// Absolute character position `pos` of a stream's head. In compressed
    /// mode the stored bytes begin at the head's own LCP.
    #[inline(always)]
    fn char_at(bytes: &[u8], stream: &Stream<'a, T>, pos: Lcp, compressed: bool) -> u8 {
        let view = stream.head();
        let offset = if compressed {
            debug_assert!(pos >= stream.head_lcp());
            (pos - stream.head_lcp()) as usize
        } else {
            pos as usize
        };
        debug_assert!(offset <= view.len);
        bytes[view.start + offset]
    }

    /// Post-match invariant: winner <= loser and the stored LCP is their
    /// true LCP. In compressed mode only the suffixes past both head LCPs
    /// are addressable, so the check compares from that offset; a stored LCP
    /// below it leaves nothing to verify.
    fn check_match(
        bytes: &[u8],
        streams: &[Stream<'a, T>],
        winner: &Node,
        loser: &Node,
        compressed: bool,
    ) -> bool {
        let ws = &streams[winner.idx];
        let ls = &streams[loser.idx];
        if ws.is_empty() || ls.is_empty() {
            return true;
        }
        if !compressed {
            let w = ws.head().bytes(bytes);
            let l = ls.head().bytes(bytes);
            return cmp_tagged(w, ws.head_tag(), l, ls.head_tag()) != Ordering::Greater
                && common_prefix(w, l) == loser.lcp;
        }

        let base = Ord::max(ws.head_lcp(), ls.head_lcp());
        if loser.lcp < base {
            return true;
        }
        // suffixes from `base` must agree for exactly loser.lcp - base bytes
        // and then order winner before loser.
        let w = ws.head().bytes(bytes);
        let l = ls.head().bytes(bytes);
        let w_tail = &w[(base - ws.head_lcp()) as usize..];
        let l_tail = &l[(base - ls.head_lcp()) as usize..];
        common_prefix(w_tail, l_tail) == loser.lcp - base && w_tail <= l_tail
    }
}

/// Outcome of [`merge_runs`]: the run id of every output string, plus the
/// prefix-restoration LCPs in compressed mode.
pub struct MergeResult {
    pub sources: Vec<u32>,
    pub saved_lcps: Vec<Lcp>,
}

/// Merge the concatenated runs described by `run_sizes` back into one sorted
/// run, in place. Junction LCPs must already be zeroed. Run ids are indices
/// into `run_sizes`. In compressed mode, `saved_lcps` is fed to
/// [`StringContainer::extend_prefix`] afterwards; otherwise it is empty.
pub fn merge_runs<T: OriginTag>(
    container: &mut StringContainer<T>,
    run_sizes: &[usize],
    known_common_lcp: Lcp,
    compressed: bool,
) -> MergeResult {
    assert_eq!(run_sizes.iter().sum::<usize>(), container.len());

    let mut runs = Vec::with_capacity(run_sizes.len());
    let mut offset = 0;
    for (id, &size) in run_sizes.iter().enumerate() {
        if size > 0 {
            runs.push((offset, size, id as u32));
        }
        offset += size;
    }

    if runs.len() < 2 {
        // a single run is already sorted; its head LCPs are its LCP column.
        let sources = match runs.first() {
            Some(&(_, size, id)) => vec![id; size],
            None => Vec::new(),
        };
        let saved_lcps = if compressed {
            container.lcps().to_vec()
        } else {
            Vec::new()
        };
        return MergeResult {
            sources,
            saved_lcps,
        };
    }

    let (views, lcps, tags, sources, saved_lcps) = {
        let tree = LoserTree::new(&*container, &runs, known_common_lcp, compressed);
        tree.merge()
    };
    container.set_columns(views, lcps, tags);
    MergeResult {
        sources,
        saved_lcps,
    }
}

/// Comparator-based binary search over a sorted container: first position
/// whose string is not less than `needle` under the (bytes, origin) order.
pub fn lower_bound<T: OriginTag>(container: &StringContainer<T>, needle: &[u8], tag: T) -> usize {
    let mut lo = 0;
    let mut hi = container.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp_tagged(container.str_bytes(mid), container.tags()[mid], needle, tag)
            == Ordering::Less
        {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// First position whose string is greater than `needle`.
pub fn upper_bound<T: OriginTag>(container: &StringContainer<T>, needle: &[u8], tag: T) -> usize {
    let mut lo = 0;
    let mut hi = container.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp_tagged(container.str_bytes(mid), container.tags()[mid], needle, tag)
            == Ordering::Greater
        {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::super::radix::{LocalSorter, RadixSorter};
    use super::super::types::{Origin, Untracked};
    use super::*;

    /// Concatenate pre-sorted runs into one container with junction LCPs
    /// zeroed, the way the exchange step hands runs to the merger.
    fn concat_runs(runs: &[Vec<&str>]) -> (StringContainer<Untracked>, Vec<usize>) {
        let mut container = StringContainer::new();
        let mut sizes = Vec::new();
        for run in runs {
            let mut sorted = StringContainer::<Untracked>::from_strings(run);
            RadixSorter.sort(&mut sorted, 0, 0);
            for i in 0..sorted.len() {
                let lcp = if i == 0 { 0 } else { sorted.lcps()[i] };
                container.push_str(sorted.str_bytes(i), lcp, Untracked);
            }
            sizes.push(run.len());
        }
        (container, sizes)
    }

    #[test]
    fn merges_three_runs() {
        let (mut container, sizes) = concat_runs(&[
            vec!["apple", "banana"],
            vec!["apricot", "cherry"],
            vec!["bee", "berry", "blueberry"],
        ]);
        let result = merge_runs(&mut container, &sizes, 0, false);
        assert!(result.saved_lcps.is_empty());
        assert_eq!(result.sources, vec![0, 1, 0, 2, 2, 2, 1]);
        let got: Vec<&[u8]> = (0..container.len()).map(|i| container.str_bytes(i)).collect();
        let expected: Vec<&[u8]> = vec![
            b"apple", b"apricot", b"banana", b"bee", b"berry", b"blueberry", b"cherry",
        ];
        assert_eq!(got, expected);
        assert!(container.check_lcps());
    }

    #[test]
    fn merge_handles_empty_runs() {
        let (mut container, sizes) = concat_runs(&[vec![], vec!["b"], vec![], vec!["a"]]);
        merge_runs(&mut container, &sizes, 0, false);
        assert_eq!(container.str_bytes(0), b"a");
        assert_eq!(container.str_bytes(1), b"b");
    }

    #[test]
    fn equal_strings_ordered_by_origin() {
        let mut container = StringContainer::<Origin>::new();
        // two runs of equal strings with interleaved origins.
        container.push_str(b"dup", 0, Origin::origin(1, 0));
        container.push_str(b"dup", 3, Origin::origin(1, 1));
        container.push_str(b"dup", 0, Origin::origin(0, 0));
        container.push_str(b"dup", 3, Origin::origin(2, 0));
        merge_runs(&mut container, &[2, 2], 0, false);
        let origins: Vec<(u32, u64)> = container.tags().iter().map(|t| (t.pe, t.index)).collect();
        assert_eq!(origins, vec![(0, 0), (1, 0), (1, 1), (2, 0)]);
    }

    #[test]
    fn compressed_merge_round_trips() {
        let runs: Vec<Vec<&str>> = vec![
            vec!["abcd", "abce", "abd"],
            vec!["abcf", "ab"],
            vec!["b", "ba"],
        ];
        let (container, sizes) = concat_runs(&runs);

        // strip each string to its suffix past the head LCP.
        let mut compressed = StringContainer::<Untracked>::new();
        for (i, v) in container.views().iter().enumerate() {
            let lcp = container.lcps()[i] as usize;
            compressed.push_str(&v.bytes(container.bytes())[lcp..], container.lcps()[i], Untracked);
        }

        let mut plain = container.clone();
        merge_runs(&mut plain, &sizes, 0, false);
        let saved = merge_runs(&mut compressed, &sizes, 0, true).saved_lcps;
        compressed.extend_prefix(&saved);

        let got: Vec<&[u8]> = (0..compressed.len()).map(|i| compressed.str_bytes(i)).collect();
        let expected: Vec<&[u8]> = (0..plain.len()).map(|i| plain.str_bytes(i)).collect();
        assert_eq!(got, expected);
        assert_eq!(compressed.lcps(), plain.lcps());
    }

    #[test]
    fn bounds_bracket_equal_range() {
        let mut c = StringContainer::<Untracked>::from_strings(&["a", "b", "b", "b", "c"]);
        RadixSorter.sort(&mut c, 0, 0);
        assert_eq!(lower_bound(&c, b"b", Untracked), 1);
        assert_eq!(upper_bound(&c, b"b", Untracked), 4);
        assert_eq!(lower_bound(&c, b"bb", Untracked), 4);
        assert_eq!(upper_bound(&c, b"", Untracked), 0);
    }

    #[quickcheck]
    fn quickcheck_merge_matches_flat_sort(runs: Vec<Vec<Vec<u8>>>) -> bool {
        let runs: Vec<Vec<Vec<u8>>> = runs
            .into_iter()
            .take(9)
            .map(|run| {
                run.into_iter()
                    .map(|s| s.into_iter().filter(|&b| b != 0).take(12).collect())
                    .collect()
            })
            .collect();
        if runs.is_empty() {
            return true;
        }

        let mut container = StringContainer::<Untracked>::new();
        let mut sizes = Vec::new();
        for run in &runs {
            let mut sorted = StringContainer::<Untracked>::from_strings(run);
            RadixSorter.sort(&mut sorted, 0, 0);
            for i in 0..sorted.len() {
                let lcp = if i == 0 { 0 } else { sorted.lcps()[i] };
                container.push_str(sorted.str_bytes(i), lcp, Untracked);
            }
            sizes.push(run.len());
        }

        merge_runs(&mut container, &sizes, 0, false);

        let mut expected: Vec<Vec<u8>> = runs.into_iter().flatten().collect();
        expected.sort();
        let got: Vec<&[u8]> = (0..container.len()).map(|i| container.str_bytes(i)).collect();
        got == expected.iter().map(|s| &s[..]).collect::<Vec<_>>() && container.check_lcps()
    }
}
