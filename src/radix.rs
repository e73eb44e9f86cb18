use std::cmp::Ordering;

use super::strings::{common_prefix, StringContainer, StringView};
use super::types::{Lcp, OriginTag};

/// Below this size a range is finished off by insertion sort.
const INSERTION_THRESHOLD: usize = 32;

/// Local run sorter, consumed by the distributed drivers through this
/// interface. `depth` bytes are known equal across the whole set and are
/// skipped; `common_lcp` seeds the produced LCP column.
pub trait LocalSorter {
    fn sort<T: OriginTag>(&self, container: &mut StringContainer<T>, depth: usize, common_lcp: Lcp);
}

/// Byte-wise MSD radix sort over the view column, with an explicit worklist
/// so stack depth stays bounded by the alphabet, not the string length.
/// Exhausted strings (equal through their full length) are ordered by their
/// origin, keeping duplicate handling deterministic for tracked sets.
#[derive(Clone, Copy, Default)]
pub struct RadixSorter;

impl LocalSorter for RadixSorter {
    fn sort<T: OriginTag>(&self, container: &mut StringContainer<T>, depth: usize, common_lcp: Lcp) {
        {
            let (bytes, views, _, tags) = container.columns_mut();
            sort_views(bytes, views, tags, depth);
        }
        fill_lcps(container, common_lcp);
    }
}

fn sort_views<T: OriginTag>(bytes: &[u8], views: &mut [StringView], tags: &mut [T], depth: usize) {
    let n = views.len();
    if n <= 1 {
        return;
    }

    let mut scratch_views = views.to_vec();
    let mut scratch_tags = tags.to_vec();
    let mut work = vec![(0, n, depth)];

    while let Some((lo, hi, depth)) = work.pop() {
        let m = hi - lo;
        if m <= 1 {
            continue;
        }
        if m <= INSERTION_THRESHOLD {
            insertion_sort(bytes, &mut views[lo..hi], &mut tags[lo..hi], depth);
            continue;
        }

        // bucket 0 collects strings exhausted at this depth; interior NULs
        // do not occur, so bytes 1..=255 map to buckets 1..=255.
        let mut counts = [0usize; 256];
        for v in &views[lo..hi] {
            counts[bucket(bytes, v, depth)] += 1;
        }

        let mut offsets = [0usize; 256];
        let mut sum = 0;
        for (offset, &count) in offsets.iter_mut().zip(counts.iter()) {
            *offset = sum;
            sum += count;
        }

        for (v, t) in views[lo..hi].iter().zip(tags[lo..hi].iter()) {
            let at = &mut offsets[bucket(bytes, v, depth)];
            scratch_views[lo + *at] = *v;
            scratch_tags[lo + *at] = *t;
            *at += 1;
        }
        views[lo..hi].copy_from_slice(&scratch_views[lo..hi]);
        tags[lo..hi].copy_from_slice(&scratch_tags[lo..hi]);

        if T::TRACKED && counts[0] > 1 {
            // exhausted strings are pairwise equal; order them by origin.
            views_by_tag(&mut views[lo..lo + counts[0]], &mut tags[lo..lo + counts[0]]);
        }
        let mut start = lo + counts[0];
        for &count in counts[1..].iter() {
            if count > 1 {
                work.push((start, start + count, depth + 1));
            }
            start += count;
        }
    }
}

#[inline(always)]
fn bucket(bytes: &[u8], v: &StringView, depth: usize) -> usize {
    debug_assert!(depth <= v.len);
    bytes[v.start + depth] as usize
}

fn views_by_tag<T: OriginTag>(views: &mut [StringView], tags: &mut [T]) {
    let mut order: Vec<usize> = (0..views.len()).collect();
    order.sort_by_key(|&i| tags[i].pack());
    let views_old = views.to_vec();
    let tags_old = tags.to_vec();
    for (i, &from) in order.iter().enumerate() {
        views[i] = views_old[from];
        tags[i] = tags_old[from];
    }
}

fn insertion_sort<T: OriginTag>(bytes: &[u8], views: &mut [StringView], tags: &mut [T], depth: usize) {
    for i in 1..views.len() {
        let v = views[i];
        let t = tags[i];
        let mut j = i;
        while j > 0 && suffix_cmp(bytes, &views[j - 1], tags[j - 1], &v, t, depth) == Ordering::Greater {
            views[j] = views[j - 1];
            tags[j] = tags[j - 1];
            j -= 1;
        }
        views[j] = v;
        tags[j] = t;
    }
}

#[inline]
fn suffix_cmp<T: OriginTag>(
    bytes: &[u8],
    a: &StringView,
    ta: T,
    b: &StringView,
    tb: T,
    depth: usize,
) -> Ordering {
    debug_assert!(depth <= a.len && depth <= b.len);
    let sa = &bytes[a.start + depth..a.start + a.len];
    let sb = &bytes[b.start + depth..b.start + b.len];
    match sa.cmp(sb) {
        Ordering::Equal if T::TRACKED => ta.pack().cmp(&tb.pack()),
        ord => ord,
    }
}

fn fill_lcps<T: OriginTag>(container: &mut StringContainer<T>, common_lcp: Lcp) {
    if container.is_empty() {
        return;
    }
    for i in (1..container.len()).rev() {
        let skip = common_lcp as usize;
        let a = container.str_bytes(i - 1);
        let b = container.str_bytes(i);
        debug_assert!(skip <= a.len() && skip <= b.len());
        let lcp = common_lcp + common_prefix(&a[skip..], &b[skip..]);
        container.lcps_mut()[i] = lcp;
    }
    container.lcps_mut()[0] = 0;
}

#[cfg(test)]
mod tests {
    use super::super::types::{Origin, Untracked};
    use super::*;

    fn sorted<T: OriginTag>(container: &mut StringContainer<T>) {
        RadixSorter.sort(container, 0, 0);
    }

    #[test]
    fn sorts_and_fills_lcps() {
        let mut c = StringContainer::<Untracked>::from_strings(&["xyz", "xy", "x"]);
        sorted(&mut c);
        let strs: Vec<&[u8]> = (0..c.len()).map(|i| c.str_bytes(i)).collect();
        assert_eq!(strs, vec![&b"x"[..], b"xy", b"xyz"]);
        assert_eq!(c.lcps(), &[0, 1, 2]);
    }

    #[test]
    fn duplicates_ordered_by_origin() {
        let mut c = StringContainer::<Origin>::new();
        for index in [3u64, 1, 2, 0].iter() {
            c.push_str(b"dup", 0, Origin::origin(0, *index));
        }
        sorted(&mut c);
        let indices: Vec<u64> = c.tags().iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[quickcheck]
    fn quickcheck_matches_comparison_sort(input: Vec<Vec<u8>>) -> bool {
        let strings: Vec<Vec<u8>> = input
            .into_iter()
            .map(|s| s.into_iter().filter(|&b| b != 0).collect())
            .collect();
        let mut c = StringContainer::<Untracked>::from_strings(&strings);
        sorted(&mut c);

        let mut expected = strings;
        expected.sort();
        let got: Vec<&[u8]> = (0..c.len()).map(|i| c.str_bytes(i)).collect();
        got == expected.iter().map(|s| &s[..]).collect::<Vec<_>>() && c.check_lcps()
    }
}
