use std::cmp::Ordering;

use super::types::{Lcp, Origin, OriginTag};

/// Non-owning handle to one NUL-terminated string inside a container's byte
/// buffer. `len` does not count the terminator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StringView {
    pub start: usize,
    pub len: usize,
}

impl StringView {
    /// The string's bytes, without the terminator.
    #[inline(always)]
    pub fn bytes<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.start + self.len]
    }

    /// The string's bytes including the trailing NUL.
    #[inline(always)]
    pub fn terminated<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.start + self.len + 1]
    }
}

/// Owns a contiguous NUL-separated byte buffer plus parallel view, LCP and
/// origin columns. Views are weak references into the byte buffer; the
/// buffer is never reallocated while views are being merged.
///
/// The LCP column is authoritative only within a single sorted run; after
/// concatenating runs, the junction LCPs must be zeroed before re-merging.
#[derive(Clone, Debug, Default)]
pub struct StringContainer<T: OriginTag> {
    bytes: Vec<u8>,
    views: Vec<StringView>,
    lcps: Vec<Lcp>,
    tags: Vec<T>,
}

impl<T: OriginTag> StringContainer<T> {
    pub fn new() -> Self {
        StringContainer {
            bytes: Vec::new(),
            views: Vec::new(),
            lcps: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut container = Self::new();
        for s in strings {
            container.push_str(s.as_ref(), 0, T::default());
        }
        container
    }

    /// Append one string; its bytes must not contain a NUL.
    pub fn push_str(&mut self, s: &[u8], lcp: Lcp, tag: T) {
        debug_assert!(!s.contains(&0));
        let start = self.bytes.len();
        self.bytes.extend_from_slice(s);
        self.bytes.push(0);
        self.views.push(StringView {
            start,
            len: s.len(),
        });
        self.lcps.push(lcp);
        self.tags.push(tag);
    }

    pub fn from_parts(bytes: Vec<u8>, views: Vec<StringView>, lcps: Vec<Lcp>, tags: Vec<T>) -> Self {
        assert_eq!(views.len(), lcps.len());
        assert_eq!(views.len(), tags.len());
        debug_assert!(views.iter().all(|v| bytes[v.start + v.len] == 0));
        StringContainer {
            bytes,
            views,
            lcps,
            tags,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Total bytes owned, terminators included.
    #[inline(always)]
    pub fn char_size(&self) -> usize {
        self.bytes.len()
    }

    #[inline(always)]
    pub fn str_bytes(&self, i: usize) -> &[u8] {
        self.views[i].bytes(&self.bytes)
    }

    #[inline(always)]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline(always)]
    pub fn views(&self) -> &[StringView] {
        &self.views
    }

    #[inline(always)]
    pub fn lcps(&self) -> &[Lcp] {
        &self.lcps
    }

    #[inline(always)]
    pub fn lcps_mut(&mut self) -> &mut [Lcp] {
        &mut self.lcps
    }

    #[inline(always)]
    pub fn tags(&self) -> &[T] {
        &self.tags
    }

    /// Split borrows for in-place column permutation.
    #[inline(always)]
    pub fn columns_mut(&mut self) -> (&[u8], &mut [StringView], &mut [Lcp], &mut [T]) {
        (&self.bytes, &mut self.views, &mut self.lcps, &mut self.tags)
    }

    /// Swap in reordered columns, e.g. after a k-way merge. The byte buffer
    /// is untouched; only the view order changes.
    pub fn set_columns(&mut self, views: Vec<StringView>, lcps: Vec<Lcp>, tags: Vec<T>) {
        assert_eq!(views.len(), self.views.len());
        assert_eq!(lcps.len(), views.len());
        assert_eq!(tags.len(), views.len());
        self.views = views;
        self.lcps = lcps;
        self.tags = tags;
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.views.clear();
        self.lcps.clear();
        self.tags.clear();
    }

    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Rewrite the byte buffer so strings lie back-to-back in view order.
    /// Needed after selecting a subsequence of views.
    pub fn make_contiguous(&mut self) {
        let mut bytes = Vec::with_capacity(self.bytes.len());
        let mut views = Vec::with_capacity(self.views.len());
        for v in &self.views {
            let start = bytes.len();
            bytes.extend_from_slice(v.terminated(&self.bytes));
            views.push(StringView {
                start,
                len: v.len,
            });
        }
        self.bytes = bytes;
        self.views = views;
    }

    /// Restore prefix-compressed strings after a compressed merge.
    ///
    /// `saved[i]` is the number of leading bytes string `i` is missing. The
    /// prefix is recovered from the previous restored string, which shares
    /// at least `saved[i]` leading bytes with it: for sorted x <= y <= z,
    /// lcp(y, z) >= lcp(x, z).
    pub fn extend_prefix(&mut self, saved: &[Lcp]) {
        assert_eq!(saved.len(), self.len());
        if self.is_empty() {
            return;
        }
        assert_eq!(saved[0], 0);

        let total: usize = saved.iter().map(|&s| s as usize).sum();
        let mut bytes = Vec::with_capacity(self.bytes.len() + total);
        let mut views = Vec::with_capacity(self.views.len());
        for (i, v) in self.views.iter().enumerate() {
            let prefix = saved[i] as usize;
            let start = bytes.len();
            if prefix > 0 {
                let prev: StringView = views[i - 1];
                debug_assert!(prefix <= prev.len);
                bytes.extend_from_within(prev.start..prev.start + prefix);
            }
            bytes.extend_from_slice(v.terminated(&self.bytes));
            views.push(StringView {
                start,
                len: prefix + v.len,
            });
        }
        self.bytes = bytes;
        self.views = views;
    }

    /// Non-decreasing under the (bytes, origin) order?
    pub fn check_order(&self) -> bool {
        (1..self.len()).all(|i| {
            cmp_tagged(
                self.str_bytes(i - 1),
                self.tags[i - 1],
                self.str_bytes(i),
                self.tags[i],
            ) != Ordering::Greater
        })
    }

    /// LCP column consistent with the strings?
    pub fn check_lcps(&self) -> bool {
        if self.is_empty() {
            return true;
        }
        self.lcps[0] == 0
            && (1..self.len())
                .all(|i| self.lcps[i] == common_prefix(self.str_bytes(i - 1), self.str_bytes(i)))
    }
}

impl StringContainer<Origin> {
    /// Stamp each string with (pe, position), the identity it keeps for the
    /// rest of its life.
    pub fn stamp_origins(&mut self, pe: usize) {
        for (i, tag) in self.tags.iter_mut().enumerate() {
            *tag = Origin::origin(pe, i as u64);
        }
    }
}

/// Byte-lexicographic order with origin tie-break where tracked.
#[inline]
pub fn cmp_tagged<T: OriginTag>(a: &[u8], ta: T, b: &[u8], tb: T) -> Ordering {
    match a.cmp(b) {
        Ordering::Equal if T::TRACKED => ta.pack().cmp(&tb.pack()),
        ord => ord,
    }
}

#[inline]
pub fn common_prefix(a: &[u8], b: &[u8]) -> Lcp {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count() as Lcp
}

#[cfg(test)]
mod tests {
    use super::super::types::Untracked;
    use super::*;

    #[test]
    fn push_and_views() {
        let c = StringContainer::<Untracked>::from_strings(&["abc", "", "ab"]);
        assert_eq!(c.len(), 3);
        assert_eq!(c.str_bytes(0), b"abc");
        assert_eq!(c.str_bytes(1), b"");
        assert_eq!(c.str_bytes(2), b"ab");
        assert_eq!(c.char_size(), 3 + 1 + 1 + 3);
    }

    #[test]
    fn extend_prefix_restores_strings() {
        // "abc", "abde", "abdf" compressed against their predecessors.
        let mut c = StringContainer::<Untracked>::new();
        c.push_str(b"abc", 0, Untracked);
        c.push_str(b"de", 0, Untracked);
        c.push_str(b"f", 0, Untracked);
        c.extend_prefix(&[0, 2, 3]);
        assert_eq!(c.str_bytes(0), b"abc");
        assert_eq!(c.str_bytes(1), b"abde");
        assert_eq!(c.str_bytes(2), b"abdf");
    }

    #[test]
    fn order_check_uses_origin_tie_break() {
        let mut c = StringContainer::<Origin>::new();
        c.push_str(b"a", 0, Origin::origin(0, 1));
        c.push_str(b"a", 0, Origin::origin(0, 0));
        assert!(!c.check_order());
        c.stamp_origins(0);
        assert!(c.check_order());
    }

    #[quickcheck]
    fn quickcheck_common_prefix(a: Vec<u8>, b: Vec<u8>) -> bool {
        let lcp = common_prefix(&a, &b) as usize;
        a[..lcp] == b[..lcp] && (lcp == a.len() || lcp == b.len() || a[lcp] != b[lcp])
    }
}
