use std::marker::PhantomData;

use super::super::comm::{decode_u64s, encode_u64s, Communicator};
use super::super::strings::StringContainer;
use super::super::types::{Lcp, OriginTag};

/// Wire packet for point-to-point string traffic: NUL-separated bytes
/// (mandatory), packed origins (tracked sets) and LCPs (LCP-aware mode).
/// The columns use tag offsets {0, +1, +2} and are all in flight before any
/// matching receive completes.
#[derive(Clone, Debug)]
pub struct Data<T: OriginTag> {
    pub raw_strs: Vec<u8>,
    pub tags: Vec<u64>,
    pub lcps: Vec<Lcp>,
    with_lcps: bool,
    _set: PhantomData<T>,
}

impl<T: OriginTag> Data<T> {
    pub fn new(with_lcps: bool) -> Self {
        Data {
            raw_strs: Vec::new(),
            tags: Vec::new(),
            lcps: Vec::new(),
            with_lcps,
            _set: PhantomData,
        }
    }

    pub fn num_strings(&self) -> usize {
        if T::TRACKED {
            self.tags.len()
        } else if self.with_lcps {
            self.lcps.len()
        } else {
            self.raw_strs.iter().filter(|&&b| b == 0).count()
        }
    }

    /// Serialize a container into this packet.
    pub fn write(&mut self, container: &StringContainer<T>) {
        self.raw_strs.clear();
        self.tags.clear();
        self.lcps.clear();
        for i in 0..container.len() {
            self.raw_strs.extend_from_slice(container.str_bytes(i));
            self.raw_strs.push(0);
            if T::TRACKED {
                self.tags.push(container.tags()[i].pack());
            }
            if self.with_lcps {
                self.lcps.push(container.lcps()[i]);
            }
        }
    }

    /// Rebuild a container from this packet.
    pub fn read_into(&self, container: &mut StringContainer<T>) {
        container.clear();
        let mut pos = 0;
        let mut string = 0;
        while pos < self.raw_strs.len() {
            let nul = self.raw_strs[pos..]
                .iter()
                .position(|&b| b == 0)
                .expect("malformed string stream")
                + pos;
            let tag = if T::TRACKED {
                T::unpack(self.tags[string])
            } else {
                T::default()
            };
            let lcp = if self.with_lcps { self.lcps[string] } else { 0 };
            container.push_str(&self.raw_strs[pos..nul], lcp, tag);
            pos = nul + 1;
            string += 1;
        }
        assert_eq!(string, self.num_strings(), "column lengths disagree");
    }

    pub fn send<C: Communicator>(&self, dest: usize, tag: u16, comm: &C) {
        comm.send(dest, tag, self.raw_strs.clone());
        if T::TRACKED {
            comm.send(dest, tag + 1, encode_u64s(&self.tags));
        }
        if self.with_lcps {
            comm.send(dest, tag + 2, encode_u64s(&self.lcps));
        }
    }

    pub fn recv<C: Communicator>(&mut self, src: usize, tag: u16, comm: &C) {
        self.raw_strs = comm.recv(src, tag);
        if T::TRACKED {
            self.tags = decode_u64s(&comm.recv(src, tag + 1));
        }
        if self.with_lcps {
            self.lcps = decode_u64s(&comm.recv(src, tag + 2));
        }
        debug_assert_eq!(
            self.raw_strs.iter().filter(|&&b| b == 0).count(),
            self.num_strings()
        );
    }

    /// Concurrent exchange with a partner; every column send is posted
    /// before the receives complete.
    pub fn sendrecv<C: Communicator>(
        &self,
        recv: &mut Data<T>,
        partner: usize,
        tag: u16,
        comm: &C,
    ) {
        self.send(partner, tag, comm);
        recv.recv(partner, tag, comm);
    }

    /// Broadcast a packet holding exactly one string.
    pub fn bcast_single<C: Communicator>(&mut self, root: usize, comm: &C) {
        self.raw_strs = comm.bcast(root, std::mem::take(&mut self.raw_strs));
        if T::TRACKED {
            let raw = comm.bcast(root, encode_u64s(&self.tags));
            self.tags = decode_u64s(&raw);
            assert_eq!(self.tags.len(), 1, "broadcast expects a single string");
        }
        if self.with_lcps {
            // there is never a common prefix for a single string.
            self.lcps.clear();
            self.lcps.push(0);
        }
        assert_eq!(self.raw_strs.iter().filter(|&&b| b == 0).count(), 1);
        assert_eq!(self.raw_strs.last(), Some(&0));
    }
}

/// Scratch bundle reused across all recursion depths, keeping peak memory
/// proportional to the largest single round.
pub struct TemporaryBuffers<T: OriginTag> {
    pub send_data: Data<T>,
    pub recv_data: Data<T>,
    pub recv_strings: StringContainer<T>,
    pub merge_strings: StringContainer<T>,
    pub median_strings: StringContainer<T>,
}

impl<T: OriginTag> TemporaryBuffers<T> {
    pub fn new(with_lcps: bool) -> Self {
        TemporaryBuffers {
            send_data: Data::new(with_lcps),
            recv_data: Data::new(with_lcps),
            recv_strings: StringContainer::new(),
            merge_strings: StringContainer::new(),
            median_strings: StringContainer::new(),
        }
    }
}
