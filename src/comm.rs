use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use crossbeam::channel;
use scoped_threadpool::Pool;

/// One message in flight: source expressed as a world rank.
struct Message {
    src: usize,
    tag: u16,
    data: Vec<u8>,
}

pub const TAG_WARMUP: u16 = 0xff00;
const TAG_ALLTOALL: u16 = 0xff01;
const TAG_BCAST: u16 = 0xff02;
const TAG_SCAN: u16 = 0xff03;
const TAG_REDUCE: u16 = 0xff04;

/// Message passing between PEs.
///
/// Point-to-point operations are required; the collectives are provided on
/// top of them, so any transport that can send and receive tagged byte
/// buffers (MPI, or the in-process [`LocalComm`]) gets the full collective
/// surface. Sends are non-blocking; receives block until a matching message
/// arrives. All members of a communicator must issue the same sequence of
/// collectives in the same order.
pub trait Communicator: Clone {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Non-blocking send to `dest` (a rank of this communicator).
    fn send(&self, dest: usize, tag: u16, data: Vec<u8>);

    /// Blocking receive of the next message matching (src, tag).
    fn recv(&self, src: usize, tag: u16) -> Vec<u8>;

    /// Block until a message matching (src, tag) is available; return its
    /// length in bytes without consuming it.
    fn probe(&self, src: usize, tag: u16) -> usize;

    /// Sub-communicator over the contiguous rank range
    /// [first, first + size). Collective over the members of the range;
    /// ranks renumber from zero.
    fn range(&self, first: usize, size: usize) -> Self;

    /// Exchange one u64 with every PE.
    fn alltoall_counts(&self, send: &[u64]) -> Vec<u64> {
        assert_eq!(send.len(), self.size());
        for dest in 0..self.size() {
            self.send(dest, TAG_ALLTOALL, encode_u64(send[dest]));
        }
        (0..self.size())
            .map(|src| decode_u64(&self.recv(src, TAG_ALLTOALL)))
            .collect()
    }

    /// Variable-count exchange of bytes; returns the received buffers
    /// concatenated in source-rank order plus the per-source byte counts.
    fn alltoallv(&self, send: &[u8], counts: &[usize], tag: u16) -> (Vec<u8>, Vec<usize>) {
        assert_eq!(counts.len(), self.size());
        assert_eq!(counts.iter().sum::<usize>(), send.len());

        let mut offset = 0;
        for (dest, &count) in counts.iter().enumerate() {
            self.send(dest, tag, send[offset..offset + count].to_vec());
            offset += count;
        }

        let mut recv = Vec::new();
        let mut recv_counts = Vec::with_capacity(self.size());
        for src in 0..self.size() {
            let chunk = self.recv(src, tag);
            recv_counts.push(chunk.len());
            recv.extend_from_slice(&chunk);
        }
        (recv, recv_counts)
    }

    /// [`Communicator::alltoallv`] over u64 values; counts are in values.
    fn alltoallv_u64s(&self, send: &[u64], counts: &[usize], tag: u16) -> (Vec<u64>, Vec<usize>) {
        let byte_counts: Vec<usize> = counts.iter().map(|&c| 8 * c).collect();
        let (recv, recv_bytes) = self.alltoallv(&encode_u64s(send), &byte_counts, tag);
        let recv_counts = recv_bytes.iter().map(|&b| b / 8).collect();
        (decode_u64s(&recv), recv_counts)
    }

    /// Binomial-tree broadcast; returns the root's buffer on every PE.
    fn bcast(&self, root: usize, data: Vec<u8>) -> Vec<u8> {
        let size = self.size();
        if size == 1 {
            return data;
        }
        let vrank = (self.rank() + size - root) % size;
        let to_world = |v: usize| (v + root) % size;

        let data = if vrank == 0 {
            data
        } else {
            let parent = vrank & (vrank - 1);
            self.recv(to_world(parent), TAG_BCAST)
        };

        let lsb = if vrank == 0 {
            size.next_power_of_two()
        } else {
            vrank & vrank.wrapping_neg()
        };
        let mut step = lsb >> 1;
        while step > 0 {
            let child = vrank + step;
            if child < size {
                self.send(to_world(child), TAG_BCAST, data.clone());
            }
            step >>= 1;
        }
        data
    }

    /// Exclusive prefix sum over ranks; rank 0 gets 0.
    fn exscan_sum(&self, value: u64) -> u64 {
        let rank = self.rank();
        let prefix = if rank == 0 {
            0
        } else {
            decode_u64(&self.recv(rank - 1, TAG_SCAN))
        };
        if rank + 1 < self.size() {
            self.send(rank + 1, TAG_SCAN, encode_u64(prefix + value));
        }
        prefix
    }

    /// Binomial-tree reduction to rank 0, then broadcast of the result.
    fn allreduce(&self, value: u64, op: fn(u64, u64) -> u64) -> u64 {
        let vrank = self.rank();
        let lsb = if vrank == 0 {
            self.size().next_power_of_two()
        } else {
            vrank & vrank.wrapping_neg()
        };

        let mut acc = value;
        let mut step = 1;
        while step < lsb {
            let child = vrank + step;
            if child < self.size() {
                acc = op(acc, decode_u64(&self.recv(child, TAG_REDUCE)));
            }
            step <<= 1;
        }
        if vrank != 0 {
            self.send(vrank & (vrank - 1), TAG_REDUCE, encode_u64(acc));
        }
        decode_u64(&self.bcast(0, encode_u64(acc)))
    }

    fn allreduce_sum(&self, value: u64) -> u64 {
        self.allreduce(value, |a, b| a + b)
    }

    fn allreduce_max(&self, value: u64) -> u64 {
        self.allreduce(value, Ord::max)
    }
}

/// Exercise every channel pair once so first-use costs stay out of timed
/// runs.
pub fn warmup<C: Communicator>(comm: &C) {
    for dest in 0..comm.size() {
        comm.send(dest, TAG_WARMUP, vec![0]);
    }
    for src in 0..comm.size() {
        comm.recv(src, TAG_WARMUP);
    }
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    LittleEndian::write_u64(&mut buf, value);
    buf
}

pub fn decode_u64(bytes: &[u8]) -> u64 {
    assert_eq!(bytes.len(), 8, "count message has wrong size");
    LittleEndian::read_u64(bytes)
}

pub fn encode_u64s(values: &[u64]) -> Vec<u8> {
    let mut buf = vec![0u8; 8 * values.len()];
    LittleEndian::write_u64_into(values, &mut buf);
    buf
}

pub fn decode_u64s(bytes: &[u8]) -> Vec<u64> {
    assert_eq!(bytes.len() % 8, 0, "trailing bytes in u64 stream");
    let mut out = vec![0u64; bytes.len() / 8];
    LittleEndian::read_u64_into(bytes, &mut out);
    out
}

/// Per-PE mailbox: the world receiver plus messages pulled off the channel
/// but not yet asked for. Shared by all sub-communicator views of one PE.
struct Inbox {
    rx: channel::Receiver<Message>,
    pending: VecDeque<Message>,
}

impl Inbox {
    /// Index into `pending` of the first message matching (world src, tag),
    /// pulling messages off the channel until one arrives.
    fn wait_match(&mut self, src: usize, tag: u16) -> usize {
        let mut scanned = 0;
        loop {
            while scanned < self.pending.len() {
                let msg = &self.pending[scanned];
                if msg.src == src && msg.tag == tag {
                    return scanned;
                }
                scanned += 1;
            }
            let msg = self
                .rx
                .recv()
                .expect("peer hung up with a receive outstanding");
            self.pending.push_back(msg);
        }
    }
}

/// Shared-memory transport: every PE is an OS thread, every channel pair a
/// `crossbeam` unbounded channel, so sends are naturally non-blocking.
/// Sub-communicators are contiguous rank ranges over the same mesh.
///
/// This is the shared-memory fallback and the test harness; a cluster
/// deployment implements [`Communicator`] over MPI instead.
#[derive(Clone)]
pub struct LocalComm {
    world_rank: usize,
    first: usize,
    size: usize,
    mesh: Arc<Vec<channel::Sender<Message>>>,
    inbox: Rc<RefCell<Inbox>>,
}

impl LocalComm {
    fn new(world_rank: usize, mesh: Arc<Vec<channel::Sender<Message>>>, rx: channel::Receiver<Message>) -> Self {
        let size = mesh.len();
        LocalComm {
            world_rank,
            first: 0,
            size,
            mesh,
            inbox: Rc::new(RefCell::new(Inbox {
                rx,
                pending: VecDeque::new(),
            })),
        }
    }
}

impl Communicator for LocalComm {
    #[inline(always)]
    fn rank(&self) -> usize {
        self.world_rank - self.first
    }

    #[inline(always)]
    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: usize, tag: u16, data: Vec<u8>) {
        assert!(dest < self.size);
        self.mesh[self.first + dest]
            .send(Message {
                src: self.world_rank,
                tag,
                data,
            })
            .expect("peer hung up with a send outstanding");
    }

    fn recv(&self, src: usize, tag: u16) -> Vec<u8> {
        assert!(src < self.size);
        let mut inbox = self.inbox.borrow_mut();
        let at = inbox.wait_match(self.first + src, tag);
        inbox.pending.remove(at).unwrap().data
    }

    fn probe(&self, src: usize, tag: u16) -> usize {
        assert!(src < self.size);
        let mut inbox = self.inbox.borrow_mut();
        let at = inbox.wait_match(self.first + src, tag);
        inbox.pending[at].data.len()
    }

    fn range(&self, first: usize, size: usize) -> Self {
        assert!(size > 0 && first + size <= self.size);
        LocalComm {
            world_rank: self.world_rank,
            first: self.first + first,
            size,
            mesh: Arc::clone(&self.mesh),
            inbox: Rc::clone(&self.inbox),
        }
    }
}

/// Run `f` once per PE on its own thread and collect the per-rank results.
pub fn run_cluster<R, F>(pes: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(LocalComm) -> R + Send + Sync,
{
    assert!(pes > 0);
    let (mesh, inboxes): (Vec<_>, Vec<_>) = (0..pes).map(|_| channel::unbounded()).unzip();
    let mesh = Arc::new(mesh);
    let (result_tx, result_rx) = channel::unbounded();

    let mut pool = Pool::new(pes as u32);
    pool.scoped(|scope| {
        for (rank, rx) in inboxes.into_iter().enumerate() {
            let mesh = Arc::clone(&mesh);
            let result_tx = result_tx.clone();
            let f = &f;
            scope.execute(move || {
                let comm = LocalComm::new(rank, mesh, rx);
                result_tx.send((rank, f(comm))).unwrap();
            });
        }
    });
    drop(result_tx);

    let mut results: Vec<(usize, R)> = result_rx.iter().collect();
    results.sort_by_key(|&(rank, _)| rank);
    results.into_iter().map(|(_, r)| r).collect()
}
