// crates/telefeed-media/src/queue.rs
//
// Byte-bounded packet FIFO between the demuxer and one decoder.
//
// The count is unbounded; the bound is the sum of packet payload bytes plus
// a per-entry overhead. A full queue blocks the demuxer, which throttles
// source I/O to the slower of the decode chains. `eof` and `abort` are
// one-way latches: `eof` lets the popper drain and then observe end of
// stream, `abort` makes every wait return promptly and drops whatever is
// still queued.

use std::collections::VecDeque;
use std::mem;
use std::sync::{Condvar, Mutex};

use ffmpeg_the_third::Packet;

/// Total payload budget per queue. Matches the classic player heuristic of
/// 15 MiB across buffered packets.
pub const MAX_QUEUE_SIZE: usize = 15 * 1024 * 1024;

/// The primitive was aborted while the caller was blocked on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

/// Result of a blocking pop.
pub enum PacketRead {
    Packet(Packet),
    Eof,
    Aborted,
}

struct QueueState {
    packets: VecDeque<Packet>,
    size:    usize,
    eof:     bool,
    abort:   bool,
}

pub struct PacketQueue {
    state:    Mutex<QueueState>,
    cond:     Condvar,
    max_size: usize,
}

/// Accounting overhead charged per queued packet on top of its payload.
fn entry_cost(pkt: &Packet) -> usize {
    pkt.size() + mem::size_of::<Packet>()
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::with_capacity(MAX_QUEUE_SIZE)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                packets: VecDeque::new(),
                size:    0,
                eof:     false,
                abort:   false,
            }),
            cond: Condvar::new(),
            max_size,
        }
    }

    /// Append a packet, blocking while the queue is over its byte budget.
    /// If the queue is aborted before space frees up, the packet is dropped
    /// and `Err(Aborted)` is returned.
    pub fn push(&self, pkt: Packet) -> Result<(), Aborted> {
        let cost = entry_cost(&pkt);
        let mut state = self.state.lock().unwrap();

        while !state.abort && state.size + cost > self.max_size {
            state = self.cond.wait(state).unwrap();
        }
        if state.abort {
            // The packet is released here; the caller only learns it is
            // time to shut down.
            return Err(Aborted);
        }

        state.packets.push_back(pkt);
        state.size += cost;
        self.cond.notify_all();
        Ok(())
    }

    /// Mark the end of the stream. Idempotent.
    pub fn push_eof(&self) {
        let mut state = self.state.lock().unwrap();
        state.eof = true;
        self.cond.notify_all();
    }

    /// Remove the oldest packet, blocking while the queue is empty and
    /// neither `eof` nor `abort` has been raised.
    pub fn pop(&self) -> PacketRead {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.abort {
                return PacketRead::Aborted;
            }
            if let Some(pkt) = state.packets.pop_front() {
                state.size -= entry_cost(&pkt);
                // A pusher may be parked on the byte budget.
                self.cond.notify_all();
                return PacketRead::Packet(pkt);
            }
            if state.eof {
                return PacketRead::Eof;
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// Raise the abort latch and wake every waiter. Queued packets are
    /// dropped when the queue itself is dropped.
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap();
        state.abort = true;
        self.cond.notify_all();
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current byte accounting (payload plus overhead).
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().size
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn packet(fill: u8, len: usize) -> Packet {
        Packet::copy(&vec![fill; len])
    }

    #[test]
    fn pops_in_push_order() {
        let q = PacketQueue::new();
        q.push(packet(1, 10)).unwrap();
        q.push(packet(2, 10)).unwrap();
        q.push_eof();
        match q.pop() {
            PacketRead::Packet(p) => assert_eq!(p.data().unwrap()[0], 1),
            _ => panic!("expected packet"),
        }
        match q.pop() {
            PacketRead::Packet(p) => assert_eq!(p.data().unwrap()[0], 2),
            _ => panic!("expected packet"),
        }
        assert!(matches!(q.pop(), PacketRead::Eof));
    }

    #[test]
    fn byte_accounting_tracks_pushes_and_pops() {
        let q = PacketQueue::new();
        assert_eq!(q.size(), 0);
        q.push(packet(0, 100)).unwrap();
        q.push(packet(0, 50)).unwrap();
        let expected = 150 + 2 * mem::size_of::<Packet>();
        assert_eq!(q.size(), expected);
        q.push_eof();
        let _ = q.pop();
        let _ = q.pop();
        assert_eq!(q.size(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn eof_drains_before_reporting() {
        let q = PacketQueue::new();
        q.push(packet(7, 8)).unwrap();
        q.push_eof();
        assert!(matches!(q.pop(), PacketRead::Packet(_)));
        assert!(matches!(q.pop(), PacketRead::Eof));
        // Idempotent.
        q.push_eof();
        assert!(matches!(q.pop(), PacketRead::Eof));
    }

    #[test]
    fn abort_returns_promptly_for_poppers() {
        let q = Arc::new(PacketQueue::new());
        let popper = {
            let q = Arc::clone(&q);
            thread::spawn(move || matches!(q.pop(), PacketRead::Aborted))
        };
        thread::sleep(Duration::from_millis(50));
        q.abort();
        assert!(popper.join().unwrap());
    }

    #[test]
    fn full_queue_blocks_pusher_until_pop() {
        // Budget fits exactly one packet; the second push must wait.
        let budget = 64 + mem::size_of::<Packet>();
        let q = Arc::new(PacketQueue::with_capacity(budget));
        q.push(packet(1, 64)).unwrap();

        let pusher = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push(packet(2, 64)).is_ok())
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 1, "second push should still be blocked");

        assert!(matches!(q.pop(), PacketRead::Packet(_)));
        assert!(pusher.join().unwrap());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn abort_unblocks_a_pusher_waiting_on_capacity() {
        let budget = 64 + mem::size_of::<Packet>();
        let q = Arc::new(PacketQueue::with_capacity(budget));
        q.push(packet(1, 64)).unwrap();

        let pusher = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push(packet(2, 64)))
        };
        thread::sleep(Duration::from_millis(50));
        q.abort();
        assert_eq!(pusher.join().unwrap(), Err(Aborted));
    }
}
