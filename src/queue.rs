//! Packet queue manager.
//!
//! Circular buffer of packet copies. One slot is always kept free so a
//! full queue is distinguishable from an empty one (`first == last` iff
//! empty). All operations are mutually exclusive via an internal lock.

use std::sync::Mutex;

use tracing::warn;

use crate::packet::{sequence_mask, Packet, Priority, SEQUENCE_ALL};

/// Bounded queue of packet copies with overwrite policy and sequence
/// acknowledgement bookkeeping.
#[derive(Debug)]
pub struct PacketQueue {
    inner: Mutex<Ring>,
}

#[derive(Debug)]
struct Ring {
    slots: Vec<Option<Packet>>,
    first: usize,
    last: usize,
    overwrite: bool,
}

impl Ring {
    fn next_index(&self, ndx: usize) -> usize {
        if ndx + 1 < self.slots.len() {
            ndx + 1
        } else {
            0
        }
    }

    fn prior_index(&self, ndx: usize) -> usize {
        if ndx == 0 {
            self.slots.len() - 1
        } else {
            ndx - 1
        }
    }

    fn len(&self) -> usize {
        if self.last >= self.first {
            self.last - self.first
        } else {
            self.slots.len() - (self.first - self.last)
        }
    }

    fn delete_first(&mut self) -> bool {
        if self.first == self.last {
            return false;
        }
        self.slots[self.first] = None;
        self.first = self.next_index(self.first);
        true
    }

    /// Walks the occupied indices from oldest to newest.
    fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        let mut ndx = self.first;
        std::iter::from_fn(move || {
            if ndx == self.last {
                None
            } else {
                let cur = ndx;
                ndx = self.next_index(ndx);
                Some(cur)
            }
        })
    }
}

impl PacketQueue {
    /// Creates a queue holding up to `capacity` packets.
    pub fn new(capacity: usize) -> PacketQueue {
        PacketQueue {
            inner: Mutex::new(Ring {
                slots: (0..=capacity).map(|_| None).collect(),
                first: 0,
                last: 0,
                overwrite: true,
            }),
        }
    }

    /// Empties the queue and re-enables overwrite.
    pub fn reset(&self) {
        let mut q = self.inner.lock().unwrap();
        for slot in &mut q.slots {
            *slot = None;
        }
        q.first = 0;
        q.last = 0;
        q.overwrite = true;
    }

    /// Enables or disables overwrite-oldest on overflow.
    pub fn enable_overwrite(&self, overwrite: bool) {
        self.inner.lock().unwrap().overwrite = overwrite;
    }

    /// Number of packets currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Checks whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a copy of the packet. On overflow the oldest entry is dropped
    /// if overwrite is enabled, otherwise the new packet is rejected.
    pub fn add(&self, pkt: &Packet) -> bool {
        let mut q = self.inner.lock().unwrap();
        let entry = q.last;
        let new_last = q.next_index(entry);
        if new_last == q.first {
            if q.overwrite {
                warn!("Packet queue overflow, overwriting oldest");
                q.delete_first();
            } else {
                warn!("Packet queue overflow, discarding latest");
                return false;
            }
        }
        q.slots[entry] = Some(pkt.clone());
        q.last = new_last;
        true
    }

    /// Deletes the first (oldest) entry.
    pub fn delete_first(&self) -> bool {
        self.inner.lock().unwrap().delete_first()
    }

    /// Returns copies of all queued packets, oldest first.
    pub fn snapshot(&self) -> Vec<Packet> {
        let q = self.inner.lock().unwrap();
        q.indices()
            .filter_map(|i| q.slots[i].clone())
            .collect()
    }

    /// Copies every packet at or above `priority` into `dest`. Returns
    /// `false` if the destination overflowed.
    pub fn copy_to(&self, dest: &PacketQueue, priority: Priority) -> bool {
        for pkt in self.snapshot() {
            if pkt.priority >= priority && !dest.add(&pkt) {
                return false;
            }
        }
        true
    }

    /// Checks whether any queued packet has not yet been sent.
    pub fn has_unsent(&self) -> bool {
        let q = self.inner.lock().unwrap();
        let result = q
            .indices()
            .any(|i| q.slots[i].as_ref().map_or(false, |p| !p.sent));
        result
    }

    /// Sequence of the first packet iff it has been sent, else
    /// `SEQUENCE_ALL`.
    pub fn first_sent_sequence(&self) -> u32 {
        let q = self.inner.lock().unwrap();
        let result = match q.indices().next().and_then(|i| q.slots[i].as_ref()) {
            Some(pkt) if pkt.sent => pkt.sequence,
            _ => SEQUENCE_ALL,
        };
        result
    }

    /// Sequence of the newest packet, or `SEQUENCE_ALL` when empty.
    pub fn last_sequence(&self) -> u32 {
        let q = self.inner.lock().unwrap();
        if q.first == q.last {
            return SEQUENCE_ALL;
        }
        let last = q.prior_index(q.last);
        q.slots[last].as_ref().map_or(SEQUENCE_ALL, |p| p.sequence)
    }

    /// Checks whether a sent packet with the given sequence is present.
    /// The walk stops at the first unsent packet: everything after it has
    /// not been sent either.
    pub fn has_sent_with_sequence(&self, sequence: u32) -> bool {
        let q = self.inner.lock().unwrap();
        for i in q.indices() {
            let Some(pkt) = q.slots[i].as_ref() else {
                break;
            };
            if !pkt.sent {
                break;
            }
            if sequence == SEQUENCE_ALL || pkt.sequence == SEQUENCE_ALL {
                return true;
            }
            let mask = sequence_mask(pkt.seq_len.max(1));
            if pkt.sequence & mask == sequence & mask {
                return true;
            }
        }
        false
    }

    /// Highest priority present in the queue.
    pub fn highest_priority(&self) -> Priority {
        let q = self.inner.lock().unwrap();
        q.indices()
            .filter_map(|i| q.slots[i].as_ref().map(|p| p.priority))
            .max()
            .unwrap_or(Priority::None)
    }

    /// Takes up to `max` unsent packets, highest priority first (queue
    /// order within a priority), marking them sent. Returns the copies in
    /// transmission order.
    pub fn take_unsent(&self, max: usize) -> Vec<Packet> {
        let mut q = self.inner.lock().unwrap();
        let mut picked: Vec<usize> = q
            .indices()
            .filter(|&i| q.slots[i].as_ref().map_or(false, |p| !p.sent))
            .collect();
        // stable sort keeps queue order within a priority band
        picked.sort_by_key(|&i| {
            std::cmp::Reverse(q.slots[i].as_ref().map_or(Priority::None, |p| p.priority))
        });
        picked.truncate(max);
        let mut out = Vec::with_capacity(picked.len());
        for i in picked {
            if let Some(pkt) = q.slots[i].as_mut() {
                pkt.sent = true;
                out.push(pkt.clone());
            }
        }
        out
    }

    /// Clears the sent flag on every queued packet (for retransmission
    /// after a failed session).
    pub fn reset_sent(&self) {
        let mut q = self.inner.lock().unwrap();
        let indices: Vec<usize> = q.indices().collect();
        for i in indices {
            if let Some(pkt) = q.slots[i].as_mut() {
                pkt.sent = false;
            }
        }
    }

    /// Acknowledges packets up to the given sequence: walks from the head
    /// while packets are marked sent, deletes through the first packet
    /// whose masked sequence matches, then stops. `SEQUENCE_ALL` deletes
    /// every sent packet. Returns `true` if a matching packet was found.
    pub fn acknowledge_to_sequence(&self, sequence: u32) -> bool {
        let mut q = self.inner.lock().unwrap();
        let mut found = false;
        loop {
            let Some(pkt) = q.indices().next().and_then(|i| q.slots[i].clone()) else {
                break;
            };
            if !pkt.sent {
                break;
            }
            if sequence == SEQUENCE_ALL {
                q.delete_first();
                found = true;
                continue;
            }
            let mask = sequence_mask(pkt.seq_len.max(1));
            let matched = pkt.sequence == SEQUENCE_ALL || pkt.sequence & mask == sequence & mask;
            q.delete_first();
            if matched {
                found = true;
                break;
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, Priority};

    fn pkt(seq: u32, sent: bool) -> Packet {
        Packet {
            pkt_type: 0x30,
            priority: Priority::Normal,
            sequence: seq,
            seq_len: 1,
            seq_pos: 0,
            sent,
            payload: vec![seq as u8],
        }
    }

    /// With overwrite enabled the queue length never exceeds capacity and
    /// the oldest entry is dropped on overflow.
    #[test]
    fn overflow_overwrites_oldest() {
        let q = PacketQueue::new(3);
        for i in 0..5 {
            assert!(q.add(&pkt(i, false)));
            assert!(q.len() <= 3);
        }
        assert_eq!(q.len(), 3);
        let seqs: Vec<u32> = q.snapshot().iter().map(|p| p.sequence).collect();
        assert_eq!(seqs, [2, 3, 4]);
    }

    /// With overwrite disabled excess enqueues are rejected and the length
    /// is monotone up to capacity.
    #[test]
    fn overflow_rejects_when_overwrite_disabled() {
        let q = PacketQueue::new(3);
        q.enable_overwrite(false);
        assert!(q.add(&pkt(0, false)));
        assert!(q.add(&pkt(1, false)));
        assert!(q.add(&pkt(2, false)));
        assert!(!q.add(&pkt(3, false)));
        assert_eq!(q.len(), 3);
        let seqs: Vec<u32> = q.snapshot().iter().map(|p| p.sequence).collect();
        assert_eq!(seqs, [0, 1, 2]);
    }

    #[test]
    fn empty_distinguishable_from_full() {
        let q = PacketQueue::new(2);
        assert!(q.is_empty());
        q.add(&pkt(0, false));
        q.add(&pkt(1, false));
        assert_eq!(q.len(), 2);
        assert!(q.delete_first());
        assert!(q.delete_first());
        assert!(!q.delete_first());
        assert!(q.is_empty());
    }

    #[test]
    fn sequence_probes() {
        let q = PacketQueue::new(8);
        assert_eq!(q.first_sent_sequence(), SEQUENCE_ALL);
        assert_eq!(q.last_sequence(), SEQUENCE_ALL);

        q.add(&pkt(10, true));
        q.add(&pkt(11, true));
        q.add(&pkt(12, false));
        assert_eq!(q.first_sent_sequence(), 10);
        assert_eq!(q.last_sequence(), 12);
        assert!(q.has_unsent());
        assert!(q.has_sent_with_sequence(11));
        // the walk must stop at the first unsent packet
        assert!(!q.has_sent_with_sequence(12));
    }

    /// After acknowledging sequence `s`, no sent packet at or before the
    /// match remains at the head of the queue.
    #[test]
    fn acknowledge_to_sequence() {
        let q = PacketQueue::new(8);
        q.add(&pkt(1, true));
        q.add(&pkt(2, true));
        q.add(&pkt(3, true));
        q.add(&pkt(4, false));

        assert!(q.acknowledge_to_sequence(2));
        let seqs: Vec<u32> = q.snapshot().iter().map(|p| p.sequence).collect();
        assert_eq!(seqs, [3, 4]);

        // unmatched sequence deletes nothing past the sent run
        assert!(!q.acknowledge_to_sequence(9));
        assert_eq!(q.len(), 1);
        assert_eq!(q.snapshot()[0].sequence, 4);
    }

    /// The masked low byte is what is compared: sequence 0x102 acknowledges
    /// a packet whose one-byte sequence field holds 0x02.
    #[test]
    fn acknowledge_masks_low_bytes() {
        let q = PacketQueue::new(4);
        q.add(&pkt(0x02, true));
        assert!(q.acknowledge_to_sequence(0x0102));
        assert!(q.is_empty());
    }

    /// `SEQUENCE_ALL` drops every sent packet and stops at the unsent run.
    #[test]
    fn acknowledge_all() {
        let q = PacketQueue::new(8);
        q.add(&pkt(1, true));
        q.add(&pkt(2, true));
        q.add(&pkt(3, false));
        assert!(q.acknowledge_to_sequence(SEQUENCE_ALL));
        assert_eq!(q.len(), 1);
        assert!(q.has_unsent());
    }

    #[test]
    fn take_unsent_priority_first() {
        let q = PacketQueue::new(8);
        let mut low = pkt(1, false);
        low.priority = Priority::Low;
        let mut high = pkt(2, false);
        high.priority = Priority::High;
        let mut normal = pkt(3, false);
        normal.priority = Priority::Normal;
        q.add(&low);
        q.add(&high);
        q.add(&normal);

        let sent = q.take_unsent(2);
        let seqs: Vec<u32> = sent.iter().map(|p| p.sequence).collect();
        assert_eq!(seqs, [2, 3]);
        assert!(q.has_unsent());
        assert_eq!(q.first_sent_sequence(), SEQUENCE_ALL); // head is unsent

        let rest = q.take_unsent(10);
        assert_eq!(rest.len(), 1);
        assert!(!q.has_unsent());
    }

    #[test]
    fn copy_to_filters_by_priority() {
        let src = PacketQueue::new(8);
        let mut low = pkt(1, false);
        low.priority = Priority::Low;
        let mut high = pkt(2, false);
        high.priority = Priority::High;
        src.add(&low);
        src.add(&high);

        let dest = PacketQueue::new(8);
        assert!(src.copy_to(&dest, Priority::Normal));
        assert_eq!(dest.len(), 1);
        assert_eq!(dest.snapshot()[0].sequence, 2);
    }
}
