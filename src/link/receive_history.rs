use std::collections::VecDeque;

/// The most recently received sequence numbers of a link, used to build selective acks
#[derive(Debug, Clone)]
pub struct ReceiveHistory {
    capacity: usize,
    sequence_modulus: u64,
    entries: VecDeque<u32>,
}

impl ReceiveHistory {
    pub const MASK_BITS: u32 = u32::BITS;

    pub fn new(capacity: usize, sequence_modulus: u64) -> ReceiveHistory {
        ReceiveHistory {
            capacity,
            sequence_modulus,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Records a received sequence number and returns the mask to acknowledge it with
    pub fn on_received(&mut self, sequence: u32) -> u32 {
        if !self.entries.contains(&sequence) {
            if self.entries.len() == self.capacity {
                self.entries.pop_front();
            }
            self.entries.push_back(sequence);
        }
        self.received_mask(sequence)
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.entries.contains(&sequence)
    }

    /// bit `i` is set iff `sequence - i` (modulo the sequence space) is in the history, for
    ///  `0 < i < 32`
    pub fn received_mask(&self, sequence: u32) -> u32 {
        let mut mask = 0;
        for i in 1..Self::MASK_BITS {
            let previous = (sequence as u64 + self.sequence_modulus - i as u64) % self.sequence_modulus;
            if self.entries.contains(&(previous as u32)) {
                mask |= 1 << i;
            }
        }
        mask
    }
}
