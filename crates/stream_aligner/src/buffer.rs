//! Per-channel pending raw buffers.
//!
//! Same index separation as a packet buffer:
//! - HeapRb keeps lightweight metadata (sequence + slab key) in arrival order
//! - Slab keeps the `RawBuffer` records themselves

use std::fmt;

use contracts::RawBuffer;
use ringbuf::{traits::*, HeapRb};
use slab::Slab;

#[derive(Debug, Clone, Copy)]
struct BufferMeta {
    sequence: u64,
    slab_key: usize,
}

/// Bounded pending list of one capture channel
pub struct ChannelBuffer {
    index: HeapRb<BufferMeta>,
    storage: Slab<RawBuffer>,
    max_depth: usize,
    overflow_count: u64,
    out_of_order_count: u64,
    last_sequence: Option<u64>,
}

impl fmt::Debug for ChannelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBuffer")
            .field("len", &self.index.occupied_len())
            .field("max_depth", &self.max_depth)
            .field("overflow", &self.overflow_count)
            .finish()
    }
}

impl ChannelBuffer {
    #[inline]
    pub fn new(max_depth: usize) -> Self {
        let max_depth = max_depth.max(1);
        Self {
            index: HeapRb::new(max_depth),
            storage: Slab::with_capacity(max_depth),
            max_depth,
            overflow_count: 0,
            out_of_order_count: 0,
            last_sequence: None,
        }
    }

    /// Append a buffer
    ///
    /// Returns the buffers pushed out: a pending duplicate of the same
    /// sequence, or the oldest arrival when the list is full.
    pub fn push(&mut self, buffer: RawBuffer) -> Vec<RawBuffer> {
        let sequence = buffer.sequence;
        let mut displaced = Vec::new();

        if let Some(last) = self.last_sequence {
            if sequence < last {
                self.out_of_order_count += 1;
            }
        }
        self.last_sequence = Some(sequence);

        if let Some(dup) = self.take(sequence) {
            displaced.push(dup);
        }

        if self.index.is_full() {
            if let Some(old) = self.index.try_pop() {
                displaced.push(self.storage.remove(old.slab_key));
            }
            self.overflow_count += 1;
        }

        let slab_key = self.storage.insert(buffer);
        let _ = self.index.try_push(BufferMeta { sequence, slab_key });
        displaced
    }

    /// Whether a buffer with `sequence` is pending
    #[inline]
    pub fn contains(&self, sequence: u64) -> bool {
        self.index.iter().any(|m| m.sequence == sequence)
    }

    /// Pending sequences in arrival order
    pub fn sequences(&self) -> impl Iterator<Item = u64> + '_ {
        self.index.iter().map(|m| m.sequence)
    }

    /// Remove and return the buffer with `sequence`
    pub fn take(&mut self, sequence: u64) -> Option<RawBuffer> {
        let pos = self.index.iter().position(|m| m.sequence == sequence)?;

        // rebuild the index; only metadata moves
        let mut metas: Vec<BufferMeta> = self.index.pop_iter().collect();
        let removed = metas.remove(pos);
        for m in metas {
            let _ = self.index.try_push(m);
        }
        Some(self.storage.remove(removed.slab_key))
    }

    /// Remove every buffer older than `sequence`
    pub fn drain_older(&mut self, sequence: u64) -> Vec<RawBuffer> {
        let mut drained = Vec::new();
        let remaining: Vec<BufferMeta> = self
            .index
            .pop_iter()
            .filter(|m| {
                if m.sequence < sequence {
                    drained.push(self.storage.remove(m.slab_key));
                    false
                } else {
                    true
                }
            })
            .collect();
        for m in remaining {
            let _ = self.index.try_push(m);
        }
        drained
    }

    /// Remove everything
    pub fn drain_all(&mut self) -> Vec<RawBuffer> {
        let metas: Vec<BufferMeta> = self.index.pop_iter().collect();
        self.last_sequence = None;
        metas
            .into_iter()
            .map(|m| self.storage.remove(m.slab_key))
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Buffers pushed out because the list was full
    #[inline]
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    #[inline]
    pub fn out_of_order_count(&self) -> u64 {
        self.out_of_order_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(sequence: u64) -> RawBuffer {
        RawBuffer::new(0, sequence, sequence as u32)
    }

    #[test]
    fn test_take_by_sequence() {
        let mut buffer = ChannelBuffer::new(4);
        buffer.push(raw(3));
        buffer.push(raw(1));
        buffer.push(raw(2));

        assert_eq!(buffer.take(1).unwrap().sequence, 1);
        assert!(buffer.take(1).is_none());
        assert_eq!(buffer.sequences().collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(buffer.out_of_order_count(), 1);
    }

    #[test]
    fn test_overflow_displaces_oldest_arrival() {
        let mut buffer = ChannelBuffer::new(2);
        assert!(buffer.push(raw(1)).is_empty());
        assert!(buffer.push(raw(2)).is_empty());
        let displaced = buffer.push(raw(3));
        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced[0].sequence, 1);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.overflow_count(), 1);
    }

    #[test]
    fn test_duplicate_sequence_replaces_pending() {
        let mut buffer = ChannelBuffer::new(4);
        buffer.push(RawBuffer::new(0, 5, 10));
        let displaced = buffer.push(RawBuffer::new(0, 5, 11));
        assert_eq!(displaced[0].descriptor, 10);
        assert_eq!(buffer.take(5).unwrap().descriptor, 11);
    }

    #[test]
    fn test_drain_older() {
        let mut buffer = ChannelBuffer::new(8);
        for s in [4, 1, 6, 2] {
            buffer.push(raw(s));
        }
        let mut drained: Vec<_> = buffer.drain_older(4).iter().map(|b| b.sequence).collect();
        drained.sort_unstable();
        assert_eq!(drained, vec![1, 2]);
        assert_eq!(buffer.sequences().collect::<Vec<_>>(), vec![4, 6]);
        assert_eq!(buffer.drain_all().len(), 2);
        assert!(buffer.is_empty());
    }
}
