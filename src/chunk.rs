//! Chunked storage for network output
//!
//! The producer evaluates the network one chunk at a time and the real-time
//! consumer reads single samples back out by (chunk index, offset). Storage
//! is a bounded arena: slot = `index % window_size`, so steady-state
//! streaming touches a fixed allocation no matter how long the stream runs.
//! A lock-free pool recycles the per-channel sample buffers between
//! eviction on the consumer side and production on the network side.

use crate::error::EngineError;
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

/// One window of network output: a fixed-length sample sequence per output
/// channel, identified by a monotonically increasing index. Immutable once
/// inserted into the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    index: u64,
    channels: Vec<Vec<f32>>,
}

impl Chunk {
    /// Build a chunk, checking every channel has exactly `samples_per_chunk`
    /// samples.
    pub fn new(
        index: u64,
        channels: Vec<Vec<f32>>,
        samples_per_chunk: usize,
    ) -> Result<Self, EngineError> {
        for (channel, data) in channels.iter().enumerate() {
            if data.len() != samples_per_chunk {
                return Err(EngineError::ChunkSize {
                    index,
                    channel,
                    got: data.len(),
                    expected: samples_per_chunk,
                });
            }
        }
        Ok(Self { index, channels })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Sample at `offset` on `channel`; 0.0 for a channel the network does
    /// not produce, so a graph wired to a missing channel degrades to
    /// silence on that input instead of failing mid-quantum.
    pub fn sample(&self, channel: usize, offset: usize) -> f32 {
        match self.channels.get(channel) {
            Some(data) => data[offset],
            None => 0.0,
        }
    }

    /// Take the channel buffers back out, for recycling through a pool.
    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}

/// Lock-free recycling pool for chunk channel buffers.
///
/// The consumer pushes evicted buffers back, the producer pops them before
/// the next network evaluation. Push and pop are wait-free enough for the
/// real-time side; when the queue is empty the producer just allocates.
pub struct ChunkPool {
    free: ArrayQueue<Vec<f32>>,
    chunk_len: usize,
}

impl ChunkPool {
    pub fn new(chunk_len: usize, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: ArrayQueue::new(capacity.max(1)),
            chunk_len,
        })
    }

    /// Allocate buffers upfront so steady-state streaming never allocates.
    pub fn prefill(&self, count: usize) {
        for _ in 0..count {
            let _ = self.free.push(vec![0.0; self.chunk_len]);
        }
    }

    /// A zeroed buffer of `chunk_len` samples, recycled if one is available.
    pub fn acquire(&self) -> Vec<f32> {
        match self.free.pop() {
            Some(mut buffer) => {
                buffer.fill(0.0);
                buffer
            }
            None => vec![0.0; self.chunk_len],
        }
    }

    /// Return a buffer; dropped silently if the pool is full.
    pub fn release(&self, mut buffer: Vec<f32>) {
        if buffer.len() != self.chunk_len {
            buffer.resize(self.chunk_len, 0.0);
        }
        let _ = self.free.push(buffer);
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}

/// Bounded arena of chunks, keyed by chunk index.
///
/// Lookup of an absent index is a normal `None`, never an error: the
/// consumer treats it as "not yet delivered". Insertion rejects a different
/// chunk under an already-occupied index; re-inserting identical data is a
/// no-op.
pub struct ChunkBuffer {
    slots: Vec<Option<Chunk>>,
    window_size: usize,
}

impl ChunkBuffer {
    pub fn new(window_size: usize) -> Self {
        Self {
            slots: (0..window_size.max(1)).map(|_| None).collect(),
            window_size: window_size.max(1),
        }
    }

    fn slot(&self, index: u64) -> usize {
        (index % self.window_size as u64) as usize
    }

    /// Store a chunk.
    ///
    /// Errors: [`EngineError::DuplicateChunk`] if the index is already
    /// present with different data, [`EngineError::BufferFull`] if the slot
    /// still holds an older, un-evicted chunk (the producer outran the
    /// window, which backpressure pacing should prevent).
    pub fn insert(&mut self, chunk: Chunk) -> Result<(), EngineError> {
        let slot = self.slot(chunk.index());
        match &self.slots[slot] {
            Some(existing) if existing.index() == chunk.index() => {
                if *existing == chunk {
                    Ok(())
                } else {
                    Err(EngineError::DuplicateChunk(chunk.index()))
                }
            }
            Some(existing) => Err(EngineError::BufferFull {
                incoming: chunk.index(),
                occupied: existing.index(),
            }),
            None => {
                self.slots[slot] = Some(chunk);
                Ok(())
            }
        }
    }

    /// Non-blocking point lookup; `None` means "not yet available".
    pub fn lookup(&self, index: u64) -> Option<&Chunk> {
        match &self.slots[self.slot(index)] {
            Some(chunk) if chunk.index() == index => Some(chunk),
            _ => None,
        }
    }

    /// Remove every chunk with index strictly less than `index`, returning
    /// them so the caller can signal and recycle. Safe when nothing matches.
    pub fn evict_before(&mut self, index: u64) -> Vec<Chunk> {
        let mut evicted = Vec::new();
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(chunk) if chunk.index() < index) {
                if let Some(chunk) = slot.take() {
                    evicted.push(chunk);
                }
            }
        }
        evicted.sort_by_key(|c| c.index());
        evicted
    }

    /// Number of retained chunks, used for backpressure decisions.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Retained chunks at or ahead of `index` (the consumer's lookahead).
    pub fn len_from(&self, index: u64) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Some(chunk) if chunk.index() >= index))
            .count()
    }

    /// Drop everything, handing the buffers to `pool` for reuse.
    pub fn clear(&mut self, pool: &ChunkPool) {
        for slot in self.slots.iter_mut() {
            if let Some(chunk) = slot.take() {
                for buffer in chunk.into_channels() {
                    pool.release(buffer);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: u64, fill: f32, len: usize) -> Chunk {
        Chunk::new(index, vec![vec![fill; len]], len).unwrap()
    }

    #[test]
    fn test_chunk_rejects_wrong_length() {
        let result = Chunk::new(0, vec![vec![0.0; 10], vec![0.0; 9]], 10);
        assert!(matches!(
            result,
            Err(EngineError::ChunkSize { channel: 1, got: 9, .. })
        ));
    }

    #[test]
    fn test_missing_channel_reads_silence() {
        let c = chunk(0, 0.5, 8);
        assert_eq!(c.sample(0, 3), 0.5);
        assert_eq!(c.sample(7, 3), 0.0);
    }

    #[test]
    fn test_lookup_absent_is_none_not_error() {
        let buffer = ChunkBuffer::new(4);
        assert!(buffer.lookup(0).is_none());
        assert!(buffer.lookup(99).is_none());
    }

    #[test]
    fn test_insert_and_lookup_by_index() {
        let mut buffer = ChunkBuffer::new(4);
        buffer.insert(chunk(2, 0.2, 8)).unwrap();
        buffer.insert(chunk(0, 0.0, 8)).unwrap();
        // out-of-order arrival: retrieval is by index, not order
        assert_eq!(buffer.lookup(2).unwrap().sample(0, 0), 0.2);
        assert_eq!(buffer.lookup(0).unwrap().sample(0, 0), 0.0);
        assert!(buffer.lookup(1).is_none());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_duplicate_identical_is_noop() {
        let mut buffer = ChunkBuffer::new(4);
        buffer.insert(chunk(1, 0.5, 8)).unwrap();
        buffer.insert(chunk(1, 0.5, 8)).unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_duplicate_conflicting_is_error() {
        let mut buffer = ChunkBuffer::new(4);
        buffer.insert(chunk(1, 0.5, 8)).unwrap();
        let result = buffer.insert(chunk(1, 0.6, 8));
        assert!(matches!(result, Err(EngineError::DuplicateChunk(1))));
    }

    #[test]
    fn test_window_overflow_is_error() {
        let mut buffer = ChunkBuffer::new(4);
        buffer.insert(chunk(0, 0.0, 8)).unwrap();
        // index 4 maps to the same slot as 0
        let result = buffer.insert(chunk(4, 0.4, 8));
        assert!(matches!(
            result,
            Err(EngineError::BufferFull { incoming: 4, occupied: 0 })
        ));
    }

    #[test]
    fn test_evict_before() {
        let mut buffer = ChunkBuffer::new(8);
        for i in 0..5 {
            buffer.insert(chunk(i, i as f32, 8)).unwrap();
        }
        let evicted = buffer.evict_before(3);
        let indices: Vec<u64> = evicted.iter().map(|c| c.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(buffer.lookup(2).is_none());
        assert!(buffer.lookup(3).is_some());
        // idempotent: nothing left below 3
        assert!(buffer.evict_before(3).is_empty());
    }

    #[test]
    fn test_len_from() {
        let mut buffer = ChunkBuffer::new(8);
        for i in 2..6 {
            buffer.insert(chunk(i, 0.0, 4)).unwrap();
        }
        assert_eq!(buffer.len_from(4), 2);
        assert_eq!(buffer.len_from(0), 4);
        assert_eq!(buffer.len_from(6), 0);
    }

    #[test]
    fn test_pool_recycles_buffers() {
        let pool = ChunkPool::new(16, 4);
        pool.prefill(2);
        assert_eq!(pool.len(), 2);

        let mut buffer = pool.acquire();
        assert_eq!(buffer.len(), 16);
        buffer[0] = 1.0;
        pool.release(buffer);

        // recycled buffer comes back zeroed
        let buffer = pool.acquire();
        assert_eq!(buffer[0], 0.0);
    }

    #[test]
    fn test_clear_returns_buffers_to_pool() {
        let pool = ChunkPool::new(8, 8);
        let mut buffer = ChunkBuffer::new(4);
        buffer.insert(chunk(0, 0.1, 8)).unwrap();
        buffer.insert(chunk(1, 0.2, 8)).unwrap();
        buffer.clear(&pool);
        assert!(buffer.is_empty());
        assert_eq!(pool.len(), 2);
    }
}
