//! The modification log: a per-transaction, chunked, append-only byte log
//! used to record undo and lock-release entries.
//!
//! Entries are opaque byte slices to this module; all it tracks per entry is
//! which `modification_type` produced it, so a single chunk never mixes two
//! kinds of record. Chunks grow geometrically from a small initial size up
//! to a cap, so a transaction that writes little pays for little, while one
//! that writes a lot doesn't pay for a chunk per entry.

use tracing::trace;

/// Tag distinguishing what kind of record a chunk holds. The meaning of the
/// tag is owned by the caller (undo record vs. lock-release record, say);
/// this module only uses it to decide chunk boundaries.
pub type ModificationType = u8;

/// Tunables for chunk growth. Mirrors the shape of a WAL config: a
/// `Default` for production and a `for_testing()` that shrinks the sizes so
/// tests can exercise growth and the cap without allocating megabytes.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    /// Capacity of the first chunk allocated.
    pub initial_chunk_size: usize,
    /// Capacity no chunk is allowed to grow past.
    pub max_chunk_size: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            initial_chunk_size: 1024,
            max_chunk_size: 1 << 20,
        }
    }
}

impl LogConfig {
    /// A config with much smaller chunk sizes, so unit tests can reach the
    /// growth cap without allocating a megabyte-sized buffer.
    pub fn for_testing() -> Self {
        LogConfig {
            initial_chunk_size: 64,
            max_chunk_size: 512,
        }
    }
}

#[derive(Debug, Clone)]
struct Chunk {
    modification_type: ModificationType,
    data: Vec<u8>,
    capacity: usize,
}

impl Chunk {
    fn new(modification_type: ModificationType, capacity: usize) -> Self {
        Chunk {
            modification_type,
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }
}

/// An append-only, chunked byte log for one transaction's undo/lock records.
#[derive(Debug, Clone)]
pub struct ModificationLog {
    config: LogConfig,
    chunks: Vec<Chunk>,
    next_chunk_capacity: usize,
}

impl ModificationLog {
    /// Start a fresh, empty log.
    pub fn init(config: LogConfig) -> Self {
        let next_chunk_capacity = config.initial_chunk_size;
        ModificationLog {
            config,
            chunks: Vec::new(),
            next_chunk_capacity,
        }
    }

    /// Append `bytes` tagged with `modification_type`.
    ///
    /// Starts a new chunk when the log is empty, when the last chunk was
    /// tagged with a different type, or when the last chunk has no room
    /// left. A single append never spans two chunks.
    pub fn append(&mut self, modification_type: ModificationType, bytes: &[u8]) {
        let needs_new_chunk = match self.chunks.last() {
            None => true,
            Some(chunk) => {
                chunk.modification_type != modification_type || chunk.remaining() < bytes.len()
            }
        };

        if needs_new_chunk {
            let capacity = self.next_chunk_capacity.max(bytes.len());
            trace!(capacity, modification_type, "allocating modification log chunk");
            self.chunks.push(Chunk::new(modification_type, capacity));
            self.next_chunk_capacity =
                (self.next_chunk_capacity * 2).min(self.config.max_chunk_size);
        }

        self.chunks.last_mut().expect("chunk just pushed").data.extend_from_slice(bytes);
    }

    /// Detach this log's content into an owned [`ModificationChain`],
    /// leaving this log empty and ready to accept new entries.
    pub fn take_content(&mut self) -> ModificationChain {
        ModificationChain {
            chunks: std::mem::take(&mut self.chunks),
        }
    }

    /// Iterate the log's chunks in append order as `(modification_type,
    /// bytes)` pairs.
    pub fn iterate(&self) -> impl Iterator<Item = (ModificationType, &[u8])> {
        self.chunks.iter().map(|c| (c.modification_type, c.data.as_slice()))
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Explicitly release this log's chunks. Equivalent to dropping it;
    /// provided so call sites can name the release point the way the rest
    /// of this crate's resources do.
    pub fn free(self) {}
}

/// An owned, detached chain of chunks taken from a [`ModificationLog`].
/// Safe to move across threads or hold in a GC queue without borrowing the
/// transaction that produced it.
#[derive(Debug, Clone, Default)]
pub struct ModificationChain {
    chunks: Vec<Chunk>,
}

impl ModificationChain {
    /// An empty chain.
    pub fn new() -> Self {
        ModificationChain { chunks: Vec::new() }
    }

    /// Merge `other` onto the end of this chain by adopting its chunks,
    /// then coalescing adjacent same-type chunks when the combined content
    /// still fits under the largest chunk capacity seen between them. No
    /// entry is ever re-copied across chunk boundaries that aren't merged;
    /// coalescing only concatenates chunk buffers, it never re-parses them.
    pub fn merge(&mut self, other: ModificationChain) {
        self.chunks.extend(other.chunks);
        self.coalesce();
    }

    fn coalesce(&mut self) {
        if self.chunks.len() < 2 {
            return;
        }
        let mut merged: Vec<Chunk> = Vec::with_capacity(self.chunks.len());
        for chunk in self.chunks.drain(..) {
            match merged.last_mut() {
                Some(prev)
                    if prev.modification_type == chunk.modification_type
                        && prev.data.len() + chunk.data.len() <= prev.capacity.max(chunk.capacity) =>
                {
                    prev.capacity = prev.capacity.max(chunk.capacity);
                    prev.data.extend_from_slice(&chunk.data);
                }
                _ => merged.push(chunk),
            }
        }
        self.chunks = merged;
    }

    /// Iterate the chain's chunks in order.
    pub fn iterate(&self) -> impl Iterator<Item = (ModificationType, &[u8])> {
        self.chunks.iter().map(|c| (c.modification_type, c.data.as_slice()))
    }

    /// Number of chunks currently in the chain.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Release the chain's chunks.
    pub fn free(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_append_creates_one_chunk() {
        let mut log = ModificationLog::init(LogConfig::for_testing());
        log.append(1, b"hello");
        let entries: Vec<_> = log.iterate().collect();
        assert_eq!(entries, vec![(1, b"hello".as_slice())]);
    }

    #[test]
    fn different_modification_type_starts_new_chunk() {
        let mut log = ModificationLog::init(LogConfig::for_testing());
        log.append(1, b"undo");
        log.append(2, b"lock");
        let entries: Vec<_> = log.iterate().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, 1);
        assert_eq!(entries[1].0, 2);
    }

    #[test]
    fn chunk_grows_geometrically_up_to_cap() {
        let config = LogConfig::for_testing();
        let mut log = ModificationLog::init(config);
        // Fill well past the initial chunk size with same-typed entries.
        for _ in 0..20 {
            log.append(1, &[0u8; 32]);
        }
        assert!(log.chunks.len() > 1);
        for chunk in &log.chunks {
            assert!(chunk.capacity <= config.max_chunk_size);
        }
    }

    #[test]
    fn take_content_empties_the_log() {
        let mut log = ModificationLog::init(LogConfig::for_testing());
        log.append(1, b"x");
        let chain = log.take_content();
        assert!(log.is_empty());
        assert_eq!(chain.chunk_count(), 1);
    }

    #[test]
    fn merge_coalesces_adjacent_same_type_chunks() {
        let mut a = ModificationLog::init(LogConfig::default());
        a.append(1, &vec![0u8; 100]);
        let chain_a = a.take_content();

        let mut b = ModificationLog::init(LogConfig::default());
        b.append(1, &vec![0u8; 200]);
        let chain_b = b.take_content();

        let mut merged = chain_a;
        merged.merge(chain_b);

        assert_eq!(merged.chunk_count(), 1);
        let (ty, bytes) = merged.iterate().next().unwrap();
        assert_eq!(ty, 1);
        assert_eq!(bytes.len(), 300);
    }

    #[test]
    fn merge_keeps_different_types_separate() {
        let mut a = ModificationLog::init(LogConfig::default());
        a.append(1, b"undo");
        let chain_a = a.take_content();

        let mut b = ModificationLog::init(LogConfig::default());
        b.append(2, b"lock");
        let chain_b = b.take_content();

        let mut merged = chain_a;
        merged.merge(chain_b);
        assert_eq!(merged.chunk_count(), 2);
    }
}
