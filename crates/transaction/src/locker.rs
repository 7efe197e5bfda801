//! The class locker: the per-class reader/writer arbiter.
//!
//! Readers and writers never block — every operation here either succeeds
//! immediately or fails immediately with [`Error::Conflict`], and the
//! caller decides whether to retry or roll the transaction back. The only
//! state shared across cores is the scalar reader bookkeeping; per-core
//! writer state is striped so that two writers on different cores never
//! contend on the same cache line, and the aggregate sum over all stripes
//! is paid only when a reader acquires (or a writer upgrades), which is
//! already the slow path relative to the per-core write fast path.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use velox_core::{Error, Result, Version};

use crate::collaborators::CpuTopology;

/// Pads `T` out to a cache line so adjacent elements of a `Vec<CachePadded<T>>`
/// never share one, which is the entire point of striping writer state per
/// core: two cores writing their own stripe must not ping-pong the same
/// cache line between them.
#[repr(align(64))]
#[derive(Debug, Default)]
struct CachePadded<T>(T);

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

#[derive(Debug, Default)]
struct WriterState {
    /// Count of writers currently in flight on this core's stripe.
    in_flight_writers: AtomicU32,
    /// Highest commit version any writer on this stripe has published.
    last_committed_version: AtomicU64,
}

#[derive(Debug, Default)]
struct ReadLockState {
    /// Number of transactions currently holding this class's read lock.
    reader_count: u32,
    /// Highest commit version published by a transaction releasing this
    /// class's read lock. Distinct from the per-stripe writer versions —
    /// this tracks read-side releases, not writes.
    committed_read_lock_version: Version,
}

/// Per-class reader/writer arbiter.
///
/// One instance exists per class (concrete, non-abstract — see
/// [`crate::hierarchy`] for how abstract classes fan out to these).
#[derive(Debug)]
pub struct ClassLocker {
    read_state: Mutex<ReadLockState>,
    writers: Vec<CachePadded<WriterState>>,
}

impl ClassLocker {
    /// Build a locker with one writer stripe per core reported by `topology`.
    pub fn new(topology: &dyn CpuTopology) -> Self {
        let core_count = topology.core_count().max(1);
        ClassLocker {
            read_state: Mutex::new(ReadLockState {
                reader_count: 0,
                committed_read_lock_version: Version::NONE,
            }),
            writers: (0..core_count).map(|_| CachePadded::default()).collect(),
        }
    }

    fn stripe(&self, core: usize) -> &WriterState {
        &self.writers[core % self.writers.len()]
    }

    /// The highest commit version published across every writer stripe.
    fn newest_committed_version(&self) -> Version {
        let mut newest = Version::NONE;
        for stripe in &self.writers {
            let committed = Version::new(stripe.last_committed_version.load(Ordering::Acquire));
            if committed > newest {
                newest = committed;
            }
        }
        newest
    }

    /// Attempt to take a read lock for a snapshot at `read_version`.
    ///
    /// Idempotent: if `already_held` (the calling transaction already holds
    /// this class's read lock), succeeds without touching any counter.
    /// Otherwise fails with [`Error::Conflict`] if: any writer stripe has
    /// published a commit version newer than `read_version` (the snapshot
    /// would observe a write it predates); more than one writer is in
    /// flight across all stripes; or exactly one writer is in flight and
    /// `writer_is_self` is false (a writer from another transaction holds
    /// the class). On success, increments the reader count.
    pub fn try_take_read_lock(&self, read_version: Version, already_held: bool, writer_is_self: bool) -> Result<()> {
        if already_held {
            return Ok(());
        }

        let newest_committed = self.newest_committed_version();
        if newest_committed > read_version {
            return Err(Error::Conflict(format!(
                "class committed version {newest_committed} is newer than snapshot {read_version}"
            )));
        }

        let in_flight: u32 = self.writers.iter().map(|s| s.in_flight_writers.load(Ordering::Acquire)).sum();
        if in_flight > 1 {
            return Err(Error::Conflict("more than one writer in flight for this class".into()));
        }
        if in_flight == 1 && !writer_is_self {
            return Err(Error::Conflict("a writer from another transaction is in flight for this class".into()));
        }

        self.read_state.lock().reader_count += 1;
        Ok(())
    }

    /// Release a read lock taken by a transaction that committed at
    /// `commit_version`, publishing `max(committed_read_lock_version,
    /// commit_version)`. Always succeeds.
    pub fn commit_read_lock(&self, commit_version: Version) {
        let mut state = self.read_state.lock();
        state.reader_count = state.reader_count.saturating_sub(1);
        if commit_version > state.committed_read_lock_version {
            state.committed_read_lock_version = commit_version;
        }
    }

    /// Release a read lock taken by a transaction that rolled back.
    /// Decrements the reader count only — a rollback publishes nothing.
    pub fn rollback_read_lock(&self) {
        let mut state = self.read_state.lock();
        state.reader_count = state.reader_count.saturating_sub(1);
    }

    /// Attempt to reserve a writer slot on the calling core's stripe for a
    /// transaction reading at `read_version`.
    ///
    /// Fails with [`Error::Conflict`] if `committed_read_lock_version` is
    /// newer than `read_version` (a reader has already published past this
    /// writer's snapshot), or if a reader other than the caller holds this
    /// class — more than one reader, or exactly one reader and
    /// `self_holds_read_lock` is false. On success, increments the
    /// caller-core's in-flight writer count.
    pub fn try_add_writer(&self, core: usize, read_version: Version, self_holds_read_lock: bool) -> Result<()> {
        let state = self.read_state.lock();
        if state.committed_read_lock_version > read_version {
            return Err(Error::Conflict(format!(
                "a read lock already committed past this transaction's snapshot {read_version}"
            )));
        }
        if state.reader_count > 1 || (state.reader_count == 1 && !self_holds_read_lock) {
            return Err(Error::Conflict("a reader from another transaction holds this class".into()));
        }
        drop(state);

        self.stripe(core).in_flight_writers.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Commit a write at `version`: decrement the caller core's in-flight
    /// writer count, then publish `version` as that stripe's committed
    /// version if it is a new high-water mark.
    pub fn commit_write(&self, core: usize, version: Version) {
        let stripe = self.stripe(core);
        stripe.in_flight_writers.fetch_sub(1, Ordering::AcqRel);
        stripe.last_committed_version.fetch_max(version.as_u64(), Ordering::AcqRel);
    }

    /// Roll back a write, decrementing the caller core's in-flight writer
    /// count without publishing any version. Always succeeds.
    pub fn rollback_write(&self, core: usize) {
        self.stripe(core).in_flight_writers.fetch_sub(1, Ordering::AcqRel);
    }

    /// The highest version currently committed and visible to new readers.
    pub fn committed_version(&self) -> Version {
        self.newest_committed_version()
    }

    /// Zero every committed-version field: each stripe's
    /// `last_committed_version` and the scalar `committed_read_lock_version`.
    /// Used after failure recovery; leaves reader/writer counts untouched.
    pub fn rewind(&self) {
        self.read_state.lock().committed_read_lock_version = Version::NONE;
        for stripe in &self.writers {
            stripe.last_committed_version.store(0, Ordering::Release);
        }
    }
}
