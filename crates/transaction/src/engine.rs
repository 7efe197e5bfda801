//! The engine facade: wires C1–C7 together behind the upward interface —
//! begin/commit/rollback, object reads, changeset application, id-range
//! allocation, class-locker access, and active-transaction introspection.
//!
//! This module contains no concurrency logic of its own. Every hard
//! decision (snapshot checks, writer striping, log chunking, restore
//! ordering, counter CAS) lives in the component module that owns it; this
//! is strictly wiring.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::warn;
use velox_core::{Error, ObjectId, Result, Version, WellKnownId};

use crate::active::{ActiveTransactionSet, TransactionId};
use crate::collaborators::{ChangesetCodec, CpuTopology, ModelDescriptor, ObjectStoreFacade};
use crate::hierarchy::{ClassHierarchy, ClassIndex};
use crate::idrange::{IdRangeAllocator, SingletonCounterStore};
use crate::locker::ClassLocker;
use crate::log::LogConfig;
use crate::transaction::TransactionContext;

/// Composes the transactional core's components over a set of downward
/// collaborators (`M`odel, `S`tore, `C`PU topology, changeset `T`ranscoder).
pub struct Engine<M, S, C, T>
where
    M: ModelDescriptor,
    S: ObjectStoreFacade,
    C: CpuTopology,
    T: ChangesetCodec,
{
    model: M,
    store: S,
    topology: C,
    codec: T,
    classes: Vec<ClassLocker>,
    active: Mutex<ActiveTransactionSet>,
    next_transaction_id: AtomicU64,
    global_version: AtomicU64,
    log_config: LogConfig,
    /// Committed value of the `IdGenerator` singleton. Modeled as a direct
    /// compare-and-swap here rather than a full write through the object
    /// store and changeset-apply path, since that path's wire format is
    /// out of this crate's scope; the observable contract — atomic,
    /// conflict-detecting advancement — is the same either way.
    id_generator_counter: AtomicU64,
}

impl<M, S, C, T> Engine<M, S, C, T>
where
    M: ModelDescriptor,
    S: ObjectStoreFacade,
    C: CpuTopology,
    T: ChangesetCodec,
{
    /// Build a fresh engine. `initial_version` is the global version to
    /// resume counting from (`0` for a brand-new database).
    pub fn new(model: M, store: S, topology: C, codec: T, initial_version: Version, log_config: LogConfig) -> Self {
        let class_count = model.class_count();
        let classes = (0..class_count).map(|_| ClassLocker::new(&topology)).collect();
        Engine {
            model,
            store,
            topology,
            codec,
            classes,
            active: Mutex::new(ActiveTransactionSet::new()),
            next_transaction_id: AtomicU64::new(1),
            global_version: AtomicU64::new(initial_version.as_u64()),
            log_config,
            id_generator_counter: AtomicU64::new(0),
        }
    }

    fn hierarchy(&self) -> ClassHierarchy<'_> {
        ClassHierarchy::new(&self.model)
    }

    /// The class locker for a dense class index.
    pub fn get_class_locker(&self, class_index: ClassIndex) -> &ClassLocker {
        &self.classes[class_index]
    }

    /// Begin a new transaction, registering it in the active set at the
    /// engine's current global version.
    pub fn begin_transaction(&self) -> TransactionContext {
        let id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        let read_version = Version::new(self.global_version.load(Ordering::Acquire));
        self.active.lock().add(id, read_version);
        TransactionContext::begin(id, read_version, self.log_config)
    }

    /// Take a read lock on `class_index`, fanning out through every
    /// concrete descendant if it names an abstract class. Idempotent per
    /// descendant: a class already held by `txn` is not re-acquired.
    pub fn try_read(&self, txn: &mut TransactionContext, class_index: ClassIndex) -> Result<()> {
        let descendants = self.hierarchy().concrete_descendants(class_index);
        for concrete in descendants {
            let already_held = txn.holds_read_lock(concrete);
            let writer_is_self = txn.holds_write_lock(concrete);
            self.classes[concrete].try_take_read_lock(txn.read_version(), already_held, writer_is_self)?;
            if !already_held {
                txn.note_read_lock(concrete);
            }
        }
        Ok(())
    }

    /// Take a writer slot on `class_index`, fanning out through every
    /// concrete descendant if it names an abstract class.
    pub fn try_write(&self, txn: &mut TransactionContext, class_index: ClassIndex) -> Result<()> {
        let core = self.topology.current_core();
        let descendants = self.hierarchy().concrete_descendants(class_index);
        for concrete in descendants {
            let self_holds_read_lock = txn.holds_read_lock(concrete);
            self.classes[concrete].try_add_writer(core, txn.read_version(), self_holds_read_lock)?;
            txn.note_write_lock(concrete);
        }
        Ok(())
    }

    /// Read an object as committed at or before `as_of`.
    pub fn get_object(&self, id: ObjectId, as_of: Version) -> Option<Vec<u8>> {
        self.store.get(id, as_of)
    }

    /// Decode and apply a changeset's operations against the object store at
    /// the given commit version. The caller is responsible for having
    /// already taken the necessary writer locks.
    pub fn apply_changeset(&self, bytes: &[u8], version: Version) -> Result<()> {
        for op in self.codec.decode(bytes)? {
            op.apply(&self.store, version);
        }
        Ok(())
    }

    /// Commit a transaction: release every writer slot it holds at a fresh
    /// global version, release every read lock it holds, remove it from the
    /// active set, and free its modification log.
    pub fn commit(&self, mut txn: TransactionContext) -> Version {
        let version = Version::new(self.global_version.fetch_add(1, Ordering::AcqRel) + 1);
        let core = self.topology.current_core();

        let written: Vec<_> = txn.written_classes().collect();
        for class in written {
            self.classes[class].commit_write(core, version);
        }
        let locked: Vec<_> = txn.locked_classes().collect();
        for class in locked {
            self.classes[class].commit_read_lock(version);
        }

        txn.mark_committed();
        self.active.lock().complete(txn.id());
        txn.take_log_content().free();
        version
    }

    /// Roll back a transaction: release every writer slot and read lock it
    /// holds without publishing any version, remove it from the active
    /// set, and free its modification log. Always succeeds.
    pub fn rollback(&self, mut txn: TransactionContext) {
        let core = self.topology.current_core();

        let written: Vec<_> = txn.written_classes().collect();
        for class in written {
            self.classes[class].rollback_write(core);
        }
        let locked: Vec<_> = txn.locked_classes().collect();
        for class in locked {
            self.classes[class].rollback_read_lock();
        }

        txn.mark_rolled_back();
        self.active.lock().complete(txn.id());
        txn.take_log_content().free();
    }

    /// The read version of the oldest still-active transaction, if any.
    pub fn oldest_reader(&self) -> Option<Version> {
        self.active.lock().oldest_reader()
    }

    /// Whether any transaction is currently active.
    pub fn has_active_transactions(&self) -> bool {
        !self.active.lock().is_empty()
    }

    /// Reserve `count` consecutive object-id counters, returning `[base,
    /// base + count)`.
    pub fn take_id_range(&self, count: u64) -> Result<Range<u64>> {
        IdRangeAllocator::new(self).take_range(count)
    }
}

impl<M, S, C, T> SingletonCounterStore for Engine<M, S, C, T>
where
    M: ModelDescriptor,
    S: ObjectStoreFacade,
    C: CpuTopology,
    T: ChangesetCodec,
{
    fn read_counter(&self) -> Result<u64> {
        Ok(self.id_generator_counter.load(Ordering::Acquire))
    }

    fn try_advance_counter(&self, expected: u64, new_value: u64) -> Result<()> {
        self.id_generator_counter
            .compare_exchange(expected, new_value, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| {
                warn!(expected, actual, "id generator counter moved under a concurrent allocation");
                Error::Conflict(format!(
                    "id generator expected {expected}, found {actual}"
                ))
            })
    }
}

/// Returns the well-known object id the id-range allocator's singleton
/// counter logically corresponds to. Not consulted by [`Engine`] itself
/// (which models the singleton as a plain atomic, see its doc comment) but
/// exposed so a real object-store-backed implementation can locate the
/// same record this crate reserves for it.
pub fn id_generator_object_id() -> ObjectId {
    WellKnownId::IdGenerator.id()
}
