//! Transaction lifecycle bookkeeping: what a transaction has locked, what it
//! has written, and the undo/lock-release log it accumulates as it runs.
//!
//! This module only tracks state; actually taking and releasing locks is
//! the engine's job (see [`crate::engine::Engine`]), which calls into
//! [`crate::locker::ClassLocker`] and records the outcome here so commit
//! and rollback both know exactly what to release.

use std::collections::HashMap;

use velox_core::Version;

use crate::active::TransactionId;
use crate::hierarchy::ClassIndex;
use crate::log::{LogConfig, ModificationChain, ModificationLog, ModificationType};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Open; may still read, write, commit or roll back.
    Active,
    /// Committed; all locks released, writes visible.
    Committed,
    /// Rolled back; all locks released, no writes visible.
    RolledBack,
}

/// Modification-log tags this crate appends for its own bookkeeping.
/// Collaborators that append their own undo records should pick tags
/// outside this range.
pub mod modification_type {
    use super::ModificationType;

    /// A class whose read lock must be released when this transaction ends.
    pub const READ_LOCK: ModificationType = 0;
    /// A class whose writer slot must be released when this transaction ends.
    pub const WRITE_LOCK: ModificationType = 1;
}

/// One in-flight transaction's bookkeeping: identity, snapshot, and the
/// counted multisets of classes it has locked for reading or writing.
#[derive(Debug)]
pub struct TransactionContext {
    id: TransactionId,
    read_version: Version,
    status: TransactionStatus,
    locked_classes: HashMap<ClassIndex, u32>,
    written_classes: HashMap<ClassIndex, u32>,
    log: ModificationLog,
}

impl TransactionContext {
    /// Begin a new transaction with the given id and read snapshot.
    pub fn begin(id: TransactionId, read_version: Version, log_config: LogConfig) -> Self {
        TransactionContext {
            id,
            read_version,
            status: TransactionStatus::Active,
            locked_classes: HashMap::new(),
            written_classes: HashMap::new(),
            log: ModificationLog::init(log_config),
        }
    }

    /// This transaction's identity within the active-transaction set.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The snapshot version this transaction reads through.
    pub fn read_version(&self) -> Version {
        self.read_version
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Record that this transaction now holds a read lock on `class_index`.
    /// Counted: noting the same class twice (e.g. through two different
    /// fan-out paths) requires releasing it twice.
    pub fn note_read_lock(&mut self, class_index: ClassIndex) {
        *self.locked_classes.entry(class_index).or_insert(0) += 1;
        self.log.append(modification_type::READ_LOCK, &(class_index as u64).to_le_bytes());
    }

    /// Record that this transaction now holds a writer slot on `class_index`.
    pub fn note_write_lock(&mut self, class_index: ClassIndex) {
        *self.written_classes.entry(class_index).or_insert(0) += 1;
        self.log.append(modification_type::WRITE_LOCK, &(class_index as u64).to_le_bytes());
    }

    /// Every class this transaction currently holds a read lock on.
    pub fn locked_classes(&self) -> impl Iterator<Item = ClassIndex> + '_ {
        self.locked_classes.iter().flat_map(|(&class, &count)| std::iter::repeat(class).take(count as usize))
    }

    /// Every class this transaction currently holds a writer slot on.
    pub fn written_classes(&self) -> impl Iterator<Item = ClassIndex> + '_ {
        self.written_classes.iter().flat_map(|(&class, &count)| std::iter::repeat(class).take(count as usize))
    }

    /// Whether this transaction already holds `class_index`'s read lock —
    /// used to make re-acquiring it idempotent instead of double-counting.
    pub fn holds_read_lock(&self, class_index: ClassIndex) -> bool {
        self.locked_classes.contains_key(&class_index)
    }

    /// Whether this transaction already holds `class_index`'s writer slot.
    pub fn holds_write_lock(&self, class_index: ClassIndex) -> bool {
        self.written_classes.contains_key(&class_index)
    }

    /// Mark this transaction committed. Idempotent only in the sense that
    /// callers are expected to call it exactly once, at commit.
    pub fn mark_committed(&mut self) {
        self.status = TransactionStatus::Committed;
    }

    /// Mark this transaction rolled back.
    pub fn mark_rolled_back(&mut self) {
        self.status = TransactionStatus::RolledBack;
    }

    /// Detach this transaction's modification log, leaving it empty. Called
    /// once the engine has finished releasing every lock the log recorded.
    pub fn take_log_content(&mut self) -> ModificationChain {
        self.log.take_content()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begins_active_with_empty_sets() {
        let txn = TransactionContext::begin(1, Version::new(5), LogConfig::for_testing());
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.read_version(), Version::new(5));
        assert_eq!(txn.status(), TransactionStatus::Active);
        assert_eq!(txn.locked_classes().count(), 0);
    }

    #[test]
    fn note_read_lock_counts_repeats() {
        let mut txn = TransactionContext::begin(1, Version::NONE, LogConfig::for_testing());
        txn.note_read_lock(3);
        txn.note_read_lock(3);
        txn.note_read_lock(7);
        let mut classes: Vec<_> = txn.locked_classes().collect();
        classes.sort_unstable();
        assert_eq!(classes, vec![3, 3, 7]);
    }

    #[test]
    fn status_transitions_to_committed() {
        let mut txn = TransactionContext::begin(1, Version::NONE, LogConfig::for_testing());
        txn.mark_committed();
        assert_eq!(txn.status(), TransactionStatus::Committed);
    }

    #[test]
    fn take_log_content_detaches_recorded_entries() {
        let mut txn = TransactionContext::begin(1, Version::NONE, LogConfig::for_testing());
        txn.note_write_lock(2);
        let chain = txn.take_log_content();
        assert_eq!(chain.chunk_count(), 1);
        assert_eq!(txn.take_log_content().chunk_count(), 0);
    }
}
