//! Pending-restore ordering: linearizes concurrent, out-of-order restore
//! operations against the same object id.
//!
//! Restores race each other across transactions and can arrive in any
//! order. Per object id, a primary list holds one chain per transaction
//! that has a restore pending against it, ordered ascending by the
//! `prev_version` its head claims to restore *from*. A chain's head is the
//! node addressed by that primary slot; any further operations the same
//! transaction issued against the same object thread onto the chain's
//! secondary list, in the order it issued them.
//!
//! Pruning only ever looks at the primary head: while its `prev_version`
//! matches the version the caller has reached, the whole chain (head, then
//! secondary nodes) is popped and replayed in one pass, advancing the
//! reached version to that chain's own `version`, and the new head is
//! inspected the same way — so a single call can cascade through several
//! transactions that all became eligible at once.

use std::collections::HashMap;

use parking_lot::Mutex;
use velox_core::{ObjectId, Version};

use crate::active::TransactionId;

/// One pending restore operation against a single object id.
#[derive(Debug, Clone)]
pub struct RestoreNode {
    /// The commit version this node's transaction introduced. Pruning
    /// advances to this version once this node's whole chain is applied.
    pub version: Version,
    /// The version this restore claims to roll the object back from. Only
    /// meaningful on a chain's head — see [`RestoreNode::is_first_in_transaction`].
    pub prev_version: Version,
    /// The transaction that enqueued this restore.
    pub transaction_id: TransactionId,
    /// Whether this operation deletes the object (undo of a create) rather
    /// than restoring a prior value.
    pub is_delete: bool,
    /// Whether this is the head of its transaction's chain for this
    /// object — the node that occupies a slot in the primary list.
    pub is_first_in_transaction: bool,
    /// Whether this is the last operation in its transaction's chain for
    /// this object. `try_prune` reports `!is_last_in_transaction` to its
    /// caller as each node is applied, so the caller knows whether more of
    /// the same transaction's operations are still coming.
    pub is_last_in_transaction: bool,
    /// Opaque payload the operation needs (e.g. the restored bytes).
    pub param: Vec<u8>,
}

#[derive(Debug)]
struct TransactionChain {
    head: RestoreNode,
    secondary: Vec<RestoreNode>,
}

#[derive(Debug, Default)]
struct PerObjectEntry {
    /// Ascending by `head.prev_version`. Only the first chain is ever
    /// eligible to prune.
    primary: Vec<TransactionChain>,
}

/// Coordinates pending restores across all object ids.
#[derive(Default)]
pub struct PendingRestoreMap {
    entries: Mutex<HashMap<ObjectId, PerObjectEntry>>,
}

impl PendingRestoreMap {
    /// An empty map.
    pub fn new() -> Self {
        PendingRestoreMap {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pending restore `node` for `id`.
    ///
    /// If `node.is_first_in_transaction`, it starts a new chain, inserted
    /// in ascending `prev_version` order (becoming the new head if it is
    /// smaller than the current one). Otherwise it is appended to the
    /// secondary list of the chain whose head's `version` matches this
    /// node's `version` — the rest of that same transaction's operations.
    ///
    /// # Panics
    ///
    /// Panics if `node.is_first_in_transaction` is false but `id` has no
    /// entry yet, or no chain's head `version` matches this node's — both
    /// indicate a secondary node arrived with no chain to attach to, which
    /// this module treats as corrupted state.
    pub fn add(&self, id: ObjectId, node: RestoreNode) {
        let mut entries = self.entries.lock();

        if node.is_first_in_transaction {
            let entry = entries.entry(id).or_default();
            let insert_at = entry.primary.partition_point(|chain| chain.head.prev_version <= node.prev_version);
            entry.primary.insert(insert_at, TransactionChain { head: node, secondary: Vec::new() });
        } else {
            let entry = entries
                .get_mut(&id)
                .unwrap_or_else(|| panic!("secondary restore node for {id} arrived with no pending entry"));
            let chain = entry
                .primary
                .iter_mut()
                .find(|chain| chain.head.version == node.version)
                .unwrap_or_else(|| panic!("secondary restore node for {id} matches no pending transaction chain"));
            chain.secondary.push(node);
        }
    }

    /// Cascade-apply every transaction chain eligible to run against `id`
    /// starting from `current_version`.
    ///
    /// While the primary head's `prev_version` equals the version reached
    /// so far, its whole chain (head, then secondary nodes in issue order)
    /// is popped and passed to `action(node, more_after_transaction)` one
    /// node at a time, `more_after_transaction` being
    /// `!node.is_last_in_transaction`. The version reached then advances to
    /// that chain's own `version`, and the new primary head is checked the
    /// same way — so one call can apply several transactions. Returns
    /// `true` if at least one chain was applied. When the primary list
    /// empties, the entry is removed.
    ///
    /// # Panics
    ///
    /// Panics if `id` has no pending-restore entry at all — pruning a
    /// restore that was never added is treated as corrupted state, not a
    /// retryable condition.
    pub fn try_prune(&self, id: ObjectId, current_version: Version, mut action: impl FnMut(&RestoreNode, bool)) -> bool {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&id)
            .unwrap_or_else(|| panic!("try_prune called with no pending-restore entry for {id}"));

        let mut version = current_version;
        let mut applied_any = false;

        while let Some(chain) = entry.primary.first() {
            if chain.head.prev_version != version {
                break;
            }
            let chain = entry.primary.remove(0);

            action(&chain.head, !chain.head.is_last_in_transaction);
            for node in &chain.secondary {
                action(node, !node.is_last_in_transaction);
            }

            version = chain.head.version;
            applied_any = true;
        }

        if entry.primary.is_empty() {
            entries.remove(&id);
        }
        applied_any
    }

    /// Whether `id` currently has any pending restores queued.
    pub fn has_pending(&self, id: ObjectId) -> bool {
        self.entries.lock().contains_key(&id)
    }
}
