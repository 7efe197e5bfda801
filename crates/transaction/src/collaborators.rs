//! Downward interface: the collaborators this crate expects the surrounding
//! engine to provide.
//!
//! None of these traits are implemented here beyond thin test doubles. The
//! data-model compiler, the real object store and the changeset wire format
//! all live outside this crate's scope; these traits are the seam.

use velox_core::{ClassId, ObjectId, Version};

/// Maps class ids to dense indices and exposes inheritance, the same
/// descriptor [`velox_core::id::ModelDescriptor`] resolves classes through.
pub trait ModelDescriptor: Send + Sync {
    /// Number of classes known to the model, including abstract ones.
    fn class_count(&self) -> usize;

    /// Dense index for a class id, if known.
    fn class_index_of(&self, class_id: ClassId) -> Option<usize>;

    /// Direct children of a class, by dense index. Leaf classes have none.
    fn children_of(&self, class_index: usize) -> &[usize];

    /// Whether a class is abstract (has no objects of its own, only via
    /// inherited descendants).
    fn is_abstract(&self, class_index: usize) -> bool;
}

/// CPU-topology oracle used to stripe per-class writer state across cores.
///
/// `current_core()` is read once per call site and never cached; migrating
/// between the read and the subsequent atomic update is tolerated (see the
/// locker's snapshot-isolation checks).
pub trait CpuTopology: Send + Sync {
    /// Number of stripes to allocate per class locker.
    fn core_count(&self) -> usize;

    /// The stripe index the calling thread should use right now.
    fn current_core(&self) -> usize;
}

/// The committed-object store this crate reads through and writes behind.
/// Intentionally minimal: get/put by id and version, nothing else. Index
/// maintenance, compaction and persistence belong to the store's own
/// implementation, not to this crate.
pub trait ObjectStoreFacade: Send + Sync {
    /// Fetch the bytes committed for `id` at or before `as_of`, if any.
    fn get(&self, id: ObjectId, as_of: Version) -> Option<Vec<u8>>;

    /// Publish `bytes` for `id` as of `version`. Called once per write, at
    /// commit time, after the writer lock for the object's class has been
    /// taken.
    fn put(&self, id: ObjectId, version: Version, bytes: Vec<u8>);

    /// Remove the object entirely (used by restore when replaying a delete).
    fn remove(&self, id: ObjectId);
}

/// One decoded changeset operation, capable of applying itself against the
/// object store. What the operation actually contains (a put, a delete, a
/// CAS) is defined entirely by the wire format this crate doesn't own.
pub trait ChangesetOp {
    /// Apply this operation to `store` as of `version`.
    fn apply(&self, store: &dyn ObjectStoreFacade, version: Version);
}

/// Decodes the wire format a changeset arrives in. The wire format itself —
/// and the compiler that produces it — are out of this crate's scope; this
/// trait exists so `apply_changeset` can stay generic over it.
pub trait ChangesetCodec: Send + Sync {
    /// One decoded operation against a single object.
    type Op: ChangesetOp;

    /// Decode a changeset into an ordered list of operations.
    fn decode(&self, bytes: &[u8]) -> velox_core::Result<Vec<Self::Op>>;
}
