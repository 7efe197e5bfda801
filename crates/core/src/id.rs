//! Object id packing: a class-id prefix plus a monotonic per-class counter.
//!
//! An [`ObjectId`] is a 64-bit value with the class id in the high bits and
//! a counter in the low [`COUNTER_BITS`] bits. Packing is a pure bit
//! operation; the ceiling on the counter is enforced by the id-range
//! allocator, not by [`make_id`] itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of low bits reserved for the per-class counter.
pub const COUNTER_BITS: u32 = 51;

/// One past the largest counter value a single class may use.
pub const COUNTER_CEILING: u64 = 1u64 << COUNTER_BITS;

const COUNTER_MASK: u64 = COUNTER_CEILING - 1;

/// A class identifier. Occupies the top `64 - COUNTER_BITS` bits of an
/// [`ObjectId`]; values are expected to fit in that width, which callers
/// enforce (the data-model compiler that assigns these is out of this
/// crate's scope).
pub type ClassId = u16;

/// A 64-bit object id: `class_id` in the high bits, counter in the low
/// [`COUNTER_BITS`] bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Wrap a raw 64-bit value as an object id without repacking it.
    pub const fn from_raw(raw: u64) -> Self {
        ObjectId(raw)
    }

    /// The raw 64-bit representation.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Pack a class id and counter into an object id.
///
/// # Panics
///
/// Panics in debug builds if `counter` does not fit in [`COUNTER_BITS`]
/// bits. Release builds silently truncate, matching the packing being a
/// pure bit operation with no fallible path of its own.
pub const fn make_id(class_id: ClassId, counter: u64) -> ObjectId {
    debug_assert!(counter < COUNTER_CEILING, "counter exceeds COUNTER_CEILING");
    ObjectId(((class_id as u64) << COUNTER_BITS) | (counter & COUNTER_MASK))
}

/// Extract the class id from an object id.
pub const fn class_id_of(id: ObjectId) -> ClassId {
    (id.0 >> COUNTER_BITS) as ClassId
}

/// Extract the counter from an object id.
pub const fn counter_of(id: ObjectId) -> u64 {
    id.0 & COUNTER_MASK
}

/// The model descriptor collaborator: maps class ids to whatever the
/// surrounding engine considers a "class". Kept deliberately thin — the
/// data-model compiler that builds the real thing is out of scope here.
pub trait ModelDescriptor {
    /// Concrete class handle returned by [`class_of`].
    type Class;

    /// Resolve the class for a given class id, if known.
    fn class_of(&self, class_id: ClassId) -> Option<&Self::Class>;

    /// Resolve the index of a class within whatever ordering the model
    /// descriptor maintains (used by callers that need a dense index
    /// rather than the sparse class id).
    fn class_index_of(&self, class_id: ClassId) -> Option<usize>;
}

/// Resolve the class of an object id through a model descriptor.
pub fn class_of<M: ModelDescriptor>(model: &M, id: ObjectId) -> Option<&M::Class> {
    model.class_of(class_id_of(id))
}

/// Resolve the class index of an object id through a model descriptor.
pub fn class_index_of<M: ModelDescriptor>(model: &M, id: ObjectId) -> Option<usize> {
    model.class_index_of(class_id_of(id))
}

/// Pre-allocated, well-known object ids. Real classes start allocating
/// counters from [`crate::id::FIRST_USER_COUNTER`] to leave room for these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownId {
    /// Singleton record tracking the id-range allocator's high-water mark.
    IdGenerator,
    /// Singleton record tracking global write-state (used by alignment).
    GlobalWriteState,
    /// First of three reserved config-artifact records.
    ConfigArtifact0,
    /// Second of three reserved config-artifact records.
    ConfigArtifact1,
    /// Third of three reserved config-artifact records.
    ConfigArtifact2,
    /// First of three reserved artifact-version records.
    ArtifactVersion0,
    /// Second of three reserved artifact-version records.
    ArtifactVersion1,
    /// Third of three reserved artifact-version records.
    ArtifactVersion2,
}

/// Class id reserved for system singletons and well-known records.
pub const SYSTEM_CLASS_ID: ClassId = 0;

/// The first counter value available to ordinary, user-defined classes.
/// Counters below this are reserved for [`WellKnownId`] entries.
pub const FIRST_USER_COUNTER: u64 = 1024;

impl WellKnownId {
    const fn counter(self) -> u64 {
        match self {
            WellKnownId::IdGenerator => 0,
            WellKnownId::GlobalWriteState => 1,
            WellKnownId::ConfigArtifact0 => 2,
            WellKnownId::ConfigArtifact1 => 3,
            WellKnownId::ConfigArtifact2 => 4,
            WellKnownId::ArtifactVersion0 => 5,
            WellKnownId::ArtifactVersion1 => 6,
            WellKnownId::ArtifactVersion2 => 7,
        }
    }

    /// The object id this well-known entry is pinned to.
    pub const fn id(self) -> ObjectId {
        make_id(SYSTEM_CLASS_ID, self.counter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_class_and_counter() {
        let id = make_id(42, 123_456);
        assert_eq!(class_id_of(id), 42);
        assert_eq!(counter_of(id), 123_456);
    }

    #[test]
    fn counter_zero_and_max_round_trip() {
        let low = make_id(7, 0);
        assert_eq!(counter_of(low), 0);

        let high = make_id(7, COUNTER_CEILING - 1);
        assert_eq!(counter_of(high), COUNTER_CEILING - 1);
        assert_eq!(class_id_of(high), 7);
    }

    #[test]
    fn well_known_ids_are_distinct_and_reserved() {
        let ids = [
            WellKnownId::IdGenerator.id(),
            WellKnownId::GlobalWriteState.id(),
            WellKnownId::ConfigArtifact0.id(),
            WellKnownId::ConfigArtifact1.id(),
            WellKnownId::ConfigArtifact2.id(),
            WellKnownId::ArtifactVersion0.id(),
            WellKnownId::ArtifactVersion1.id(),
            WellKnownId::ArtifactVersion2.id(),
        ];
        for (i, a) in ids.iter().enumerate() {
            assert!(counter_of(*a) < FIRST_USER_COUNTER);
            for (j, b) in ids.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
    }

    struct FakeModel;
    impl ModelDescriptor for FakeModel {
        type Class = &'static str;
        fn class_of(&self, class_id: ClassId) -> Option<&Self::Class> {
            if class_id == 1 {
                Some(&"Widget")
            } else {
                None
            }
        }
        fn class_index_of(&self, class_id: ClassId) -> Option<usize> {
            if class_id == 1 {
                Some(0)
            } else {
                None
            }
        }
    }

    proptest::proptest! {
        #[test]
        fn make_id_round_trips_for_any_in_range_counter(class_id: ClassId, counter in 0u64..COUNTER_CEILING) {
            let id = make_id(class_id, counter);
            proptest::prop_assert_eq!(class_id_of(id), class_id);
            proptest::prop_assert_eq!(counter_of(id), counter);
        }
    }

    #[test]
    fn class_of_delegates_to_model_descriptor() {
        let model = FakeModel;
        let id = make_id(1, 5);
        assert_eq!(class_of(&model, id), Some(&"Widget"));
        assert_eq!(class_index_of(&model, id), Some(0));

        let unknown = make_id(99, 5);
        assert_eq!(class_of(&model, unknown), None);
        assert_eq!(class_index_of(&model, unknown), None);
    }
}
