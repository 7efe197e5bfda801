//! The ID-range allocator: reserves `[base, base + count)` out of a single
//! counter by running ordinary transactions against the `IdGenerator`
//! singleton, the same way any other caller of this crate would update a
//! record. There is no special-cased fast path — the singleton is just a
//! record whose value is a counter, updated via compare-and-swap.

use std::ops::Range;

use tracing::debug;
use velox_core::{Error, Result, COUNTER_CEILING, FIRST_USER_COUNTER};

/// Largest range a single `take_range` call may reserve.
pub const MAX_RANGE_COUNT: u64 = 16 * 1024 * 1024;

/// The transactional view onto the `IdGenerator` singleton's counter value.
/// Implemented by the engine, which runs each read/advance through a real
/// transaction against [`velox_core::WellKnownId::IdGenerator`].
pub trait SingletonCounterStore: Send + Sync {
    /// Read the counter's last committed value. `0` means uninitialized.
    fn read_counter(&self) -> Result<u64>;

    /// Attempt to advance the counter from `expected` to `new_value`. Fails
    /// with a retryable [`Error::Conflict`] if the committed value no
    /// longer matches `expected` (another allocation won the race).
    fn try_advance_counter(&self, expected: u64, new_value: u64) -> Result<()>;
}

/// Reserves id ranges against a [`SingletonCounterStore`].
pub struct IdRangeAllocator<'s> {
    store: &'s dyn SingletonCounterStore,
}

impl<'s> IdRangeAllocator<'s> {
    /// Build an allocator over the given counter store.
    pub fn new(store: &'s dyn SingletonCounterStore) -> Self {
        IdRangeAllocator { store }
    }

    /// Reserve `count` consecutive counter values, returning `[base, base +
    /// count)`. Retries internally on a transient conflict; this is the one
    /// place in the transactional core that retries rather than surfacing
    /// the conflict to the caller.
    pub fn take_range(&self, count: u64) -> Result<Range<u64>> {
        if count == 0 || count > MAX_RANGE_COUNT {
            return Err(Error::InvalidArgument(format!(
                "count must be in 1..={MAX_RANGE_COUNT}, got {count}"
            )));
        }

        loop {
            let current = self.store.read_counter()?;
            let base = if current == 0 { FIRST_USER_COUNTER } else { current };
            let end = base.checked_add(count).filter(|&e| e <= COUNTER_CEILING).ok_or_else(|| {
                Error::IdUnavailable(format!(
                    "range [{base}, {base}+{count}) would exceed the counter ceiling {COUNTER_CEILING}"
                ))
            })?;

            match self.store.try_advance_counter(current, end) {
                Ok(()) => return Ok(base..end),
                Err(e) if e.is_retryable() => {
                    debug!(base, end, "id-range allocation lost a race, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// A store that simulates a racing writer on every other read, so a
    /// `take_range` call is forced through at least one retry.
    struct FlakyStore {
        committed: AtomicU64,
        reads_until_race: Mutex<u32>,
    }

    impl FlakyStore {
        fn new(reads_until_race: u32) -> Self {
            FlakyStore {
                committed: AtomicU64::new(0),
                reads_until_race: Mutex::new(reads_until_race),
            }
        }
    }

    impl SingletonCounterStore for FlakyStore {
        fn read_counter(&self) -> Result<u64> {
            Ok(self.committed.load(Ordering::SeqCst))
        }

        fn try_advance_counter(&self, expected: u64, new_value: u64) -> Result<()> {
            let mut remaining = self.reads_until_race.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                // Simulate someone else committing a small bump first.
                self.committed.fetch_add(1, Ordering::SeqCst);
                return Err(Error::Conflict("simulated race".into()));
            }
            self.committed
                .compare_exchange(expected, new_value, Ordering::SeqCst, Ordering::SeqCst)
                .map(|_| ())
                .map_err(|_| Error::Conflict("counter moved under us".into()))
        }
    }

    #[test]
    fn first_allocation_starts_at_first_user_counter() {
        let store = FlakyStore::new(0);
        let allocator = IdRangeAllocator::new(&store);
        let range = allocator.take_range(1000).unwrap();
        assert_eq!(range, FIRST_USER_COUNTER..(FIRST_USER_COUNTER + 1000));
    }

    #[test]
    fn two_sequential_allocations_do_not_overlap() {
        let store = FlakyStore::new(0);
        let allocator = IdRangeAllocator::new(&store);
        let first = allocator.take_range(1000).unwrap();
        let second = allocator.take_range(1000).unwrap();
        assert_eq!(first, FIRST_USER_COUNTER..(FIRST_USER_COUNTER + 1000));
        assert_eq!(second, (FIRST_USER_COUNTER + 1000)..(FIRST_USER_COUNTER + 2000));
        assert_eq!(store.read_counter().unwrap(), FIRST_USER_COUNTER + 2000);
    }

    #[test]
    fn retries_through_a_transient_conflict() {
        let store = FlakyStore::new(2);
        let allocator = IdRangeAllocator::new(&store);
        let range = allocator.take_range(500).unwrap();
        assert_eq!(range.end - range.start, 500);
    }

    #[test]
    fn zero_count_is_invalid() {
        let store = FlakyStore::new(0);
        let allocator = IdRangeAllocator::new(&store);
        let err = allocator.take_range(0).unwrap_err();
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn count_above_cap_is_invalid() {
        let store = FlakyStore::new(0);
        let allocator = IdRangeAllocator::new(&store);
        assert!(allocator.take_range(MAX_RANGE_COUNT + 1).is_err());
    }

    #[test]
    fn exhausting_the_counter_ceiling_is_id_unavailable() {
        struct ExhaustedStore;
        impl SingletonCounterStore for ExhaustedStore {
            fn read_counter(&self) -> Result<u64> {
                Ok(COUNTER_CEILING - 10)
            }
            fn try_advance_counter(&self, _expected: u64, _new_value: u64) -> Result<()> {
                unreachable!("should fail the ceiling check before attempting to advance")
            }
        }
        let store = ExhaustedStore;
        let allocator = IdRangeAllocator::new(&store);
        let err = allocator.take_range(1000).unwrap_err();
        assert!(matches!(err, Error::IdUnavailable(_)));
        assert!(!err.is_retryable());
    }
}
