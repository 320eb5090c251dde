//! Row identifier generation.
//!
//! Identifiers are `(timestamp << INSTANCE_ID_BITS) | instance_id`, with
//! the timestamp in 10µs units. The instance id occupies the low bits, so
//! two workers with distinct instance ids can never produce the same
//! value. Within one generator the timestamp part is strictly increasing:
//! when the clock has not advanced past the last issued value, the next
//! unit is used instead.

use crate::core::ids::{InstanceId, INSTANCE_ID_BITS};
use crate::core::time::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Mask selecting the instance id field.
pub const INSTANCE_ID_MASK: u64 = (1 << INSTANCE_ID_BITS) - 1;

/// Width of one timestamp unit in microseconds.
const TIMESTAMP_UNIT_MICROS: u64 = 10;

/// Parts of a row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowIdParts {
    /// Timestamp in 10µs units since the Unix epoch.
    pub timestamp_units: u64,
    /// Instance id of the generating worker.
    pub instance_id: u32,
}

impl RowIdParts {
    /// Approximate wall-clock time in microseconds.
    pub fn timestamp_micros(&self) -> u64 {
        self.timestamp_units * TIMESTAMP_UNIT_MICROS
    }
}

/// Generates unique row identifiers for one claimed instance.
#[derive(Debug)]
pub struct RowIdGenerator {
    instance_id: InstanceId,
    clock: Arc<dyn Clock>,
    last_units: AtomicU64,
}

impl RowIdGenerator {
    /// Create a generator for a claimed instance id.
    pub fn new(instance_id: InstanceId, clock: Arc<dyn Clock>) -> Self {
        Self {
            instance_id,
            clock,
            last_units: AtomicU64::new(0),
        }
    }

    /// Instance id embedded in every identifier.
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Next identifier. Strictly greater than every earlier one from this generator.
    pub fn next(&self) -> u64 {
        let now_units = self.clock.now().micros / TIMESTAMP_UNIT_MICROS;
        let mut last = self.last_units.load(Ordering::Acquire);
        loop {
            let units = now_units.max(last + 1);
            match self.last_units.compare_exchange_weak(
                last,
                units,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return compose(units, self.instance_id),
                Err(current) => last = current,
            }
        }
    }

    /// Split an identifier into its parts.
    pub fn decompose(id: u64) -> RowIdParts {
        RowIdParts {
            timestamp_units: id >> INSTANCE_ID_BITS,
            instance_id: (id & INSTANCE_ID_MASK) as u32,
        }
    }
}

fn compose(units: u64, instance_id: InstanceId) -> u64 {
    (units << INSTANCE_ID_BITS) | u64::from(instance_id.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::{ManualClock, Timestamp};
    use std::collections::HashSet;

    fn generator(id: u32, clock: Arc<ManualClock>) -> RowIdGenerator {
        RowIdGenerator::new(InstanceId::new(id).unwrap(), clock)
    }

    #[test]
    fn embeds_instance_id_in_low_bits() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000)));
        let gen = generator(42, clock);
        let id = gen.next();
        assert_eq!(id & INSTANCE_ID_MASK, 42);
        let parts = RowIdGenerator::decompose(id);
        assert_eq!(parts.instance_id, 42);
        assert_eq!(parts.timestamp_micros(), 1_700_000_000_000_000);
    }

    #[test]
    fn monotonic_with_frozen_clock() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(5)));
        let gen = generator(1, clock);
        let mut previous = gen.next();
        for _ in 0..1_000 {
            let id = gen.next();
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn clock_going_backwards_does_not_repeat() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(10_000)));
        let gen = generator(3, clock.clone());
        let before = gen.next();
        clock.set(Timestamp::from_millis(1));
        assert!(gen.next() > before);
    }

    #[test]
    fn distinct_instances_never_collide() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(7)));
        let a = generator(1, clock.clone());
        let b = generator(2, clock);
        let mut seen = HashSet::new();
        for _ in 0..500 {
            assert!(seen.insert(a.next()));
            assert!(seen.insert(b.next()));
        }
    }

    #[test]
    fn concurrent_callers_get_unique_ids() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(7)));
        let gen = Arc::new(generator(9, clock));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = gen.clone();
                std::thread::spawn(move || (0..250).map(|_| gen.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 1_000);
    }
}
