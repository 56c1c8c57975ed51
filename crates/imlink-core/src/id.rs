//! Snowflake-style message id generation.
//!
//! Layout (most significant first): 41 bits of milliseconds since
//! [`EPOCH_MILLIS`], 5 bits datacenter, 5 bits worker, 12 bits sequence.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::error::{ImError, ImResult};

/// Source of unique, monotonically increasing message ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> u64;
}

/// Custom epoch (2010-11-04T01:42:54.657Z).
pub const EPOCH_MILLIS: u64 = 1_288_834_974_657;

const WORKER_BITS: u32 = 5;
const DATACENTER_BITS: u32 = 5;
const SEQUENCE_BITS: u32 = 12;

pub const MAX_WORKER_ID: u64 = (1 << WORKER_BITS) - 1;
pub const MAX_DATACENTER_ID: u64 = (1 << DATACENTER_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

const WORKER_SHIFT: u32 = SEQUENCE_BITS;
const DATACENTER_SHIFT: u32 = SEQUENCE_BITS + WORKER_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_BITS + DATACENTER_BITS;

#[derive(Debug, Default)]
struct State {
    last_timestamp: u64,
    sequence: u64,
}

#[derive(Debug)]
pub struct SnowflakeIdGenerator {
    worker_id: u64,
    datacenter_id: u64,
    state: Mutex<State>,
}

impl SnowflakeIdGenerator {
    pub fn new(worker_id: u64, datacenter_id: u64) -> ImResult<Self> {
        if worker_id > MAX_WORKER_ID {
            return Err(ImError::Config(format!(
                "worker_id {worker_id} out of range 0..={MAX_WORKER_ID}"
            )));
        }
        if datacenter_id > MAX_DATACENTER_ID {
            return Err(ImError::Config(format!(
                "datacenter_id {datacenter_id} out of range 0..={MAX_DATACENTER_ID}"
            )));
        }
        Ok(Self {
            worker_id,
            datacenter_id,
            state: Mutex::new(State::default()),
        })
    }

    fn compose(&self, timestamp: u64, sequence: u64) -> u64 {
        (timestamp.saturating_sub(EPOCH_MILLIS) << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_SHIFT)
            | (self.worker_id << WORKER_SHIFT)
            | sequence
    }
}

impl IdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut timestamp = current_millis();

        if timestamp < state.last_timestamp {
            warn!(
                behind_ms = state.last_timestamp - timestamp,
                "clock moved backwards, holding last id timestamp"
            );
            timestamp = state.last_timestamp;
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                timestamp = wait_next_millis(state.last_timestamp);
            }
        } else {
            state.sequence = 0;
        }

        state.last_timestamp = timestamp;
        self.compose(timestamp, state.sequence)
    }
}

/// Sequence exhausted for this millisecond: wait for the clock to move on.
fn wait_next_millis(last_timestamp: u64) -> u64 {
    let mut timestamp = current_millis();
    while timestamp <= last_timestamp {
        std::thread::yield_now();
        timestamp = current_millis();
    }
    timestamp
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(EPOCH_MILLIS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn ids_are_strictly_increasing() {
        let gen = SnowflakeIdGenerator::new(1, 1).unwrap();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = gen.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn id_timestamps_never_run_ahead_of_the_clock() {
        let gen = SnowflakeIdGenerator::new(0, 0).unwrap();
        for _ in 0..200_000 {
            let id = gen.next_id();
            let stamped = (id >> TIMESTAMP_SHIFT) + EPOCH_MILLIS;
            assert!(stamped <= current_millis());
        }
    }

    #[test]
    fn worker_and_datacenter_are_encoded() {
        let gen = SnowflakeIdGenerator::new(3, 9).unwrap();
        let id = gen.next_id();
        assert_eq!((id >> WORKER_SHIFT) & MAX_WORKER_ID, 3);
        assert_eq!((id >> DATACENTER_SHIFT) & MAX_DATACENTER_ID, 9);
    }

    #[test]
    fn out_of_range_ids_rejected() {
        assert!(SnowflakeIdGenerator::new(MAX_WORKER_ID + 1, 0).is_err());
        assert!(SnowflakeIdGenerator::new(0, MAX_DATACENTER_ID + 1).is_err());
    }

    #[test]
    fn unique_across_threads() {
        let gen = Arc::new(SnowflakeIdGenerator::new(0, 0).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = gen.clone();
                std::thread::spawn(move || (0..2_000).map(|_| gen.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 8_000);
    }
}
