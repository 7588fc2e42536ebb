//! Outbound message counters.
//!
//! Counters are 32-bit and wrap. Ordering between two counter values is
//! decided by their two's-complement difference, so any value within
//! `2^31 - 1` ahead of another compares as later.

use crate::error::{FabricError, Result};

/// Signed distance from `from` to `to` under 32-bit wraparound.
pub fn counter_delta(to: u32, from: u32) -> i32 {
    to.wrapping_sub(from) as i32
}

/// True if `a` is later than `b` under wraparound ordering.
pub fn counter_is_after(a: u32, b: u32) -> bool {
    counter_delta(a, b) > 0
}

/// A monotonically increasing message counter.
pub trait MessageCounter {
    /// The next value to be handed out.
    fn value(&self) -> u32;

    /// Move past the current value.
    fn advance(&mut self) -> Result<()>;
}

/// An in-memory counter starting at an explicit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonotonicCounter {
    value: u32,
}

impl MonotonicCounter {
    pub const fn new(start: u32) -> Self {
        Self { value: start }
    }

    /// Reset to `start`.
    pub fn init(&mut self, start: u32) {
        self.value = start;
    }
}

impl MessageCounter for MonotonicCounter {
    fn value(&self) -> u32 {
        self.value
    }

    fn advance(&mut self) -> Result<()> {
        self.value = self.value.wrapping_add(1);
        Ok(())
    }
}

/// Durable storage for a persisted counter's checkpoint.
pub trait CounterStorage {
    /// Load the stored checkpoint, if any.
    fn load(&self) -> Result<Option<u32>>;

    /// Replace the stored checkpoint.
    fn store(&mut self, value: u32) -> Result<()>;
}

/// Counter storage held in memory, for tests and hosts without flash.
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStorage {
    value: Option<u32>,
    writes: usize,
}

impl MemoryCounterStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that already holds `value`, as after a reboot.
    pub fn with_value(value: u32) -> Self {
        Self { value: Some(value), writes: 0 }
    }

    pub fn stored(&self) -> Option<u32> {
        self.value
    }

    /// Number of checkpoint writes performed.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl CounterStorage for MemoryCounterStorage {
    fn load(&self) -> Result<Option<u32>> {
        Ok(self.value)
    }

    fn store(&mut self, value: u32) -> Result<()> {
        self.value = Some(value);
        self.writes += 1;
        Ok(())
    }
}

/// A counter that survives restarts without writing storage on every advance.
///
/// Storage always holds a checkpoint at least one value ahead of anything
/// handed out. After a restart counting resumes at the stored checkpoint, so
/// a value is never reused; at most `epoch` values are skipped.
pub struct PersistedCounter {
    value: u32,
    checkpoint: u32,
    epoch: u32,
    storage: Box<dyn CounterStorage>,
}

impl PersistedCounter {
    /// Load the checkpoint from `storage` and reserve the next epoch.
    pub fn init(mut storage: Box<dyn CounterStorage>, epoch: u32) -> Result<Self> {
        if epoch == 0 {
            return Err(FabricError::InvalidArgument);
        }
        let start = storage.load()?.unwrap_or(0);
        let checkpoint = start.wrapping_add(epoch);
        storage.store(checkpoint)?;
        Ok(Self { value: start, checkpoint, epoch, storage })
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

impl MessageCounter for PersistedCounter {
    fn value(&self) -> u32 {
        self.value
    }

    fn advance(&mut self) -> Result<()> {
        let next = self.value.wrapping_add(1);
        if next == self.checkpoint {
            let checkpoint = self.checkpoint.wrapping_add(self.epoch);
            self.storage.store(checkpoint)?;
            self.checkpoint = checkpoint;
        }
        self.value = next;
        Ok(())
    }
}

impl std::fmt::Debug for PersistedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedCounter")
            .field("value", &self.value)
            .field("checkpoint", &self.checkpoint)
            .field("epoch", &self.epoch)
            .finish()
    }
}
