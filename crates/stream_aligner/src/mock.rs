//! Mock readback device
//!
//! Records triggered groups and recycled descriptors, can inject failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use contracts::{EngineError, EngineResult, RawBuffer, ReadbackDevice, SyncGroup};

#[derive(Debug, Clone)]
struct Trigger {
    sequence: u64,
    buffer_sequences: Vec<u64>,
    passes: u8,
}

/// In-memory [`ReadbackDevice`]
#[derive(Debug, Default)]
pub struct MockReadbackDevice {
    triggers: Mutex<Vec<Trigger>>,
    recycled: Mutex<Vec<u32>>,
    fail: AtomicBool,
    fail_sequences: Mutex<Vec<u64>>,
}

impl MockReadbackDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent triggers fail with `HardwareIo`
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make the trigger of one sequence fail with `HardwareIo`
    pub fn fail_sequence(&self, sequence: u64) {
        self.fail_sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sequence);
    }

    /// Sequences of accepted readbacks in trigger order
    pub fn triggered_sequences(&self) -> Vec<u64> {
        self.lock_triggers().iter().map(|t| t.sequence).collect()
    }

    /// Per accepted readback, the sequence of every buffer in the group
    pub fn triggered_groups(&self) -> Vec<Vec<u64>> {
        self.lock_triggers()
            .iter()
            .map(|t| t.buffer_sequences.clone())
            .collect()
    }

    /// Pass count of the latest accepted readback
    pub fn last_passes(&self) -> Option<u8> {
        self.lock_triggers().last().map(|t| t.passes)
    }

    /// Descriptors returned so far
    pub fn recycled(&self) -> Vec<u32> {
        self.recycled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn recycled_count(&self) -> usize {
        self.recycled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lock_triggers(&self) -> std::sync::MutexGuard<'_, Vec<Trigger>> {
        self.triggers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReadbackDevice for MockReadbackDevice {
    fn name(&self) -> &str {
        "mock-readback"
    }

    fn trigger_readback(&self, group: &SyncGroup, passes: u8) -> EngineResult<()> {
        let failing = self
            .fail_sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&group.sequence);
        if failing || self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::hardware(self.name(), "injected readback failure"));
        }
        self.lock_triggers().push(Trigger {
            sequence: group.sequence,
            buffer_sequences: group.buffers.iter().map(|b| b.sequence).collect(),
            passes,
        });
        Ok(())
    }

    fn recycle(&self, buffer: RawBuffer) {
        self.recycled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(buffer.descriptor);
    }
}
