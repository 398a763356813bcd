//! Checkpoint persistence seam.
//!
//! Cached translations survive a simulation checkpoint as named 64-bit
//! scalars in an opaque external store. The store is only touched at
//! save/restore boundaries, never during translation.

use core::fmt;

/// A structured store of named 64-bit values, provided by the surrounding
/// simulation's checkpoint mechanism.
pub trait CheckpointStore {
    /// Records `value` under `key`, replacing any previous value.
    fn store(&mut self, key: &str, value: u64);

    /// Returns the value recorded under `key`, if any.
    fn load(&self, key: &str) -> Option<u64>;

    /// Returns the value recorded under `key`, or a
    /// [`CheckpointError::MissingField`] naming it.
    fn require(&self, key: &str) -> Result<u64, CheckpointError> {
        self.load(key)
            .ok_or_else(|| CheckpointError::MissingField(key.to_string()))
    }
}

/// Errors that can occur while restoring from a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// The store has no value under the named key.
    MissingField(String),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(key) => write!(f, "checkpoint is missing field `{key}`"),
        }
    }
}

impl std::error::Error for CheckpointError {}

/// An in-memory checkpoint store, for harness and test use.
#[cfg(any(test, feature = "emulation"))]
#[derive(Debug, Default)]
pub struct MemStore {
    values: std::collections::HashMap<String, u64>,
}

#[cfg(any(test, feature = "emulation"))]
impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(any(test, feature = "emulation"))]
impl CheckpointStore for MemStore {
    fn store(&mut self, key: &str, value: u64) {
        self.values.insert(key.to_string(), value);
    }

    fn load(&self, key: &str) -> Option<u64> {
        self.values.get(key).copied()
    }
}
