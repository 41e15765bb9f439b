// src/errors.rs
//
// Failure taxonomy plus the bounded store observers read it from. The store
// is owned by the engine instance, not process-global, so parallel engines
// (and tests) never interfere.

use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// The detector or verifier threw or timed out.
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// The backing model service is not ready or not loaded.
    #[error("model unavailable")]
    ModelUnavailable,

    /// The submitted frame was malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// One recorded failure, timestamped with the frame clock.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub timestamp_ms: f64,
    pub message: String,
}

/// Fixed-capacity ring buffer of recent failures. Oldest entries are
/// overwritten on overflow; size never exceeds capacity.
pub struct ErrorStore {
    records: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl ErrorStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, timestamp_ms: f64, error: &InferenceError) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(ErrorRecord {
            timestamp_ms,
            message: error.to_string(),
        });
    }

    /// Most recent failure, if any.
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.records.back().cloned()
    }

    /// Full buffer contents, oldest first.
    pub fn recent(&self) -> Vec<ErrorRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
