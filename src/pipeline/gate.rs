// src/pipeline/gate.rs
//
// Single-slot admission control. Detection is the most expensive stage, so
// frames arriving while a cycle is in flight are dropped outright — no queue,
// no replacement — bounding latency under sustained overload.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub struct FrameGate {
    in_flight: AtomicBool,
}

impl FrameGate {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
        }
    }

    /// Try to start a cycle. Returns false (no side effects) when one is
    /// already in flight.
    pub fn try_admit(&self) -> bool {
        let admitted = self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !admitted {
            debug!("Frame dropped: detection cycle already in flight");
        }
        admitted
    }

    /// Mark the in-flight cycle finished, reopening the gate.
    pub fn release(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl Default for FrameGate {
    fn default() -> Self {
        Self::new()
    }
}
