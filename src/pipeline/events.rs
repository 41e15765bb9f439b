// src/pipeline/events.rs
//
// Decoupled lifecycle notifications. The tracking pass publishes events
// instead of the rendering layer polling for diffs.

use crate::types::TrackSnapshot;
use std::collections::VecDeque;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum TrackEvent {
    /// A track crossed the confirmation threshold and is now published.
    Confirmed(TrackSnapshot),

    /// A confirmed track's stable label switched after a vote.
    LabelChanged {
        id: Uuid,
        previous: String,
        current: String,
    },

    /// A track aged out or was shed by the capacity limit.
    Evicted { id: Uuid, label: String },
}

pub struct EventBus {
    events: VecDeque<TrackEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending: max_pending.max(1),
        }
    }

    pub fn publish(&mut self, event: TrackEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn publish_all(&mut self, events: impl IntoIterator<Item = TrackEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn drain(&mut self) -> Vec<TrackEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
