//! Short-term event context - the most recent raw events, newest first

use std::collections::VecDeque;

use crate::types::{Event, EventKind};

/// Fixed-capacity FIFO of recent events
#[derive(Debug, Clone)]
pub struct BoundedEventContext {
    events: VecDeque<Event>,
    capacity: usize,
}

impl BoundedEventContext {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend an event, dropping the oldest ones past capacity
    pub fn push(&mut self, event: Event) {
        if self.capacity == 0 {
            return;
        }
        self.events.push_front(event);
        self.events.truncate(self.capacity);
    }

    /// Current events, most recent first
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    /// Location of the newest event that carries one
    pub fn current_location(&self) -> Option<&str> {
        self.events.iter().find_map(|e| e.location())
    }

    /// Whether any recent event of `kind` happened at `location`
    pub fn saw_at(&self, kind: EventKind, location: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.kind() == kind && e.location() == Some(location))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
