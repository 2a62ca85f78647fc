//! Event source abstraction
//!
//! The host application owns the concrete event adapter (DOM listeners,
//! a test harness, a replayed log file). The telemetry core only subscribes.

use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::Event;

/// Capability the core subscribes to for raw events
pub trait EventSource: Send + Sync {
    /// Open a new subscription; events emitted afterwards are delivered to it
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Event>;
}

/// Fan-out event source fed by [`ChannelEventSource::emit`]
#[derive(Debug, Default)]
pub struct ChannelEventSource {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl ChannelEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every live subscriber, returning how many received it
    pub fn emit(&self, event: Event) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| !tx.is_closed());

        let mut delivered = 0;
        for tx in subscribers.iter() {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!("Emitted {} event to {} subscriber(s)", event.kind(), delivered);
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl EventSource for ChannelEventSource {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }
}
