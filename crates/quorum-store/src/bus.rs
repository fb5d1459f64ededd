// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-process fan-out of slot events to live subscribers.
//!
//! Publishing is non-blocking and never errors: a subscriber that stops
//! reading loses its oldest undelivered events and accrues a drop counter,
//! never stalling the engine.  Subscribers filter by slot or session on the
//! receiving end.

use thiserror::Error;
use tokio::sync::broadcast;

use crate::SlotEvent;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("subscriber limit of {0} reached")]
    SubscriberLimit(usize),
}

/// Bounded publish/subscribe channel for [`SlotEvent`]s.
pub struct EventBus {
    tx: broadcast::Sender<SlotEvent>,
    max_subscribers: usize,
}

impl EventBus {
    /// `capacity` is the per-channel event buffer (oldest events are dropped
    /// for a lagging subscriber once it is exceeded).
    pub fn new(capacity: usize, max_subscribers: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            max_subscribers,
        }
    }

    /// Fan an event out to all current subscribers.  Never blocks, never
    /// errors; with no subscribers the event simply vanishes.
    pub fn publish(&self, event: SlotEvent) {
        let _ = self.tx.send(event);
    }

    /// Attach a new subscriber.  Dropping the returned stream unsubscribes.
    pub fn subscribe(&self) -> Result<EventStream, BusError> {
        if self.tx.receiver_count() >= self.max_subscribers {
            return Err(BusError::SubscriberLimit(self.max_subscribers));
        }
        Ok(EventStream {
            rx: self.tx.subscribe(),
            dropped: 0,
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024, 64)
    }
}

/// A live subscription: events in publish order as observed by this
/// subscriber, with overflow losses tracked in [`EventStream::dropped`].
pub struct EventStream {
    rx: broadcast::Receiver<SlotEvent>,
    dropped: u64,
}

impl EventStream {
    /// Next event, or `None` once the bus has shut down.  Overflow gaps are
    /// skipped transparently and added to the drop counter.
    pub async fn recv(&mut self) -> Option<SlotEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Events lost to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
