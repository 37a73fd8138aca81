// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{trace, warn};

use crate::event::OrchestratorEvent;

/// Cadence at which queued events are flushed to subscribers.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(16);

const CHANNEL_CAPACITY: usize = 1024;

/// Batched in-process pub/sub.
///
/// `publish` enqueues without blocking; a background task drains the queue on
/// a ~16 ms cadence and fans each batch out to subscribers in FIFO order.
/// Slow subscribers lag and drop events rather than back-pressuring the
/// publisher.
#[derive(Debug)]
pub struct EventBus {
    queue: mpsc::UnboundedSender<OrchestratorEvent>,
    sender: broadcast::Sender<Arc<OrchestratorEvent>>,
}

impl EventBus {
    /// Create the bus and spawn its flush task on the current runtime.
    pub fn new() -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<OrchestratorEvent>();
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);

        let fan_out = sender.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(FLUSH_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                // Drain everything queued since the last flush, preserving
                // enqueue order.
                loop {
                    match rx.try_recv() {
                        Ok(event) => {
                            trace!(topic = event.topic(), "flushing event");
                            // send only fails with zero receivers, which is fine
                            let _ = fan_out.send(Arc::new(event));
                        }
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => return,
                    }
                }
            }
        });

        Self { queue, sender }
    }

    /// Enqueue an event.  Never blocks; delivery happens on the next flush.
    pub fn publish(&self, event: OrchestratorEvent) {
        if self.queue.send(event).is_err() {
            warn!("event bus flush task is gone; event dropped");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver { receiver: self.sender.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// The bus is the default surface for permission prompts: each request is
/// published as a [`OrchestratorEvent::UserPromptRequest`] for the UI to
/// answer out of band.
impl openfork_permissions::PromptSink for EventBus {
    fn deliver(&self, request: &openfork_permissions::PromptRequest) {
        self.publish(OrchestratorEvent::UserPromptRequest(request.clone()));
    }
}

/// Receiver half of the bus.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<OrchestratorEvent>>,
}

impl EventReceiver {
    /// Next event, or `None` when the bus is gone.  A lagged receiver skips
    /// the dropped events and keeps going.
    pub async fn recv(&mut self) -> Option<Arc<OrchestratorEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event receiver lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Arc<OrchestratorEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event receiver lagged; events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
