//! The process boundary between the background side and subscribers.
//!
//! The producer side encodes each [`BridgeEvent`] into a [`ServerEvent`]
//! envelope and broadcasts it; every consumer runs [`run_event_pump`], which
//! decodes envelopes and dispatches them into its own local [`EventBridge`].

use super::{EventBridge, EventSink};
use crate::events::{BridgeEvent, ServerEvent};
use thiserror::Error;
use tokio::sync::broadcast;

/// Default channel capacity, in events
pub const DEFAULT_BOUNDARY_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("No subscriber is listening on the process boundary")]
    Closed,

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Producer side of the boundary
#[derive(Clone)]
pub struct BoundarySender {
    tx: broadcast::Sender<ServerEvent>,
}

impl BoundarySender {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Encode and send; returns the number of consumers that will see it
    pub fn send(&self, event: &BridgeEvent) -> Result<usize, BoundaryError> {
        let envelope = event.to_server_event()?;
        self.tx.send(envelope).map_err(|_| BoundaryError::Closed)
    }

    /// Attach a new consumer. It sees events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn consumer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BoundarySender {
    fn default() -> Self {
        Self::new(DEFAULT_BOUNDARY_CAPACITY)
    }
}

impl EventSink for BoundarySender {
    fn emit(&self, event: BridgeEvent) {
        match self.send(&event) {
            Ok(_) => {}
            // Nobody is subscribed yet; the event has no audience
            Err(BoundaryError::Closed) => {
                log::debug!("[Boundary] Dropped {}: no consumers", event.name());
            }
            Err(e) => log::warn!("[Boundary] Failed to send {}: {}", event.name(), e),
        }
    }
}

/// Consumer side: decode envelopes from `rx` and dispatch them on `bridge`
/// until the producer goes away. Returns the number of events dispatched.
pub async fn run_event_pump(
    mut rx: broadcast::Receiver<ServerEvent>,
    bridge: EventBridge,
) -> usize {
    let mut dispatched = 0;

    loop {
        match rx.recv().await {
            Ok(envelope) => {
                let name = envelope.event.clone();
                match BridgeEvent::from_server_event(envelope) {
                    Ok(event) => {
                        bridge.dispatch(&event);
                        dispatched += 1;
                    }
                    Err(e) => log::warn!("[Boundary] Dropping undecodable {}: {}", name, e),
                }
            }
            // The channel keeps the newest `capacity` events, so terminal
            // events still arrive; only older intermediate ones are lost.
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!(
                    "[Boundary] Consumer lagged, {} oldest events skipped; raise boundary capacity",
                    skipped
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    log::debug!("[Boundary] Producer closed after {} events", dispatched);
    dispatched
}
