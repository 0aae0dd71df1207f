//! Notifications posted by the core for external subscribers

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{Digest, View};

/// Event emitted by the round state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConsensusEvent {
    /// The core is ready to accept a proposal for `view`
    RoundStarted { view: View },
    /// A proposal was agreed and handed to the backend
    FinalCommitted { sequence: u64, digest: Digest },
    /// A view change completed; `view` is the next round
    ViewChanged { view: View },
}

/// Fan-out channel for consensus events.
///
/// Events from one core arrive in the order the core posted them. Slow
/// subscribers lose the oldest events once the buffer fills.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConsensusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.tx.subscribe()
    }

    /// Post an event; returns the number of subscribers that received it
    pub fn post(&self, event: ConsensusEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            // No subscribers
            Err(_) => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_post_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let delivered = bus.post(ConsensusEvent::FinalCommitted {
            sequence: 1,
            digest: vec![1],
        });
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ConsensusEvent::FinalCommitted {
                sequence: 1,
                digest: vec![1]
            }
        );
    }

    #[test]
    fn test_post_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(
            bus.post(ConsensusEvent::RoundStarted {
                view: View::new(0, 1)
            }),
            0
        );
    }
}
