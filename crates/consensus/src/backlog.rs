//! Holding area for messages that arrived ahead of the local round

use std::collections::VecDeque;

use crate::types::Message;
use crate::validator::Validator;

/// Bounded FIFO of future messages awaiting replay
#[derive(Debug)]
pub struct Backlog {
    queue: VecDeque<(Message, Validator)>,
    capacity: usize,
}

impl Backlog {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Store a message; the oldest entry is evicted when full
    pub fn push(&mut self, message: Message, src: Validator) {
        if self.queue.len() >= self.capacity {
            if let Some((evicted, from)) = self.queue.pop_front() {
                tracing::debug!(
                    "Backlog full, dropping {} from {}",
                    evicted.code(),
                    from.address()
                );
            }
        }
        self.queue.push_back((message, src));
    }

    /// Take every stored message in arrival order
    pub fn drain(&mut self) -> Vec<(Message, Validator)> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
