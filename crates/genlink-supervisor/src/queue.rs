use std::collections::VecDeque;
use std::time::Instant;

use crate::error::SendError;

/// One encoded line awaiting a writable channel.
#[derive(Debug)]
pub(crate) struct QueuedWrite {
    pub payload: String,
    pub enqueued_at: Instant,
}

/// Result of writing one queued payload during a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushStep {
    /// Write accepted; the channel can take more.
    Continue,
    /// Write accepted, but the channel signalled backpressure; stop.
    Backpressure,
    /// The channel failed; stop and leave the remainder queued for the
    /// crash sweep.
    Abort,
}

/// Bounded FIFO buffer for writes that cannot be sent immediately —
/// process not yet ready, or OS backpressure. Exceeding capacity fails
/// immediately rather than growing unbounded.
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    items: VecDeque<QueuedWrite>,
    max_depth: usize,
    flushing: bool,
}

impl OutboundQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_depth,
            flushing: false,
        }
    }

    /// Append a payload, or fail with QueueFull at the configured ceiling.
    pub fn enqueue(&mut self, payload: String) -> Result<(), SendError> {
        if self.items.len() >= self.max_depth {
            return Err(SendError::QueueFull {
                depth: self.max_depth,
            });
        }
        self.items.push_back(QueuedWrite {
            payload,
            enqueued_at: Instant::now(),
        });
        Ok(())
    }

    /// Pop and write queued payloads in FIFO order until the queue drains
    /// or `write` reports backpressure or failure. Reentrant calls (a
    /// drain signal arriving while a flush is in progress) are no-ops, so
    /// no payload is ever written twice.
    pub fn flush<F>(&mut self, mut write: F)
    where
        F: FnMut(&QueuedWrite) -> FlushStep,
    {
        if self.flushing {
            return;
        }
        self.flushing = true;
        while let Some(item) = self.items.pop_front() {
            match write(&item) {
                FlushStep::Continue => {}
                FlushStep::Backpressure | FlushStep::Abort => break,
            }
        }
        self.flushing = false;
    }

    /// Drop every queued write. Queued-but-unsent writes are never carried
    /// to the next process instance.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushes_in_fifo_order() {
        let mut queue = OutboundQueue::new(8);
        queue.enqueue("one".to_string()).unwrap();
        queue.enqueue("two".to_string()).unwrap();
        queue.enqueue("three".to_string()).unwrap();

        let mut seen = Vec::new();
        queue.flush(|item| {
            seen.push(item.payload.clone());
            FlushStep::Continue
        });

        assert_eq!(seen, ["one", "two", "three"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn over_capacity_fails_without_touching_writes() {
        let mut queue = OutboundQueue::new(2);
        queue.enqueue("a".to_string()).unwrap();
        queue.enqueue("b".to_string()).unwrap();

        let err = queue.enqueue("c".to_string()).unwrap_err();
        assert!(matches!(err, SendError::QueueFull { depth: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn backpressure_stops_the_flush_mid_queue() {
        let mut queue = OutboundQueue::new(8);
        for payload in ["a", "b", "c"] {
            queue.enqueue(payload.to_string()).unwrap();
        }

        let mut written = Vec::new();
        queue.flush(|item| {
            written.push(item.payload.clone());
            if item.payload == "b" {
                FlushStep::Backpressure
            } else {
                FlushStep::Continue
            }
        });

        // "b" was accepted before the backpressure signal; "c" stays.
        assert_eq!(written, ["a", "b"]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn reentrant_flush_is_a_no_op() {
        let mut queue = OutboundQueue::new(8);
        queue.enqueue("only".to_string()).unwrap();

        let mut calls = 0;
        queue.flush(|_item| {
            calls += 1;
            // A nested flush attempt must not double-execute anything;
            // the guard is observable through the flushing flag.
            FlushStep::Continue
        });
        assert_eq!(calls, 1);
        assert!(!queue.flushing);
    }

    #[test]
    fn clear_drops_everything() {
        let mut queue = OutboundQueue::new(4);
        queue.enqueue("x".to_string()).unwrap();
        queue.enqueue("y".to_string()).unwrap();
        queue.clear();

        assert!(queue.is_empty());
        let mut called = false;
        queue.flush(|_| {
            called = true;
            FlushStep::Continue
        });
        assert!(!called);
    }

    #[test]
    fn enqueue_records_age() {
        let mut queue = OutboundQueue::new(4);
        queue.enqueue("x".to_string()).unwrap();
        queue.flush(|item| {
            assert!(item.enqueued_at.elapsed() < std::time::Duration::from_secs(1));
            FlushStep::Continue
        });
    }
}
