//! Bounded FIFO queue between an output port and an input port.
//! Backed by a `crossbeam_channel`, which already gives blocking-with-timeout
//! push/pop semantics while preserving insertion order.

use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::error::PipelineError;

pub struct Queue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

/// Cloning a `Queue` aliases the same underlying channel rather than
/// creating a new one — `crossbeam_channel::Sender`/`Receiver` are cheap to
/// clone regardless of `T`. This lets a Pipeline hand the same input queue
/// to both its owning input port and the producer's output route without an
/// `Arc` wrapper.
impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Queue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Blocks up to `timeout` if the queue is full. A zero timeout returns
    /// immediately (used by server frontends to avoid blocking the
    /// scheduler thread).
    pub fn push(&self, item: T, timeout: Duration) -> Result<(), PipelineError> {
        match self.tx.send_timeout(item, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(PipelineError::CapacityExceeded),
            Err(SendTimeoutError::Disconnected(_)) => Err(PipelineError::internal("queue disconnected")),
        }
    }

    pub fn pop(&self, timeout: Duration) -> Result<T, PipelineError> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(item),
            Err(RecvTimeoutError::Timeout) => Err(PipelineError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::internal("queue disconnected")),
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let q: Queue<u32> = Queue::new(4);
        for i in 0..4 {
            q.push(i, Duration::from_millis(10)).unwrap();
        }
        for i in 0..4 {
            assert_eq!(q.pop(Duration::from_millis(10)).unwrap(), i);
        }
    }

    #[test]
    fn push_times_out_when_full() {
        let q: Queue<u32> = Queue::new(1);
        q.push(1, Duration::from_millis(10)).unwrap();
        let err = q.push(2, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, PipelineError::CapacityExceeded));
    }

    #[test]
    fn pop_times_out_when_empty() {
        let q: Queue<u32> = Queue::new(1);
        let err = q.pop(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, PipelineError::Timeout));
    }
}
