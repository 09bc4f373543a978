//! Job queue with late acknowledgement.
//!
//! A consumed message stays in flight until it is acknowledged. Messages
//! still in flight when a consumer disappears can be put back with
//! [`InMemoryQueue::redeliver_unacked`], which is how a broker treats a dead
//! worker's unacknowledged deliveries.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::QueueError;
use crate::state_machine::JobMessage;

#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub message: JobMessage,
    pub redelivered: bool,
}

pub trait JobQueue: Send + Sync {
    fn publish(&self, message: JobMessage) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Waits for the next message. `None` once the queue is closed and drained.
    fn consume(&self) -> impl Future<Output = Option<Delivery>> + Send;

    fn ack(&self, tag: u64) -> impl Future<Output = Result<(), QueueError>> + Send;
}

#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<(JobMessage, bool)>,
    in_flight: HashMap<u64, JobMessage>,
    next_tag: u64,
    closed: bool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stops accepting messages. Consumers drain what is left, then get `None`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Puts every unacknowledged message back at the front of the queue.
    pub fn redeliver_unacked(&self) -> usize {
        let count = {
            let mut state = self.lock();
            let mut tags: Vec<u64> = state.in_flight.keys().copied().collect();
            tags.sort_unstable_by(|a, b| b.cmp(a));
            for tag in &tags {
                if let Some(message) = state.in_flight.remove(tag) {
                    state.ready.push_front((message, true));
                }
            }
            tags.len()
        };
        for _ in 0..count {
            self.notify.notify_one();
        }
        count
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    #[cfg(test)]
    pub fn ready(&self) -> usize {
        self.lock().ready.len()
    }

    fn try_take(&self) -> Result<Option<Delivery>, ()> {
        let mut state = self.lock();
        match state.ready.pop_front() {
            Some((message, redelivered)) => {
                state.next_tag += 1;
                let tag = state.next_tag;
                state.in_flight.insert(tag, message.clone());
                Ok(Some(Delivery {
                    tag,
                    message,
                    redelivered,
                }))
            }
            None if state.closed => Err(()),
            None => Ok(None),
        }
    }
}

impl JobQueue for InMemoryQueue {
    async fn publish(&self, message: JobMessage) -> Result<(), QueueError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.ready.push_back((message, false));
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn consume(&self) -> Option<Delivery> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish or close in between is not missed.
            notified.as_mut().enable();

            match self.try_take() {
                Ok(Some(delivery)) => return Some(delivery),
                Err(()) => return None,
                Ok(None) => notified.await,
            }
        }
    }

    async fn ack(&self, tag: u64) -> Result<(), QueueError> {
        self.lock()
            .in_flight
            .remove(&tag)
            .map(|_| ())
            .ok_or(QueueError::UnknownDelivery(tag))
    }
}
