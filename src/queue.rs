//! Shared dispatch queue of pending requests.
//!
//! The queue is the one object mutated concurrently by every task in a
//! pool: ingress adapters enqueue, worker supervisors dequeue, and
//! supervisors re-enqueue in-flight items when their worker dies. It is
//! an unbounded FIFO with exclusive dequeue: each item is handed to
//! exactly one caller, but may be put back (at the tail) by a different
//! worker than dequeued it.
//!
//! # Shutdown
//!
//! `close()` drops all pending items and fails every later `enqueue`
//! and `dequeue` with [`QueueError::Closed`]. Dropping a pending item
//! drops its result slot, which wakes the waiting caller.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::sync::{Mutex, Semaphore};

use crate::envelope::{Request, Response};
use crate::error::QueueError;

/// One pending request paired with its single-assignment result slot.
///
/// The slot is resolved exactly once by whichever worker completes the
/// request; sending after the caller has gone away is a no-op.
#[derive(Debug)]
pub struct WorkItem {
    pub request: Request,
    pub slot: oneshot::Sender<Response>,
}

impl WorkItem {
    /// Creates a work item and the receiver half of its result slot.
    pub fn new(request: Request) -> (Self, oneshot::Receiver<Response>) {
        let (slot, rx) = oneshot::channel();
        (Self { request, slot }, rx)
    }
}

/// Unbounded multi-producer/multi-consumer FIFO of work items.
///
/// The semaphore carries one permit per queued item, so `dequeue`
/// suspends without polling until an item (or shutdown) arrives.
#[derive(Debug)]
pub struct DispatchQueue {
    items: Mutex<VecDeque<WorkItem>>,
    ready: Semaphore,
}

impl DispatchQueue {
    /// Creates an empty open queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Semaphore::new(0),
        }
    }

    /// Appends an item to the back of the queue.
    ///
    /// Never blocks on capacity; fails only after `close()`.
    pub async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        {
            let mut items = self.items.lock().await;
            if self.ready.is_closed() {
                return Err(QueueError::Closed);
            }
            items.push_back(item);
        }
        self.ready.add_permits(1);
        Ok(())
    }

    /// Removes and returns the item at the front of the queue,
    /// suspending the caller until one is available.
    ///
    /// Items are handed out in FIFO order across all enqueues,
    /// including re-enqueues of recovered in-flight items. Cancel safe:
    /// the permit is only consumed together with its item, so a
    /// cancelled dequeue never strands a queued item.
    pub async fn dequeue(&self) -> Result<WorkItem, QueueError> {
        loop {
            let permit = match self.ready.acquire().await {
                Ok(permit) => permit,
                Err(_) => return Err(QueueError::Closed),
            };
            let mut items = self.items.lock().await;
            if let Some(item) = items.pop_front() {
                permit.forget();
                return Ok(item);
            }
            // Permit raced a close() that cleared the backlog.
            if self.ready.is_closed() {
                return Err(QueueError::Closed);
            }
        }
    }

    /// Returns the number of queued (not in-flight) items.
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Returns whether the queue currently holds no items.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Closes the queue, dropping all pending items.
    ///
    /// Waiting dequeuers are woken with [`QueueError::Closed`]; callers
    /// awaiting a dropped item's slot observe the slot closing.
    pub async fn close(&self) {
        let mut items = self.items.lock().await;
        items.clear();
        self.ready.close();
    }

    /// Returns whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.ready.is_closed()
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}
