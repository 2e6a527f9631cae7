//! Caller-facing entry point for one mount.
//!
//! An [`Ingress`] is a cheap clonable handle that submits a request to
//! the mount's dispatch queue and waits for whichever worker picks it
//! up to answer. It carries no worker state of its own.

use std::sync::Arc;

use crate::envelope::{Request, Response};
use crate::error::QueueError;
use crate::queue::{DispatchQueue, WorkItem};

#[derive(Clone)]
pub struct Ingress {
    mount_url: String,
    queue: Arc<DispatchQueue>,
}

impl Ingress {
    pub(crate) fn new(mount_url: impl Into<String>, queue: Arc<DispatchQueue>) -> Self {
        Self {
            mount_url: mount_url.into(),
            queue,
        }
    }

    /// Mount URL this ingress routes to.
    pub fn mount_url(&self) -> &str {
        &self.mount_url
    }

    /// Submits a request and waits for its response. Returns
    /// [`QueueError::Closed`] when the pool shut down before the
    /// request was answered.
    pub async fn send(&self, request: Request) -> Result<Response, QueueError> {
        let (item, receiver) = WorkItem::new(request);
        self.queue.enqueue(item).await?;
        receiver.await.map_err(|_| QueueError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_resolves_with_worker_response() {
        let queue = Arc::new(DispatchQueue::new());
        let ingress = Ingress::new("http://calc", Arc::clone(&queue));

        let worker = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move {
                let item = queue.dequeue().await.unwrap();
                let _ = item.slot.send(Response::new(200).with_body("pong"));
            }
        });

        let response = ingress.send(Request::get("http://calc/ping")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "pong");
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_into_closed_queue() {
        let queue = Arc::new(DispatchQueue::new());
        queue.close().await;
        let ingress = Ingress::new("http://calc", queue);

        let outcome = ingress.send(Request::get("http://calc/ping")).await;
        assert_eq!(outcome.unwrap_err(), QueueError::Closed);
    }

    #[tokio::test]
    async fn test_send_resolves_closed_when_slot_dropped() {
        let queue = Arc::new(DispatchQueue::new());
        let ingress = Ingress::new("http://calc", Arc::clone(&queue));

        let worker = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move {
                // Dropping the item without answering releases the slot.
                let _ = queue.dequeue().await.unwrap();
            }
        });

        let outcome = ingress.send(Request::get("http://calc/ping")).await;
        assert_eq!(outcome.unwrap_err(), QueueError::Closed);
        worker.await.unwrap();
    }
}
