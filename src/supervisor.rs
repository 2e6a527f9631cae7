//! Per-worker supervision loop.
//!
//! Each supervisor owns exactly one worker for the worker's whole life:
//! it acquires a fresh instance from the provider, waits for it to
//! report running, then serves queue items through the pool's channel.
//! When the worker dies mid-flight the in-progress request goes back to
//! the queue and the loop provisions a replacement. Shrinking is
//! cooperative; a supervisor notices `desired < live` at its next safe
//! point and retires itself, never killing a worker that is mid-request
//! on it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::pool::PoolShared;
use crate::provider::{LaunchSpec, Provider, WorkerHandle, WorkerStatus};
use crate::queue::{DispatchQueue, WorkItem};

enum ReadyOutcome {
    Running,
    Dead,
    Shutdown,
}

enum ServeOutcome {
    WorkerFailed,
    Shutdown,
    Shrink,
}

pub(crate) struct WorkerSupervisor {
    id: String,
    queue: Arc<DispatchQueue>,
    provider: Arc<dyn Provider>,
    channel: Arc<dyn Channel>,
    launch: LaunchSpec,
    shared: Arc<PoolShared>,
    shutdown: broadcast::Receiver<()>,
    poll_interval: Duration,
}

impl WorkerSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        queue: Arc<DispatchQueue>,
        provider: Arc<dyn Provider>,
        channel: Arc<dyn Channel>,
        launch: LaunchSpec,
        shared: Arc<PoolShared>,
        shutdown: broadcast::Receiver<()>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            provider,
            channel,
            launch,
            shared,
            shutdown,
            poll_interval,
        }
    }

    /// True when this supervisor should retire to meet the target size.
    fn should_shrink(&self) -> bool {
        self.shared.desired.load(Ordering::SeqCst) < self.shared.live.load(Ordering::SeqCst)
    }

    /// Runs until shutdown, shrink, or queue closure. Decrements the
    /// pool's live count exactly once on the way out.
    pub(crate) async fn run(mut self) {
        info!(worker_id = %self.id, "Supervisor started");
        loop {
            if self.should_shrink() {
                debug!(worker_id = %self.id, "Retiring to meet pool target");
                break;
            }

            let handle = match self.acquire().await {
                Some(handle) => handle,
                None => break,
            };

            match self.await_ready(&handle).await {
                ReadyOutcome::Running => {}
                ReadyOutcome::Dead => {
                    warn!(worker_id = %self.id, "Worker died before becoming ready");
                    self.discard(&handle).await;
                    continue;
                }
                ReadyOutcome::Shutdown => {
                    self.discard(&handle).await;
                    break;
                }
            }

            info!(worker_id = %self.id, endpoint = %handle.endpoint, "Worker serving");
            let outcome = self.serve(&handle).await;
            self.discard(&handle).await;
            match outcome {
                ServeOutcome::WorkerFailed => continue,
                ServeOutcome::Shutdown | ServeOutcome::Shrink => break,
            }
        }
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
        info!(worker_id = %self.id, "Supervisor stopped");
    }

    /// Acquires a worker, retrying indefinitely with a backoff tick.
    /// Returns `None` on shutdown or shrink.
    async fn acquire(&mut self) -> Option<WorkerHandle> {
        loop {
            if self.should_shrink() {
                return None;
            }
            let (attempt, interrupted) = {
                let provider = Arc::clone(&self.provider);
                let launch = self.launch.clone();
                let acquire = provider.acquire(&launch);
                tokio::pin!(acquire);
                tokio::select! {
                    result = &mut acquire => (result, false),
                    // The provider may already have committed the worker;
                    // let the attempt finish so the handle can be released.
                    _ = self.shutdown.recv() => (acquire.await, true),
                }
            };
            if interrupted {
                if let Ok(handle) = attempt {
                    self.discard(&handle).await;
                }
                return None;
            }
            match attempt {
                Ok(handle) => {
                    debug!(worker_id = %self.id, provider_id = %handle.provider_id, "Worker acquired");
                    return Some(handle);
                }
                Err(err) => {
                    warn!(worker_id = %self.id, error = %err, "Acquire failed, retrying");
                    tokio::select! {
                        _ = sleep(self.poll_interval) => {}
                        _ = self.shutdown.recv() => return None,
                    }
                }
            }
        }
    }

    /// Polls provider status until the worker runs or fails.
    async fn await_ready(&mut self, handle: &WorkerHandle) -> ReadyOutcome {
        loop {
            if self.should_shrink() {
                return ReadyOutcome::Shutdown;
            }
            let status = {
                let provider = Arc::clone(&self.provider);
                tokio::select! {
                    result = provider.status(handle) => Some(result),
                    _ = self.shutdown.recv() => None,
                }
            };
            match status {
                None => return ReadyOutcome::Shutdown,
                Some(Ok(WorkerStatus::Running)) => return ReadyOutcome::Running,
                Some(Ok(status)) if status.is_transitional() => {}
                Some(Ok(_)) => return ReadyOutcome::Dead,
                Some(Err(err)) => {
                    warn!(worker_id = %self.id, error = %err, "Status poll failed");
                    return ReadyOutcome::Dead;
                }
            }
            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                _ = self.shutdown.recv() => return ReadyOutcome::Shutdown,
            }
        }
    }

    /// Serves queue items on one live worker until it dies or the loop
    /// is asked to exit. A request pulled from the queue is either
    /// answered through its slot or pushed back, never dropped.
    async fn serve(&mut self, handle: &WorkerHandle) -> ServeOutcome {
        let mut status_tick = interval_at(
            Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        loop {
            if self.should_shrink() {
                return ServeOutcome::Shrink;
            }

            let queue = Arc::clone(&self.queue);
            let provider = Arc::clone(&self.provider);
            let dequeued = tokio::select! {
                item = queue.dequeue() => match item {
                    Ok(item) => Some(item),
                    // Queue closed: nothing left to serve.
                    Err(_) => return ServeOutcome::Shutdown,
                },
                _ = status_tick.tick() => {
                    match provider.status(handle).await {
                        Ok(WorkerStatus::Running) => None,
                        Ok(status) => {
                            warn!(worker_id = %self.id, %status, "Worker left running state");
                            return ServeOutcome::WorkerFailed;
                        }
                        Err(err) => {
                            warn!(worker_id = %self.id, error = %err, "Worker status lost");
                            return ServeOutcome::WorkerFailed;
                        }
                    }
                }
                _ = self.shutdown.recv() => return ServeOutcome::Shutdown,
            };
            let Some(item) = dequeued else { continue };

            let request = item.request.clone();
            let mut current = Some(item);
            let channel = Arc::clone(&self.channel);
            let delivery = tokio::select! {
                result = channel.deliver(&request, handle) => Some(result),
                _ = self.shutdown.recv() => None,
            };
            match delivery {
                None => {
                    self.requeue(current.take()).await;
                    return ServeOutcome::Shutdown;
                }
                Some(Ok(response)) => {
                    let item = match current.take() {
                        Some(item) => item,
                        None => continue,
                    };
                    // Caller may have given up; a dead slot is fine.
                    let _ = item.slot.send(response);
                }
                Some(Err(err)) => {
                    warn!(worker_id = %self.id, error = %err, "Delivery failed, requeueing");
                    self.requeue(current.take()).await;
                    return ServeOutcome::WorkerFailed;
                }
            }
        }
    }

    /// Puts an interrupted item back at the queue for another worker.
    async fn requeue(&self, item: Option<WorkItem>) {
        let Some(item) = item else { return };
        if item.slot.is_closed() {
            debug!(worker_id = %self.id, "Dropping requeue, caller gone");
            return;
        }
        if let Err(err) = self.queue.enqueue(item).await {
            warn!(worker_id = %self.id, error = %err, "Requeue into closed queue");
        }
    }

    /// Best-effort release of the provider-side worker.
    async fn discard(&self, handle: &WorkerHandle) {
        if let Err(err) = self.provider.release(handle).await {
            warn!(worker_id = %self.id, error = %err, "Worker release failed");
        }
    }
}
