//! Elastic worker pool.
//!
//! A pool owns one dispatch queue and a set of supervisors. A
//! background reconciler compares the live supervisor count against the
//! desired size once per tick and spawns supervisors to close the gap;
//! shrinking happens on the supervisor side, so the reconciler never
//! tears a worker down. Desired size comes from a fixed number or a
//! pluggable [`SizingPolicy`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::channel::{build_channel, Channel, ChannelKind, ScriptChannelConfig};
use crate::provider::{LaunchSpec, Provider};
use crate::queue::DispatchQueue;
use crate::sizing::{PoolObservations, SizingPolicy};
use crate::supervisor::WorkerSupervisor;

/// Tuning for one pool.
#[derive(Clone)]
pub struct PoolConfig {
    pub launch: LaunchSpec,
    pub channel: ChannelKind,
    pub initial_size: usize,
    pub max_size: usize,
    /// Worker status poll period inside supervisors.
    pub poll_interval: Duration,
    /// Reconciler tick period.
    pub reconcile_interval: Duration,
    pub script: ScriptChannelConfig,
}

impl PoolConfig {
    pub fn new(launch: LaunchSpec) -> Self {
        Self {
            launch,
            channel: ChannelKind::Tunnel,
            initial_size: 1,
            max_size: 5,
            poll_interval: Duration::from_secs(1),
            reconcile_interval: Duration::from_secs(1),
            script: ScriptChannelConfig::default(),
        }
    }

    pub fn with_channel(mut self, channel: ChannelKind) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_reconcile_interval(mut self, reconcile_interval: Duration) -> Self {
        self.reconcile_interval = reconcile_interval;
        self
    }

    pub fn with_script(mut self, script: ScriptChannelConfig) -> Self {
        self.script = script;
        self
    }
}

/// Counters shared between the reconciler and its supervisors.
pub(crate) struct PoolShared {
    pub(crate) desired: AtomicUsize,
    pub(crate) live: AtomicUsize,
}

/// Where the desired size comes from on each tick.
pub enum SizeDirective {
    Fixed(usize),
    Policy(Box<dyn SizingPolicy>),
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub live: usize,
    pub desired: usize,
    pub queue_depth: usize,
}

pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: String,
    config: PoolConfig,
    provider: Arc<dyn Provider>,
    channel: Arc<dyn Channel>,
    queue: Arc<DispatchQueue>,
    shared: Arc<PoolShared>,
    directive: Mutex<SizeDirective>,
    shutdown: broadcast::Sender<()>,
    started: AtomicBool,
    spawned: AtomicUsize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    pub fn new(name: impl Into<String>, config: PoolConfig, provider: Arc<dyn Provider>) -> Self {
        let channel = build_channel(config.channel, &provider, config.script.clone());
        Self::with_channel(name, config, provider, channel)
    }

    /// Builds a pool around an explicit transport channel.
    pub fn with_channel(
        name: impl Into<String>,
        config: PoolConfig,
        provider: Arc<dyn Provider>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let initial = config.initial_size.min(config.max_size);
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                config,
                provider,
                channel,
                queue: Arc::new(DispatchQueue::new()),
                shared: Arc::new(PoolShared {
                    desired: AtomicUsize::new(initial),
                    live: AtomicUsize::new(0),
                }),
                directive: Mutex::new(SizeDirective::Fixed(initial)),
                shutdown,
                started: AtomicBool::new(false),
                spawned: AtomicUsize::new(0),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn queue(&self) -> Arc<DispatchQueue> {
        Arc::clone(&self.inner.queue)
    }

    /// Pins the pool to a fixed worker count.
    pub async fn resize(&self, size: usize) {
        let size = size.min(self.inner.config.max_size);
        *self.inner.directive.lock().await = SizeDirective::Fixed(size);
        self.inner.shared.desired.store(size, Ordering::SeqCst);
    }

    /// Hands sizing over to a policy evaluated each reconcile tick.
    pub async fn resize_with(&self, policy: Box<dyn SizingPolicy>) {
        *self.inner.directive.lock().await = SizeDirective::Policy(policy);
    }

    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            live: self.inner.shared.live.load(Ordering::SeqCst),
            desired: self.inner.shared.desired.load(Ordering::SeqCst),
            queue_depth: self.inner.queue.len().await,
        }
    }

    /// Starts the reconciler. Calling twice is a no-op.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(pool = %self.inner.name, "Pool starting");
        // Subscribe before spawning so a stop() racing the first poll of
        // the task still lands in the receiver's buffer.
        let shutdown = self.inner.shutdown.subscribe();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.reconcile_loop(shutdown));
        self.inner.tasks.lock().await.push(handle);
    }

    /// Stops the reconciler, drains supervisors, closes the queue.
    pub async fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(pool = %self.inner.name, "Pool stopping");
        // Supervisors spawned by an in-flight reconcile subscribe too
        // late to see the broadcast; a zero target retires them anyway.
        self.inner.shared.desired.store(0, Ordering::SeqCst);
        // A send error only means nothing is listening yet.
        let _ = self.inner.shutdown.send(());
        self.inner.queue.close().await;
        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        for task in tasks {
            if let Err(err) = task.await {
                warn!(pool = %self.inner.name, error = %err, "Pool task panicked");
            }
        }
        info!(pool = %self.inner.name, "Pool stopped");
    }
}

impl PoolInner {
    async fn reconcile_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.reconcile_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.reconcile().await,
                _ = shutdown.recv() => break,
            }
        }
        debug!(pool = %self.name, "Reconciler exited");
    }

    /// One reconcile step: refresh the target, then spawn supervisors
    /// up to it. Excess supervisors retire themselves.
    async fn reconcile(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let live = self.shared.live.load(Ordering::SeqCst);
        let desired = {
            let mut directive = self.directive.lock().await;
            match &mut *directive {
                SizeDirective::Fixed(size) => *size,
                SizeDirective::Policy(policy) => {
                    let obs = PoolObservations {
                        queue_depth: self.queue.len().await,
                        live,
                        desired: self.shared.desired.load(Ordering::SeqCst),
                        max_size: self.config.max_size,
                    };
                    policy.desired(&obs).min(self.config.max_size)
                }
            }
        };
        self.shared.desired.store(desired, Ordering::SeqCst);

        while self.shared.live.load(Ordering::SeqCst) < desired {
            self.shared.live.fetch_add(1, Ordering::SeqCst);
            let n = self.spawned.fetch_add(1, Ordering::SeqCst);
            let id = format!("{}-worker-{}", self.name, n);
            debug!(pool = %self.name, worker_id = %id, "Spawning supervisor");
            let supervisor = WorkerSupervisor::new(
                id,
                Arc::clone(&self.queue),
                Arc::clone(&self.provider),
                Arc::clone(&self.channel),
                self.config.launch.clone(),
                Arc::clone(&self.shared),
                self.shutdown.subscribe(),
                self.config.poll_interval,
            );
            let handle = tokio::spawn(supervisor.run());
            self.tasks.lock().await.push(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = PoolConfig::new(LaunchSpec::new("calc:latest"))
            .with_channel(ChannelKind::Script)
            .with_initial_size(3)
            .with_max_size(4)
            .with_poll_interval(Duration::from_millis(10));
        assert_eq!(config.channel, ChannelKind::Script);
        assert_eq!(config.initial_size, 3);
        assert_eq!(config.max_size, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.reconcile_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_initial_desired_capped_by_max() {
        let config = PoolConfig::new(LaunchSpec::new("calc:latest"))
            .with_initial_size(9)
            .with_max_size(2);
        let provider: Arc<dyn crate::provider::Provider> =
            Arc::new(crate::provider::test_support::NullProvider);
        let pool = Pool::new("calc", config, provider);
        assert_eq!(pool.inner.shared.desired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_returns_even_when_sent_before_reconciler_runs() {
        let config = PoolConfig::new(LaunchSpec::new("calc:latest"))
            .with_initial_size(1)
            .with_poll_interval(Duration::from_millis(10))
            .with_reconcile_interval(Duration::from_millis(10));
        let provider: Arc<dyn crate::provider::Provider> =
            Arc::new(crate::provider::test_support::NullProvider);
        let pool = Pool::new("calc", config, provider);
        pool.start().await;
        // On a current-thread runtime the broadcast goes out before the
        // reconciler task is first polled; it must still be observed.
        let stopped = tokio::time::timeout(Duration::from_secs(2), pool.stop()).await;
        assert!(stopped.is_ok());
        assert!(pool.queue().is_closed());
    }
}
