//! Demand-driven pool sizing.
//!
//! A [`SizingPolicy`] turns a snapshot of pool observations into a
//! desired worker count. The reconciler calls it once per tick and the
//! pool converges to whatever it returns, so policies only decide
//! numbers and never touch workers directly.

use std::time::{Duration, Instant};

/// Snapshot handed to a policy on each reconcile tick.
#[derive(Debug, Clone, Copy)]
pub struct PoolObservations {
    /// Requests currently waiting in the dispatch queue.
    pub queue_depth: usize,
    /// Supervisors currently alive (any state).
    pub live: usize,
    /// Desired count from the previous tick.
    pub desired: usize,
    /// Hard upper bound configured on the pool.
    pub max_size: usize,
}

/// Strategy deciding how many workers the pool should run.
pub trait SizingPolicy: Send {
    fn desired(&mut self, obs: &PoolObservations) -> usize;
}

/// Grows by one worker whenever the backlog keeps building, shrinks to
/// a floor of one once the queue has stayed empty, holds otherwise.
/// Checks are rate-limited by a cooldown so a burst cannot trigger a
/// spawn stampede.
pub struct QueuePressurePolicy {
    cooldown: Duration,
    initial: usize,
    floor: usize,
    state: Option<PolicyState>,
}

struct PolicyState {
    prev_queue_depth: usize,
    checked_at: Instant,
}

impl QueuePressurePolicy {
    pub fn new() -> Self {
        Self {
            cooldown: Duration::from_secs(10),
            initial: 3,
            floor: 1,
            state: None,
        }
    }

    /// Minimum interval between two sizing decisions.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Worker count requested on the very first tick.
    pub fn with_initial(mut self, initial: usize) -> Self {
        self.initial = initial;
        self
    }

    /// Count the pool shrinks to when the queue stays empty.
    pub fn with_floor(mut self, floor: usize) -> Self {
        self.floor = floor;
        self
    }
}

impl Default for QueuePressurePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SizingPolicy for QueuePressurePolicy {
    fn desired(&mut self, obs: &PoolObservations) -> usize {
        let now = Instant::now();
        let state = match self.state.as_mut() {
            None => {
                self.state = Some(PolicyState {
                    prev_queue_depth: obs.queue_depth,
                    checked_at: now,
                });
                return self.initial.min(obs.max_size);
            }
            Some(state) => state,
        };

        if now.duration_since(state.checked_at) < self.cooldown {
            return obs.desired;
        }

        let prev = state.prev_queue_depth;
        state.prev_queue_depth = obs.queue_depth;
        state.checked_at = now;

        if obs.queue_depth > prev {
            // Backlog grew across a full cooldown window.
            (obs.desired + 1).min(obs.max_size)
        } else if obs.queue_depth == 0 && prev == 0 {
            // Shrink only; the floor never forces growth.
            self.floor.min(obs.desired)
        } else {
            obs.desired
        }
    }
}
