//! Thread-world contexts.
//!
//! Each world (script, native) runs a single-threaded loop on its own OS
//! thread. A context is the only way to get work onto that thread:
//! `schedule` posts a closure and returns, `perform` posts a closure and
//! blocks until it has run.
//!
//! Both contexts share [`WorkQueue`]: a mutex-protected FIFO with a
//! condition variable. Items are popped under the lock and executed with
//! the lock released, so a running item may schedule more work onto the
//! same queue and producers on other threads are never blocked behind it.

mod native;
mod script;

pub use native::NativeContext;
pub use script::ScriptContext;

use crate::error::{BridgeError, Result};
use crate::metrics::BridgeMetrics;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// The two thread worlds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum World {
    /// The script runtime's loop thread
    Script,
    /// The native library's loop thread
    Native,
}

impl std::fmt::Display for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            World::Script => write!(f, "script"),
            World::Native => write!(f, "native"),
        }
    }
}

/// A unit of work posted to a context
pub type Work = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closed,
}

struct QueueState {
    items: VecDeque<Work>,
    phase: Phase,
}

pub(crate) struct WorkQueue {
    world: World,
    state: Mutex<QueueState>,
    cond: Condvar,
    metrics: Arc<BridgeMetrics>,
}

impl WorkQueue {
    pub(crate) fn new(world: World, metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            world,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                phase: Phase::Open,
            }),
            cond: Condvar::new(),
            metrics,
        }
    }

    /// Append an item. A closed queue hands the item back to be dropped.
    pub(crate) fn push(&self, work: Work) -> Result<()> {
        let rejected = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Open => {
                    state.items.push_back(work);
                    self.cond.notify_all();
                    None
                }
                Phase::Closed => Some(work),
            }
        };

        match rejected {
            None => {
                self.metrics.record_scheduled(self.world);
                Ok(())
            }
            Some(work) => {
                // dropped outside the lock: its captures may schedule again
                drop(work);
                warn!(world = %self.world, "Dropping work scheduled on a closed context");
                Err(BridgeError::ContextClosed(self.world))
            }
        }
    }

    /// Post `f` and block until it has run. `signal` wakes the consumer.
    pub(crate) fn perform<R, F, S>(self: &Arc<Self>, f: F, signal: S) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
        S: FnOnce(),
    {
        let slot = Arc::new(Mutex::new(PerformState::Waiting));
        let guard = PerformGuard {
            slot: slot.clone(),
            queue: Arc::downgrade(self),
            settled: false,
        };
        self.push(Box::new(move || {
            let value = f();
            guard.finish(value);
        }))?;
        signal();

        let mut state = self.state.lock();
        loop {
            match std::mem::replace(&mut *slot.lock(), PerformState::Waiting) {
                PerformState::Waiting => {}
                PerformState::Done(value) => {
                    drop(state);
                    self.metrics.record_perform();
                    return Ok(value);
                }
                PerformState::Abandoned => {
                    return Err(BridgeError::Abandoned(self.world));
                }
            }
            self.cond.wait(&mut state);
        }
    }

    /// Run queued items until the queue is empty. Returns how many ran.
    pub(crate) fn process_pending(&self) -> usize {
        let mut processed = 0;
        let mut state = self.state.lock();
        while let Some(work) = state.items.pop_front() {
            MutexGuard::unlocked(&mut state, work);
            processed += 1;
        }
        drop(state);

        if processed > 0 {
            self.metrics.record_processed(self.world, processed as u64);
        }
        processed
    }

    /// Wait up to `timeout` for an item to arrive
    pub(crate) fn wait_for_work(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.items.is_empty() && state.phase == Phase::Open {
            self.cond.wait_for(&mut state, timeout);
        }
        !state.items.is_empty()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().phase == Phase::Closed
    }

    /// Refuse further items and hand back whatever is still queued
    pub(crate) fn close(&self) -> Vec<Work> {
        let leftover: Vec<Work> = {
            let mut state = self.state.lock();
            state.phase = Phase::Closed;
            self.cond.notify_all();
            state.items.drain(..).collect()
        };
        debug!(world = %self.world, leftover = leftover.len(), "Closed work queue");
        leftover
    }
}

enum PerformState<R> {
    Waiting,
    Done(R),
    Abandoned,
}

/// Carries a perform result back to the waiter; reports abandonment if the
/// work is dropped without running.
struct PerformGuard<R> {
    slot: Arc<Mutex<PerformState<R>>>,
    queue: Weak<WorkQueue>,
    settled: bool,
}

impl<R> PerformGuard<R> {
    fn finish(mut self, value: R) {
        self.settle(PerformState::Done(value));
    }

    fn settle(&mut self, outcome: PerformState<R>) {
        self.settled = true;
        match self.queue.upgrade() {
            Some(queue) => {
                // the waiter checks the slot under the queue lock
                let _state = queue.state.lock();
                *self.slot.lock() = outcome;
                queue.cond.notify_all();
            }
            None => *self.slot.lock() = outcome,
        }
    }
}

impl<R> Drop for PerformGuard<R> {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(PerformState::Abandoned);
        }
    }
}
