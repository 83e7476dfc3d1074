use super::{Work, WorkQueue, World};
use crate::engine::{make_callback, AsyncHandle, ScriptFunction, ScriptLoop, ScriptObject, ScriptValue};
use crate::error::{BridgeError, Result};
use crate::metrics::BridgeMetrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use tracing::{debug, trace, warn};

struct ScriptInner {
    queue: Arc<WorkQueue>,
    async_handle: AsyncHandle,
    usage_count: AtomicUsize,
    loop_thread: ThreadId,
    // keeps `processPending` reachable for the async handle's callback
    _module: ScriptObject,
    metrics: Arc<BridgeMetrics>,
}

/// Posts work onto the script runtime's loop thread.
///
/// The async handle starts unreferenced; the usage counter references it
/// while any binding needs the loop to stay alive.
#[derive(Clone)]
pub struct ScriptContext {
    inner: Arc<ScriptInner>,
}

impl ScriptContext {
    /// Attach a context to `event_loop`. Must be called on the loop thread.
    pub fn new(event_loop: &ScriptLoop, metrics: Arc<BridgeMetrics>) -> Self {
        let queue = Arc::new(WorkQueue::new(World::Script, metrics.clone()));

        let pending = Arc::downgrade(&queue);
        let process_pending = ScriptFunction::new("processPending", move |_| {
            if let Some(queue) = pending.upgrade() {
                queue.process_pending();
            }
            Ok(ScriptValue::Undefined)
        });
        let module = ScriptObject::new();
        module.define_readonly("processPending", process_pending.clone().into());

        let receiver = module.clone();
        let async_handle = event_loop.async_init(move || {
            if let Err(e) = make_callback(&process_pending, Some(&receiver), Vec::new()) {
                warn!(error = %e, "processPending raised");
            }
        });
        async_handle.unreference();

        Self {
            inner: Arc::new(ScriptInner {
                queue,
                async_handle,
                usage_count: AtomicUsize::new(0),
                loop_thread: event_loop.thread_id(),
                _module: module,
                metrics,
            }),
        }
    }

    /// Post `work` to the loop thread. Safe from any thread.
    pub fn schedule<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_boxed(Box::new(work))
    }

    pub(crate) fn schedule_boxed(&self, work: Work) -> Result<()> {
        self.inner.queue.push(work)?;
        self.inner.async_handle.send();
        trace!("Scheduled script work");
        Ok(())
    }

    /// Post `work` and block until it has run on the loop thread.
    ///
    /// Fails with [`BridgeError::WouldDeadlock`] on the loop thread itself.
    pub fn perform<R, F>(&self, work: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_loop_thread() {
            return Err(BridgeError::WouldDeadlock(World::Script));
        }
        let handle = &self.inner.async_handle;
        self.inner.queue.perform(work, || handle.send())
    }

    /// Raise the usage counter; 0→1 references the async handle
    pub fn increase_usage(&self) {
        self.check_thread("increase_usage");
        let previous = self.inner.usage_count.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            self.inner.async_handle.reference();
            self.inner.metrics.record_usage_transition(true);
            debug!("Script loop referenced");
        }
    }

    /// Lower the usage counter; 1→0 unreferences the async handle
    pub fn decrease_usage(&self) {
        self.check_thread("decrease_usage");
        let decremented = self
            .inner
            .usage_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match decremented {
            Ok(1) => {
                self.inner.async_handle.unreference();
                self.inner.metrics.record_usage_transition(false);
                debug!("Script loop unreferenced");
            }
            Ok(_) => {}
            Err(_) => warn!("Usage counter decreased below zero; ignoring"),
        }
    }

    /// Current usage counter
    pub fn usage_count(&self) -> usize {
        self.inner.usage_count.load(Ordering::Acquire)
    }

    /// Whether the async handle keeps the loop alive
    pub fn is_referenced(&self) -> bool {
        self.inner.async_handle.has_ref()
    }

    /// Whether the caller is on the loop thread
    pub fn is_loop_thread(&self) -> bool {
        std::thread::current().id() == self.inner.loop_thread
    }

    /// Drain the queue on the calling thread. Returns how many items ran.
    pub fn process_pending(&self) -> usize {
        self.inner.queue.process_pending()
    }

    /// Block up to `timeout` for work to arrive
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        self.inner.queue.wait_for_work(timeout)
    }

    /// Items waiting to run
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Whether the context has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.queue.is_closed()
    }

    /// Metrics shared with the rest of the runtime
    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.inner.metrics
    }

    /// Close the queue and the async handle. Queued items are dropped.
    pub(crate) fn close(&self) {
        let leftover = self.inner.queue.close();
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "Dropping script work at close");
        }
        drop(leftover);
        self.inner.async_handle.close();
    }

    fn check_thread(&self, operation: &'static str) {
        if !self.is_loop_thread() {
            warn!(operation, "Usage counter touched off the script thread");
        }
    }
}
