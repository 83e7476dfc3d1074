use super::{Work, WorkQueue, World};
use crate::config::{BridgeConfig, TeardownPolicy};
use crate::error::{BridgeError, Result};
use crate::metrics::BridgeMetrics;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tracing::{debug, info, trace, warn};

struct NativeInner {
    queue: Arc<WorkQueue>,
    wakeup: Arc<Notify>,
    stopping: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    metrics: Arc<BridgeMetrics>,
}

/// Posts work onto the native library's loop thread.
///
/// The thread runs a current-thread tokio runtime inside a [`LocalSet`],
/// which plays the native main context: work items may call
/// `tokio::task::spawn_local`, and the library's own completions run there.
#[derive(Clone)]
pub struct NativeContext {
    inner: Arc<NativeInner>,
}

impl NativeContext {
    /// Start the native loop thread
    pub fn spawn(config: &BridgeConfig, metrics: Arc<BridgeMetrics>) -> Result<Self> {
        let queue = Arc::new(WorkQueue::new(World::Native, metrics.clone()));
        let wakeup = Arc::new(Notify::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let policy = config.teardown_policy;

        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<std::io::Result<()>>(1);
        let thread = std::thread::Builder::new()
            .name(config.native_thread_name.clone())
            .spawn({
                let queue = queue.clone();
                let wakeup = wakeup.clone();
                let stopping = stopping.clone();
                move || {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    let local = LocalSet::new();
                    local.block_on(&runtime, native_main(queue, wakeup, stopping, policy));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BridgeError::Spawn(e)),
            Err(_) => {
                return Err(BridgeError::Spawn(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "native thread exited during startup",
                )))
            }
        }

        info!(
            thread = %config.native_thread_name,
            policy = ?policy,
            "Native loop started"
        );

        Ok(Self {
            inner: Arc::new(NativeInner {
                queue,
                wakeup,
                stopping,
                thread_id: thread.thread().id(),
                thread: Mutex::new(Some(thread)),
                metrics,
            }),
        })
    }

    /// Post `work` to the native thread. Safe from any thread.
    pub fn schedule<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_boxed(Box::new(work))
    }

    pub(crate) fn schedule_boxed(&self, work: Work) -> Result<()> {
        self.inner.queue.push(work)?;
        self.inner.wakeup.notify_one();
        trace!("Scheduled native work");
        Ok(())
    }

    /// Post `work` and block until it has run on the native thread.
    ///
    /// Fails with [`BridgeError::WouldDeadlock`] on the native thread itself.
    pub fn perform<R, F>(&self, work: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_native_thread() {
            return Err(BridgeError::WouldDeadlock(World::Native));
        }
        let wakeup = &self.inner.wakeup;
        self.inner.queue.perform(work, || wakeup.notify_one())
    }

    /// Drop a strong handle reference on the native thread.
    ///
    /// Runs inline on the native thread, or when the context has closed.
    pub fn release<T>(&self, handle: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.is_native_thread() {
            drop(handle);
            self.inner.metrics.record_release(false);
            return;
        }
        match self.schedule(move || drop(handle)) {
            Ok(()) => self.inner.metrics.record_release(true),
            Err(_) => {
                warn!("Native context closed; released handle inline");
                self.inner.metrics.record_release(false);
            }
        }
    }

    /// Whether the caller is on the native thread
    pub fn is_native_thread(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    /// Ask the loop to stop once its queue is handled per the teardown policy
    pub fn request_shutdown(&self) {
        if !self.inner.stopping.swap(true, Ordering::AcqRel) {
            debug!("Native loop shutdown requested");
        }
        self.inner.wakeup.notify_one();
    }

    /// Whether the native thread has exited
    pub fn is_terminated(&self) -> bool {
        self.inner
            .thread
            .lock()
            .as_ref()
            .map_or(true, |thread| thread.is_finished())
    }

    /// Whether the context refuses new work
    pub fn is_closed(&self) -> bool {
        self.inner.queue.is_closed()
    }

    /// Wait for the native thread to exit
    pub fn join(&self) {
        self.inner.join();
    }
}

impl NativeInner {
    fn join(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if thread.thread().id() == std::thread::current().id() {
            warn!("Native loop asked to join itself; detaching");
            return;
        }
        if thread.join().is_err() {
            warn!("Native loop thread panicked");
        }
        info!("Native loop stopped");
    }
}

impl Drop for NativeInner {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::Release);
        self.wakeup.notify_one();
        self.join();
    }
}

async fn native_main(
    queue: Arc<WorkQueue>,
    wakeup: Arc<Notify>,
    stopping: Arc<AtomicBool>,
    policy: TeardownPolicy,
) {
    loop {
        queue.process_pending();
        if stopping.load(Ordering::Acquire) {
            if policy == TeardownPolicy::Drop {
                break;
            }
            // ready local tasks may still post completions
            tokio::task::yield_now().await;
            if queue.is_empty() {
                break;
            }
            continue;
        }
        // a notify_one with no waiter leaves a permit, so no wakeup is lost
        wakeup.notified().await;
    }

    let leftover = queue.close();
    match policy {
        TeardownPolicy::Drain => {
            for work in leftover {
                work();
            }
        }
        TeardownPolicy::Drop => {
            if !leftover.is_empty() {
                warn!(count = leftover.len(), "Dropping native work at shutdown");
            }
        }
    }
}
