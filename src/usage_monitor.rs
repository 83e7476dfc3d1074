//! Liveness monitor.
//!
//! Keeps the script loop alive until a wrapped native object reaches the
//! end of its life, observed either as an already-true predicate or as a
//! named signal such as `"detached"` or `"destroyed"`.

use crate::context::{NativeContext, ScriptContext};
use crate::native::NativeObject;
use crate::runtime::RuntimeHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

type Disconnect = Box<dyn FnOnce() + Send>;

/// Describes how to observe the end of life of a `T`
pub struct UsageMonitor<T: ?Sized> {
    is_finished: fn(&Arc<T>) -> bool,
    signal: &'static str,
}

impl<T: ?Sized + NativeObject> UsageMonitor<T> {
    /// Monitor `signal`, treating `is_finished` as already-ended
    pub fn new(is_finished: fn(&Arc<T>) -> bool, signal: &'static str) -> Self {
        Self { is_finished, signal }
    }

    /// Start monitoring `handle`.
    ///
    /// Raises the script usage counter until the object ends, or until the
    /// returned guard is dropped. Must be called on the script thread.
    pub fn enable(&self, handle: &Arc<T>, runtime: &RuntimeHandle) -> MonitorGuard {
        let state = Arc::new(MonitorState {
            active: AtomicBool::new(true),
            signal: self.signal,
            script: runtime.script().clone(),
            native: runtime.native().clone(),
            disconnect: Mutex::new(None),
        });
        runtime.script().increase_usage();

        let is_finished = self.is_finished;
        let signal = self.signal;
        let target = Arc::clone(handle);
        let weak = Arc::downgrade(&state);
        let connected = runtime.native().schedule(move || {
            let Some(state) = weak.upgrade() else {
                return;
            };
            if is_finished(&target) {
                state.deactivate();
                return;
            }

            let on_signal = Arc::downgrade(&state);
            let id = target.signals().connect(signal, move |_| {
                if let Some(state) = on_signal.upgrade() {
                    state.deactivate();
                }
            });

            let object: Weak<T> = Arc::downgrade(&target);
            let disconnect: Disconnect = Box::new(move || {
                if let Some(object) = object.upgrade() {
                    object.signals().disconnect(id);
                }
            });
            state.store_disconnect(disconnect);
        });

        if connected.is_err() {
            state.deactivate();
        }
        debug!(signal = self.signal, "Liveness monitor enabled");
        MonitorGuard { state }
    }
}

struct MonitorState {
    active: AtomicBool,
    signal: &'static str,
    script: ScriptContext,
    native: NativeContext,
    disconnect: Mutex<Option<Disconnect>>,
}

impl MonitorState {
    fn store_disconnect(&self, disconnect: Disconnect) {
        let mut slot = self.disconnect.lock();
        if self.active.load(Ordering::Acquire) {
            *slot = Some(disconnect);
        } else {
            drop(slot);
            disconnect();
        }
    }

    /// Lower the usage counter and disconnect. At most once.
    fn deactivate(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        if self.script.is_loop_thread() {
            self.script.decrease_usage();
        } else {
            let script = self.script.clone();
            if self.script.schedule(move || script.decrease_usage()).is_err() {
                warn!(signal = self.signal, "Script context closed; monitor usage not lowered");
            }
        }

        let disconnect = self.disconnect.lock().take();
        if let Some(disconnect) = disconnect {
            if self.native.is_native_thread() {
                disconnect();
            } else if self.native.schedule(disconnect).is_err() {
                debug!(signal = self.signal, "Native context closed; handler left connected");
            }
        }
        debug!(signal = self.signal, "Liveness monitor deactivated");
    }
}

/// Keeps a monitor attached; dropping it deactivates the monitor
pub struct MonitorGuard {
    state: Arc<MonitorState>,
}

impl MonitorGuard {
    /// Whether the monitor still holds the loop alive
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.state.deactivate();
    }
}
