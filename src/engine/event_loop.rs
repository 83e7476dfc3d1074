//! Single-threaded cooperative event loop.
//!
//! The loop owns a set of async handles. An [`AsyncHandle`] can be
//! signalled from any thread; the loop thread then invokes the handle's
//! callback. A referenced handle keeps [`ScriptLoop::run`] from returning,
//! an unreferenced one does not.
//!
//! Microtasks are per thread. They are drained to a fixpoint whenever the
//! outermost [`make_callback`] returns and after each loop iteration.

use super::json;
use super::object::{ScriptFunction, ScriptObject};
use super::value::ScriptValue;
use crate::error::ScriptError;
use parking_lot::{Condvar, Mutex};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::{trace, warn};

type Microtask = Box<dyn FnOnce()>;
type HandleCallback = Arc<dyn Fn() + Send + Sync>;

thread_local! {
    static MICROTASKS: RefCell<VecDeque<Microtask>> = RefCell::new(VecDeque::new());
    static CALLBACK_DEPTH: Cell<usize> = Cell::new(0);
}

/// Queue a microtask on the current thread
pub fn queue_microtask<F: FnOnce() + 'static>(task: F) {
    MICROTASKS.with(|q| q.borrow_mut().push_back(Box::new(task)));
}

/// Run queued microtasks until none remain. Returns how many ran.
pub fn run_microtasks() -> usize {
    let mut ran = 0;
    // pop one at a time so tasks may queue more tasks
    while let Some(task) = MICROTASKS.with(|q| q.borrow_mut().pop_front()) {
        task();
        ran += 1;
    }
    ran
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        CALLBACK_DEPTH.with(|d| d.set(d.get() + 1));
        DepthGuard
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CALLBACK_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Enter the script runtime from the loop.
///
/// Calls `function` and, when this is the outermost entry, runs the
/// microtask checkpoint before returning.
pub fn make_callback(
    function: &ScriptFunction,
    this: Option<&ScriptObject>,
    args: Vec<ScriptValue>,
) -> Result<ScriptValue, ScriptError> {
    let result = {
        let _depth = DepthGuard::enter();
        function.call(this, args)
    };
    if CALLBACK_DEPTH.with(|d| d.get()) == 0 {
        run_microtasks();
    }
    result
}

struct HandleEntry {
    callback: HandleCallback,
    referenced: bool,
    pending: bool,
}

#[derive(Default)]
struct LoopState {
    handles: HashMap<u64, HandleEntry>,
    ready: VecDeque<u64>,
    next_id: u64,
}

impl LoopState {
    fn is_alive(&self) -> bool {
        self.handles.values().any(|h| h.referenced)
    }

    fn take_ready(&mut self) -> Vec<HandleCallback> {
        let mut batch = Vec::with_capacity(self.ready.len());
        while let Some(id) = self.ready.pop_front() {
            if let Some(entry) = self.handles.get_mut(&id) {
                entry.pending = false;
                batch.push(entry.callback.clone());
            }
        }
        batch
    }
}

struct LoopShared {
    state: Mutex<LoopState>,
    cond: Condvar,
}

/// The script runtime's event loop.
///
/// Bound to the thread that created it.
pub struct ScriptLoop {
    shared: Arc<LoopShared>,
    thread: ThreadId,
    global: ScriptObject,
    _not_send: PhantomData<Rc<()>>,
}

impl ScriptLoop {
    /// Create a loop on the current thread, with a global object that has
    /// `JSON` installed
    pub fn new() -> Self {
        let global = ScriptObject::new();
        json::install(&global);
        Self {
            shared: Arc::new(LoopShared {
                state: Mutex::new(LoopState::default()),
                cond: Condvar::new(),
            }),
            thread: std::thread::current().id(),
            global,
            _not_send: PhantomData,
        }
    }

    /// The global object
    pub fn global(&self) -> &ScriptObject {
        &self.global
    }

    /// The loop thread
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// Register an async handle. New handles start referenced.
    pub fn async_init<F>(&self, callback: F) -> AsyncHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.handles.insert(
            id,
            HandleEntry {
                callback: Arc::new(callback),
                referenced: true,
                pending: false,
            },
        );
        AsyncHandle {
            id,
            shared: self.shared.clone(),
        }
    }

    /// Whether any referenced handle is open
    pub fn is_alive(&self) -> bool {
        self.shared.state.lock().is_alive()
    }

    /// Run until no referenced handle remains and nothing is signalled
    pub fn run(&self) {
        self.run_until(|| false);
    }

    /// Run until `done` returns true or the loop has nothing left to do.
    /// Returns the final value of `done`.
    pub fn run_until<F: FnMut() -> bool>(&self, mut done: F) -> bool {
        self.check_thread();
        loop {
            if done() {
                return true;
            }
            match self.next_batch() {
                Some(batch) => self.dispatch(batch),
                None => return done(),
            }
        }
    }

    /// Dispatch every currently signalled handle without blocking.
    /// Returns how many callbacks ran.
    pub fn run_nowait(&self) -> usize {
        self.check_thread();
        let batch = self.shared.state.lock().take_ready();
        let count = batch.len();
        self.dispatch(batch);
        count
    }

    fn next_batch(&self) -> Option<Vec<HandleCallback>> {
        let mut state = self.shared.state.lock();
        loop {
            if !state.ready.is_empty() {
                return Some(state.take_ready());
            }
            if !state.is_alive() {
                return None;
            }
            self.shared.cond.wait(&mut state);
        }
    }

    fn dispatch(&self, batch: Vec<HandleCallback>) {
        trace!(callbacks = batch.len(), "Dispatching async handles");
        for callback in batch {
            callback();
        }
        run_microtasks();
    }

    fn check_thread(&self) {
        if std::thread::current().id() != self.thread {
            warn!("Script loop driven from a thread other than its own");
        }
    }
}

impl Default for ScriptLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-hop primitive: wakes the loop and runs a callback on its thread
#[derive(Clone)]
pub struct AsyncHandle {
    id: u64,
    shared: Arc<LoopShared>,
}

impl AsyncHandle {
    /// Signal the handle. Signals coalesce until the callback runs.
    pub fn send(&self) {
        let mut state = self.shared.state.lock();
        let queued = match state.handles.get_mut(&self.id) {
            Some(entry) if !entry.pending => {
                entry.pending = true;
                true
            }
            _ => false,
        };
        if queued {
            state.ready.push_back(self.id);
            self.shared.cond.notify_all();
        }
    }

    /// Keep the loop alive while this handle is open
    pub fn reference(&self) {
        self.set_referenced(true);
    }

    /// Let the loop exit even if this handle is open
    pub fn unreference(&self) {
        self.set_referenced(false);
    }

    fn set_referenced(&self, referenced: bool) {
        let mut state = self.shared.state.lock();
        if let Some(entry) = state.handles.get_mut(&self.id) {
            entry.referenced = referenced;
        }
        self.shared.cond.notify_all();
    }

    /// Whether the handle currently keeps the loop alive
    pub fn has_ref(&self) -> bool {
        self.shared
            .state
            .lock()
            .handles
            .get(&self.id)
            .map_or(false, |entry| entry.referenced)
    }

    /// Whether the handle is still registered
    pub fn is_open(&self) -> bool {
        self.shared.state.lock().handles.contains_key(&self.id)
    }

    /// Close the handle. Pending signals are discarded.
    pub fn close(&self) {
        let removed = {
            let mut state = self.shared.state.lock();
            let removed = state.handles.remove(&self.id);
            self.shared.cond.notify_all();
            removed
        };
        drop(removed);
    }
}
