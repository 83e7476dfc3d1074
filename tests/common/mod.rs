//! Fake native library and test harness shared by the integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, ensure, Context};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use worldbridge::engine::{PromiseState, Settlement};
use worldbridge::native::{AsyncReadyCallback, AsyncResult, NativeObject, Signals};
use worldbridge::{
    bindings, BridgeConfig, NativeError, Runtime, ScriptApi, ScriptLoop, ScriptObject, ScriptValue, Session,
    SessionApi,
};

/// Complete `callback` from a local task on the native thread, after one
/// turn of the native loop.
fn complete_later<T: Send + 'static>(callback: AsyncReadyCallback, outcome: Result<T, NativeError>) {
    tokio::task::spawn_local(async move {
        tokio::task::yield_now().await;
        callback(AsyncResult::new(outcome));
    });
}

/// Per-operation failure injection
#[derive(Default)]
pub struct Failures(Mutex<HashMap<&'static str, NativeError>>);

impl Failures {
    pub fn set(&self, operation: &'static str, error: NativeError) {
        self.0.lock().insert(operation, error);
    }

    fn check(&self, operation: &'static str) -> Result<(), NativeError> {
        match self.0.lock().get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

pub struct FakeScript {
    me: Weak<FakeScript>,
    pub name: Option<String>,
    pub source: String,
    destroyed: AtomicBool,
    signals: Signals,
    pub failures: Failures,
    pub messages: Mutex<Vec<String>>,
}

impl FakeScript {
    pub fn new(name: Option<&str>, source: &str) -> Arc<Self> {
        Arc::new_cyclic(|me| FakeScript {
            me: me.clone(),
            name: name.map(str::to_string),
            source: source.to_string(),
            destroyed: AtomicBool::new(false),
            signals: Signals::new(),
            failures: Failures::default(),
            messages: Mutex::new(Vec::new()),
        })
    }
}

impl NativeObject for FakeScript {
    fn type_name(&self) -> &'static str {
        "FakeScript"
    }

    fn signals(&self) -> &Signals {
        &self.signals
    }
}

impl ScriptApi for FakeScript {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn load(&self, callback: AsyncReadyCallback) {
        complete_later(callback, self.failures.check("load"));
    }

    fn load_finish(&self, result: AsyncResult) -> Result<(), NativeError> {
        result.propagate()
    }

    fn unload(&self, callback: AsyncReadyCallback) {
        let outcome = self.failures.check("unload");
        let me = self.me.upgrade();
        tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            if let (Ok(()), Some(me)) = (&outcome, &me) {
                me.destroyed.store(true, Ordering::SeqCst);
                me.signals.emit("destroyed", &[]);
            }
            callback(AsyncResult::new(outcome));
        });
    }

    fn unload_finish(&self, result: AsyncResult) -> Result<(), NativeError> {
        result.propagate()
    }

    /// Records the message and echoes it back on the `message` signal
    fn post_message(&self, message: &str, callback: AsyncReadyCallback) {
        let outcome = self.failures.check("postMessage");
        if outcome.is_ok() {
            self.messages.lock().push(message.to_string());
            self.signals.emit("message", &[json!(message), Value::Null]);
        }
        complete_later(callback, outcome);
    }

    fn post_message_finish(&self, result: AsyncResult) -> Result<(), NativeError> {
        result.propagate()
    }
}

pub struct FakeSession {
    me: Weak<FakeSession>,
    pid: u32,
    detached: AtomicBool,
    signals: Signals,
    pub failures: Failures,
    pub debugger_port: Mutex<Option<u16>>,
    pub created: Mutex<Vec<Arc<FakeScript>>>,
}

impl FakeSession {
    pub fn new(pid: u32) -> Arc<Self> {
        Arc::new_cyclic(|me| FakeSession {
            me: me.clone(),
            pid,
            detached: AtomicBool::new(false),
            signals: Signals::new(),
            failures: Failures::default(),
            debugger_port: Mutex::new(None),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn handle(self: &Arc<Self>) -> Arc<dyn SessionApi> {
        self.clone()
    }

    /// Flag the session as detached without emitting `detached`
    pub fn mark_detached(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }
}

impl NativeObject for FakeSession {
    fn type_name(&self) -> &'static str {
        "FakeSession"
    }

    fn signals(&self) -> &Signals {
        &self.signals
    }
}

impl SessionApi for FakeSession {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    fn detach(&self, callback: AsyncReadyCallback) {
        let outcome = self.failures.check("detach");
        let me = self.me.upgrade();
        tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            if let (Ok(()), Some(me)) = (&outcome, &me) {
                me.detached.store(true, Ordering::SeqCst);
                me.signals.emit("detached", &[json!("application-requested")]);
            }
            callback(AsyncResult::new(outcome));
        });
    }

    fn detach_finish(&self, result: AsyncResult) -> Result<(), NativeError> {
        result.propagate()
    }

    fn create_script(&self, name: Option<&str>, source: &str, callback: AsyncReadyCallback) {
        let outcome: Result<Arc<dyn ScriptApi>, NativeError> = self.failures.check("createScript").map(|()| {
            let script = FakeScript::new(name, source);
            self.created.lock().push(script.clone());
            script as Arc<dyn ScriptApi>
        });
        complete_later(callback, outcome);
    }

    fn create_script_finish(&self, result: AsyncResult) -> Result<Arc<dyn ScriptApi>, NativeError> {
        result.propagate()
    }

    fn enable_debugger(&self, port: u16, callback: AsyncReadyCallback) {
        let outcome = self.failures.check("enableDebugger");
        if outcome.is_ok() {
            *self.debugger_port.lock() = Some(port);
        }
        complete_later(callback, outcome);
    }

    fn enable_debugger_finish(&self, result: AsyncResult) -> Result<(), NativeError> {
        result.propagate()
    }

    fn disable_debugger(&self, callback: AsyncReadyCallback) {
        let outcome = self.failures.check("disableDebugger");
        if outcome.is_ok() {
            *self.debugger_port.lock() = None;
        }
        complete_later(callback, outcome);
    }

    fn disable_debugger_finish(&self, result: AsyncResult) -> Result<(), NativeError> {
        result.propagate()
    }
}

/// A runtime with the bindings registered on `exports`.
///
/// Field order matters: the runtime is torn down before the loop goes away.
pub struct Harness {
    pub runtime: Runtime,
    pub exports: ScriptObject,
    pub event_loop: ScriptLoop,
}

impl Harness {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> anyhow::Result<Self> {
        worldbridge::init_tracing(&config.log_filter);
        let event_loop = ScriptLoop::new();
        let runtime = Runtime::bootstrap(&event_loop, config).context("bootstrap runtime")?;
        let exports = ScriptObject::new();
        bindings::init(&exports, &runtime);
        Ok(Self {
            runtime,
            exports,
            event_loop,
        })
    }

    /// Wrap a fake session
    pub fn session(&self, fake: &Arc<FakeSession>) -> anyhow::Result<ScriptObject> {
        Ok(Session::new_instance(&fake.handle(), &self.runtime)?)
    }

    /// Drive the loop until `value`, a promise, settles
    pub fn settle(&self, value: ScriptValue) -> anyhow::Result<Settlement> {
        let promise = value
            .as_promise()
            .cloned()
            .ok_or_else(|| anyhow!("expected a promise, got {}", value.type_name()))?;
        let settled = self.event_loop.run_until(|| !promise.is_pending());
        ensure!(settled, "loop went idle with the promise pending");
        match promise.state() {
            PromiseState::Fulfilled(value) => Ok(Ok(value)),
            PromiseState::Rejected(error) => Ok(Err(error)),
            PromiseState::Pending => Err(anyhow!("promise still pending")),
        }
    }

    /// Wait until everything already posted to the native thread has run,
    /// then drain what it posted back
    pub fn barrier(&self) -> anyhow::Result<()> {
        self.runtime.native().perform(|| ())?;
        self.runtime.script().process_pending();
        Ok(())
    }
}
