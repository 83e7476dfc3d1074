//! The runtime container.
//!
//! A [`Runtime`] owns the script and native contexts, the service registry,
//! the pre-resolved JSON helpers and the wrapper identity table. It is the
//! single owner: bindings hold cloneable [`RuntimeHandle`]s, and dropping
//! the `Runtime` tears everything down exactly once.
//!
//! Teardown order:
//!
//! 1. release the JSON helpers;
//! 2. drain the registry and the identity table;
//! 3. drain the script queue;
//! 4. stop the native loop, pumping the script queue until its thread exits
//!    so native work blocked in `perform` on the script world still finishes;
//! 5. drain the script queue one last time and close the script context.

use crate::config::BridgeConfig;
use crate::context::{NativeContext, ScriptContext};
use crate::engine::{ScriptFunction, ScriptLoop, ScriptObject, ScriptValue, WeakObject};
use crate::error::{BridgeError, Result, ScriptError};
use crate::metrics::BridgeMetrics;
use crate::registry::{ServiceRegistry, Slot, JSON_PARSE_KEY, JSON_STRINGIFY_KEY};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct JsonHelpers {
    stringify: ScriptFunction,
    parse: ScriptFunction,
    receiver: ScriptObject,
}

struct RuntimeInner {
    config: BridgeConfig,
    script: ScriptContext,
    native: NativeContext,
    registry: ServiceRegistry,
    json: RwLock<Option<JsonHelpers>>,
    wrappers: DashMap<usize, WeakObject>,
    metrics: Arc<BridgeMetrics>,
    torn_down: AtomicBool,
}

/// Cloneable view of a runtime, held by wrappers, operations and monitors
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<RuntimeInner>,
}

/// Owner of the bridge runtime
pub struct Runtime {
    handle: RuntimeHandle,
}

impl Runtime {
    /// Take ownership of two contexts and resolve `JSON` from `global`
    pub fn new(
        script: ScriptContext,
        native: NativeContext,
        global: &ScriptObject,
        config: BridgeConfig,
    ) -> Result<Self> {
        config.validate()?;

        let json = match global.get("JSON") {
            ScriptValue::Object(json) => json,
            _ => return Err(BridgeError::MissingGlobal("JSON".into())),
        };
        let stringify = match json.get("stringify") {
            ScriptValue::Function(f) => f,
            _ => return Err(BridgeError::MissingGlobal("JSON.stringify".into())),
        };
        let parse = match json.get("parse") {
            ScriptValue::Function(f) => f,
            _ => return Err(BridgeError::MissingGlobal("JSON.parse".into())),
        };

        let registry = ServiceRegistry::new();
        registry.set(JSON_STRINGIFY_KEY, Arc::new(stringify.clone()));
        registry.set(JSON_PARSE_KEY, Arc::new(parse.clone()));

        let metrics = script.metrics().clone();
        info!(
            native_thread = %config.native_thread_name,
            teardown_policy = ?config.teardown_policy,
            "Runtime created"
        );

        Ok(Self {
            handle: RuntimeHandle {
                inner: Arc::new(RuntimeInner {
                    config,
                    script,
                    native,
                    registry,
                    json: RwLock::new(Some(JsonHelpers {
                        stringify,
                        parse,
                        receiver: json,
                    })),
                    wrappers: DashMap::new(),
                    metrics,
                    torn_down: AtomicBool::new(false),
                }),
            },
        })
    }

    /// Build both contexts for `event_loop` and start the native thread
    pub fn bootstrap(event_loop: &ScriptLoop, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(BridgeMetrics::new());
        let script = ScriptContext::new(event_loop, metrics.clone());
        let native = NativeContext::spawn(&config, metrics)?;
        Self::new(script, native, event_loop.global(), config)
    }

    /// A cloneable handle to this runtime
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Tear the runtime down now instead of at drop
    pub fn shutdown(self) {
        drop(self);
    }
}

impl std::ops::Deref for Runtime {
    type Target = RuntimeHandle;

    fn deref(&self) -> &RuntimeHandle {
        &self.handle
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.handle.teardown();
    }
}

impl RuntimeHandle {
    /// The script-world context
    pub fn script(&self) -> &ScriptContext {
        &self.inner.script
    }

    /// The native-world context
    pub fn native(&self) -> &NativeContext {
        &self.inner.native
    }

    /// Runtime configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Shared metrics collector
    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.inner.metrics
    }

    /// The service registry
    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    /// Whether teardown has run
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    /// Read a registry slot
    pub fn get_data_pointer(&self, id: &str) -> Option<Slot> {
        self.inner.registry.get(id)
    }

    /// Write a registry slot (last writer wins)
    pub fn set_data_pointer(&self, id: &str, value: Slot) {
        self.inner.registry.set(id, value);
    }

    /// Read a registry slot holding a `T`
    pub fn get_data<T: Any + Send + Sync>(&self, id: &str) -> Option<Arc<T>> {
        self.inner.registry.get_as::<T>(id)
    }

    fn json_helpers(&self) -> std::result::Result<JsonHelpers, ScriptError> {
        self.inner
            .json
            .read()
            .clone()
            .ok_or_else(|| ScriptError::error("Runtime has been torn down"))
    }

    /// Encode a value with the script runtime's `JSON.stringify`
    pub fn value_to_json(&self, value: &ScriptValue) -> std::result::Result<String, ScriptError> {
        let helpers = self.json_helpers()?;
        match helpers
            .stringify
            .call(Some(&helpers.receiver), vec![value.clone()])?
        {
            ScriptValue::String(text) => Ok(text),
            other => Err(ScriptError::type_error(format!(
                "Value of type {} has no JSON representation",
                other.type_name()
            ))),
        }
    }

    /// Decode a document with the script runtime's `JSON.parse`
    pub fn value_from_json(&self, text: &str) -> std::result::Result<ScriptValue, ScriptError> {
        let helpers = self.json_helpers()?;
        helpers
            .parse
            .call(Some(&helpers.receiver), vec![ScriptValue::from(text)])
    }

    /// The live wrapper object for a native handle, if any
    pub fn lookup_wrapper(&self, key: usize) -> Option<ScriptObject> {
        let weak = self.inner.wrappers.get(&key)?.value().clone();
        weak.upgrade()
    }

    pub(crate) fn register_wrapper(&self, key: usize, object: &ScriptObject) {
        self.inner.wrappers.insert(key, object.downgrade());
    }

    pub(crate) fn forget_wrapper(&self, key: usize) {
        self.inner
            .wrappers
            .remove_if(&key, |_, weak| weak.is_dead());
    }

    fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let script = &self.inner.script;
        let native = &self.inner.native;
        if !script.is_loop_thread() {
            warn!("Runtime torn down off the script thread");
        }
        info!("Tearing down runtime");

        let helpers = self.inner.json.write().take();
        drop(helpers);

        let slots = self.inner.registry.drain();
        debug!(slots = slots.len(), "Registry drained");
        drop(slots);
        self.inner.wrappers.clear();

        script.process_pending();

        native.request_shutdown();
        let poll = Duration::from_millis(self.inner.config.shutdown_poll_interval_ms);
        while !native.is_terminated() {
            script.process_pending();
            script.wait_for_work(poll);
        }
        native.join();

        script.process_pending();
        script.close();
        info!("Runtime torn down");
    }
}
