//! `Script` class binding.

use crate::engine::{CallInfo, ClassBuilder, External, ScriptFunction, ScriptObject, ScriptValue};
use crate::error::{NativeError, ScriptError};
use crate::events::{Events, SignalTransform};
use crate::native::{AsyncReadyCallback, AsyncResult, NativeObject};
use crate::object_wrap::{handle_key, ObjectWrap};
use crate::operation::{self, Operation};
use crate::registry::constructor_key;
use crate::runtime::RuntimeHandle;
use crate::usage_monitor::{MonitorGuard, UsageMonitor};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Native script handle
pub trait ScriptApi: NativeObject {
    /// Whether the script has been destroyed
    fn is_destroyed(&self) -> bool;

    /// Begin loading the script
    fn load(&self, callback: AsyncReadyCallback);
    /// Finish loading the script
    fn load_finish(&self, result: AsyncResult) -> Result<(), NativeError>;

    /// Begin unloading the script
    fn unload(&self, callback: AsyncReadyCallback);
    /// Finish unloading the script
    fn unload_finish(&self, result: AsyncResult) -> Result<(), NativeError>;

    /// Begin posting a JSON-encoded message to the script
    fn post_message(&self, message: &str, callback: AsyncReadyCallback);
    /// Finish posting a message
    fn post_message_finish(&self, result: AsyncResult) -> Result<(), NativeError>;
}

fn script_is_destroyed(script: &Arc<dyn ScriptApi>) -> bool {
    script.is_destroyed()
}

/// Script-side wrapper around a native script handle
pub struct Script {
    wrap: ObjectWrap<dyn ScriptApi>,
    monitor: MonitorGuard,
}

impl Script {
    /// Class name as seen by scripts
    pub const CLASS_NAME: &'static str = "Script";

    /// Register the `Script` constructor on `exports` and in the registry
    pub fn init(exports: &ScriptObject, runtime: &RuntimeHandle) -> ScriptFunction {
        let rt = runtime.clone();
        let ctor = ClassBuilder::new(Self::CLASS_NAME)
            .method("load", |info| Self::start(info, ScriptOp::Load))
            .method("unload", |info| Self::start(info, ScriptOp::Unload))
            .method("postMessage", Self::post_message)
            .constructor(move |info| Self::construct(info, &rt));

        exports.set(Self::CLASS_NAME, ctor.clone().into());
        runtime.set_data_pointer(&constructor_key(Self::CLASS_NAME), Arc::new(ctor.clone()));
        ctor
    }

    /// Wrap `handle`, reusing the live wrapper if there is one.
    ///
    /// The caller keeps its own reference. Must be called on the script
    /// thread.
    pub fn new_instance(handle: &Arc<dyn ScriptApi>, runtime: &RuntimeHandle) -> Result<ScriptObject, ScriptError> {
        if let Some(existing) = runtime.lookup_wrapper(handle_key(handle)) {
            return Ok(existing);
        }
        let ctor = runtime
            .get_data::<ScriptFunction>(&constructor_key(Self::CLASS_NAME))
            .ok_or_else(|| ScriptError::error("Script class is not initialized"))?;
        ctor.construct(vec![ScriptValue::External(External::new(Arc::clone(handle)))])
    }

    /// The wrapped native handle
    pub fn handle(&self) -> Option<&Arc<dyn ScriptApi>> {
        self.wrap.handle()
    }

    /// Whether the liveness monitor still holds the loop alive
    pub fn is_monitored(&self) -> bool {
        self.monitor.is_active()
    }

    fn construct(info: &CallInfo, runtime: &RuntimeHandle) -> Result<ScriptValue, ScriptError> {
        let handle = match info.arg(0) {
            ScriptValue::External(external) if info.is_construct_call() && info.len() == 1 => {
                external.downcast_ref::<Arc<dyn ScriptApi>>().cloned()
            }
            _ => None,
        }
        .ok_or_else(|| ScriptError::type_error("Bad argument, expected raw handle"))?;

        let this = info.this_object()?;
        let wrap = ObjectWrap::new(&handle, runtime);
        let monitor = UsageMonitor::new(script_is_destroyed, "destroyed").enable(&handle, runtime);
        if !this.set_internal(Arc::new(Script { wrap, monitor })) {
            return Err(ScriptError::type_error("Object is already wrapped"));
        }

        let events = Events::new_object(handle.clone(), runtime, Some(message_transform()));
        this.define_readonly("events", events.into());
        runtime.register_wrapper(handle_key(&handle), this);
        Ok(ScriptValue::Undefined)
    }

    fn unwrap_this(info: &CallInfo) -> Result<(ScriptObject, Arc<Script>), ScriptError> {
        let this = info.this_object()?;
        let script = this
            .internal::<Script>()
            .ok_or_else(|| ScriptError::type_error("Illegal invocation"))?;
        Ok((this.clone(), script))
    }

    fn start(info: &CallInfo, op: ScriptOp) -> Result<ScriptValue, ScriptError> {
        let (this, script) = Self::unwrap_this(info)?;
        let promise = operation::schedule(op, &script.wrap, &this)?;
        Ok(promise.into())
    }

    fn post_message(info: &CallInfo) -> Result<ScriptValue, ScriptError> {
        let (this, script) = Self::unwrap_this(info)?;
        if info.is_empty() {
            return Err(ScriptError::type_error("Bad argument, expected message"));
        }
        let message = script.wrap.runtime().value_to_json(info.arg(0))?;
        let promise = operation::schedule(ScriptOp::PostMessage(message), &script.wrap, &this)?;
        Ok(promise.into())
    }
}

/// Decodes the JSON payload of the `message` signal
fn message_transform() -> SignalTransform {
    Arc::new(|signal: &str, args: &[Value], runtime: &RuntimeHandle| {
        args.iter()
            .enumerate()
            .map(|(index, arg)| match (signal, index, arg) {
                ("message", 0, Value::String(text)) => runtime.value_from_json(text).unwrap_or_else(|e| {
                    warn!(error = %e, "Undecodable message payload");
                    ScriptValue::Error(e)
                }),
                _ => ScriptValue::from_json(arg),
            })
            .collect()
    })
}

enum ScriptOp {
    Load,
    Unload,
    PostMessage(String),
}

impl Operation<dyn ScriptApi> for ScriptOp {
    type Output = ();

    fn name(&self) -> &'static str {
        match self {
            ScriptOp::Load => "load",
            ScriptOp::Unload => "unload",
            ScriptOp::PostMessage(_) => "postMessage",
        }
    }

    fn begin(&self, script: &Arc<dyn ScriptApi>, callback: AsyncReadyCallback) {
        match self {
            ScriptOp::Load => script.load(callback),
            ScriptOp::Unload => script.unload(callback),
            ScriptOp::PostMessage(message) => script.post_message(message, callback),
        }
    }

    fn end(&self, script: &Arc<dyn ScriptApi>, result: AsyncResult) -> Result<(), NativeError> {
        match self {
            ScriptOp::Load => script.load_finish(result),
            ScriptOp::Unload => script.unload_finish(result),
            ScriptOp::PostMessage(_) => script.post_message_finish(result),
        }
    }

    fn result(&self, _output: (), _runtime: &RuntimeHandle) -> Result<ScriptValue, ScriptError> {
        Ok(ScriptValue::Undefined)
    }
}
