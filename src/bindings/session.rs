//! `Session` class binding.
//!
//! A session wrapper exposes the native session's `pid`, its `events`
//! and four promise-returning methods. The liveness monitor keeps the
//! script loop alive until the session emits `detached`.

use super::script::{Script, ScriptApi};
use crate::engine::{CallInfo, ClassBuilder, External, ScriptFunction, ScriptObject, ScriptValue};
use crate::error::{NativeError, ScriptError};
use crate::events::Events;
use crate::native::{AsyncReadyCallback, AsyncResult, NativeObject};
use crate::object_wrap::{handle_key, ObjectWrap};
use crate::operation::{self, Operation};
use crate::registry::constructor_key;
use crate::runtime::RuntimeHandle;
use crate::usage_monitor::{MonitorGuard, UsageMonitor};
use std::sync::Arc;

/// Native session handle
pub trait SessionApi: NativeObject {
    /// Process id the session is attached to
    fn pid(&self) -> u32;

    /// Whether the session has already detached
    fn is_detached(&self) -> bool;

    /// Begin detaching
    fn detach(&self, callback: AsyncReadyCallback);
    /// Finish detaching
    fn detach_finish(&self, result: AsyncResult) -> Result<(), NativeError>;

    /// Begin creating a script from `source`
    fn create_script(&self, name: Option<&str>, source: &str, callback: AsyncReadyCallback);
    /// Finish creating a script
    fn create_script_finish(&self, result: AsyncResult) -> Result<Arc<dyn ScriptApi>, NativeError>;

    /// Begin enabling the debugger on `port`
    fn enable_debugger(&self, port: u16, callback: AsyncReadyCallback);
    /// Finish enabling the debugger
    fn enable_debugger_finish(&self, result: AsyncResult) -> Result<(), NativeError>;

    /// Begin disabling the debugger
    fn disable_debugger(&self, callback: AsyncReadyCallback);
    /// Finish disabling the debugger
    fn disable_debugger_finish(&self, result: AsyncResult) -> Result<(), NativeError>;
}

fn session_is_detached(session: &Arc<dyn SessionApi>) -> bool {
    session.is_detached()
}

/// Script-side wrapper around a native session handle
pub struct Session {
    wrap: ObjectWrap<dyn SessionApi>,
    monitor: MonitorGuard,
}

impl Session {
    /// Class name as seen by scripts
    pub const CLASS_NAME: &'static str = "Session";

    /// Register the `Session` constructor on `exports` and in the registry
    pub fn init(exports: &ScriptObject, runtime: &RuntimeHandle) -> ScriptFunction {
        let rt = runtime.clone();
        let ctor = ClassBuilder::new(Self::CLASS_NAME)
            .accessor("pid", |this| {
                this.internal::<Session>()
                    .and_then(|session| session.handle().map(|handle| handle.pid()))
                    .map(|pid| ScriptValue::Number(f64::from(pid)))
                    .unwrap_or_default()
            })
            .method("detach", |info| Self::start(info, SessionOp::Detach))
            .method("createScript", Self::create_script)
            .method("enableDebugger", Self::enable_debugger)
            .method("disableDebugger", |info| Self::start(info, SessionOp::DisableDebugger))
            .constructor(move |info| Self::construct(info, &rt));

        exports.set(Self::CLASS_NAME, ctor.clone().into());
        runtime.set_data_pointer(&constructor_key(Self::CLASS_NAME), Arc::new(ctor.clone()));
        ctor
    }

    /// Wrap `handle`, reusing the live wrapper if there is one.
    ///
    /// The caller keeps its own reference. Must be called on the script
    /// thread.
    pub fn new_instance(handle: &Arc<dyn SessionApi>, runtime: &RuntimeHandle) -> Result<ScriptObject, ScriptError> {
        if let Some(existing) = runtime.lookup_wrapper(handle_key(handle)) {
            return Ok(existing);
        }
        let ctor = runtime
            .get_data::<ScriptFunction>(&constructor_key(Self::CLASS_NAME))
            .ok_or_else(|| ScriptError::error("Session class is not initialized"))?;
        ctor.construct(vec![ScriptValue::External(External::new(Arc::clone(handle)))])
    }

    /// The wrapped native handle
    pub fn handle(&self) -> Option<&Arc<dyn SessionApi>> {
        self.wrap.handle()
    }

    /// Whether the liveness monitor still holds the loop alive
    pub fn is_monitored(&self) -> bool {
        self.monitor.is_active()
    }

    fn construct(info: &CallInfo, runtime: &RuntimeHandle) -> Result<ScriptValue, ScriptError> {
        let handle = match info.arg(0) {
            ScriptValue::External(external) if info.is_construct_call() && info.len() == 1 => {
                external.downcast_ref::<Arc<dyn SessionApi>>().cloned()
            }
            _ => None,
        }
        .ok_or_else(|| ScriptError::type_error("Bad argument, expected raw handle"))?;

        let this = info.this_object()?;
        let wrap = ObjectWrap::new(&handle, runtime);
        let monitor = UsageMonitor::new(session_is_detached, "detached").enable(&handle, runtime);
        if !this.set_internal(Arc::new(Session { wrap, monitor })) {
            return Err(ScriptError::type_error("Object is already wrapped"));
        }

        let events = Events::new_object(handle.clone(), runtime, None);
        this.define_readonly("events", events.into());
        runtime.register_wrapper(handle_key(&handle), this);
        Ok(ScriptValue::Undefined)
    }

    fn unwrap_this(info: &CallInfo) -> Result<(ScriptObject, Arc<Session>), ScriptError> {
        let this = info.this_object()?;
        let session = this
            .internal::<Session>()
            .ok_or_else(|| ScriptError::type_error("Illegal invocation"))?;
        Ok((this.clone(), session))
    }

    fn start<O: Operation<dyn SessionApi>>(info: &CallInfo, op: O) -> Result<ScriptValue, ScriptError> {
        let (this, session) = Self::unwrap_this(info)?;
        let promise = operation::schedule(op, &session.wrap, &this)?;
        Ok(promise.into())
    }

    fn create_script(info: &CallInfo) -> Result<ScriptValue, ScriptError> {
        let name = match info.arg(0) {
            ScriptValue::String(name) => Some(name.clone()),
            ScriptValue::Null => None,
            _ => return Err(bad_script_arguments()),
        };
        let source = match info.arg(1) {
            ScriptValue::String(source) => source.clone(),
            _ => return Err(bad_script_arguments()),
        };
        Self::start(info, CreateScript { name, source })
    }

    fn enable_debugger(info: &CallInfo) -> Result<ScriptValue, ScriptError> {
        let port = match info.arg(0) {
            ScriptValue::Number(n) => debugger_port(*n),
            _ => return Err(ScriptError::type_error("Bad argument, expected port number")),
        };
        Self::start(info, SessionOp::EnableDebugger(port))
    }
}

fn bad_script_arguments() -> ScriptError {
    ScriptError::type_error("Bad argument, expected string|null and string")
}

/// Integer truncation modulo 2^16
fn debugger_port(n: f64) -> u16 {
    (n.trunc() as i64).rem_euclid(1 << 16) as u16
}

enum SessionOp {
    Detach,
    EnableDebugger(u16),
    DisableDebugger,
}

impl Operation<dyn SessionApi> for SessionOp {
    type Output = ();

    fn name(&self) -> &'static str {
        match self {
            SessionOp::Detach => "detach",
            SessionOp::EnableDebugger(_) => "enableDebugger",
            SessionOp::DisableDebugger => "disableDebugger",
        }
    }

    fn begin(&self, session: &Arc<dyn SessionApi>, callback: AsyncReadyCallback) {
        match self {
            SessionOp::Detach => session.detach(callback),
            SessionOp::EnableDebugger(port) => session.enable_debugger(*port, callback),
            SessionOp::DisableDebugger => session.disable_debugger(callback),
        }
    }

    fn end(&self, session: &Arc<dyn SessionApi>, result: AsyncResult) -> Result<(), NativeError> {
        match self {
            SessionOp::Detach => session.detach_finish(result),
            SessionOp::EnableDebugger(_) => session.enable_debugger_finish(result),
            SessionOp::DisableDebugger => session.disable_debugger_finish(result),
        }
    }

    fn result(&self, _output: (), _runtime: &RuntimeHandle) -> Result<ScriptValue, ScriptError> {
        Ok(ScriptValue::Undefined)
    }
}

struct CreateScript {
    name: Option<String>,
    source: String,
}

impl Operation<dyn SessionApi> for CreateScript {
    type Output = Arc<dyn ScriptApi>;

    fn name(&self) -> &'static str {
        "createScript"
    }

    fn begin(&self, session: &Arc<dyn SessionApi>, callback: AsyncReadyCallback) {
        session.create_script(self.name.as_deref(), &self.source, callback);
    }

    fn end(&self, session: &Arc<dyn SessionApi>, result: AsyncResult) -> Result<Self::Output, NativeError> {
        session.create_script_finish(result)
    }

    fn result(&self, script: Arc<dyn ScriptApi>, runtime: &RuntimeHandle) -> Result<ScriptValue, ScriptError> {
        let wrapper = Script::new_instance(&script, runtime);
        runtime.native().release(script);
        wrapper.map(ScriptValue::Object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debugger_port_truncates() {
        assert_eq!(debugger_port(5858.0), 5858);
        assert_eq!(debugger_port(5858.9), 5858);
        assert_eq!(debugger_port(65536.0), 0);
        assert_eq!(debugger_port(65537.0), 1);
        assert_eq!(debugger_port(-1.0), 65535);
        assert_eq!(debugger_port(f64::NAN), 0);
    }
}
