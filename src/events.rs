//! Event-emitter object exposed as the `events` property of bound instances.
//!
//! `listen(signal, fn)` / `unlisten(signal, fn)` run on the script thread.
//! The first listener of a signal connects a native handler on the native
//! thread; the handler posts each emission back to the script context, where
//! listeners run in registration order. While any listener is registered
//! the script usage counter is raised by one.

use crate::engine::{make_callback, ScriptFunction, ScriptObject, ScriptValue};
use crate::error::ScriptError;
use crate::native::{HandlerId, NativeObject};
use crate::runtime::RuntimeHandle;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Converts native signal arguments into listener arguments
pub type SignalTransform =
    Arc<dyn Fn(&str, &[Value], &RuntimeHandle) -> Vec<ScriptValue> + Send + Sync>;

/// Builder for `events` objects
pub struct Events;

struct EventsInner<T: ?Sized + NativeObject> {
    // released through the native context on drop
    handle: Option<Arc<T>>,
    runtime: RuntimeHandle,
    transform: Option<SignalTransform>,
    // script thread only
    listeners: Mutex<HashMap<String, Vec<ScriptFunction>>>,
    // native thread only
    connections: Mutex<HashMap<String, HandlerId>>,
}

impl Events {
    /// Create the `events` object for `handle`
    pub fn new_object<T: ?Sized + NativeObject>(
        handle: Arc<T>,
        runtime: &RuntimeHandle,
        transform: Option<SignalTransform>,
    ) -> ScriptObject {
        let inner = Arc::new(EventsInner {
            handle: Some(handle),
            runtime: runtime.clone(),
            transform,
            listeners: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
        });

        let object = ScriptObject::new();
        let on_listen = inner.clone();
        object.define_readonly(
            "listen",
            ScriptFunction::new("listen", move |info| {
                let (signal, callback) = listener_args(info.arg(0), info.arg(1))?;
                on_listen.listen(signal, callback);
                Ok(ScriptValue::Undefined)
            })
            .into(),
        );
        let on_unlisten = inner.clone();
        object.define_readonly(
            "unlisten",
            ScriptFunction::new("unlisten", move |info| {
                let (signal, callback) = listener_args(info.arg(0), info.arg(1))?;
                on_unlisten.unlisten(&signal, &callback);
                Ok(ScriptValue::Undefined)
            })
            .into(),
        );
        object.set_internal(inner);
        object
    }
}

fn listener_args(
    signal: &ScriptValue,
    callback: &ScriptValue,
) -> Result<(String, ScriptFunction), ScriptError> {
    match (signal, callback) {
        (ScriptValue::String(signal), ScriptValue::Function(callback)) => {
            Ok((signal.clone(), callback.clone()))
        }
        _ => Err(ScriptError::type_error(
            "Bad argument, expected string and function",
        )),
    }
}

impl<T: ?Sized + NativeObject> EventsInner<T> {
    fn listen(self: &Arc<Self>, signal: String, callback: ScriptFunction) {
        let (first_overall, first_for_signal) = {
            let mut listeners = self.listeners.lock();
            let first_overall = listeners.is_empty();
            let entry = listeners.entry(signal.clone()).or_default();
            let first_for_signal = entry.is_empty();
            entry.push(callback);
            (first_overall, first_for_signal)
        };

        if first_overall {
            self.runtime.script().increase_usage();
        }
        if first_for_signal {
            self.connect(signal);
        }
    }

    fn unlisten(self: &Arc<Self>, signal: &str, callback: &ScriptFunction) {
        let (removed_signal, now_empty) = {
            let mut listeners = self.listeners.lock();
            let Some(entry) = listeners.get_mut(signal) else {
                return;
            };
            let Some(index) = entry.iter().position(|f| f.ptr_eq(callback)) else {
                return;
            };
            entry.remove(index);
            let removed_signal = entry.is_empty();
            if removed_signal {
                listeners.remove(signal);
            }
            (removed_signal, listeners.is_empty())
        };

        if removed_signal {
            self.disconnect(signal.to_string());
        }
        if now_empty {
            self.runtime.script().decrease_usage();
        }
    }

    fn connect(self: &Arc<Self>, signal: String) {
        let inner = self.clone();
        let scheduled = self.runtime.native().schedule(move || {
            let Some(handle) = inner.handle.clone() else {
                return;
            };
            let weak = Arc::downgrade(&inner);
            let script = inner.runtime.script().clone();
            let name = signal.clone();
            let id = handle.signals().connect(&signal, move |args| {
                let weak: Weak<EventsInner<T>> = weak.clone();
                let name = name.clone();
                let args = args.to_vec();
                let _ = script.schedule(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.dispatch(&name, &args);
                    }
                });
            });
            inner.connections.lock().insert(signal.clone(), id);
            debug!(signal = %signal, "Connected native signal");
        });
        if let Err(e) = scheduled {
            warn!(error = %e, "Could not connect native signal");
        }
    }

    fn disconnect(self: &Arc<Self>, signal: String) {
        let inner = self.clone();
        let scheduled = self.runtime.native().schedule(move || {
            let id = inner.connections.lock().remove(&signal);
            if let (Some(id), Some(handle)) = (id, &inner.handle) {
                handle.signals().disconnect(id);
                debug!(signal = %signal, "Disconnected native signal");
            }
        });
        if let Err(e) = scheduled {
            warn!(error = %e, "Could not disconnect native signal");
        }
    }

    fn dispatch(&self, signal: &str, args: &[Value]) {
        let listeners = match self.listeners.lock().get(signal) {
            Some(listeners) => listeners.clone(),
            None => return,
        };
        let values = match &self.transform {
            Some(transform) => transform(signal, args, &self.runtime),
            None => args.iter().map(ScriptValue::from_json).collect(),
        };
        for listener in listeners {
            if let Err(e) = make_callback(&listener, None, values.clone()) {
                warn!(signal, error = %e, "Event listener raised");
            }
        }
    }
}

impl<T: ?Sized + NativeObject> Drop for EventsInner<T> {
    fn drop(&mut self) {
        let had_listeners = !self.listeners.get_mut().is_empty();
        self.listeners.get_mut().clear();

        let connections: Vec<HandlerId> = self.connections.get_mut().drain().map(|(_, id)| id).collect();
        if let Some(handle) = self.handle.take() {
            if connections.is_empty() {
                self.runtime.native().release(handle);
            } else {
                let scheduled = self.runtime.native().schedule(move || {
                    for id in connections {
                        handle.signals().disconnect(id);
                    }
                });
                if scheduled.is_err() {
                    debug!("Native context closed; signal handlers left connected");
                }
            }
        }

        if had_listeners {
            let script = self.runtime.script().clone();
            if script.is_loop_thread() {
                script.decrease_usage();
            } else {
                let target = script.clone();
                if script.schedule(move || target.decrease_usage()).is_err() {
                    warn!("Script context closed; events usage not lowered");
                }
            }
        }
    }
}
