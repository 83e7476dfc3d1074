//! In-process model of the script runtime.
//!
//! This module provides the embeddable-engine surface the bridge targets:
//! values, objects with an internal native slot, host functions and class
//! templates, promises with microtask reactions, and a single-threaded event
//! loop with cross-thread async handles.

pub mod event_loop;
pub mod json;
pub mod object;
pub mod promise;
pub mod value;

pub use event_loop::{make_callback, queue_microtask, run_microtasks, AsyncHandle, ScriptLoop};
pub use object::{CallInfo, ClassBuilder, ClassTemplate, ScriptFunction, ScriptObject, WeakObject};
pub use promise::{Deferred, Promise, PromiseState, Settlement};
pub use value::{External, ScriptValue};
