//! Wrapped-handle base shared by all bound classes.

use crate::native::NativeObject;
use crate::runtime::RuntimeHandle;
use std::sync::Arc;
use tracing::trace;

/// Identity key of a native handle, used by the wrapper identity table
pub fn handle_key<T: ?Sized>(handle: &Arc<T>) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

/// Owns one strong reference on a native handle for the wrapper's lifetime.
///
/// The reference is taken at construction. On drop it is handed to the
/// native context, so the decrement always happens on the native thread,
/// possibly after the wrapper itself is gone.
pub struct ObjectWrap<T: ?Sized + NativeObject> {
    // `None` only once dropped
    handle: Option<Arc<T>>,
    runtime: RuntimeHandle,
}

impl<T: ?Sized + NativeObject> ObjectWrap<T> {
    /// Take a strong reference on `handle`
    pub fn new(handle: &Arc<T>, runtime: &RuntimeHandle) -> Self {
        runtime.metrics().record_wrapper_created();
        trace!(type_name = handle.type_name(), "Wrapping native handle");
        Self {
            handle: Some(Arc::clone(handle)),
            runtime: runtime.clone(),
        }
    }

    /// The wrapped handle. Present for the wrapper's whole lifetime.
    pub fn handle(&self) -> Option<&Arc<T>> {
        self.handle.as_ref()
    }

    /// The runtime this wrapper belongs to
    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }
}

impl<T: ?Sized + NativeObject> Drop for ObjectWrap<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.runtime.forget_wrapper(handle_key(&handle));
            self.runtime.native().release(handle);
        }
    }
}
