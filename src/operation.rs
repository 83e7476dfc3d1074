//! Asynchronous operation adapter.
//!
//! Turns a native begin/finish pair into a promise:
//!
//! 1. script thread: allocate a descriptor holding a strong handle
//!    reference, the wrapper object and the promise resolver; post `begin`
//!    to the native context;
//! 2. native thread: `begin` hands the library a completion callback;
//! 3. native thread: the callback runs `end` and posts `complete` to the
//!    script context;
//! 4. script thread: resolve or reject, then release the handle reference
//!    (through the native context) and the wrapper object.
//!
//! Each descriptor also raises the script usage counter until it is
//! released, so the loop cannot exit while a promise is outstanding.

use crate::engine::{Deferred, Promise, ScriptObject, ScriptValue};
use crate::error::{BridgeError, NativeError, ScriptError};
use crate::native::{AsyncReadyCallback, AsyncResult, NativeObject};
use crate::object_wrap::ObjectWrap;
use crate::runtime::RuntimeHandle;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// One begin/finish pair of a native type `T`
pub trait Operation<T: ?Sized + NativeObject>: Send + Sync + 'static {
    /// Value extracted by `end` on success
    type Output: Send + 'static;

    /// Operation name for diagnostics
    fn name(&self) -> &'static str;

    /// Call the native `begin` entry point
    fn begin(&self, handle: &Arc<T>, callback: AsyncReadyCallback);

    /// Call the matching `finish` entry point
    fn end(&self, handle: &Arc<T>, result: AsyncResult) -> Result<Self::Output, NativeError>;

    /// Convert the output into the value the promise resolves with.
    /// Runs on the script thread.
    fn result(&self, output: Self::Output, runtime: &RuntimeHandle) -> Result<ScriptValue, ScriptError>;
}

enum OperationState<O> {
    Pending,
    Succeeded(O),
    Failed(NativeError),
    Released,
}

struct OperationDescriptor<T: ?Sized + NativeObject, O: Operation<T>> {
    id: Uuid,
    operation: Arc<O>,
    handle: Option<Arc<T>>,
    wrapper: Option<ScriptObject>,
    deferred: Option<Deferred>,
    runtime: RuntimeHandle,
    state: OperationState<O::Output>,
    holds_usage: bool,
}

/// Start `operation` on the handle wrapped by `wrap`. `this` is the
/// wrapper's script object, kept alive until the operation completes.
pub fn schedule<T, O>(operation: O, wrap: &ObjectWrap<T>, this: &ScriptObject) -> Result<Promise, BridgeError>
where
    T: ?Sized + NativeObject,
    O: Operation<T>,
{
    let handle = wrap
        .handle()
        .cloned()
        .ok_or_else(|| ScriptError::type_error("Illegal invocation"))?;
    let runtime = wrap.runtime().clone();
    let (promise, deferred) = Promise::new();

    runtime.script().increase_usage();
    let descriptor = Box::new(OperationDescriptor {
        id: Uuid::new_v4(),
        operation: Arc::new(operation),
        handle: Some(handle),
        wrapper: Some(this.clone()),
        deferred: Some(deferred),
        runtime: runtime.clone(),
        state: OperationState::Pending,
        holds_usage: true,
    });

    runtime.metrics().record_operation_started();
    debug!(
        operation = descriptor.operation.name(),
        id = %descriptor.id,
        "Scheduling operation"
    );

    runtime.native().schedule(move || descriptor.begin())?;
    Ok(promise)
}

impl<T, O> OperationDescriptor<T, O>
where
    T: ?Sized + NativeObject,
    O: Operation<T>,
{
    fn begin(self: Box<Self>) {
        let Some(handle) = self.handle.clone() else {
            return;
        };
        let operation = self.operation.clone();
        operation.begin(&handle, Box::new(move |result| self.on_ready(result)));
    }

    fn on_ready(mut self: Box<Self>, result: AsyncResult) {
        let Some(handle) = self.handle.clone() else {
            return;
        };
        self.state = match self.operation.end(&handle, result) {
            Ok(output) => OperationState::Succeeded(output),
            Err(error) => OperationState::Failed(error),
        };
        drop(handle);

        let script = self.runtime.script().clone();
        if let Err(e) = script.schedule(move || self.complete()) {
            warn!(error = %e, "Operation completed after the script context closed");
        }
    }

    fn complete(mut self: Box<Self>) {
        let Some(deferred) = self.deferred.take() else {
            return;
        };
        let metrics = self.runtime.metrics().clone();
        match std::mem::replace(&mut self.state, OperationState::Released) {
            OperationState::Succeeded(output) => {
                match self.operation.result(output, &self.runtime) {
                    Ok(value) => {
                        metrics.record_operation_resolved();
                        debug!(operation = self.operation.name(), id = %self.id, "Operation resolved");
                        deferred.resolve(value);
                    }
                    Err(error) => {
                        metrics.record_operation_rejected(None);
                        deferred.reject(error);
                    }
                }
            }
            OperationState::Failed(error) => {
                metrics.record_operation_rejected(Some(error.domain.as_str()));
                debug!(
                    operation = self.operation.name(),
                    id = %self.id,
                    domain = %error.domain,
                    code = error.code,
                    "Operation rejected"
                );
                deferred.reject(ScriptError::from(&error));
            }
            OperationState::Pending | OperationState::Released => {
                warn!(operation = self.operation.name(), "Operation completed without a result");
                metrics.record_operation_rejected(None);
                deferred.reject(ScriptError::error("Operation completed without a result"));
            }
        }
        self.release();
    }

    /// Release the handle reference, the wrapper and the usage count.
    /// Idempotent.
    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.runtime.native().release(handle);
        }
        self.wrapper.take();

        if std::mem::take(&mut self.holds_usage) {
            let script = self.runtime.script().clone();
            if script.is_loop_thread() {
                script.decrease_usage();
            } else {
                let target = script.clone();
                if script.schedule(move || target.decrease_usage()).is_err() {
                    warn!("Script context closed; operation usage count not lowered");
                }
            }
        }
    }
}

impl<T, O> Drop for OperationDescriptor<T, O>
where
    T: ?Sized + NativeObject,
    O: Operation<T>,
{
    fn drop(&mut self) {
        if let Some(deferred) = self.deferred.take() {
            warn!(operation = self.operation.name(), id = %self.id, "Operation abandoned before completion");
            if self.runtime.script().is_loop_thread() {
                deferred.reject(ScriptError::error("Operation was abandoned"));
            }
        }
        self.release();
    }
}
