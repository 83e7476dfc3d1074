//! Shape of the native library as seen by the bridge.
//!
//! Native handles are `Arc`s of [`NativeObject`] implementors; the strong
//! count is the handle's reference count. Asynchronous entry points follow
//! the begin/finish convention: `begin` takes an [`AsyncReadyCallback`],
//! the library invokes it with an [`AsyncResult`], and the matching
//! `finish` recovers the outcome with [`AsyncResult::propagate`].

pub mod signal;

pub use signal::{HandlerId, Signals};

use crate::error::{error_domains, NativeError};
use std::any::Any;

/// Native error code for an async result of the wrong type
pub const RESULT_TYPE_MISMATCH: i32 = 1;

/// An opaque, reference-counted native handle
pub trait NativeObject: Send + Sync + 'static {
    /// Type name used in log output
    fn type_name(&self) -> &'static str;

    /// Signal hub of this object
    fn signals(&self) -> &Signals;
}

/// Completion of an asynchronous native call
pub struct AsyncResult {
    payload: Box<dyn Any + Send>,
}

impl AsyncResult {
    /// Wrap the outcome of an operation
    pub fn new<T: Send + 'static>(outcome: Result<T, NativeError>) -> Self {
        Self {
            payload: Box::new(outcome),
        }
    }

    /// Recover the outcome inside a `finish` entry point
    pub fn propagate<T: Send + 'static>(self) -> Result<T, NativeError> {
        match self.payload.downcast::<Result<T, NativeError>>() {
            Ok(outcome) => *outcome,
            Err(_) => Err(NativeError::new(
                error_domains::BRIDGE_ERROR,
                RESULT_TYPE_MISMATCH,
                format!(
                    "async result does not hold a {}",
                    std::any::type_name::<T>()
                ),
            )),
        }
    }
}

impl std::fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AsyncResult")
    }
}

/// Callback handed to a native `begin` entry point
pub type AsyncReadyCallback = Box<dyn FnOnce(AsyncResult) + Send>;
