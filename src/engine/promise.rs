//! Promises and their resolvers.
//!
//! A [`Deferred`] is consumed by settling it, so a promise cannot be
//! settled twice. Reactions registered with [`Promise::then`] run as
//! microtasks on the settling thread.

use super::event_loop::queue_microtask;
use super::value::ScriptValue;
use crate::error::ScriptError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Outcome delivered to promise reactions
pub type Settlement = Result<ScriptValue, ScriptError>;

type Reaction = Box<dyn FnOnce(Settlement) + Send>;

/// State of a promise
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    /// Not yet settled
    Pending,
    /// Resolved with a value
    Fulfilled(ScriptValue),
    /// Rejected with an error
    Rejected(ScriptError),
}

struct PromiseInner {
    state: PromiseState,
    reactions: Vec<Reaction>,
}

/// A script promise
#[derive(Clone)]
pub struct Promise(Arc<Mutex<PromiseInner>>);

impl Promise {
    /// Create a pending promise and its resolver
    pub fn new() -> (Promise, Deferred) {
        let promise = Promise(Arc::new(Mutex::new(PromiseInner {
            state: PromiseState::Pending,
            reactions: Vec::new(),
        })));
        let deferred = Deferred {
            promise: Some(promise.clone()),
        };
        (promise, deferred)
    }

    /// Current state
    pub fn state(&self) -> PromiseState {
        self.0.lock().state.clone()
    }

    /// Whether the promise is still pending
    pub fn is_pending(&self) -> bool {
        matches!(self.0.lock().state, PromiseState::Pending)
    }

    /// Register a reaction. It runs as a microtask once the promise settles.
    pub fn then<F>(&self, reaction: F)
    where
        F: FnOnce(Settlement) + Send + 'static,
    {
        let settled = {
            let mut inner = self.0.lock();
            match &inner.state {
                PromiseState::Pending => {
                    inner.reactions.push(Box::new(reaction));
                    return;
                }
                PromiseState::Fulfilled(v) => Ok(v.clone()),
                PromiseState::Rejected(e) => Err(e.clone()),
            }
        };
        queue_microtask(move || reaction(settled));
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn settle(&self, outcome: Settlement) {
        let reactions = {
            let mut inner = self.0.lock();
            inner.state = match &outcome {
                Ok(v) => PromiseState::Fulfilled(v.clone()),
                Err(e) => PromiseState::Rejected(e.clone()),
            };
            std::mem::take(&mut inner.reactions)
        };
        for reaction in reactions {
            let outcome = outcome.clone();
            queue_microtask(move || reaction(outcome));
        }
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Promise {{ {:?} }}", self.state())
    }
}

/// The resolving half of a promise
pub struct Deferred {
    promise: Option<Promise>,
}

impl Deferred {
    /// The promise this resolver settles
    pub fn promise(&self) -> Option<Promise> {
        self.promise.clone()
    }

    /// Fulfil the promise
    pub fn resolve(mut self, value: ScriptValue) {
        if let Some(promise) = self.promise.take() {
            promise.settle(Ok(value));
        }
    }

    /// Reject the promise
    pub fn reject(mut self, error: ScriptError) {
        if let Some(promise) = self.promise.take() {
            promise.settle(Err(error));
        }
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        if self.promise.is_some() {
            warn!("Promise resolver dropped without settling; promise stays pending");
        }
    }
}
