//! Named signal connections on a native object.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Handler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Identifies one signal connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Connection {
    id: HandlerId,
    signal: String,
    handler: Handler,
}

/// Signal hub owned by a native object.
///
/// Handlers run on the emitting thread, outside the hub lock, so a handler
/// may connect or disconnect while being invoked.
#[derive(Default)]
pub struct Signals {
    next_id: AtomicU64,
    connections: Mutex<Vec<Connection>>,
}

impl Signals {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a handler to `signal`
    pub fn connect<F>(&self, signal: &str, handler: F) -> HandlerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.connections.lock().push(Connection {
            id,
            signal: signal.to_string(),
            handler: Arc::new(handler),
        });
        id
    }

    /// Disconnect a handler. Returns `false` if it was not connected.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let removed = {
            let mut connections = self.connections.lock();
            connections
                .iter()
                .position(|c| c.id == id)
                .map(|index| connections.remove(index))
        };
        removed.is_some()
    }

    /// Invoke every handler connected to `signal`, in connection order
    pub fn emit(&self, signal: &str, args: &[Value]) {
        let handlers: Vec<Handler> = self
            .connections
            .lock()
            .iter()
            .filter(|c| c.signal == signal)
            .map(|c| c.handler.clone())
            .collect();
        for handler in handlers {
            handler(args);
        }
    }

    /// Number of handlers connected to `signal`
    pub fn handler_count(&self, signal: &str) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|c| c.signal == signal)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_matching_handlers() {
        let signals = Signals::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        signals.connect("detached", move |args| {
            assert_eq!(args, &[json!("application-requested")]);
            h.fetch_add(1, Ordering::SeqCst);
        });
        signals.connect("message", |_| panic!("wrong signal"));

        signals.emit("detached", &[json!("application-requested")]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_disconnect_itself() {
        let signals = Arc::new(Signals::new());
        let slot = Arc::new(Mutex::new(None));

        let hub = signals.clone();
        let own_id = slot.clone();
        let id = signals.connect("destroyed", move |_| {
            if let Some(id) = own_id.lock().take() {
                hub.disconnect(id);
            }
        });
        *slot.lock() = Some(id);

        signals.emit("destroyed", &[]);
        assert_eq!(signals.handler_count("destroyed"), 0);
        assert!(!signals.disconnect(id));
    }
}
