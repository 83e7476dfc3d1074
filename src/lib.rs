//! # Worldbridge
//!
//! This library marshals an asynchronous, reference-counted native library
//! onto a single-threaded script runtime. The native library runs its own
//! loop on a dedicated thread; script code runs on the loop thread. Every
//! crossing goes through one of two work queues.
//!
//! ## Architecture
//!
//! ```text
//! Script loop thread                         Native thread
//!     │  ScriptContext ◄──── schedule ─────       │
//!     │                                           │
//!     │       ───── schedule ────► NativeContext  │
//!     │                                           │
//!     ▼                                           ▼
//! Session / Script wrappers          begin(..) ─► library ─► finish(..)
//!     │                                           │
//!     └──── Promise ◄──── operation descriptor ◄──┘
//! ```
//!
//! ## Features
//!
//! - **Two-world scheduling**: fire-and-forget `schedule` and blocking
//!   `perform` in both directions
//! - **Promise adapter**: begin/finish pairs surface as script promises
//! - **Wrapped handles**: strong references are always dropped on the
//!   native thread
//! - **Liveness**: the script loop stays alive exactly as long as a binding
//!   needs it

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bindings;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod native;
pub mod object_wrap;
pub mod operation;
pub mod registry;
pub mod runtime;
pub mod usage_monitor;

// Re-export commonly used types
pub use bindings::{Script, ScriptApi, Session, SessionApi};
pub use config::{BridgeConfig, TeardownPolicy};
pub use context::{NativeContext, ScriptContext, World};
pub use engine::{ScriptLoop, ScriptObject, ScriptValue};
pub use error::{BridgeError, ErrorCode, NativeError, Result, ScriptError};
pub use metrics::{BridgeMetrics, BridgeStats};
pub use object_wrap::ObjectWrap;
pub use runtime::{Runtime, RuntimeHandle};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static TRACING: OnceCell<()> = OnceCell::new();

/// Install a fmt subscriber. `RUST_LOG` takes precedence over `filter`.
/// Later calls are no-ops.
pub fn init_tracing(filter: &str) {
    TRACING.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
        // another subscriber may already be installed by the host
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
    });
}
