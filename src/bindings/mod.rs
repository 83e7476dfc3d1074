//! Script-visible classes for native sessions and scripts.

pub mod script;
pub mod session;

pub use script::{Script, ScriptApi};
pub use session::{Session, SessionApi};

use crate::engine::ScriptObject;
use crate::runtime::RuntimeHandle;
use tracing::debug;

/// Register every bound class on `exports`
pub fn init(exports: &ScriptObject, runtime: &RuntimeHandle) {
    Session::init(exports, runtime);
    Script::init(exports, runtime);
    debug!(classes = ?exports.keys(), "Bindings registered");
}
