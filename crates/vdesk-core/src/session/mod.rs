//! Session lifecycle, registry, and the per-session action gate.

pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;
pub mod state;

pub use registry::SessionRegistry;
pub use session::Session;
pub use state::{SessionId, SessionState, SessionStatus};
