//! The remote desktop provider boundary.
//!
//! [`DesktopProvider`] is the seam between the core and whatever actually
//! renders pixels and injects input. Sessions and the agent loop are written
//! against this trait; `HttpDesktopProvider` is the production
//! implementation, and tests substitute scripted stubs.

mod http;

pub use http::{HttpDesktopProvider, HttpProviderConfig};

use crate::action::{ActionRequest, ActionResult};
use crate::config::DesktopConfig;
use crate::error::Result;

/// Opaque reference to one provisioned remote desktop.
///
/// Exclusively owned by the `Session` that provisioned it; the core never
/// clones a handle into a second owner.
#[derive(Debug)]
pub struct DesktopHandle {
    /// Provider-side identifier for the desktop instance.
    pub project_id: String,
}

/// Contract every desktop provider must satisfy.
///
/// All methods are network calls with provider-defined latency and failure
/// modes; implementations must enforce their own bounded deadlines and map
/// overruns to `Error::Timeout` rather than hanging.
///
/// `execute` is only safe to retry for idempotent requests (see
/// [`ActionRequest::is_idempotent`]); retrying input actions may
/// double-submit. `Wait` never reaches a provider: the session handles it
/// locally as a cancellable suspension.
pub trait DesktopProvider: Send + Sync {
    /// Provision a new desktop, returning a live handle or a provisioning
    /// error.
    fn provision(&self, config: &DesktopConfig) -> Result<DesktopHandle>;

    /// Execute one action against a provisioned desktop.
    fn execute(&self, handle: &DesktopHandle, request: &ActionRequest) -> Result<ActionResult>;

    /// Restart the desktop. Returns once the provider acknowledges.
    fn restart(&self, handle: &DesktopHandle) -> Result<()>;

    /// Tear the desktop down. The handle must not be used afterwards.
    fn terminate(&self, handle: &DesktopHandle) -> Result<()>;

    /// Provider-side status for the desktop, passed through as-is.
    fn status(&self, handle: &DesktopHandle) -> Result<serde_json::Value>;
}
