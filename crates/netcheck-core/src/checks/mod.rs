//! Built-in checks.
//!
//! A small, representative battery: the full set of domain assertions lives
//! in downstream crates, registered through [`CheckRegistry`]. Each check
//! deserializes straight from its catalog inputs.

pub mod routing;
pub mod software;
pub mod system;

pub use routing::VerifyRoutingTableEntry;
pub use software::VerifyRunningVersion;
pub use system::{NtpServer, VerifyNtpAssociations, VerifyReloadCause, VerifyUptime};

use crate::registry::CheckRegistry;

/// Registers every built-in check.
pub(crate) fn register_builtins(registry: &mut CheckRegistry) {
    registry.register::<VerifyUptime>("VerifyUptime");
    registry.register::<VerifyReloadCause>("VerifyReloadCause");
    registry.register::<VerifyNtpAssociations>("VerifyNtpAssociations");
    registry.register::<VerifyRunningVersion>("VerifyRunningVersion");
    registry.register::<VerifyRoutingTableEntry>("VerifyRoutingTableEntry");
}
