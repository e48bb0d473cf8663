//! py-sandbox: single-shot sandbox for untrusted Python snippets
//!
//! Runs one snippet of Python on an embedded interpreter under CPU and
//! address-space ceilings, a wall-clock deadline, an allow-listed namespace
//! and captured, size-capped output, and reports the outcome as a
//! `{success, output, error}` record.
//!
//! # Modules
//!
//! - **resources**: setrlimit ceilings, applied once per process
//! - **execution**: deadline watchdog, output capture, snippet runner
//! - **isolation**: allow-listed namespace and static source guard
//! - **protocol**: request/response records
//! - **controller**: configuration and orchestration
//!
//! # Example
//!
//! ```ignore
//! use py_sandbox::SandboxBuilder;
//! use std::time::Duration;
//!
//! let sandbox = SandboxBuilder::new()
//!     .timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! let result = sandbox.execute("print(1 + 1)");
//! assert_eq!(result.output, "2\n");
//! ```

// Core modules
pub mod errors;
pub mod protocol;

// Layered modules
pub mod execution;
pub mod isolation;
pub mod resources;

// Main controller
pub mod controller;

// Public API
pub use controller::{Sandbox, SandboxBuilder, SandboxConfig, DEFAULT_PLOT_PATH};
pub use errors::{Result, SandboxError};
pub use execution::{ExecutionOutcome, MAX_EXECUTION_TIME, MAX_OUTPUT_SIZE, TRUNCATION_MARKER};
pub use isolation::{OptionalLibrary, RestrictedNamespace};
pub use protocol::{ExecutionRequest, ExecutionResult, TIMEOUT_MESSAGE};
pub use resources::ResourceLimits;

#[cfg(test)]
mod tests {
    use crate::SandboxBuilder;

    #[test]
    fn test_module_imports() {
        // Verify core API is accessible
        let _builder = SandboxBuilder::new();
    }
}
