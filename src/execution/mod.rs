//! Execution layer: deadline, output capture and the snippet runner
//!
//! This module runs one snippet of untrusted code inside the embedded
//! interpreter and turns whatever happens into an [`ExecutionOutcome`].
//!
//! # Features
//!
//! - **Deadline**: watchdog thread that cancels overrunning code
//! - **Capture**: in-memory `sys.stdout`/`sys.stderr` with a size cap
//! - **Runner**: guard, compile, execute, best-effort plot export
//!
//! # Examples
//!
//! ```ignore
//! use py_sandbox::execution::runner;
//! use py_sandbox::SandboxConfig;
//! use pyo3::Python;
//!
//! let outcome = Python::with_gil(|py| runner::run(py, "print(1 + 1)", &SandboxConfig::default()))?;
//! ```

pub mod capture;
pub mod deadline;
pub mod runner;
pub use capture::{CapturedOutput, OutputBuffer, OutputCapture, MAX_OUTPUT_SIZE, TRUNCATION_MARKER};
pub use deadline::{Deadline, ExecutionTimeout, MAX_EXECUTION_TIME};
pub use runner::ExecutionOutcome;
