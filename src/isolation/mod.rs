//! Isolation layer: restricted namespace + source guard
//!
//! This module decides what sandboxed code can reach. It does not isolate the
//! process itself; filesystem and network access are only unreachable because
//! no allow-listed name exposes them.
//!
//! # Examples
//!
//! ```ignore
//! use py_sandbox::isolation::RestrictedNamespace;
//! use pyo3::Python;
//!
//! Python::with_gil(|py| {
//!     let ns = RestrictedNamespace::build(py)?;
//!     let tree = py_sandbox::isolation::check_source(py, "print(1 + 1)")?;
//!     Ok::<_, py_sandbox::SandboxError>(())
//! });
//! ```

pub mod guard;
pub mod namespace;
pub use guard::{SANDBOX_FILENAME, check_source};
pub use namespace::{OptionalLibrary, RestrictedNamespace};
