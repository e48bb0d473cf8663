//! Resource layer: process-wide CPU and memory ceilings
//!
//! The ceilings are enforced by the kernel, not by the sandbox. A breach ends
//! the process (SIGKILL on CPU time) or surfaces inside the interpreter as a
//! `MemoryError`; neither is something the sandbox can recover from cleanly.

pub mod rlimit;

pub use rlimit::{LimitStatus, ResourceLimits};
