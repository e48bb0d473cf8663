//! Main sandbox controller

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error};
use pyo3::Python;

use crate::errors::{Result, SandboxError};
use crate::execution::runner::{self, ExecutionOutcome};
use crate::execution::{MAX_EXECUTION_TIME, MAX_OUTPUT_SIZE};
use crate::isolation::OptionalLibrary;
use crate::protocol::ExecutionResult;
use crate::resources::ResourceLimits;

/// Where a figure left open by the snippet is written
pub const DEFAULT_PLOT_PATH: &str = "/tmp/plot.png";

/// Set while an execution is in progress anywhere in the process.
static EXECUTION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock budget per execution
    pub timeout: Duration,
    /// Characters of primary output kept before truncation
    pub max_output_size: usize,
    /// Process ceilings applied before the first execution
    pub resource_limits: Option<ResourceLimits>,
    /// Optional libraries to expose when importable
    pub libraries: Vec<OptionalLibrary>,
    /// Destination for an open figure after execution
    pub plot_path: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: MAX_EXECUTION_TIME,
            max_output_size: MAX_OUTPUT_SIZE,
            resource_limits: Some(ResourceLimits::default()),
            libraries: OptionalLibrary::all(),
            plot_path: Some(PathBuf::from(DEFAULT_PLOT_PATH)),
        }
    }
}

impl SandboxConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(SandboxError::InvalidConfig(
                "Timeout must be greater than zero".to_string(),
            ));
        }

        if let Some(limits) = &self.resource_limits {
            if limits.max_cpu_seconds == 0 {
                return Err(SandboxError::InvalidConfig(
                    "CPU time limit must be greater than zero".to_string(),
                ));
            }
            if limits.max_address_space_bytes == 0 {
                return Err(SandboxError::InvalidConfig(
                    "Address space limit must be greater than zero".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Builder pattern for sandbox creation
#[derive(Default)]
pub struct SandboxBuilder {
    config: SandboxConfig,
}

impl SandboxBuilder {
    /// Create new builder with the reference configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.config.timeout = duration;
        self
    }

    /// Set the primary output cap, in characters
    pub fn max_output_size(mut self, chars: usize) -> Self {
        self.config.max_output_size = chars;
        self
    }

    /// Set process ceilings
    pub fn resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.config.resource_limits = Some(limits);
        self
    }

    /// Leave the process ceilings untouched
    pub fn without_resource_limits(mut self) -> Self {
        self.config.resource_limits = None;
        self
    }

    /// Restrict which optional libraries are exposed
    pub fn libraries(mut self, libraries: &[OptionalLibrary]) -> Self {
        self.config.libraries = libraries.to_vec();
        self
    }

    /// Set where an open figure is saved
    pub fn plot_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.plot_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Never save figures
    pub fn without_plot_export(mut self) -> Self {
        self.config.plot_path = None;
        self
    }

    /// Build sandbox
    pub fn build(self) -> Result<Sandbox> {
        self.config.validate()?;
        Ok(Sandbox {
            config: self.config,
        })
    }
}

/// Releases the process-wide execution slot when dropped
struct ExecutionSlot;

impl ExecutionSlot {
    fn acquire() -> Result<Self> {
        EXECUTION_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ExecutionSlot)
            .map_err(|_| SandboxError::AlreadyRunning)
    }
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        EXECUTION_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Configured sandbox
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    /// Sandbox with the reference configuration
    pub fn with_defaults() -> Result<Self> {
        SandboxBuilder::new().build()
    }

    /// Get configuration
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Check if any execution is in progress in this process
    pub fn is_running() -> bool {
        EXECUTION_ACTIVE.load(Ordering::SeqCst)
    }

    /// Run `code` and classify how it ended.
    ///
    /// Errors are failures of the sandbox itself; anything the code does
    /// wrong is part of the returned outcome.
    pub fn try_execute(&self, code: &str) -> Result<ExecutionOutcome> {
        let _slot = ExecutionSlot::acquire()?;

        // Interpreter start-up is trusted and should not eat into the CPU budget.
        pyo3::prepare_freethreaded_python();

        if let Some(limits) = &self.config.resource_limits {
            let status = limits.apply_once()?;
            debug!("resource limits: {:?}", status);
        }

        let started = Instant::now();
        let outcome = Python::with_gil(|py| runner::run(py, code, &self.config))?;
        debug!(
            "execution finished in {}ms: {}",
            started.elapsed().as_millis(),
            match &outcome {
                ExecutionOutcome::Completed { .. } => "completed",
                ExecutionOutcome::TimedOut => "timed out",
                ExecutionOutcome::Faulted { .. } => "faulted",
            }
        );
        Ok(outcome)
    }

    /// Run `code` and build the caller-facing result. Never fails.
    pub fn execute(&self, code: &str) -> ExecutionResult {
        match self.try_execute(code) {
            Ok(outcome) => outcome.into(),
            Err(e) => {
                error!("sandbox failure: {}", e);
                ExecutionResult::failure(e.to_string())
            }
        }
    }
}
