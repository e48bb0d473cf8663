//! Runs one snippet under the deadline and output capture

use super::capture::{truncate_output, OutputCapture};
use super::deadline::Deadline;
use crate::controller::SandboxConfig;
use crate::errors::Result;
use crate::isolation::{check_source, RestrictedNamespace, SANDBOX_FILENAME};
use log::debug;
use pyo3::prelude::*;

/// How one execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The snippet ran to completion
    Completed { stdout: String, stderr: String },
    /// The deadline expired first
    TimedOut,
    /// The snippet raised, with the formatted traceback
    Faulted { trace: String },
}

/// Guard, compile and execute `code` against `namespace`.
pub fn execute_in(py: Python<'_>, code: &str, namespace: &RestrictedNamespace) -> PyResult<()> {
    let tree = check_source(py, code)?;
    let builtins = py.import("builtins")?;
    let compiled = builtins
        .getattr("compile")?
        .call1((tree, SANDBOX_FILENAME, "exec"))?;
    builtins
        .getattr("exec")?
        .call1((compiled, namespace.globals(py)))?;
    Ok(())
}

/// Render `err` the way the interpreter prints an uncaught exception.
///
/// Formatting may call back into objects the snippet created, so callers keep
/// the deadline armed and output captured while this runs. If formatting
/// fails only the exception's type name is reported.
pub fn format_fault(py: Python<'_>, err: PyErr) -> String {
    let formatted = py
        .import("traceback")
        .and_then(|tb| {
            tb.call_method1(
                "format_exception",
                (err.get_type(py), err.value(py), err.traceback(py)),
            )
        })
        .and_then(|lines| lines.extract::<Vec<String>>());

    match formatted {
        Ok(lines) => lines.concat(),
        Err(_) => {
            let name = err.get_type(py).name().unwrap_or("Exception");
            format!("{}\n", name)
        }
    }
}

/// Arm the deadline, run `code` in a fresh namespace with output captured,
/// then tear everything down and classify the result.
pub fn run(py: Python<'_>, code: &str, config: &SandboxConfig) -> Result<ExecutionOutcome> {
    let mut deadline = Deadline::arm(py, config.timeout)?;
    let attempt = run_armed(py, code, config, &deadline);
    deadline.disarm(py);

    if deadline.fired() {
        debug!("execution cancelled after {:?}", deadline.timeout());
        return Ok(ExecutionOutcome::TimedOut);
    }
    attempt
}

/// Everything that may run snippet code happens in here, before the deadline
/// is disarmed and while output is still captured.
fn run_armed(
    py: Python<'_>,
    code: &str,
    config: &SandboxConfig,
    deadline: &Deadline,
) -> Result<ExecutionOutcome> {
    let namespace = RestrictedNamespace::build_with(py, &config.libraries)?;
    let capture = OutputCapture::install(py, config.max_output_size)?;

    // An expiry during namespace setup may have been swallowed by a failed
    // optional import; do not start the snippet on a spent budget.
    if deadline.fired() {
        return Ok(ExecutionOutcome::TimedOut);
    }

    let fault = match execute_in(py, code, &namespace) {
        Ok(()) => {
            if let Some(path) = &config.plot_path {
                if namespace.save_plot(py, path) {
                    debug!("plot saved to {}", path.display());
                }
            }
            None
        }
        Err(err) => {
            namespace.close_plots(py);
            Some(format_fault(py, err))
        }
    };

    // Finalizers of whatever the snippet left behind run here.
    drop(namespace);
    if let Err(e) = py.import("gc").and_then(|gc| gc.call_method0("collect")) {
        debug!("garbage collection after execution failed: {}", e);
    }

    let captured = capture.finish(py)?;
    Ok(match fault {
        None => ExecutionOutcome::Completed {
            stdout: truncate_output(captured.stdout, config.max_output_size),
            stderr: captured.stderr,
        },
        Some(trace) => ExecutionOutcome::Faulted { trace },
    })
}
