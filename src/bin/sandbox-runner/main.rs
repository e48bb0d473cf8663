//! Sandbox runner - execute one untrusted Python snippet
//!
//! Reads a single `{"code": ...}` request from stdin and writes a single
//! `{"success", "output", "error"}` result to stdout, then exits.

mod logging;

use clap::Parser;
use console::style;
use log::{debug, error};
use py_sandbox::{ExecutionRequest, ExecutionResult, OptionalLibrary, Sandbox};
use pyo3::Python;
use std::io::{self, Read, Write};

/// Numeric libraries start one worker per core unless told otherwise.
const SINGLE_THREAD_VARS: &[&str] = &["OPENBLAS_NUM_THREADS", "OMP_NUM_THREADS", "MKL_NUM_THREADS"];

#[derive(Parser)]
#[command(name = "sandbox-runner")]
#[command(version, about = "Execute one untrusted Python snippet read as JSON from stdin", long_about = None)]
#[command(after_help = "EXAMPLES:
    echo '{\"code\": \"print(1+1)\"}' | sandbox-runner
    echo '{\"code\": \"while True: pass\"}' | sandbox-runner --verbose
    sandbox-runner --check
")]
struct Cli {
    /// Enable debug logging on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Report which optional libraries are importable and exit
    #[arg(long)]
    check: bool,
}

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    // Must happen before the interpreter starts.
    for var in SINGLE_THREAD_VARS {
        if std::env::var_os(var).is_none() {
            std::env::set_var(var, "1");
        }
    }

    if cli.check {
        check_libraries();
        return;
    }

    let (result, exit_code) = match run() {
        Ok(result) => (result, 0),
        Err(e) => {
            error!("{}", e);
            (ExecutionResult::failure(e.to_string()), 1)
        }
    };

    if let Err(e) = emit(&result) {
        eprintln!("{} failed to write result: {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
    std::process::exit(exit_code);
}

fn run() -> py_sandbox::Result<ExecutionResult> {
    let mut payload = String::new();
    io::stdin().read_to_string(&mut payload)?;

    let request = ExecutionRequest::from_json(&payload)?;
    debug!("received {} bytes of code", request.code.len());

    let sandbox = Sandbox::with_defaults()?;
    Ok(sandbox.execute(&request.code))
}

fn emit(result: &ExecutionResult) -> io::Result<()> {
    let payload = result.to_json().map_err(io::Error::other)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", payload)?;
    stdout.flush()
}

fn check_libraries() {
    println!("[*] Checking optional libraries...");
    println!();

    Python::with_gil(|py| {
        let version = py.version();
        println!("    Python: {}", version.lines().next().unwrap_or(version));

        for library in OptionalLibrary::all() {
            if library.is_available(py) {
                println!(
                    "[{}] {} (as {})",
                    style("✓").green(),
                    library.module(),
                    library.alias()
                );
            } else {
                println!(
                    "[{}] {} not available",
                    style("✗").red(),
                    library.module()
                );
            }
        }
    });
}
