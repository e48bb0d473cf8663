//! Wall-clock deadline for sandboxed code
//!
//! A watchdog thread waits for either a disarm message or the timeout. On
//! timeout it raises [`ExecutionTimeout`] asynchronously into the interpreter
//! thread that armed it; the exception surfaces at the next bytecode boundary.
//! Until disarmed it keeps raising at [`REPEAT_INTERVAL`], so code that runs
//! while the first exception unwinds (a `finally` block, a generator being
//! closed) is interrupted too.

use crate::errors::{Result, SandboxError};
use log::{debug, warn};
use pyo3::prelude::*;
use pyo3::{ffi, AsPyPointer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default wall-clock budget for one execution
pub const MAX_EXECUTION_TIME: Duration = Duration::from_secs(10);

/// Delay between repeated cancellations once the deadline has expired
pub const REPEAT_INTERVAL: Duration = Duration::from_millis(50);

/// The watchdog only waits on a channel.
const WATCHDOG_STACK_SIZE: usize = 64 * 1024;

pyo3::create_exception!(
    sandbox,
    ExecutionTimeout,
    pyo3::exceptions::PyBaseException,
    "Raised into sandboxed code when its deadline expires."
);

/// Watchdog bound to the interpreter thread that armed it
pub struct Deadline {
    thread_id: u64,
    timeout: Duration,
    fired: Arc<AtomicBool>,
    stop: Option<Sender<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl Deadline {
    /// Start the countdown for the calling thread.
    pub fn arm(py: Python<'_>, timeout: Duration) -> Result<Self> {
        let thread_id: u64 = py
            .import("threading")?
            .call_method0("get_ident")?
            .extract()?;

        let fired = Arc::new(AtomicBool::new(false));
        let (stop, wait) = mpsc::channel::<()>();
        let flag = Arc::clone(&fired);

        let watchdog = thread::Builder::new()
            .name("sandbox-deadline".to_string())
            .stack_size(WATCHDOG_STACK_SIZE)
            .spawn(move || {
                match wait.recv_timeout(timeout) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => {}
                }

                flag.store(true, Ordering::SeqCst);
                loop {
                    Python::with_gil(|py| {
                        let exc = py.get_type::<ExecutionTimeout>();
                        let hits = unsafe { ffi::PyThreadState_SetAsyncExc(thread_id as _, exc.as_ptr()) };
                        if hits != 1 {
                            warn!("deadline expired but {} threads matched id {}", hits, thread_id);
                        }
                    });

                    match wait.recv_timeout(REPEAT_INTERVAL) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                }
            })
            .map_err(|e| SandboxError::Deadline(format!("failed to spawn watchdog: {}", e)))?;

        debug!("deadline armed: {:?} for thread {}", timeout, thread_id);
        Ok(Self {
            thread_id,
            timeout,
            fired,
            stop: Some(stop),
            watchdog: Some(watchdog),
        })
    }

    /// Whether the watchdog has expired
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Whether the watchdog is still running
    pub fn is_armed(&self) -> bool {
        self.watchdog.is_some()
    }

    /// Configured budget
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stop the watchdog and wait for it to exit.
    ///
    /// Safe to call more than once. If the watchdog fired, any cancellation it
    /// left pending on this thread is cleared.
    pub fn disarm(&mut self, py: Python<'_>) {
        let Some(watchdog) = self.watchdog.take() else {
            return;
        };

        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        // The watchdog may be waiting for the GIL to deliver the exception.
        if py.allow_threads(move || watchdog.join()).is_err() {
            warn!("deadline watchdog panicked");
        }

        if self.fired() {
            unsafe {
                ffi::PyThreadState_SetAsyncExc(self.thread_id as _, std::ptr::null_mut());
            }
        }
        debug!("deadline disarmed (fired: {})", self.fired());
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if self.is_armed() {
            Python::with_gil(|py| self.disarm(py));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_disarm_before_expiry_never_fires() {
        Python::with_gil(|py| {
            let mut deadline = Deadline::arm(py, Duration::from_secs(30)).unwrap();
            assert!(deadline.is_armed());

            let started = Instant::now();
            deadline.disarm(py);
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(!deadline.fired());
            assert!(!deadline.is_armed());
        });
    }

    #[test]
    fn test_disarm_is_idempotent() {
        Python::with_gil(|py| {
            let mut deadline = Deadline::arm(py, Duration::from_secs(30)).unwrap();
            deadline.disarm(py);
            deadline.disarm(py);
            assert!(!deadline.fired());
        });
    }

    #[test]
    fn test_expiry_interrupts_running_code() {
        Python::with_gil(|py| {
            let mut deadline = Deadline::arm(py, Duration::from_millis(200)).unwrap();
            let result = py.run("while True:\n    pass\n", None, None);
            deadline.disarm(py);

            let err = result.unwrap_err();
            assert!(err.is_instance_of::<ExecutionTimeout>(py));
            assert!(deadline.fired());
        });
    }

    #[test]
    fn test_timeout_bypasses_except_exception() {
        Python::with_gil(|py| {
            let mut deadline = Deadline::arm(py, Duration::from_millis(200)).unwrap();
            let result = py.run(
                "try:\n    while True:\n        pass\nexcept Exception:\n    pass\n",
                None,
                None,
            );
            deadline.disarm(py);

            assert!(result.unwrap_err().is_instance_of::<ExecutionTimeout>(py));
        });
    }

    #[test]
    fn test_cleanup_after_expiry_is_interrupted_too() {
        Python::with_gil(|py| {
            let started = Instant::now();
            let mut deadline = Deadline::arm(py, Duration::from_millis(200)).unwrap();
            let result = py.run(
                "try:\n    while True:\n        pass\nfinally:\n    while True:\n        pass\n",
                None,
                None,
            );
            deadline.disarm(py);

            assert!(result.unwrap_err().is_instance_of::<ExecutionTimeout>(py));
            assert!(started.elapsed() < Duration::from_secs(5));
        });
    }

    #[test]
    fn test_no_cancellation_leaks_after_disarm() {
        Python::with_gil(|py| {
            let mut deadline = Deadline::arm(py, Duration::from_millis(100)).unwrap();
            let _ = py.run("while True:\n    pass\n", None, None);
            deadline.disarm(py);

            // Nothing pending is left to interrupt later bytecode.
            let result = py.run(
                "n = 0\nfor i in range(200000):\n    n += i\n",
                None,
                None,
            );
            assert!(result.is_ok());
        });
    }

    #[test]
    fn test_drop_disarms() {
        Python::with_gil(|py| {
            let deadline = Deadline::arm(py, Duration::from_secs(30)).unwrap();
            drop(deadline);
        });
    }
}
