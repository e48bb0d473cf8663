//! Output interception for sandboxed code
//!
//! `sys.stdout` and `sys.stderr` are swapped for [`OutputBuffer`] objects for
//! the duration of one execution. Writes land in Rust strings while the GIL is
//! held, so an asynchronous cancellation can only arrive between two writes,
//! never in the middle of one.

use crate::errors::Result;
use pyo3::prelude::*;

/// Default cap on the primary output, in characters
pub const MAX_OUTPUT_SIZE: usize = 10 * 1024;

/// Appended to output cut at [`MAX_OUTPUT_SIZE`]
pub const TRUNCATION_MARKER: &str = "\n... output truncated";

/// Text sink installed as a standard stream
#[pyclass(module = "sandbox")]
#[derive(Debug, Default)]
pub struct OutputBuffer {
    text: String,
    chars: usize,
    /// Characters kept before further writes are dropped
    retain: Option<usize>,
}

impl OutputBuffer {
    /// Buffer that keeps at most `retain` characters
    pub fn bounded(retain: usize) -> Self {
        Self {
            retain: Some(retain),
            ..Default::default()
        }
    }

    /// Captured text
    pub fn text(&self) -> &str {
        &self.text
    }

    fn take(&mut self) -> String {
        self.chars = 0;
        std::mem::take(&mut self.text)
    }
}

#[pymethods]
impl OutputBuffer {
    fn write(&mut self, data: &str) -> usize {
        let written = data.chars().count();
        match self.retain {
            Some(retain) if self.chars + written > retain => {
                let room = retain.saturating_sub(self.chars);
                self.text.extend(data.chars().take(room));
                self.chars += room;
            }
            _ => {
                self.text.push_str(data);
                self.chars += written;
            }
        }
        written
    }

    fn flush(&self) {}

    fn isatty(&self) -> bool {
        false
    }

    fn writable(&self) -> bool {
        true
    }
}

/// Text captured from one execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Active redirection of the interpreter's standard streams.
///
/// The previous streams are restored by [`finish`](Self::finish) or, on any
/// early return, when the guard is dropped.
pub struct OutputCapture {
    stdout: Py<OutputBuffer>,
    stderr: Py<OutputBuffer>,
    saved: Option<(PyObject, PyObject)>,
}

impl OutputCapture {
    /// Redirect both streams. The primary stream keeps `max_output + 1`
    /// characters, enough for [`truncate_output`] to notice the overflow.
    pub fn install(py: Python<'_>, max_output: usize) -> Result<Self> {
        let sys = py.import("sys")?;
        let saved_stdout: PyObject = sys.getattr("stdout")?.into();
        let saved_stderr: PyObject = sys.getattr("stderr")?.into();

        let capture = Self {
            stdout: Py::new(py, OutputBuffer::bounded(max_output.saturating_add(1)))?,
            stderr: Py::new(py, OutputBuffer::default())?,
            saved: Some((saved_stdout, saved_stderr)),
        };

        sys.setattr("stdout", capture.stdout.clone_ref(py))?;
        sys.setattr("stderr", capture.stderr.clone_ref(py))?;
        Ok(capture)
    }

    /// Restore the previous streams and hand back what was captured.
    pub fn finish(mut self, py: Python<'_>) -> Result<CapturedOutput> {
        self.restore(py)?;

        let stdout = self.stdout.try_borrow_mut(py).map_err(PyErr::from)?.take();
        let stderr = self.stderr.try_borrow_mut(py).map_err(PyErr::from)?.take();
        Ok(CapturedOutput { stdout, stderr })
    }

    fn restore(&mut self, py: Python<'_>) -> PyResult<()> {
        if let Some((stdout, stderr)) = self.saved.take() {
            let sys = py.import("sys")?;
            sys.setattr("stdout", stdout)?;
            sys.setattr("stderr", stderr)?;
        }
        Ok(())
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        if self.saved.is_some() {
            Python::with_gil(|py| {
                if let Err(e) = self.restore(py) {
                    log::warn!("failed to restore standard streams: {}", e);
                }
            });
        }
    }
}

/// Cut `text` to `max_chars` characters and append [`TRUNCATION_MARKER`].
///
/// Text within the limit is returned unchanged.
pub fn truncate_output(mut text: String, max_chars: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(max_chars) {
        text.truncate(cut);
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_is_unchanged() {
        let text = "2\n".to_string();
        assert_eq!(truncate_output(text.clone(), MAX_OUTPUT_SIZE), text);
    }

    #[test]
    fn test_output_at_limit_is_unchanged() {
        let text = "a".repeat(MAX_OUTPUT_SIZE);
        assert_eq!(truncate_output(text.clone(), MAX_OUTPUT_SIZE), text);
    }

    #[test]
    fn test_long_output_is_cut_and_marked() {
        for len in [MAX_OUTPUT_SIZE + 1, 20_001, 100_000] {
            let out = truncate_output("x".repeat(len), MAX_OUTPUT_SIZE);
            assert_eq!(out.len(), MAX_OUTPUT_SIZE + TRUNCATION_MARKER.len());
            assert!(out.ends_with(TRUNCATION_MARKER));
        }
    }

    #[test]
    fn test_truncation_counts_characters() {
        let out = truncate_output("é".repeat(10), 4);
        assert_eq!(out, format!("éééé{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncation_is_idempotent_below_limit() {
        let once = truncate_output("hello".to_string(), 10);
        let twice = truncate_output(once.clone(), 10);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_bounded_buffer_stops_growing() {
        let mut buffer = OutputBuffer::bounded(5);
        assert_eq!(buffer.write("abc"), 3);
        assert_eq!(buffer.write("defgh"), 5);
        assert_eq!(buffer.write("ijk"), 3);
        assert_eq!(buffer.text(), "abcde");
    }

    #[test]
    fn test_unbounded_buffer_keeps_everything() {
        let mut buffer = OutputBuffer::default();
        buffer.write("warning: ");
        buffer.write("deprecated\n");
        assert_eq!(buffer.text(), "warning: deprecated\n");
    }
}
