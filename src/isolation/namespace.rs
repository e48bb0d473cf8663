//! Restricted execution namespace
//!
//! Sandboxed code runs with a globals dict whose `__builtins__` is a plain dict
//! holding only allow-listed callables. Anything not listed (`open`,
//! `__import__`, `eval`, `getattr`, ...) simply does not resolve and surfaces
//! as an ordinary `NameError`.

use crate::errors::Result;
use log::debug;
use pyo3::prelude::*;
use pyo3::exceptions::PyTypeError;
use pyo3::types::{PyDict, PyList, PyType};
use std::path::Path;

/// Value of `__name__` inside the sandbox
pub const SANDBOX_MODULE_NAME: &str = "__sandbox__";

/// Third-party libraries exposed when the host interpreter has them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalLibrary {
    /// numpy, bound as `np`
    Numpy,
    /// pandas, bound as `pd`
    Pandas,
    /// matplotlib.pyplot on the `Agg` backend, bound as `plt`
    Pyplot,
}

impl OptionalLibrary {
    /// Get all optional libraries
    pub fn all() -> Vec<Self> {
        vec![
            OptionalLibrary::Numpy,
            OptionalLibrary::Pandas,
            OptionalLibrary::Pyplot,
        ]
    }

    /// Name the library is bound to inside the sandbox
    pub fn alias(&self) -> &'static str {
        match self {
            OptionalLibrary::Numpy => "np",
            OptionalLibrary::Pandas => "pd",
            OptionalLibrary::Pyplot => "plt",
        }
    }

    /// Module imported on the host side
    pub fn module(&self) -> &'static str {
        match self {
            OptionalLibrary::Numpy => "numpy",
            OptionalLibrary::Pandas => "pandas",
            OptionalLibrary::Pyplot => "matplotlib.pyplot",
        }
    }

    fn import<'py>(&self, py: Python<'py>) -> PyResult<&'py PyModule> {
        if *self == OptionalLibrary::Pyplot {
            // Must happen before pyplot is first imported.
            py.import("matplotlib")?.call_method1("use", ("Agg",))?;
        }
        py.import(self.module())
    }

    /// Whether the host interpreter can import this library
    pub fn is_available(&self, py: Python<'_>) -> bool {
        self.import(py).is_ok()
    }
}

/// General-purpose builtins reachable from sandboxed code.
pub fn allowed_builtins() -> Vec<&'static str> {
    vec![
        // Numbers
        "abs",
        "bin",
        "complex",
        "divmod",
        "float",
        "hex",
        "int",
        "oct",
        "pow",
        "round",
        // Text
        "ascii",
        "chr",
        "format",
        "ord",
        "repr",
        "str",
        // Collections
        "bytearray",
        "bytes",
        "dict",
        "frozenset",
        "list",
        "set",
        "slice",
        "tuple",
        // Iteration
        "all",
        "any",
        "enumerate",
        "filter",
        "iter",
        "len",
        "map",
        "max",
        "min",
        "next",
        "range",
        "reversed",
        "sorted",
        "sum",
        "zip",
        // Types
        "bool",
        "dir",
        "hash",
        "isinstance",
        "issubclass",
        "object",
        "type",
        // Output
        "print",
        // Class statements
        "__build_class__",
    ]
}

/// Exception types sandboxed code may raise and catch.
pub fn allowed_exceptions() -> Vec<&'static str> {
    vec![
        "Exception",
        "ArithmeticError",
        "AssertionError",
        "AttributeError",
        "IndexError",
        "KeyError",
        "LookupError",
        "NameError",
        "NotImplementedError",
        "OverflowError",
        "RuntimeError",
        "StopIteration",
        "TypeError",
        "ValueError",
        "ZeroDivisionError",
    ]
}

/// `type` as seen by sandboxed code: the one-argument form only.
///
/// The builtin's three-argument form builds a class from a dict of names, and
/// the type of a class is the metaclass that can do the same.
#[pyfunction]
#[pyo3(name = "r#type")]
fn type_of(value: &PyAny) -> PyResult<&PyType> {
    if value.downcast::<PyType>().is_ok() {
        return Err(PyTypeError::new_err("type() of a class is not available"));
    }
    Ok(value.get_type())
}

/// Globals table for one execution
pub struct RestrictedNamespace {
    globals: Py<PyDict>,
    libraries: Vec<OptionalLibrary>,
}

impl RestrictedNamespace {
    /// Build a fresh namespace, binding every optional library that imports.
    pub fn build(py: Python<'_>) -> Result<Self> {
        Self::build_with(py, &OptionalLibrary::all())
    }

    /// Build a fresh namespace, trying only the given optional libraries.
    pub fn build_with(py: Python<'_>, wanted: &[OptionalLibrary]) -> Result<Self> {
        let host = py.import("builtins")?;
        let builtins = PyDict::new(py);
        for name in allowed_builtins().into_iter().chain(allowed_exceptions()) {
            builtins.set_item(name, host.getattr(name)?)?;
        }
        builtins.set_item("type", wrap_pyfunction!(type_of, py)?)?;

        let globals = PyDict::new(py);
        globals.set_item("__builtins__", builtins)?;
        globals.set_item("__name__", SANDBOX_MODULE_NAME)?;

        let mut libraries = Vec::new();
        for library in wanted {
            match library.import(py) {
                Ok(module) => {
                    globals.set_item(library.alias(), module)?;
                    libraries.push(*library);
                }
                Err(e) => debug!("{} not available: {}", library.module(), e),
            }
        }

        Ok(Self {
            globals: globals.into(),
            libraries,
        })
    }

    /// Globals dict to execute against.
    ///
    /// Borrowed rather than registered with the GIL pool, so dropping the
    /// namespace releases the snippet's objects right away.
    pub fn globals<'py>(&'py self, py: Python<'py>) -> &'py PyDict {
        self.globals.as_ref(py)
    }

    /// Check whether `library` was bound
    pub fn has_library(&self, library: OptionalLibrary) -> bool {
        self.libraries.contains(&library)
    }

    /// Names resolvable through `__builtins__`, sorted
    pub fn builtin_names(&self, py: Python<'_>) -> Vec<String> {
        let mut names: Vec<String> = self
            .globals(py)
            .get_item("__builtins__")
            .ok()
            .flatten()
            .and_then(|b| b.downcast::<PyDict>().ok())
            .map(|b| b.keys().iter().filter_map(|k| k.extract().ok()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Save the open figure to `path` and close all figures.
    ///
    /// Best effort: returns whether an image was written, never fails.
    pub fn save_plot(&self, py: Python<'_>, path: &Path) -> bool {
        let Some(plt) = self.pyplot(py) else {
            return false;
        };

        let saved = (|| -> PyResult<bool> {
            let open = plt.call_method0("get_fignums")?.downcast::<PyList>()?.len();
            if open == 0 {
                return Ok(false);
            }
            plt.call_method1("savefig", (path.to_string_lossy().into_owned(),))?;
            Ok(true)
        })();
        self.close_plots(py);

        match saved {
            Ok(written) => written,
            Err(e) => {
                debug!("failed to save plot to {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Close every open figure without saving it.
    pub fn close_plots(&self, py: Python<'_>) {
        if let Some(plt) = self.pyplot(py) {
            if let Err(e) = plt.call_method1("close", ("all",)) {
                debug!("failed to close figures: {}", e);
            }
        }
    }

    fn pyplot<'py>(&'py self, py: Python<'py>) -> Option<&'py PyAny> {
        if !self.has_library(OptionalLibrary::Pyplot) {
            return None;
        }
        self.globals(py)
            .get_item(OptionalLibrary::Pyplot.alias())
            .ok()
            .flatten()
    }
}
