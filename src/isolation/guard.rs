//! Static source guard
//!
//! The allow-listed builtins do not stop reflective escapes such as
//! `().__class__.__base__.__subclasses__()` or a generator frame walk up to a
//! trusted caller's builtins. Before anything is compiled the source is parsed
//! and rejected if it:
//!
//! - imports a module
//! - uses a dunder name, or a dunder string literal
//! - reads a private (`_`-prefixed) attribute or an introspection attribute
//!   such as `gi_frame` or `f_back`
//! - defines a dunder method other than `__init__`
//! - could swallow the deadline exception (bare `except:`, or `return`,
//!   `break` and `continue` inside `finally`)
//!
//! Rejections are raised as ordinary Python exceptions so they are reported
//! like any other fault in the submitted code.

use pyo3::exceptions::{PyAttributeError, PyImportError, PyNameError, PySyntaxError};
use pyo3::prelude::*;

/// Filename shown in tracebacks of sandboxed code
pub const SANDBOX_FILENAME: &str = "<sandbox>";

/// Attributes that reach frames, code objects or the class hierarchy
const INSPECT_ATTRIBUTES: &[&str] = &[
    // traceback
    "tb_frame",
    "tb_next",
    // frame
    "f_back",
    "f_builtins",
    "f_code",
    "f_globals",
    "f_locals",
    "f_trace",
    // generator
    "gi_code",
    "gi_frame",
    "gi_yieldfrom",
    // coroutine
    "cr_await",
    "cr_code",
    "cr_frame",
    "cr_origin",
    // async generator
    "ag_await",
    "ag_code",
    "ag_frame",
    // code
    "co_code",
    // class hierarchy
    "mro",
];

/// The only dunder method sandboxed classes may define
const ALLOWED_DUNDER_DEF: &str = "__init__";

/// Names the guard refuses, whether read, assigned or bound
pub fn is_reserved(identifier: &str) -> bool {
    identifier.starts_with("__")
}

/// Attributes the guard refuses
pub fn is_blocked_attribute(attr: &str) -> bool {
    attr.starts_with('_') || INSPECT_ATTRIBUTES.contains(&attr)
}

fn is_dunder_literal(text: &str) -> bool {
    text.len() > 4 && text.starts_with("__") && text.ends_with("__")
}

/// Parse `source` and return its AST if it passes the guard.
pub fn check_source<'py>(py: Python<'py>, source: &str) -> PyResult<&'py PyAny> {
    let ast = py.import("ast")?;
    let tree = ast.call_method1("parse", (source, SANDBOX_FILENAME, "exec"))?;

    for node in ast.call_method1("walk", (tree,))?.iter()? {
        check_node(ast, node?)?;
    }

    Ok(tree)
}

fn check_node(ast: &PyModule, node: &PyAny) -> PyResult<()> {
    let line: usize = node
        .getattr("lineno")
        .and_then(|l| l.extract())
        .unwrap_or(0);

    match node.get_type().name()? {
        "Import" | "ImportFrom" => Err(PyImportError::new_err(format!(
            "import statements are not allowed (line {})",
            line
        ))),
        "Attribute" => check_attribute(&node.getattr("attr")?.extract::<String>()?, line),
        "MatchClass" => {
            for attr in node.getattr("kwd_attrs")?.extract::<Vec<String>>()? {
                check_attribute(&attr, line)?;
            }
            Ok(())
        }
        "Name" => check_name(&node.getattr("id")?.extract::<String>()?, line),
        "arg" => check_name(&node.getattr("arg")?.extract::<String>()?, line),
        "Global" | "Nonlocal" => {
            for name in node.getattr("names")?.extract::<Vec<String>>()? {
                check_name(&name, line)?;
            }
            Ok(())
        }
        "MatchAs" | "MatchStar" => match node.getattr("name")?.extract::<Option<String>>()? {
            Some(name) => check_name(&name, line),
            None => Ok(()),
        },
        "MatchMapping" => match node.getattr("rest")?.extract::<Option<String>>()? {
            Some(name) => check_name(&name, line),
            None => Ok(()),
        },
        "ClassDef" => check_name(&node.getattr("name")?.extract::<String>()?, line),
        "FunctionDef" | "AsyncFunctionDef" => {
            let name: String = node.getattr("name")?.extract()?;
            if name == ALLOWED_DUNDER_DEF {
                Ok(())
            } else {
                check_name(&name, line)
            }
        }
        "Constant" => match node.getattr("value")?.extract::<String>() {
            Ok(text) if is_dunder_literal(&text) => Err(PyNameError::new_err(format!(
                "string '{}' is not allowed (line {})",
                text, line
            ))),
            _ => Ok(()),
        },
        "ExceptHandler" => {
            let name: Option<String> = node.getattr("name")?.extract()?;
            if let Some(name) = name {
                check_name(&name, line)?;
            }
            if node.getattr("type")?.is_none() {
                return Err(PySyntaxError::new_err(format!(
                    "bare 'except:' is not allowed (line {})",
                    line
                )));
            }
            Ok(())
        }
        "Try" | "TryStar" => check_finally(ast, node, line),
        _ => Ok(()),
    }
}

fn check_attribute(attr: &str, line: usize) -> PyResult<()> {
    if is_blocked_attribute(attr) {
        return Err(PyAttributeError::new_err(format!(
            "access to attribute '{}' is not allowed (line {})",
            attr, line
        )));
    }
    Ok(())
}

fn check_name(id: &str, line: usize) -> PyResult<()> {
    if is_reserved(id) {
        return Err(PyNameError::new_err(format!(
            "name '{}' is not allowed (line {})",
            id, line
        )));
    }
    Ok(())
}

fn check_finally(ast: &PyModule, node: &PyAny, line: usize) -> PyResult<()> {
    for statement in node.getattr("finalbody")?.iter()? {
        for inner in ast.call_method1("walk", (statement?,))?.iter()? {
            let inner = inner?;
            let kind = inner.get_type().name()?;
            if matches!(kind, "Return" | "Break" | "Continue") {
                return Err(PySyntaxError::new_err(format!(
                    "'{}' inside 'finally' is not allowed (line {})",
                    kind.to_lowercase(),
                    line
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection(source: &str) -> Option<String> {
        Python::with_gil(|py| check_source(py, source).err().map(|e| e.to_string()))
    }

    #[test]
    fn test_plain_code_passes() {
        assert!(rejection("x = [i * i for i in range(10)]\nprint(sum(x))").is_none());
        assert!(rejection("class Point:\n    def __init__(self, x):\n        self.x = x\n").is_none());
        assert!(rejection("try:\n    x = 1\nexcept ValueError as e:\n    pass\nfinally:\n    y = 2").is_none());
        assert!(rejection("_ = 3\nprint('__x')").is_none());
    }

    #[test]
    fn test_imports_are_rejected() {
        let err = rejection("import os").unwrap();
        assert!(err.starts_with("ImportError"), "{}", err);
        assert!(err.contains("line 1"));

        let err = rejection("x = 1\nfrom subprocess import run").unwrap();
        assert!(err.contains("line 2"), "{}", err);
    }

    #[test]
    fn test_dunder_attribute_is_rejected() {
        let err = rejection("().__class__.__base__.__subclasses__()").unwrap();
        assert!(err.starts_with("AttributeError"), "{}", err);
        assert!(err.contains("__"));
    }

    #[test]
    fn test_dunder_name_is_rejected() {
        let err = rejection("__builtins__['open']").unwrap();
        assert!(err.starts_with("NameError"), "{}", err);
        assert!(err.contains("'__builtins__'"));
    }

    #[test]
    fn test_frame_walk_is_rejected() {
        for source in [
            "def gen():\n    yield 1\ng = gen()\nf = g.gi_frame.f_back",
            "f = (x for x in []).gi_frame",
            "try:\n    1 / 0\nexcept ZeroDivisionError as e:\n    e.with_traceback(None)\n    tb = e.tb_frame",
            "b = frame.f_builtins",
            "Exception.mro()",
            "x = value._private",
        ] {
            let err = rejection(source).unwrap_or_else(|| panic!("{} should be rejected", source));
            assert!(err.starts_with("AttributeError"), "{}", err);
        }
    }

    #[test]
    fn test_match_class_attributes_are_checked() {
        if Python::with_gil(|py| py.version_info() < (3, 10)) {
            return;
        }
        let err = rejection("match g:\n    case object(gi_frame=f):\n        pass").unwrap();
        assert!(err.contains("'gi_frame'"), "{}", err);
    }

    #[test]
    fn test_dunder_string_keys_are_rejected() {
        let err = rejection("b = {}\nb['__import__']").unwrap();
        assert!(err.starts_with("NameError"), "{}", err);
        assert!(err.contains("'__import__'"));
    }

    #[test]
    fn test_dunder_methods_are_rejected() {
        for method in ["__str__", "__repr__", "__format__", "__del__"] {
            let source = format!("class E(Exception):\n    def {}(self):\n        return ''", method);
            let err = rejection(&source).unwrap();
            assert!(err.contains(method), "{}", err);
        }
    }

    #[test]
    fn test_deadline_swallowing_is_rejected() {
        let err = rejection("try:\n    pass\nexcept:\n    pass").unwrap();
        assert!(err.starts_with("SyntaxError"), "{}", err);

        let err = rejection("while True:\n    try:\n        pass\n    finally:\n        continue").unwrap();
        assert!(err.contains("'continue' inside 'finally'"), "{}", err);
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = rejection("def broken(:\n    pass").unwrap();
        assert!(err.starts_with("SyntaxError"), "{}", err);
    }

    #[test]
    fn test_is_reserved() {
        assert!(is_reserved("__import__"));
        assert!(is_reserved("__class__"));
        assert!(!is_reserved("_private"));
        assert!(!is_reserved("value"));
    }

    #[test]
    fn test_is_blocked_attribute() {
        assert!(is_blocked_attribute("_private"));
        assert!(is_blocked_attribute("f_back"));
        assert!(!is_blocked_attribute("append"));
    }
}
