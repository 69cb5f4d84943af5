//! Sandbox failure taxonomy.
//!
//! Every failure crossing the sandbox boundary is returned as data; nothing
//! propagates to the caller as an uncaught fault.

use pyo3::create_exception;
use pyo3::exceptions::{
    PyImportError, PyRuntimeError, PySyntaxError, PyTimeoutError, PyValueError,
};
use pyo3::PyErr;
use thiserror::Error;

// Raised only by the sandbox's own import gate, so a denial is
// distinguishable from an `ImportError` the allow-listed module raised
// itself. Subclasses `ImportError` for callers that catch broadly.
create_exception!(safexec_core, ImportDeniedError, PyImportError);

/// Classified outcome of a failed submission.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The submission could not be parsed; it was never executed.
    #[error("submission could not be parsed: {0}")]
    SyntaxInvalid(String),

    /// The submission matched a static deny-list rule; it was never executed.
    #[error("unsafe code rejected: {0}")]
    UnsafeCodeRejected(String),

    /// The submission resolved a namespace outside the allow-list at run time.
    #[error("import denied: {0}")]
    ImportDenied(String),

    /// Execution ran past the deadline and was interrupted.
    #[error("execution exceeded the {0}ms deadline")]
    TimeoutExceeded(u64),

    /// Any other exception raised during execution, with the cause preserved.
    #[error("runtime fault: {0}")]
    RuntimeFault(String),
}

impl From<SandboxError> for PyErr {
    fn from(err: SandboxError) -> PyErr {
        let msg = err.to_string();
        match err {
            SandboxError::SyntaxInvalid(_) => PySyntaxError::new_err(msg),
            SandboxError::UnsafeCodeRejected(_) => PyValueError::new_err(msg),
            SandboxError::ImportDenied(_) => ImportDeniedError::new_err(msg),
            SandboxError::TimeoutExceeded(_) => PyTimeoutError::new_err(msg),
            SandboxError::RuntimeFault(_) => PyRuntimeError::new_err(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_preserve_cause_text() {
        let err = SandboxError::RuntimeFault("ZeroDivisionError: division by zero".to_string());
        assert!(err.to_string().contains("division by zero"));

        let err = SandboxError::TimeoutExceeded(3000);
        assert!(err.to_string().contains("3000ms"));
    }
}
