//! Static safety gate.
//!
//! Decides, without executing anything, whether a submission is safe to run.
//! The check walks the parsed syntax tree and rejects direct calls to
//! dynamic-evaluation primitives, attribute calls that reach process, file,
//! or reflection internals, and `global`/`nonlocal` declarations. Import
//! statements pass through: namespace admission is enforced at resolution
//! time by the executor's import gate, which is the authoritative layer.

use crate::error::SandboxError;
use pyo3::prelude::*;
use tracing::warn;

/// Calls that compile or evaluate new code. Rejected unconditionally.
pub const DENIED_CALLS: [&str; 3] = ["eval", "exec", "compile"];

/// Attribute names denoting process invocation, compiled-code evaluation,
/// file access, or reflective access to live object internals.
pub const DENIED_ATTRIBUTES: [&str; 9] = [
    "system",
    "popen",
    "exec",
    "eval",
    "write",
    "read",
    "__dict__",
    "__globals__",
    "__subclasses__",
];

/// Returns true only if the submission passes every static check.
pub fn validate(code: &str) -> bool {
    Python::with_gil(|py| check(py, code).is_ok())
}

/// Python-facing wrapper around [`validate`].
#[pyfunction]
pub fn validate_code(py: Python<'_>, code: &str) -> bool {
    check(py, code).is_ok()
}

/// Classified form of [`validate`]: distinguishes a parse failure from a
/// deny-list match.
pub fn check(py: Python<'_>, code: &str) -> Result<(), SandboxError> {
    match scan(py, code) {
        Ok(verdict) => verdict,
        // Host-side failure while walking the tree, not a property of the
        // submission itself.
        Err(err) => Err(SandboxError::RuntimeFault(format!(
            "validator failure: {err}"
        ))),
    }
}

fn scan(py: Python<'_>, code: &str) -> PyResult<Result<(), SandboxError>> {
    let ast = py.import_bound("ast")?;

    // Fails closed: anything unparseable is invalid.
    let tree = match ast.call_method1("parse", (code,)) {
        Ok(tree) => tree,
        Err(err) => {
            warn!("🚫 [Validator] Unparseable submission: {}", err);
            return Ok(Err(SandboxError::SyntaxInvalid(err.to_string())));
        }
    };

    let call_ty = ast.getattr("Call")?;
    let name_ty = ast.getattr("Name")?;
    let attribute_ty = ast.getattr("Attribute")?;
    let global_ty = ast.getattr("Global")?;
    let nonlocal_ty = ast.getattr("Nonlocal")?;

    for node in ast.call_method1("walk", (tree,))?.iter()? {
        let node = node?;

        if node.is_instance(&call_ty)? {
            let func = node.getattr("func")?;
            if func.is_instance(&name_ty)? {
                let id: String = func.getattr("id")?.extract()?;
                if DENIED_CALLS.contains(&id.as_str()) {
                    warn!("🚫 [Validator] Rejected call to '{}'", id);
                    return Ok(Err(SandboxError::UnsafeCodeRejected(format!(
                        "call to '{id}' is not allowed"
                    ))));
                }
            } else if func.is_instance(&attribute_ty)? {
                let attr: String = func.getattr("attr")?.extract()?;
                if DENIED_ATTRIBUTES.contains(&attr.as_str()) {
                    warn!("🚫 [Validator] Rejected attribute call '.{}'", attr);
                    return Ok(Err(SandboxError::UnsafeCodeRejected(format!(
                        "attribute call '.{attr}' is not allowed"
                    ))));
                }
            }
        } else if node.is_instance(&global_ty)? || node.is_instance(&nonlocal_ty)? {
            warn!("🚫 [Validator] Rejected scope-rebinding declaration");
            return Ok(Err(SandboxError::UnsafeCodeRejected(
                "global/nonlocal declarations are not allowed".to_string(),
            )));
        }
    }

    Ok(Ok(()))
}
