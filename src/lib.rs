//! safexec-core - Restricted Code Sandbox for program-aided reasoning
//!
//! This library validates model-generated code submissions against a static
//! safety policy, then executes them inside a capability-gated interpreter
//! environment with a hard wall-clock deadline. Failures come back as data
//! (a classified error), never as a fault that could crash the host.
// All public classes re-exported for Python bindings

pub mod convert;
pub mod error;
pub mod executor;
pub mod policy;
pub mod validator;

mod deadline;

pub use error::{ImportDeniedError, SandboxError};
pub use executor::{SafeExecutor, SandboxConfig, SandboxValue, RESULT_VAR};
pub use policy::CapabilityPolicy;

use pyo3::prelude::*;

/// Initialize tracing for the library.
#[pyfunction]
#[pyo3(signature = (level = None))]
pub fn setup_logging(level: Option<String>) {
    let filter = level.unwrap_or_else(|| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Python module initialization
#[pymodule]
fn safexec_core(py: Python, m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Configuration
    m.add_class::<policy::CapabilityPolicy>()?;
    m.add_class::<executor::SandboxConfig>()?;

    // Execution
    m.add_class::<executor::SafeExecutor>()?;
    m.add("ImportDeniedError", py.get_type_bound::<error::ImportDeniedError>())?;

    // Utilities
    m.add_function(wrap_pyfunction!(validator::validate_code, m)?)?;
    m.add_function(wrap_pyfunction!(setup_logging, m)?)?;

    Ok(())
}
