//! Restricted execution environment.
//!
//! `SafeExecutor` runs a validated submission against a minimal global
//! namespace: a fresh `__builtins__` dict holding exactly the policy's
//! allow-listed builtin names, plus an import gate standing in for
//! `__import__`. Execution happens under a scoped wall-clock deadline, and
//! every exception is caught at the boundary and returned as a classified
//! [`SandboxError`].

use crate::convert::value_to_json;
use crate::deadline::DeadlineScope;
use crate::error::{ImportDeniedError, SandboxError};
use crate::policy::CapabilityPolicy;
use crate::validator;
use pyo3::exceptions::{PyTimeoutError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The reserved binding read from the submission's locals after execution.
pub const RESULT_VAR: &str = "result";

const DEFAULT_TIMEOUT_SECS: f64 = 3.0;

/// Upper bound on a configured deadline (one day). `Duration::from_secs_f64`
/// panics on non-finite input, so the budget is clamped first.
const MAX_TIMEOUT_SECS: f64 = 86_400.0;

fn clamp_timeout(secs: f64) -> Duration {
    if secs.is_finite() {
        Duration::from_secs_f64(secs.clamp(0.0, MAX_TIMEOUT_SECS))
    } else {
        Duration::from_secs_f64(MAX_TIMEOUT_SECS)
    }
}

/// Deployment-time configuration for an executor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[pyclass]
pub struct SandboxConfig {
    #[pyo3(get, set)]
    pub timeout_secs: f64,
    #[pyo3(get, set)]
    pub policy: CapabilityPolicy,
}

#[pymethods]
impl SandboxConfig {
    #[new]
    #[pyo3(signature = (timeout_secs = DEFAULT_TIMEOUT_SECS, policy = None))]
    pub fn new(timeout_secs: f64, policy: Option<CapabilityPolicy>) -> Self {
        SandboxConfig {
            timeout_secs,
            policy: policy.unwrap_or_default(),
        }
    }

    #[staticmethod]
    pub fn from_json(text: &str) -> PyResult<Self> {
        serde_json::from_str(text).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    pub fn to_json(&self) -> PyResult<String> {
        serde_json::to_string(self).map_err(|e| PyValueError::new_err(e.to_string()))
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS, None)
    }
}

/// Successful outcome of a submission: the value bound to [`RESULT_VAR`], or
/// an explicit marker when the submission never assigned it.
#[derive(Debug)]
pub enum SandboxValue {
    Value(Py<PyAny>),
    Absent,
}

impl SandboxValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, SandboxValue::Absent)
    }

    /// JSON rendering of the value; an absent result renders as null.
    pub fn to_json(&self, py: Python<'_>) -> serde_json::Value {
        match self {
            SandboxValue::Value(obj) => value_to_json(obj.bind(py)),
            SandboxValue::Absent => serde_json::Value::Null,
        }
    }
}

/// Runtime capability gate standing in for `__import__` inside the sandbox.
/// Relative imports are rejected outright; absolute requests are checked by
/// their top-level component and forwarded to the real import machinery only
/// when admitted.
#[pyclass]
struct ImportGate {
    policy: CapabilityPolicy,
}

#[pymethods]
impl ImportGate {
    #[pyo3(signature = (name, globals = None, locals = None, fromlist = None, level = 0))]
    #[allow(clippy::too_many_arguments)]
    fn __call__(
        &self,
        py: Python<'_>,
        name: &str,
        globals: Option<Bound<'_, PyAny>>,
        locals: Option<Bound<'_, PyAny>>,
        fromlist: Option<Bound<'_, PyAny>>,
        level: i32,
    ) -> PyResult<Py<PyAny>> {
        if level != 0 {
            warn!("🚫 [Sandbox] Denied relative import of '{}'", name);
            return Err(ImportDeniedError::new_err(
                "relative imports are not allowed".to_string(),
            ));
        }

        let top_module = name.split('.').next().unwrap_or(name);
        if !self.policy.allows_module(top_module) {
            warn!("🚫 [Sandbox] Denied import of '{}'", name);
            let allowed: Vec<&str> = self.policy.module_names().collect();
            return Err(ImportDeniedError::new_err(format!(
                "import of '{name}' is not allowed; allowed modules: {allowed:?}"
            )));
        }

        let builtins = py.import_bound("builtins")?;
        let import_fn = builtins.getattr("__import__")?;
        Ok(import_fn
            .call1((name, globals, locals, fromlist, level))?
            .unbind())
    }
}

/// Validates and executes model-generated submissions under a capability
/// policy and a wall-clock deadline. One submission at a time per executor;
/// the policy is read-only and may be shared freely across workers.
#[pyclass]
pub struct SafeExecutor {
    policy: CapabilityPolicy,
    timeout: Duration,
}

#[pymethods]
impl SafeExecutor {
    #[new]
    #[pyo3(signature = (policy = None, timeout_secs = DEFAULT_TIMEOUT_SECS))]
    pub fn new(policy: Option<CapabilityPolicy>, timeout_secs: f64) -> Self {
        SafeExecutor {
            policy: policy.unwrap_or_default(),
            timeout: clamp_timeout(timeout_secs),
        }
    }

    #[staticmethod]
    pub fn from_config(config: SandboxConfig) -> Self {
        Self::new(Some(config.policy), config.timeout_secs)
    }

    /// Static safety verdict for a submission; no code is executed.
    pub fn validate(&self, py: Python<'_>, code: &str) -> bool {
        validator::check(py, code).is_ok()
    }

    /// Execute a submission and return the value bound to `result`, or
    /// `None` if it was never assigned. Failures raise the matching Python
    /// exception kind.
    #[pyo3(name = "execute")]
    pub fn py_execute(&self, py: Python<'_>, code: &str) -> PyResult<Py<PyAny>> {
        match self.run_submission(py, code)? {
            SandboxValue::Value(obj) => Ok(obj),
            SandboxValue::Absent => Ok(py.None()),
        }
    }

    /// Execute a submission and return its result rendered as JSON.
    pub fn execute_json(&self, py: Python<'_>, code: &str) -> PyResult<String> {
        let value = self.run_submission(py, code)?;
        Ok(value.to_json(py).to_string())
    }

    pub fn __repr__(&self) -> String {
        format!(
            "SafeExecutor(timeout={}ms, modules={})",
            self.timeout.as_millis(),
            self.policy.module_names().count()
        )
    }
}

impl SafeExecutor {
    /// Rust-facing entry point: acquires the interpreter and runs one
    /// submission to completion, failure, or timeout.
    pub fn execute(&self, code: &str) -> Result<SandboxValue, SandboxError> {
        Python::with_gil(|py| self.run_submission(py, code))
    }

    fn run_submission(&self, py: Python<'_>, code: &str) -> Result<SandboxValue, SandboxError> {
        // A submission that fails static validation is never executed.
        validator::check(py, code)?;

        let globals = self.build_globals(py).map_err(|e| {
            SandboxError::RuntimeFault(format!("environment setup failed: {e}"))
        })?;
        let locals = PyDict::new_bound(py);

        let started = Instant::now();
        let outcome = {
            let _deadline = DeadlineScope::install(py, self.timeout).map_err(|e| {
                SandboxError::RuntimeFault(format!("deadline setup failed: {e}"))
            })?;
            py.run_bound(code, Some(&globals), Some(&locals))
            // The deadline registration is released here on every path.
        };

        match outcome {
            Ok(()) => {
                debug!(
                    "✅ [Sandbox] Submission completed in {:?}",
                    started.elapsed()
                );
                match locals.get_item(RESULT_VAR) {
                    Ok(Some(value)) => Ok(SandboxValue::Value(value.unbind())),
                    _ => Ok(SandboxValue::Absent),
                }
            }
            Err(err) => Err(self.classify(py, err)),
        }
    }

    /// Minimal global namespace: the allow-listed builtins (copied from the
    /// real `builtins` module) plus the import gate. No other ambient names
    /// are visible to the submission.
    fn build_globals<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let builtins = py.import_bound("builtins")?;
        let available = builtins.dict();

        let gated = PyDict::new_bound(py);
        for name in self.policy.builtin_names() {
            if let Some(value) = available.get_item(name)? {
                gated.set_item(name, value)?;
            }
        }
        let gate = Bound::new(
            py,
            ImportGate {
                policy: self.policy.clone(),
            },
        )?;
        gated.set_item("__import__", gate)?;

        let globals = PyDict::new_bound(py);
        globals.set_item("__builtins__", gated)?;
        Ok(globals)
    }

    fn classify(&self, py: Python<'_>, err: PyErr) -> SandboxError {
        if err.is_instance_of::<PyTimeoutError>(py) {
            SandboxError::TimeoutExceeded(self.timeout.as_millis() as u64)
        } else if err.is_instance_of::<ImportDeniedError>(py) {
            // Only the gate's own denials count; an `ImportError` raised by
            // an admitted module (a missing name, say) is a runtime fault.
            SandboxError::ImportDenied(err.to_string())
        } else {
            debug!("💥 [Sandbox] Submission raised: {}", err);
            SandboxError::RuntimeFault(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_executor() -> SafeExecutor {
        SafeExecutor::new(None, DEFAULT_TIMEOUT_SECS)
    }

    fn extract_i64(value: &SandboxValue) -> i64 {
        match value {
            SandboxValue::Value(obj) => {
                Python::with_gil(|py| obj.extract::<i64>(py).expect("expected an int"))
            }
            SandboxValue::Absent => panic!("expected a result binding"),
        }
    }

    #[test]
    fn binds_and_returns_the_result_variable() {
        let value = default_executor().execute("result = 123 * 456").unwrap();
        assert_eq!(extract_i64(&value), 56088);
    }

    #[test]
    fn allowlisted_modules_are_importable() {
        let value = default_executor()
            .execute("import math\nresult = math.floor(math.sqrt(144))")
            .unwrap();
        assert_eq!(extract_i64(&value), 12);
    }

    #[test]
    fn denied_import_aborts_execution() {
        let err = default_executor()
            .execute("import os\nresult = os.getcwd()")
            .unwrap_err();
        assert!(matches!(err, SandboxError::ImportDenied(_)), "{err}");
    }

    #[test]
    fn relative_imports_are_denied() {
        let err = default_executor()
            .execute("from . import helpers")
            .unwrap_err();
        assert!(matches!(err, SandboxError::ImportDenied(_)), "{err}");
    }

    #[test]
    fn no_partial_result_after_denied_import() {
        // `result` is assigned before the denied import, but the failure
        // still wins: submissions cannot rely on partial execution.
        let err = default_executor()
            .execute("result = 1\nimport socket\nresult = 2")
            .unwrap_err();
        assert!(matches!(err, SandboxError::ImportDenied(_)), "{err}");
    }

    #[test]
    fn missing_name_in_allowed_module_is_a_runtime_fault() {
        // The gate admits `math`; the ImportError comes from the module
        // itself and must not be reported as a denial.
        let err = default_executor()
            .execute("from math import nosuch")
            .unwrap_err();
        match err {
            SandboxError::RuntimeFault(msg) => assert!(msg.contains("ImportError"), "{msg}"),
            other => panic!("expected RuntimeFault, got {other}"),
        }
    }

    #[test]
    fn unsafe_submission_is_never_executed() {
        let err = default_executor()
            .execute("result = eval('123 * 456')")
            .unwrap_err();
        assert!(matches!(err, SandboxError::UnsafeCodeRejected(_)), "{err}");

        let err = default_executor()
            .execute("import os\nresult = os.system('ls')")
            .unwrap_err();
        assert!(matches!(err, SandboxError::UnsafeCodeRejected(_)), "{err}");
    }

    #[test]
    fn syntax_error_is_rejected_before_any_runtime_step() {
        let err = default_executor().execute("result = (1 + ").unwrap_err();
        assert!(matches!(err, SandboxError::SyntaxInvalid(_)), "{err}");
    }

    #[test]
    fn missing_result_is_an_explicit_absence() {
        let value = default_executor().execute("x = 5").unwrap();
        assert!(value.is_absent());
    }

    #[test]
    fn runtime_exception_is_classified_with_cause() {
        let err = default_executor().execute("result = 1 / 0").unwrap_err();
        match err {
            SandboxError::RuntimeFault(msg) => assert!(msg.contains("division"), "{msg}"),
            other => panic!("expected RuntimeFault, got {other}"),
        }
    }

    #[test]
    fn non_allowlisted_builtins_are_invisible() {
        let err = default_executor()
            .execute("result = globals()")
            .unwrap_err();
        match err {
            SandboxError::RuntimeFault(msg) => assert!(msg.contains("NameError"), "{msg}"),
            other => panic!("expected RuntimeFault, got {other}"),
        }
    }

    #[test]
    fn unbounded_loop_hits_the_deadline_repeatably() {
        let sandbox = SafeExecutor::new(None, 0.3);
        for _ in 0..2 {
            let started = Instant::now();
            let err = sandbox.execute("while True: pass").unwrap_err();
            assert!(matches!(err, SandboxError::TimeoutExceeded(_)), "{err}");
            assert!(
                started.elapsed() < Duration::from_secs(2),
                "interruption overhead too large: {:?}",
                started.elapsed()
            );
        }

        // The deadline registration must not leak into later executions on
        // the same worker.
        let value = sandbox.execute("result = 2 + 2").unwrap();
        assert_eq!(extract_i64(&value), 4);
    }

    #[test]
    fn deterministic_submissions_are_idempotent() {
        let sandbox = default_executor();
        let code = "result = sum(x * x for x in range(100))";
        let first = extract_i64(&sandbox.execute(code).unwrap());
        let second = extract_i64(&sandbox.execute(code).unwrap());
        assert_eq!(first, second);
        assert_eq!(first, 328350);
    }

    #[test]
    fn execute_json_renders_the_result() {
        Python::with_gil(|py| {
            let sandbox = default_executor();
            let rendered = sandbox
                .execute_json(py, "result = [1, 2, {'three': 3}]")
                .unwrap();
            assert_eq!(rendered, r#"[1,2,{"three":3}]"#);

            let rendered = sandbox.execute_json(py, "x = 1").unwrap();
            assert_eq!(rendered, "null");
        });
    }

    #[test]
    fn non_finite_timeouts_are_clamped() {
        let sandbox = SafeExecutor::new(None, f64::INFINITY);
        let value = sandbox.execute("result = 123 * 456").unwrap();
        assert_eq!(extract_i64(&value), 56088);

        let sandbox = SafeExecutor::new(None, f64::NAN);
        assert!(sandbox.timeout <= Duration::from_secs_f64(MAX_TIMEOUT_SECS));
    }

    #[test]
    fn self_referential_result_renders_without_overflowing() {
        Python::with_gil(|py| {
            let sandbox = default_executor();
            let rendered = sandbox
                .execute_json(py, "result = []\nresult.append(result)")
                .unwrap();
            assert!(rendered.contains("..."), "{rendered}");
        });
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = SandboxConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        let restored: SandboxConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(restored.timeout_secs, config.timeout_secs);
        assert!(restored.policy.allows_module("math"));

        let sandbox = SafeExecutor::from_config(restored);
        let value = sandbox.execute("result = 123 * 456").unwrap();
        assert_eq!(extract_i64(&value), 56088);
    }
}
