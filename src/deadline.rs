//! Wall-clock deadline enforcement for in-flight submissions.
//!
//! The tracer is registered through `sys.settrace` on the executing thread
//! and checks a monotonic deadline on every call/line event, raising
//! `TimeoutError` into the submission once the budget is spent. Registration
//! is scoped: [`DeadlineScope`] restores the thread's previous hook on drop,
//! on every exit path, so a pending deadline can never leak into later work
//! on the same thread and a host-installed hook is never discarded.

use pyo3::exceptions::PyTimeoutError;
use pyo3::prelude::*;
use pyo3::types::PyModule;
use std::time::{Duration, Instant};
use tracing::warn;

#[pyclass]
pub(crate) struct DeadlineTracer {
    deadline: Instant,
    budget: Duration,
}

#[pymethods]
impl DeadlineTracer {
    /// Trace callback: invoked by the interpreter on call and line events.
    /// Returns itself so frames stay traced line-by-line.
    #[pyo3(signature = (_frame, _event, _arg = None))]
    fn __call__<'py>(
        slf: PyRef<'py, Self>,
        _frame: Bound<'py, PyAny>,
        _event: &str,
        _arg: Option<Bound<'py, PyAny>>,
    ) -> PyResult<PyRef<'py, Self>> {
        if Instant::now() >= slf.deadline {
            warn!(
                "⏰ [Sandbox] Deadline of {:?} elapsed, interrupting submission",
                slf.budget
            );
            return Err(PyTimeoutError::new_err(format!(
                "code execution exceeded {}ms",
                slf.budget.as_millis()
            )));
        }
        Ok(slf)
    }
}

/// Scoped acquisition of the thread's trace hook. The hook is per-thread, so
/// concurrent submissions on independent worker threads each own their own
/// registration.
pub(crate) struct DeadlineScope<'py> {
    sys: Bound<'py, PyModule>,
    previous: Py<PyAny>,
}

impl<'py> DeadlineScope<'py> {
    pub fn install(py: Python<'py>, budget: Duration) -> PyResult<Self> {
        let tracer = Bound::new(
            py,
            DeadlineTracer {
                deadline: Instant::now() + budget,
                budget,
            },
        )?;
        let sys = py.import_bound("sys")?;
        // The host may have its own hook (coverage, debugger); it is put
        // back when the scope ends.
        let previous = sys.call_method0("gettrace")?.unbind();
        sys.call_method1("settrace", (tracer,))?;
        Ok(DeadlineScope { sys, previous })
    }
}

impl Drop for DeadlineScope<'_> {
    fn drop(&mut self) {
        let py = self.sys.py();
        if self
            .sys
            .call_method1("settrace", (self.previous.clone_ref(py),))
            .is_err()
        {
            warn!("⏰ [Sandbox] Failed to restore the previous trace hook");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyo3::types::PyDict;

    #[test]
    fn scope_clears_the_trace_hook_on_drop() {
        Python::with_gil(|py| {
            {
                let _scope = DeadlineScope::install(py, Duration::from_secs(1)).unwrap();
                let sys = py.import_bound("sys").unwrap();
                let hook = sys.call_method0("gettrace").unwrap();
                assert!(!hook.is_none());
            }
            let sys = py.import_bound("sys").unwrap();
            let hook = sys.call_method0("gettrace").unwrap();
            assert!(hook.is_none());
        });
    }

    #[test]
    fn scope_restores_a_pre_existing_host_hook() {
        Python::with_gil(|py| {
            let sys = py.import_bound("sys").unwrap();
            let host_hook = py
                .eval_bound("lambda frame, event, arg: None", None, None)
                .unwrap();
            sys.call_method1("settrace", (host_hook.clone(),)).unwrap();

            {
                let _scope = DeadlineScope::install(py, Duration::from_secs(1)).unwrap();
            }

            let restored = sys.call_method0("gettrace").unwrap();
            assert!(restored.is(&host_hook), "pre-existing hook was replaced");
            sys.call_method1("settrace", (py.None(),)).unwrap();
        });
    }

    #[test]
    fn expired_tracer_interrupts_traced_code() {
        Python::with_gil(|py| {
            let outcome = {
                let _scope = DeadlineScope::install(py, Duration::from_millis(50)).unwrap();
                let globals = PyDict::new_bound(py);
                py.run_bound("while True: pass", Some(&globals), None)
            };
            let err = outcome.unwrap_err();
            assert!(err.is_instance_of::<PyTimeoutError>(py));
        });
    }
}
