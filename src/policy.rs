//! Capability policy for sandboxed submissions.
//!
//! The policy is an immutable value holding two disjoint allow-lists: the
//! top-level module names a submission may import, and the builtin operation
//! names visible inside its execution environment. It is fixed at deployment
//! time and shared read-only across executors.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Top-level modules safe to import from a submission.
const DEFAULT_MODULES: [&str; 10] = [
    "math",
    "datetime",
    "decimal",
    "fractions",
    "random",
    "re",
    "itertools",
    "collections",
    "statistics",
    "string",
];

/// Builtin functions and constants exposed to a submission.
const DEFAULT_BUILTINS: [&str; 39] = [
    "abs",
    "all",
    "any",
    "bin",
    "bool",
    "chr",
    "divmod",
    "enumerate",
    "filter",
    "float",
    "format",
    "hash",
    "hex",
    "int",
    "isinstance",
    "len",
    "list",
    "map",
    "max",
    "min",
    "next",
    "oct",
    "ord",
    "pow",
    "range",
    "repr",
    "reversed",
    "round",
    "set",
    "slice",
    "sorted",
    "str",
    "sum",
    "tuple",
    "type",
    "zip",
    "True",
    "False",
    "None",
];

/// Fixed allow-lists governing which namespaces and builtins a submission
/// may reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[pyclass]
pub struct CapabilityPolicy {
    pub allowed_modules: BTreeSet<String>,
    pub allowed_builtins: BTreeSet<String>,
}

#[pymethods]
impl CapabilityPolicy {
    #[new]
    #[pyo3(signature = (modules = None, builtins = None))]
    pub fn new(modules: Option<Vec<String>>, builtins: Option<Vec<String>>) -> Self {
        CapabilityPolicy {
            allowed_modules: modules
                .map(|m| m.into_iter().collect())
                .unwrap_or_else(|| DEFAULT_MODULES.iter().map(|s| s.to_string()).collect()),
            allowed_builtins: builtins
                .map(|b| b.into_iter().collect())
                .unwrap_or_else(|| DEFAULT_BUILTINS.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Check whether a top-level module name is admitted.
    pub fn allows_module(&self, name: &str) -> bool {
        self.allowed_modules.contains(name)
    }

    /// Check whether a builtin name is visible to submissions.
    pub fn allows_builtin(&self, name: &str) -> bool {
        self.allowed_builtins.contains(name)
    }

    /// Load a policy from its JSON representation.
    #[staticmethod]
    pub fn from_json(text: &str) -> PyResult<Self> {
        serde_json::from_str(text).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    pub fn to_json(&self) -> PyResult<String> {
        serde_json::to_string(self).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    pub fn __repr__(&self) -> String {
        format!(
            "CapabilityPolicy(modules={}, builtins={})",
            self.allowed_modules.len(),
            self.allowed_builtins.len()
        )
    }
}

impl CapabilityPolicy {
    /// Iterate the allow-listed builtin names in sorted order.
    pub fn builtin_names(&self) -> impl Iterator<Item = &str> {
        self.allowed_builtins.iter().map(|s| s.as_str())
    }

    /// Iterate the allow-listed module names in sorted order.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.allowed_modules.iter().map(|s| s.as_str())
    }
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self::new(None, None)
    }
}
