//! Kernel configuration

use serde::{Deserialize, Serialize};

/// Kernel configuration
///
/// Every field has a default, so a host may supply only what it changes:
///
/// ```
/// use kernel_api::KernelConfig;
///
/// let config = KernelConfig::from_json_str(r#"{ "max_run_steps": 100 }"#).unwrap();
/// assert_eq!(config.max_run_steps, 100);
/// assert!(config.collect_garbage);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    /// Clear all persisted kernel state on start
    pub reset_storage: bool,
    /// Record every syscall in the per-vat audit log
    pub audit_syscalls: bool,
    /// Run a garbage collection pass after each run-queue item
    pub collect_garbage: bool,
    /// Maximum run-queue items processed by one `run` call (0 = unlimited)
    pub max_run_steps: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            reset_storage: false,
            audit_syscalls: true,
            collect_garbage: true,
            max_run_steps: 0,
        }
    }
}

impl KernelConfig {
    /// Parses a configuration document.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
