//! Kernel promise records

use crate::{CapData, EndpointId, KRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Resolution state of a kernel promise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromiseState {
    Unresolved,
    Fulfilled,
    Rejected,
}

impl PromiseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromiseState::Unresolved => "unresolved",
            PromiseState::Fulfilled => "fulfilled",
            PromiseState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromiseState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unresolved" => Ok(PromiseState::Unresolved),
            "fulfilled" => Ok(PromiseState::Fulfilled),
            "rejected" => Ok(PromiseState::Rejected),
            other => Err(format!("unknown promise state {}", other)),
        }
    }
}

/// Snapshot of a kernel promise
///
/// The pending-message backlog is not part of the snapshot; it is drained
/// separately through the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelPromise {
    pub state: PromiseState,
    /// Endpoint responsible for resolving the promise (unresolved only)
    pub decider: Option<EndpointId>,
    pub subscribers: BTreeSet<EndpointId>,
    /// Resolution value (resolved only)
    pub value: Option<CapData<KRef>>,
}

impl KernelPromise {
    /// A fresh promise: unresolved, no decider, no subscribers
    pub fn unresolved() -> Self {
        Self {
            state: PromiseState::Unresolved,
            decider: None,
            subscribers: BTreeSet::new(),
            value: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state != PromiseState::Unresolved
    }
}

impl Default for KernelPromise {
    fn default() -> Self {
        Self::unresolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_text_round_trip() {
        for state in [
            PromiseState::Unresolved,
            PromiseState::Fulfilled,
            PromiseState::Rejected,
        ] {
            assert_eq!(state.as_str().parse::<PromiseState>().unwrap(), state);
        }
        assert!("pending".parse::<PromiseState>().is_err());
    }

    #[test]
    fn test_fresh_promise_is_unresolved() {
        let promise = KernelPromise::unresolved();
        assert!(!promise.is_resolved());
        assert!(promise.decider.is_none());
        assert!(promise.subscribers.is_empty());
        assert!(promise.value.is_none());
    }
}
