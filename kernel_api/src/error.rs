//! Kernel error types
//!
//! The rendered message of each variant is part of the compatibility surface:
//! vats and test suites match on the exact text, so variants format their
//! payloads into fixed sentences rather than free-form descriptions.

use core_types::{ERef, EndpointId, KRef, RefParseError, VatId};
use kv_store::KvError;
use thiserror::Error;

/// Errors that can occur inside the kernel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    /// Lookup of a kernel object that does not exist
    #[error("unknown kernel object {0}")]
    UnknownObject(KRef),

    /// Lookup of a kernel promise that does not exist
    #[error("unknown kernel promise {0}")]
    UnknownPromise(KRef),

    /// Message queue access on a promise that does not exist
    #[error("queue {0} not initialized")]
    QueueNotInitialized(KRef),

    /// An endpoint reference with no c-list entry
    #[error("{endpoint} has no c-list entry for {eref}")]
    UnknownEndpointRef { endpoint: EndpointId, eref: ERef },

    /// An endpoint that was never registered (or has been terminated)
    #[error("unknown endpoint {0}")]
    UnknownEndpoint(EndpointId),

    /// A GC syscall naming a reference of the wrong kind or direction
    #[error("vat {vat} issued invalid syscall {syscall} for {eref}")]
    InvalidSyscall {
        vat: VatId,
        syscall: &'static str,
        eref: ERef,
    },

    /// A retire syscall naming a reference the vat still holds strongly
    #[error("syscall.{syscall} but {eref} is still reachable")]
    StillReachable { syscall: &'static str, eref: ERef },

    /// Resolution of a promise that is already settled
    #[error("kernel promise {0} is already resolved")]
    PromiseAlreadyResolved(KRef),

    /// Resolution by an endpoint that is not the decider
    #[error("{endpoint} is not the decider for {kpid}")]
    NotDecider { endpoint: EndpointId, kpid: KRef },

    /// A syscall whose wire form could not be decoded
    #[error("malformed syscall: {0}")]
    MalformedSyscall(String),

    /// Reference text that does not parse
    #[error("invalid reference: {0}")]
    InvalidReference(#[from] RefParseError),

    /// Persisted state that does not decode
    #[error("corrupt kernel state at {key}: {reason}")]
    CorruptState { key: String, reason: String },

    /// The persistence layer failed
    #[error("storage error: {0}")]
    Storage(#[from] KvError),

    /// A thread panicked while holding the kernel lock
    #[error("kernel state lock poisoned")]
    StatePoisoned,
}

/// Coarse classification for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelErrorKind {
    /// A reference, endpoint, or queue that does not exist
    UnknownReference,
    /// An endpoint broke the reference protocol
    ProtocolViolation,
    /// Input that could not be decoded
    Malformed,
    /// Persistence or internal consistency failure
    Storage,
}

impl KernelError {
    pub fn kind(&self) -> KernelErrorKind {
        match self {
            KernelError::UnknownObject(_)
            | KernelError::UnknownPromise(_)
            | KernelError::QueueNotInitialized(_)
            | KernelError::UnknownEndpointRef { .. }
            | KernelError::UnknownEndpoint(_) => KernelErrorKind::UnknownReference,
            KernelError::InvalidSyscall { .. }
            | KernelError::StillReachable { .. }
            | KernelError::PromiseAlreadyResolved(_)
            | KernelError::NotDecider { .. } => KernelErrorKind::ProtocolViolation,
            KernelError::MalformedSyscall(_) | KernelError::InvalidReference(_) => {
                KernelErrorKind::Malformed
            }
            KernelError::CorruptState { .. }
            | KernelError::Storage(_)
            | KernelError::StatePoisoned => KernelErrorKind::Storage,
        }
    }

    /// Shorthand for state that fails to decode.
    pub fn corrupt(key: impl Into<String>, reason: impl ToString) -> Self {
        KernelError::CorruptState {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}
