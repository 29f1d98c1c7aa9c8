//! # Kernel Contract Tests
//!
//! This crate provides "golden" tests for the kernel's external contracts so
//! they don't drift accidentally over time.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: Wire shapes and error texts are written out literally
//! - **Testability first**: Contract tests fail when interfaces change
//! - **Mechanism not policy**: Define what must be stable, not how to use it
//!
//! ## Structure
//!
//! - [`syscalls`]: the tagged-tuple wire form of every vat syscall
//! - [`errors`]: the exact message text of every protocol error
//! - [`persisted_state`]: the JSON shape of persisted run-queue items and deliveries

pub mod errors;
pub mod persisted_state;
pub mod syscalls;

/// Common test helpers for contract validation
pub mod test_helpers {
    use core_types::ERef;
    use kernel_api::VatSyscallObject;
    use serde_json::Value;

    pub fn eref(text: &str) -> ERef {
        text.parse().expect("valid eref")
    }

    /// Verifies a syscall decodes from `wire` and encodes back to it
    pub fn verify_wire_contract(wire: Value, expected: &VatSyscallObject) {
        let decoded = VatSyscallObject::from_wire(&wire)
            .unwrap_or_else(|e| panic!("wire form {} no longer decodes: {}", wire, e));
        assert_eq!(
            &decoded, expected,
            "Decoded syscall changed for wire form {}",
            wire
        );
        assert_eq!(
            decoded.to_wire(),
            wire,
            "Encoded wire form changed for {}",
            expected.name()
        );
    }

    /// Verifies an error renders exactly the expected text
    pub fn verify_error_text(error: impl std::fmt::Display, expected: &str) {
        assert_eq!(
            error.to_string(),
            expected,
            "Error text changed: expected '{}'",
            expected
        );
    }
}
