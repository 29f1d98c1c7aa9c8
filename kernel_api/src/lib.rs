//! # Kernel API
//!
//! This crate defines the contract between vats and the kernel.
//!
//! ## Philosophy
//!
//! The kernel never trusts a vat:
//! - Syscalls arrive as data and are decoded into a closed sum type
//! - Every reference a vat names is checked against its own c-list
//! - Protocol violations are errors with stable, exact message text
//!
//! ## Contents
//!
//! - [`VatSyscallObject`]: the syscalls a vat may issue, and their wire form
//! - [`KernelError`]: every failure the kernel reports, with [`KernelErrorKind`]
//! - [`KernelConfig`]: host-supplied kernel settings

pub mod config;
pub mod error;
pub mod syscalls;

pub use config::KernelConfig;
pub use error::{KernelError, KernelErrorKind};
pub use syscalls::VatSyscallObject;
