//! Vat syscalls and their tagged-tuple wire form.
//!
//! On the wire a syscall is a JSON array whose first element names the
//! operation, e.g. `["send", "o-1", {...}]` or `["dropImports", ["o-2"]]`.
//! Inside the kernel it is the closed sum type [`VatSyscallObject`]. Tags the
//! kernel does not recognize still decode (to [`VatSyscallObject::Unknown`])
//! so the dispatcher can log and ignore them instead of failing the vat.

use crate::KernelError;
use core_types::{CapData, ERef, VatMessage, VatOneResolution};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

pub const SEND: &str = "send";
pub const RESOLVE: &str = "resolve";
pub const SUBSCRIBE: &str = "subscribe";
pub const DROP_IMPORTS: &str = "dropImports";
pub const RETIRE_IMPORTS: &str = "retireImports";
pub const RETIRE_EXPORTS: &str = "retireExports";
pub const ABANDON_EXPORTS: &str = "abandonExports";
pub const VATSTORE_GET: &str = "vatstoreGet";
pub const VATSTORE_GET_NEXT_KEY: &str = "vatstoreGetNextKey";
pub const VATSTORE_SET: &str = "vatstoreSet";
pub const VATSTORE_DELETE: &str = "vatstoreDelete";

/// A syscall as issued by a vat, in vat-local reference space
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VatSyscallObject {
    Send {
        target: ERef,
        message: VatMessage,
    },
    Resolve {
        resolutions: Vec<VatOneResolution>,
    },
    Subscribe {
        vpid: ERef,
    },
    DropImports(Vec<ERef>),
    RetireImports(Vec<ERef>),
    RetireExports(Vec<ERef>),
    AbandonExports(Vec<ERef>),
    VatstoreGet {
        key: String,
    },
    VatstoreGetNextKey {
        previous_key: String,
    },
    VatstoreSet {
        key: String,
        value: String,
    },
    VatstoreDelete {
        key: String,
    },
    /// Any tag this kernel does not implement
    Unknown {
        op: String,
    },
}

impl VatSyscallObject {
    /// Returns the wire tag of this syscall
    pub fn name(&self) -> &str {
        match self {
            VatSyscallObject::Send { .. } => SEND,
            VatSyscallObject::Resolve { .. } => RESOLVE,
            VatSyscallObject::Subscribe { .. } => SUBSCRIBE,
            VatSyscallObject::DropImports(_) => DROP_IMPORTS,
            VatSyscallObject::RetireImports(_) => RETIRE_IMPORTS,
            VatSyscallObject::RetireExports(_) => RETIRE_EXPORTS,
            VatSyscallObject::AbandonExports(_) => ABANDON_EXPORTS,
            VatSyscallObject::VatstoreGet { .. } => VATSTORE_GET,
            VatSyscallObject::VatstoreGetNextKey { .. } => VATSTORE_GET_NEXT_KEY,
            VatSyscallObject::VatstoreSet { .. } => VATSTORE_SET,
            VatSyscallObject::VatstoreDelete { .. } => VATSTORE_DELETE,
            VatSyscallObject::Unknown { op } => op,
        }
    }

    /// Parses a syscall from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, KernelError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| KernelError::MalformedSyscall(e.to_string()))?;
        Self::from_wire(&value)
    }

    /// Decodes the tagged-tuple wire form.
    pub fn from_wire(value: &Value) -> Result<Self, KernelError> {
        let items = value
            .as_array()
            .ok_or_else(|| KernelError::MalformedSyscall("syscall is not an array".to_string()))?;
        let op = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| KernelError::MalformedSyscall("syscall has no tag".to_string()))?;
        let args = &items[1..];

        let syscall = match op {
            SEND => {
                expect_arity(op, args, 2)?;
                VatSyscallObject::Send {
                    target: arg(op, args, 0)?,
                    message: arg(op, args, 1)?,
                }
            }
            RESOLVE => {
                expect_arity(op, args, 1)?;
                let tuples: Vec<(ERef, bool, CapData<ERef>)> = arg(op, args, 0)?;
                VatSyscallObject::Resolve {
                    resolutions: tuples
                        .into_iter()
                        .map(|(promise, rejected, data)| {
                            VatOneResolution::new(promise, rejected, data)
                        })
                        .collect(),
                }
            }
            SUBSCRIBE => {
                expect_arity(op, args, 1)?;
                VatSyscallObject::Subscribe {
                    vpid: arg(op, args, 0)?,
                }
            }
            DROP_IMPORTS => VatSyscallObject::DropImports(ref_list(op, args)?),
            RETIRE_IMPORTS => VatSyscallObject::RetireImports(ref_list(op, args)?),
            RETIRE_EXPORTS => VatSyscallObject::RetireExports(ref_list(op, args)?),
            ABANDON_EXPORTS => VatSyscallObject::AbandonExports(ref_list(op, args)?),
            VATSTORE_GET => {
                expect_arity(op, args, 1)?;
                VatSyscallObject::VatstoreGet {
                    key: arg(op, args, 0)?,
                }
            }
            VATSTORE_GET_NEXT_KEY => {
                expect_arity(op, args, 1)?;
                VatSyscallObject::VatstoreGetNextKey {
                    previous_key: arg(op, args, 0)?,
                }
            }
            VATSTORE_SET => {
                expect_arity(op, args, 2)?;
                VatSyscallObject::VatstoreSet {
                    key: arg(op, args, 0)?,
                    value: arg(op, args, 1)?,
                }
            }
            VATSTORE_DELETE => {
                expect_arity(op, args, 1)?;
                VatSyscallObject::VatstoreDelete {
                    key: arg(op, args, 0)?,
                }
            }
            other => VatSyscallObject::Unknown {
                op: other.to_string(),
            },
        };
        Ok(syscall)
    }

    /// Encodes the tagged-tuple wire form.
    pub fn to_wire(&self) -> Value {
        match self {
            VatSyscallObject::Send { target, message } => json!([SEND, target, message]),
            VatSyscallObject::Resolve { resolutions } => {
                let tuples: Vec<Value> = resolutions
                    .iter()
                    .map(|r| json!([r.promise, r.rejected, r.data]))
                    .collect();
                json!([RESOLVE, tuples])
            }
            VatSyscallObject::Subscribe { vpid } => json!([SUBSCRIBE, vpid]),
            VatSyscallObject::DropImports(refs)
            | VatSyscallObject::RetireImports(refs)
            | VatSyscallObject::RetireExports(refs)
            | VatSyscallObject::AbandonExports(refs) => json!([self.name(), refs]),
            VatSyscallObject::VatstoreGet { key } => json!([VATSTORE_GET, key]),
            VatSyscallObject::VatstoreGetNextKey { previous_key } => {
                json!([VATSTORE_GET_NEXT_KEY, previous_key])
            }
            VatSyscallObject::VatstoreSet { key, value } => json!([VATSTORE_SET, key, value]),
            VatSyscallObject::VatstoreDelete { key } => json!([VATSTORE_DELETE, key]),
            VatSyscallObject::Unknown { op } => json!([op]),
        }
    }
}

fn expect_arity(op: &str, args: &[Value], expected: usize) -> Result<(), KernelError> {
    if args.len() != expected {
        return Err(KernelError::MalformedSyscall(format!(
            "{} expects {} arguments, got {}",
            op,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn arg<T: DeserializeOwned>(op: &str, args: &[Value], index: usize) -> Result<T, KernelError> {
    let value = args.get(index).ok_or_else(|| {
        KernelError::MalformedSyscall(format!("{} is missing argument {}", op, index))
    })?;
    serde_json::from_value(value.clone())
        .map_err(|e| KernelError::MalformedSyscall(format!("{}: {}", op, e)))
}

fn ref_list(op: &str, args: &[Value]) -> Result<Vec<ERef>, KernelError> {
    expect_arity(op, args, 1)?;
    arg(op, args, 0)
}
