//! # Core Types
//!
//! This crate defines the vocabulary shared by every layer of the kernel.
//!
//! ## Philosophy
//!
//! - **Typed references**: kernel references and endpoint references are
//!   distinct types and cannot be confused.
//! - **Text is the canonical form**: every identifier renders (and serializes)
//!   as its conventional text (`v1`, `ko3`, `o-2`), which is what vats send and
//!   what the store persists.
//! - **No ambient state**: allocation of identifiers belongs to the kernel
//!   store, not to these types.
//!
//! ## Key Types
//!
//! - [`VatId`], [`RemoteId`], [`EndpointId`]: endpoint identifiers
//! - [`KRef`]: kernel-global object/promise reference
//! - [`ERef`]: endpoint-local reference with an export/import direction
//! - [`CapData`], [`Message`], [`Resolution`]: payloads carrying references
//! - [`KernelPromise`]: snapshot of a kernel promise
//! - [`RunQueueItem`]: unit of work for the run loop

pub mod ids;
pub mod message;
pub mod promise;
pub mod refs;

pub use ids::{EndpointId, RemoteId, VatId};
pub use message::{
    CapData, KernelMessage, KernelResolution, Message, Resolution, RunQueueItem, VatMessage,
    VatOneResolution,
};
pub use promise::{KernelPromise, PromiseState};
pub use refs::{Direction, ERef, KRef, RefKind, RefParseError};
