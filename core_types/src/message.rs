//! Message and resolution payloads
//!
//! Payloads are generic over the reference type so the same shapes are used on
//! both sides of the c-list: `Message<ERef>` as a vat issues it and
//! `Message<KRef>` once the kernel has translated it.

use crate::{ERef, EndpointId, KRef};
use serde::{Deserialize, Serialize};

/// Serialized data plus the references it mentions
///
/// `body` is opaque to the kernel. Each `$n` marker inside it refers to
/// `slots[n]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapData<R> {
    pub body: String,
    pub slots: Vec<R>,
}

impl<R> CapData<R> {
    pub fn new(body: impl Into<String>, slots: Vec<R>) -> Self {
        Self {
            body: body.into(),
            slots,
        }
    }

    /// Data with no references
    pub fn plain(body: impl Into<String>) -> Self {
        Self::new(body, Vec::new())
    }

    /// An error record in the `#error` encoding, used when the kernel itself
    /// rejects a promise.
    pub fn error(message: &str) -> Self {
        let record = serde_json::json!({ "#error": message, "name": "Error" });
        Self::plain(format!("#{}", record))
    }

    /// Returns the sole reference when the body is exactly a reference to
    /// slot 0 (a presence), otherwise `None`.
    pub fn single_slot(&self) -> Option<&R> {
        match self.slots.as_slice() {
            [only] if self.body.starts_with("#\"$0") => Some(only),
            _ => None,
        }
    }

    /// Maps every slot through a fallible translation.
    pub fn map_slots<S, E, F>(&self, mut f: F) -> Result<CapData<S>, E>
    where
        F: FnMut(&R) -> Result<S, E>,
    {
        let slots = self.slots.iter().map(&mut f).collect::<Result<_, _>>()?;
        Ok(CapData {
            body: self.body.clone(),
            slots,
        })
    }
}

/// A method invocation and the promise for its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message<R> {
    pub methargs: CapData<R>,
    pub result: Option<R>,
}

impl<R> Message<R> {
    pub fn new(methargs: CapData<R>, result: Option<R>) -> Self {
        Self { methargs, result }
    }

    /// Maps the argument slots and the result reference.
    pub fn map_refs<S, E, F>(&self, mut f: F) -> Result<Message<S>, E>
    where
        F: FnMut(&R) -> Result<S, E>,
    {
        let methargs = self.methargs.map_slots(&mut f)?;
        let result = self.result.as_ref().map(&mut f).transpose()?;
        Ok(Message { methargs, result })
    }
}

/// One promise resolution: the promise, whether it was rejected, and its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution<R> {
    pub promise: R,
    pub rejected: bool,
    pub data: CapData<R>,
}

impl<R> Resolution<R> {
    pub fn new(promise: R, rejected: bool, data: CapData<R>) -> Self {
        Self {
            promise,
            rejected,
            data,
        }
    }
}

pub type VatMessage = Message<ERef>;
pub type KernelMessage = Message<KRef>;
pub type VatOneResolution = Resolution<ERef>;
pub type KernelResolution = Resolution<KRef>;

/// Pending cross-endpoint work consumed by the run loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunQueueItem {
    Send {
        target: KRef,
        message: KernelMessage,
    },
    Notify {
        endpoint: EndpointId,
        kpid: KRef,
    },
}
