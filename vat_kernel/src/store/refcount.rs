//! Reference counts
//!
//! Counts are kept uniformly for objects and promises. Reaching zero is a
//! signal, not a deletion: the kref is recorded for the next GC pass and the
//! caller decides what happens to it.

use super::objects::owner_key;
use super::promises::state_key;
use super::KernelStore;
use core_types::{KRef, RefKind};
use kernel_api::KernelError;

fn ref_count_key(kref: &KRef) -> String {
    format!("{}.refCount", kref)
}

fn unknown(kref: &KRef) -> KernelError {
    match kref.kind() {
        RefKind::Object => KernelError::UnknownObject(*kref),
        RefKind::Promise => KernelError::UnknownPromise(*kref),
    }
}

impl KernelStore {
    /// Returns whether the object or promise exists
    pub fn ref_exists(&self, kref: &KRef) -> bool {
        let key = match kref.kind() {
            RefKind::Object => owner_key(kref),
            RefKind::Promise => state_key(kref),
        };
        self.kv.get(&key).is_some()
    }

    /// Returns the count for `kref`. Fails if the object or promise is gone.
    pub fn get_ref_count(&self, kref: &KRef) -> Result<u32, KernelError> {
        if !self.ref_exists(kref) {
            return Err(unknown(kref));
        }
        Ok(self
            .get_parsed(&ref_count_key(kref))?
            .unwrap_or(0))
    }

    /// Adds one holder of `kref` and returns the new count.
    pub fn inc_ref_count(&mut self, kref: &KRef) -> Result<u32, KernelError> {
        let count = self.get_ref_count(kref)? + 1;
        self.set_ref_count(kref, count);
        Ok(count)
    }

    /// Releases one holder of `kref` and returns the new count. At one or
    /// below the kref is queued for the next collection pass.
    pub fn dec_ref_count(&mut self, kref: &KRef) -> Result<u32, KernelError> {
        let current = self.get_ref_count(kref)?;
        let count = current
            .checked_sub(1)
            .ok_or_else(|| KernelError::corrupt(ref_count_key(kref), "reference count underflow"))?;
        self.set_ref_count(kref, count);
        if count <= 1 {
            self.add_maybe_free(kref)?;
        }
        Ok(count)
    }

    pub(super) fn set_ref_count(&mut self, kref: &KRef, count: u32) {
        self.kv.set(&ref_count_key(kref), &count.to_string());
    }

    pub(super) fn delete_ref_count(&mut self, kref: &KRef) {
        self.kv.delete(&ref_count_key(kref));
    }
}
