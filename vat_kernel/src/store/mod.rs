//! Persistent kernel state
//!
//! [`KernelStore`] owns every piece of kernel-level state: identifier
//! counters, kernel objects and promises, per-endpoint c-lists with their
//! reachability flags, reference counts, and the run queue. All of it lives in
//! the wrapped [`KeyValueStore`]; the struct itself caches nothing, so a store
//! rebuilt over the same key-value data resumes exactly where the previous one
//! stopped.
//!
//! ## Key layout
//!
//! | Key | Value |
//! |---|---|
//! | `nextVatId`, `nextRemoteId`, `nextObjectId`, `nextPromiseId` | next number to allocate |
//! | `endpoints` | JSON list of registered endpoints |
//! | `ko<n>.owner` | owning endpoint |
//! | `<kref>.refCount` | reference count |
//! | `kp<n>.state`, `.decider`, `.subscribers`, `.value` | promise fields |
//! | `queue.<name>.head`, `.tail`, `.<i>` | stored FIFO queues (`run`, `kp<n>`) |
//! | `<endpoint>.c.<kref>` | `R <eref>` or `_ <eref>` (reachable flag) |
//! | `<endpoint>.c.<eref>` | kref |
//! | `e.nextObjectId.<endpoint>`, `e.nextPromiseId.<endpoint>` | ERef counters |
//! | `gc.maybeFree` | JSON list of krefs to examine on the next GC pass |
//!
//! Mutations are plain synchronous calls with no internal locking. Exclusive
//! access is expressed as `&mut KernelStore`; sharing across threads goes
//! through [`crate::SharedKernel`].

mod clist;
mod gc;
mod objects;
mod promises;
mod queue;
mod refcount;

pub use gc::GcAction;

use core_types::{EndpointId, RemoteId, VatId};
use kernel_api::KernelError;
use kv_store::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

const NEXT_VAT_ID: &str = "nextVatId";
const NEXT_REMOTE_ID: &str = "nextRemoteId";
const NEXT_OBJECT_ID: &str = "nextObjectId";
const NEXT_PROMISE_ID: &str = "nextPromiseId";
const ENDPOINTS: &str = "endpoints";
const RUN_QUEUE: &str = "run";

const COUNTERS: [&str; 4] = [NEXT_VAT_ID, NEXT_REMOTE_ID, NEXT_OBJECT_ID, NEXT_PROMISE_ID];

/// The kernel's object graph over a key-value store
pub struct KernelStore {
    kv: Box<dyn KeyValueStore>,
}

impl KernelStore {
    /// Wraps a key-value store, initializing any counters it lacks.
    ///
    /// Existing state is preserved, which is how a kernel restarts.
    pub fn new(kv: Box<dyn KeyValueStore>) -> Self {
        let mut store = Self { kv };
        store.initialize();
        store
    }

    fn initialize(&mut self) {
        for key in COUNTERS {
            if self.kv.get(key).is_none() {
                self.kv.set(key, "1");
            }
        }
        if self.kv.get(ENDPOINTS).is_none() {
            self.kv.set(ENDPOINTS, "[]");
        }
        if !self.queue_exists(RUN_QUEUE) {
            self.queue_init(RUN_QUEUE);
        }
    }

    /// Clears all kernel state and restarts every counter at 1.
    pub fn reset(&mut self) {
        let mut keys = Vec::new();
        let mut cursor = String::new();
        while let Some(key) = self.kv.get_next_key(&cursor) {
            cursor.clone_from(&key);
            keys.push(key);
        }
        for key in &keys {
            self.kv.delete(key);
        }
        self.initialize();
        log::debug!("kernel store reset ({} keys removed)", keys.len());
    }

    /// Returns the underlying key-value store
    pub fn kv(&self) -> &dyn KeyValueStore {
        self.kv.as_ref()
    }

    pub(crate) fn kv_mut(&mut self) -> &mut dyn KeyValueStore {
        self.kv.as_mut()
    }

    /// Releases the underlying key-value store (for restart).
    pub fn into_kv(self) -> Box<dyn KeyValueStore> {
        self.kv
    }

    // ========================================================================
    // Identifier allocation
    // ========================================================================

    /// Returns the next unused vat ID
    pub fn get_next_vat_id(&mut self) -> Result<VatId, KernelError> {
        self.bump_counter(NEXT_VAT_ID).map(VatId::new)
    }

    /// Returns the next unused remote ID
    pub fn get_next_remote_id(&mut self) -> Result<RemoteId, KernelError> {
        self.bump_counter(NEXT_REMOTE_ID).map(RemoteId::new)
    }

    pub(crate) fn bump_counter(&mut self, key: &str) -> Result<u64, KernelError> {
        let next = self.read_number(key)?;
        self.kv.set(key, &(next + 1).to_string());
        Ok(next)
    }

    pub(crate) fn read_number(&self, key: &str) -> Result<u64, KernelError> {
        let text = self.kv.get_required(key)?;
        text.parse().map_err(|e| KernelError::corrupt(key, e))
    }

    // ========================================================================
    // Endpoint registry
    // ========================================================================

    /// Registers a new endpoint's c-list namespace.
    pub fn init_endpoint(&mut self, endpoint: EndpointId) -> Result<(), KernelError> {
        let mut endpoints = self.endpoint_set()?;
        endpoints.insert(endpoint);
        self.set_json(ENDPOINTS, &endpoints)?;
        for key in [object_counter_key(endpoint), promise_counter_key(endpoint)] {
            if self.kv.get(&key).is_none() {
                self.kv.set(&key, "1");
            }
        }
        Ok(())
    }

    /// Removes an endpoint from the registry along with its ERef counters.
    ///
    /// C-list entries are not touched; callers forget them first.
    pub fn forget_endpoint(&mut self, endpoint: EndpointId) -> Result<(), KernelError> {
        let mut endpoints = self.endpoint_set()?;
        endpoints.remove(&endpoint);
        self.set_json(ENDPOINTS, &endpoints)?;
        self.kv.delete(&object_counter_key(endpoint));
        self.kv.delete(&promise_counter_key(endpoint));
        Ok(())
    }

    /// Returns whether the endpoint is registered
    pub fn is_endpoint(&self, endpoint: EndpointId) -> Result<bool, KernelError> {
        Ok(self.endpoint_set()?.contains(&endpoint))
    }

    /// Returns every registered endpoint in ID order
    pub fn endpoint_ids(&self) -> Result<Vec<EndpointId>, KernelError> {
        Ok(self.endpoint_set()?.into_iter().collect())
    }

    fn endpoint_set(&self) -> Result<BTreeSet<EndpointId>, KernelError> {
        Ok(self.get_json(ENDPOINTS)?.unwrap_or_default())
    }

    // ========================================================================
    // Encoding helpers
    // ========================================================================

    pub(crate) fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, KernelError> {
        self.kv
            .get(key)
            .map(|text| serde_json::from_str(&text).map_err(|e| KernelError::corrupt(key, e)))
            .transpose()
    }

    pub(crate) fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), KernelError> {
        let text = serde_json::to_string(value).map_err(|e| KernelError::corrupt(key, e))?;
        self.kv.set(key, &text);
        Ok(())
    }

    /// Reads and parses a text-encoded value
    pub(crate) fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, KernelError>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        self.kv
            .get(key)
            .map(|text| text.parse().map_err(|e| KernelError::corrupt(key, e)))
            .transpose()
    }

    /// Lists all keys beginning with `prefix`, in order.
    pub(crate) fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut cursor = prefix.to_string();
        while let Some(key) = self.kv.get_next_key(&cursor) {
            if !key.starts_with(prefix) {
                break;
            }
            cursor.clone_from(&key);
            keys.push(key);
        }
        keys
    }
}

fn object_counter_key(endpoint: EndpointId) -> String {
    format!("e.nextObjectId.{}", endpoint)
}

fn promise_counter_key(endpoint: EndpointId) -> String {
    format!("e.nextPromiseId.{}", endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::memory_store;
    use core_types::{KRef, RunQueueItem};

    #[test]
    fn test_vat_ids_are_monotonic() {
        let mut store = memory_store();
        assert_eq!(store.get_next_vat_id().unwrap().to_string(), "v1");
        assert_eq!(store.get_next_vat_id().unwrap().to_string(), "v2");
        assert_eq!(store.get_next_vat_id().unwrap().to_string(), "v3");
    }

    #[test]
    fn test_remote_ids_independent_of_vat_ids() {
        let mut store = memory_store();
        store.get_next_vat_id().unwrap();
        store.get_next_vat_id().unwrap();
        assert_eq!(store.get_next_remote_id().unwrap().to_string(), "r1");
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut store = memory_store();
        store.get_next_vat_id().unwrap();
        store.get_next_vat_id().unwrap();
        let ko = store
            .init_kernel_object(EndpointId::Vat(VatId::new(1)))
            .unwrap();
        let (kp, _) = store.init_kernel_promise().unwrap();
        assert_eq!(ko.to_string(), "ko1");
        assert_eq!(kp.to_string(), "kp1");
        store
            .enqueue_run(&RunQueueItem::Notify {
                endpoint: EndpointId::Vat(VatId::new(1)),
                kpid: kp,
            })
            .unwrap();

        store.reset();

        assert_eq!(store.get_next_vat_id().unwrap().to_string(), "v1");
        assert_eq!(store.run_queue_length().unwrap(), 0);
        assert_eq!(store.dequeue_run().unwrap(), None);
        assert_eq!(
            store.get_owner(&KRef::object(1)),
            Err(KernelError::UnknownObject(KRef::object(1)))
        );
        assert_eq!(
            store.init_kernel_object(EndpointId::Vat(VatId::new(1))).unwrap(),
            KRef::object(1)
        );
    }

    #[test]
    fn test_restart_resumes_counters() {
        let mut store = memory_store();
        store.get_next_vat_id().unwrap();
        store.get_next_vat_id().unwrap();

        let mut restarted = KernelStore::new(store.into_kv());
        assert_eq!(restarted.get_next_vat_id().unwrap().to_string(), "v3");
    }

    #[test]
    fn test_endpoint_registry() {
        let mut store = memory_store();
        let v1 = EndpointId::Vat(VatId::new(1));
        let r1 = EndpointId::Remote(RemoteId::new(1));
        store.init_endpoint(v1).unwrap();
        store.init_endpoint(r1).unwrap();
        store.init_endpoint(v1).unwrap();

        assert_eq!(store.endpoint_ids().unwrap(), vec![v1, r1]);
        assert!(store.is_endpoint(v1).unwrap());

        store.forget_endpoint(v1).unwrap();
        assert_eq!(store.endpoint_ids().unwrap(), vec![r1]);
        assert!(!store.is_endpoint(v1).unwrap());
    }

    #[test]
    fn test_corrupt_counter_reported() {
        let mut store = memory_store();
        store.kv_mut().set("nextVatId", "many");
        assert!(matches!(
            store.get_next_vat_id(),
            Err(KernelError::CorruptState { .. })
        ));
    }
}
