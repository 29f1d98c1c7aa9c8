//! Test utilities
//!
//! Fixtures and builders shared by unit tests in this crate and by the
//! integration suites.

use crate::kernel_queue::KernelQueue;
use crate::store::KernelStore;
use crate::translate;
use crate::Kernel;
use core_types::{
    CapData, ERef, EndpointId, KRef, KernelMessage, KernelResolution, Message, VatId, VatMessage,
};
use kernel_api::{KernelConfig, KernelError};
use kv_store::{JournaledKvStore, MemoryKvStore};

/// An empty store over memory
pub fn memory_store() -> KernelStore {
    KernelStore::new(Box::new(MemoryKvStore::new()))
}

/// A store with vats `v1..=vn` registered
pub fn store_with_vats(count: u64) -> KernelStore {
    let mut store = memory_store();
    for _ in 0..count {
        let vat = store
            .get_next_vat_id()
            .expect("fresh store allocates vat IDs");
        store
            .init_endpoint(EndpointId::Vat(vat))
            .expect("fresh store registers endpoints");
    }
    store
}

/// A kernel over memory with the default configuration
pub fn memory_kernel() -> Kernel {
    Kernel::new(Box::new(MemoryKvStore::new()), KernelConfig::default())
        .expect("kernel over an empty store")
}

/// A kernel over a journaled store, so failed syscalls roll back
pub fn journaled_kernel() -> Kernel {
    Kernel::new(Box::new(JournaledKvStore::new()), KernelConfig::default())
        .expect("kernel over an empty store")
}

/// Parses an endpoint reference
pub fn eref(text: &str) -> ERef {
    text.parse().expect("valid eref")
}

pub fn vat_message(body: &str, slots: Vec<ERef>, result: Option<ERef>) -> VatMessage {
    Message::new(CapData::new(body, slots), result)
}

pub fn kernel_message(body: &str, slots: Vec<KRef>, result: Option<KRef>) -> KernelMessage {
    Message::new(CapData::new(body, slots), result)
}

/// Has `owner` export `export` and hands it to `importer`, returning the
/// importer's ERef for it.
pub fn export_to(kernel: &mut Kernel, owner: VatId, export: &str, importer: VatId) -> ERef {
    let kref = translate::vat_to_kernel(&mut kernel.store, EndpointId::Vat(owner), &eref(export))
        .expect("export a fresh object");
    translate::kernel_to_vat(&mut kernel.store, EndpointId::Vat(importer), &kref)
        .expect("import into a live vat")
}

/// One call observed by [`RecordingQueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCall {
    Send {
        target: KRef,
        message: KernelMessage,
    },
    Resolve {
        endpoint: EndpointId,
        resolutions: Vec<KernelResolution>,
    },
    Notify {
        endpoint: EndpointId,
        kpid: KRef,
    },
}

/// A [`KernelQueue`] that records calls and does nothing else
#[derive(Debug, Default)]
pub struct RecordingQueue {
    calls: Vec<QueueCall>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self { calls: Vec::new() }
    }

    pub fn calls(&self) -> &[QueueCall] {
        &self.calls
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl KernelQueue for RecordingQueue {
    fn enqueue_send(
        &mut self,
        _store: &mut KernelStore,
        target: KRef,
        message: KernelMessage,
    ) -> Result<(), KernelError> {
        self.calls.push(QueueCall::Send { target, message });
        Ok(())
    }

    fn resolve_promises(
        &mut self,
        _store: &mut KernelStore,
        endpoint: EndpointId,
        resolutions: Vec<KernelResolution>,
    ) -> Result<(), KernelError> {
        self.calls.push(QueueCall::Resolve {
            endpoint,
            resolutions,
        });
        Ok(())
    }

    fn enqueue_notify(
        &mut self,
        _store: &mut KernelStore,
        endpoint: EndpointId,
        kpid: KRef,
    ) -> Result<(), KernelError> {
        self.calls.push(QueueCall::Notify { endpoint, kpid });
        Ok(())
    }
}
