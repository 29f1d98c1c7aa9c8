//! # Vat Kernel
//!
//! This crate implements the kernel of an object-capability system: the
//! trusted broker through which isolated vats exchange messages and
//! promises.
//!
//! ## Structure
//!
//! - [`KernelStore`]: all kernel state (objects, promises, c-lists, reference
//!   counts, the run queue) over a [`KeyValueStore`]
//! - [`VatSyscall`]: per-vat syscall handler and reference-protocol checks
//! - [`KernelQueue`]: where syscalls deposit cross-endpoint work
//! - [`Kernel`]: the run loop tying them together
//! - [`SharedKernel`]: a thread-safe handle serializing every call
//!
//! ## Philosophy
//!
//! **A vat names nothing the kernel did not give it.**
//!
//! Vats only ever see endpoint-local references. Every reference crossing the
//! boundary goes through the vat's c-list, so a vat cannot forge access to
//! an object it was never handed, and a misbehaving vat gets an error rather
//! than a corrupted kernel.
//!
//! There is exactly one writer at a time. Store operations take
//! `&mut KernelStore`; concurrent hosts go through [`SharedKernel`].

pub mod delivery;
pub mod kernel_queue;
pub mod shared;
pub mod store;
pub mod syscall_audit;
pub mod test_utils;
pub mod translate;
pub mod vat_syscall;

pub use delivery::VatDelivery;
pub use kernel_queue::{KernelQueue, RunQueueDispatch};
pub use shared::SharedKernel;
pub use store::{GcAction, KernelStore};
pub use syscall_audit::{SyscallAuditLog, SyscallEvent};
pub use vat_syscall::VatSyscall;

use core_types::{
    CapData, ERef, EndpointId, KRef, KernelMessage, PromiseState, RefKind, RemoteId, Resolution,
    RunQueueItem, VatId,
};
use kernel_api::{KernelConfig, KernelError, VatSyscallObject};
use kernel_queue::{release, release_message, settle_promise};
use kv_store::KeyValueStore;
use std::collections::{BTreeMap, VecDeque};

type Outbox = Vec<(EndpointId, VatDelivery)>;

/// The kernel run loop
///
/// Syscalls from vats go in through [`Kernel::handle_syscall`]; deliveries
/// come out through [`Kernel::take_deliveries`] after [`Kernel::run`] has
/// drained the run queue.
pub struct Kernel {
    /// All persistent state
    store: KernelStore,
    /// Queue implementation handed to every syscall
    queue: RunQueueDispatch,
    /// One syscall handler per live vat
    vats: BTreeMap<VatId, VatSyscall>,
    /// Deliveries waiting to be collected, per endpoint
    deliveries: BTreeMap<EndpointId, VecDeque<VatDelivery>>,
    config: KernelConfig,
}

impl Kernel {
    /// Starts a kernel over `kv`.
    ///
    /// Vats registered in existing state are brought back, which is how a
    /// kernel restarts. `config.reset_storage` discards that state instead.
    /// Counter setup and the reset commit together before the kernel is
    /// returned.
    pub fn new(mut kv: Box<dyn KeyValueStore>, config: KernelConfig) -> Result<Self, KernelError> {
        kv.begin_transaction()?;
        let mut store = KernelStore::new(kv);
        if config.reset_storage {
            store.reset();
        }
        let endpoints = store.endpoint_ids();
        let vats = finish_transaction(&mut store, endpoints)?
            .into_iter()
            .filter_map(|endpoint| endpoint.as_vat())
            .map(|vat| (vat, VatSyscall::new(vat, config.audit_syscalls)))
            .collect::<BTreeMap<_, _>>();
        if !vats.is_empty() {
            log::info!("kernel resumed with {} vats", vats.len());
        }
        Ok(Self {
            store,
            queue: RunQueueDispatch::new(),
            vats,
            deliveries: BTreeMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Returns the kernel store (read-only)
    pub fn store(&self) -> &KernelStore {
        &self.store
    }

    /// Stops the kernel, releasing its key-value store.
    pub fn into_kv(self) -> Box<dyn KeyValueStore> {
        self.store.into_kv()
    }

    /// Returns the IDs of all live vats
    pub fn vat_ids(&self) -> Vec<VatId> {
        self.vats.keys().copied().collect()
    }

    /// Returns a vat's syscall audit log
    pub fn syscall_audit(&self, vat_id: VatId) -> Option<&SyscallAuditLog> {
        self.vats.get(&vat_id).map(VatSyscall::audit_log)
    }

    // ========================================================================
    // Endpoints
    // ========================================================================

    /// Registers a new vat.
    pub fn launch_vat(&mut self) -> Result<VatId, KernelError> {
        self.store.kv_mut().begin_transaction()?;
        let result = launch_in_store(&mut self.store);
        let vat_id = finish_transaction(&mut self.store, result)?;
        self.vats
            .insert(vat_id, VatSyscall::new(vat_id, self.config.audit_syscalls));
        log::info!("launched vat {}", vat_id);
        Ok(vat_id)
    }

    /// Registers a new remote connection.
    pub fn connect_remote(&mut self) -> Result<RemoteId, KernelError> {
        self.store.kv_mut().begin_transaction()?;
        let result = connect_in_store(&mut self.store);
        let remote_id = finish_transaction(&mut self.store, result)?;
        log::info!("connected remote {}", remote_id);
        Ok(remote_id)
    }

    /// Terminates a vat.
    ///
    /// Promises the vat decides are rejected with `reason`, its c-list is
    /// emptied and its pending deliveries are discarded. Later sends to its
    /// objects reject their result promises.
    pub fn terminate_vat(&mut self, vat_id: VatId, reason: &str) -> Result<(), KernelError> {
        let endpoint = EndpointId::Vat(vat_id);
        if !self.vats.contains_key(&vat_id) {
            return Err(KernelError::UnknownEndpoint(endpoint));
        }
        self.store.kv_mut().begin_transaction()?;
        let result = terminate_in_store(&mut self.store, endpoint, reason);
        finish_transaction(&mut self.store, result)?;

        self.vats.remove(&vat_id);
        self.deliveries.remove(&endpoint);
        log::info!("terminated vat {}: {}", vat_id, reason);
        if self.config.collect_garbage {
            self.collect_garbage()?;
        }
        Ok(())
    }

    // ========================================================================
    // Syscalls
    // ========================================================================

    /// Applies one syscall from `vat_id` as a single transaction.
    pub fn handle_syscall(
        &mut self,
        vat_id: VatId,
        vso: VatSyscallObject,
    ) -> Result<(), KernelError> {
        let Kernel {
            store, queue, vats, ..
        } = self;
        let vat = vats
            .get_mut(&vat_id)
            .ok_or(KernelError::UnknownEndpoint(EndpointId::Vat(vat_id)))?;
        store.kv_mut().begin_transaction()?;
        let result = vat.handle_syscall(store, queue, vso);
        finish_transaction(store, result)
    }

    /// Decodes a syscall from its JSON wire form and applies it.
    pub fn handle_wire_syscall(&mut self, vat_id: VatId, text: &str) -> Result<(), KernelError> {
        let vso = VatSyscallObject::from_json_str(text)?;
        self.handle_syscall(vat_id, vso)
    }

    // ========================================================================
    // Run loop
    // ========================================================================

    /// Processes one run-queue item. Returns `false` when the queue was empty.
    pub fn run_once(&mut self) -> Result<bool, KernelError> {
        self.store.kv_mut().begin_transaction()?;
        let result = self.step();
        let Some(outbox) = finish_transaction(&mut self.store, result)? else {
            return Ok(false);
        };
        for (endpoint, delivery) in outbox {
            self.deliveries
                .entry(endpoint)
                .or_default()
                .push_back(delivery);
        }
        if self.config.collect_garbage {
            self.collect_garbage()?;
        }
        Ok(true)
    }

    /// Processes run-queue items until the queue is empty or
    /// `max_run_steps` is reached. Returns the number processed.
    pub fn run(&mut self) -> Result<usize, KernelError> {
        let limit = self.config.max_run_steps;
        let mut steps = 0;
        while limit == 0 || steps < limit {
            if !self.run_once()? {
                break;
            }
            steps += 1;
        }
        Ok(steps)
    }

    /// Removes and returns everything queued for `endpoint`.
    pub fn take_deliveries(&mut self, endpoint: EndpointId) -> Vec<VatDelivery> {
        self.deliveries
            .remove(&endpoint)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Runs a collection pass and tells owners which exports to drop.
    pub fn collect_garbage(&mut self) -> Result<Vec<GcAction>, KernelError> {
        self.store.kv_mut().begin_transaction()?;
        let result = collect_in_store(&mut self.store);
        let (actions, drops) = finish_transaction(&mut self.store, result)?;
        for (owner, erefs) in drops {
            self.deliveries
                .entry(owner)
                .or_default()
                .push_back(VatDelivery::DropExports { erefs });
        }
        Ok(actions)
    }

    fn step(&mut self) -> Result<Option<Outbox>, KernelError> {
        let Some(item) = self.store.dequeue_run()? else {
            return Ok(None);
        };
        let mut outbox = Vec::new();
        match item {
            RunQueueItem::Send { target, message } => {
                deliver_send(&mut self.store, target, message, &mut outbox)?
            }
            RunQueueItem::Notify { endpoint, kpid } => {
                deliver_notify(&mut self.store, endpoint, kpid, &mut outbox)?
            }
        }
        Ok(Some(outbox))
    }
}

/// Commits on success and rolls back on failure, returning `result`.
fn finish_transaction<T>(
    store: &mut KernelStore,
    result: Result<T, KernelError>,
) -> Result<T, KernelError> {
    match result {
        Ok(value) => {
            store.kv_mut().commit_transaction()?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback) = store.kv_mut().rollback_transaction() {
                log::error!("rollback after '{}' failed: {}", error, rollback);
            }
            Err(error)
        }
    }
}

fn launch_in_store(store: &mut KernelStore) -> Result<VatId, KernelError> {
    let vat_id = store.get_next_vat_id()?;
    store.init_endpoint(EndpointId::Vat(vat_id))?;
    Ok(vat_id)
}

fn connect_in_store(store: &mut KernelStore) -> Result<RemoteId, KernelError> {
    let remote_id = store.get_next_remote_id()?;
    store.init_endpoint(EndpointId::Remote(remote_id))?;
    Ok(remote_id)
}

fn terminate_in_store(
    store: &mut KernelStore,
    endpoint: EndpointId,
    reason: &str,
) -> Result<(), KernelError> {
    let failure = CapData::error(reason);
    for kpid in store.promises_decided_by(endpoint)? {
        settle_promise(store, &kpid, true, &failure)?;
    }
    for kref in store.clist_krefs(endpoint)? {
        if store.forget_kref(endpoint, &kref)? {
            store.dec_ref_count(&kref)?;
        }
    }
    store.forget_endpoint(endpoint)
}

fn collect_in_store(
    store: &mut KernelStore,
) -> Result<(Vec<GcAction>, BTreeMap<EndpointId, Vec<ERef>>), KernelError> {
    let actions = store.collect_garbage()?;
    let mut drops: BTreeMap<EndpointId, Vec<ERef>> = BTreeMap::new();
    for action in &actions {
        if let GcAction::DropExport { owner, kref } = action {
            if let Some(eref) = store.kref_to_eref(*owner, kref)? {
                drops.entry(*owner).or_default().push(eref);
            }
        }
    }
    Ok((actions, drops))
}

/// The owner of `kref` and its export ref, if the owner still holds it.
fn live_owner(
    store: &KernelStore,
    kref: &KRef,
) -> Result<Option<(EndpointId, ERef)>, KernelError> {
    if !store.kernel_object_exists(kref) {
        return Ok(None);
    }
    let owner = store.get_owner(kref)?;
    if !store.is_endpoint(owner)? {
        return Ok(None);
    }
    Ok(store.kref_to_eref(owner, kref)?.map(|eref| (owner, eref)))
}

/// Rejects the message's result promise, if it has one still pending.
fn reject_result(
    store: &mut KernelStore,
    message: &KernelMessage,
    data: &CapData<KRef>,
) -> Result<(), KernelError> {
    if let Some(result) = &message.result {
        if store.kernel_promise_exists(result) && !store.get_kernel_promise(result)?.is_resolved() {
            settle_promise(store, result, true, data)?;
        }
    }
    Ok(())
}

/// Releases the counts a consumed send held.
fn consume_send(
    store: &mut KernelStore,
    target: &KRef,
    message: &KernelMessage,
) -> Result<(), KernelError> {
    release(store, target)?;
    release_message(store, message)
}

fn deliver_send(
    store: &mut KernelStore,
    target: KRef,
    message: KernelMessage,
    outbox: &mut Outbox,
) -> Result<(), KernelError> {
    match target.kind() {
        RefKind::Object => {
            let Some((receiver, eref)) = live_owner(store, &target)? else {
                log::debug!("send to {} rejected: no live owner", target);
                let failure = CapData::error(&format!("no live owner for {}", target));
                reject_result(store, &message, &failure)?;
                return consume_send(store, &target, &message);
            };
            if let Some(result) = &message.result {
                if !store.get_kernel_promise(result)?.is_resolved() {
                    store.set_promise_decider(result, receiver)?;
                }
            }
            let translated = translate::message_to_vat(store, receiver, &message)?;
            outbox.push((
                receiver,
                VatDelivery::Message {
                    target: eref,
                    message: translated,
                },
            ));
            consume_send(store, &target, &message)
        }
        RefKind::Promise => {
            let promise = store.get_kernel_promise(&target)?;
            match promise.state {
                // the parked message keeps its counts
                PromiseState::Unresolved => store.enqueue_promise_message(&target, &message),
                PromiseState::Fulfilled => {
                    let presence = promise
                        .value
                        .as_ref()
                        .and_then(CapData::single_slot)
                        .copied()
                        .filter(|kref| !kref.is_promise());
                    match presence {
                        Some(object) => {
                            store.inc_ref_count(&object)?;
                            store.enqueue_run(&RunQueueItem::Send {
                                target: object,
                                message,
                            })?;
                            release(store, &target)
                        }
                        None => {
                            let failure = CapData::error(&format!(
                                "cannot send to non-object fulfillment of {}",
                                target
                            ));
                            reject_result(store, &message, &failure)?;
                            consume_send(store, &target, &message)
                        }
                    }
                }
                PromiseState::Rejected => {
                    let failure = promise
                        .value
                        .unwrap_or_else(|| CapData::error(&format!("{} was rejected", target)));
                    reject_result(store, &message, &failure)?;
                    consume_send(store, &target, &message)
                }
            }
        }
    }
}

fn deliver_notify(
    store: &mut KernelStore,
    endpoint: EndpointId,
    kpid: KRef,
    outbox: &mut Outbox,
) -> Result<(), KernelError> {
    if store.is_endpoint(endpoint)? {
        if let Some(eref) = store.kref_to_eref(endpoint, &kpid)? {
            let promise = store.get_kernel_promise(&kpid)?;
            if let (true, Some(value)) = (promise.is_resolved(), &promise.value) {
                let data = translate::data_to_vat(store, endpoint, value)?;
                let rejected = promise.state == PromiseState::Rejected;
                outbox.push((
                    endpoint,
                    VatDelivery::Notify {
                        resolutions: vec![Resolution::new(eref, rejected, data)],
                    },
                ));
                if store.forget_kref(endpoint, &kpid)? {
                    store.dec_ref_count(&kpid)?;
                }
            }
        }
    }
    release(store, &kpid)
}
