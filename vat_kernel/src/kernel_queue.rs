//! The kernel queue
//!
//! [`KernelQueue`] is the surface a [`crate::VatSyscall`] hands its
//! translated work to. [`RunQueueDispatch`] implements it over the store's
//! run queue.
//!
//! Counting rule: a run-queue item, or a message parked on a promise, holds
//! one reference count on every kref it names (target, argument slots, result
//! promise). Resolved promise values hold one count per slot. The counts are
//! released when the item is consumed.

use crate::store::KernelStore;
use core_types::{
    CapData, EndpointId, KRef, KernelMessage, KernelResolution, PromiseState, RunQueueItem,
};
use kernel_api::KernelError;

/// Where syscalls deposit cross-endpoint work
///
/// Every method receives the store explicitly; holding `&mut KernelStore` is
/// what makes a caller the single writer.
pub trait KernelQueue {
    /// Queues a message for delivery to `target`.
    fn enqueue_send(
        &mut self,
        store: &mut KernelStore,
        target: KRef,
        message: KernelMessage,
    ) -> Result<(), KernelError>;

    /// Settles promises decided by `endpoint`.
    fn resolve_promises(
        &mut self,
        store: &mut KernelStore,
        endpoint: EndpointId,
        resolutions: Vec<KernelResolution>,
    ) -> Result<(), KernelError>;

    /// Queues a resolution notice for `endpoint`.
    fn enqueue_notify(
        &mut self,
        store: &mut KernelStore,
        endpoint: EndpointId,
        kpid: KRef,
    ) -> Result<(), KernelError>;
}

/// [`KernelQueue`] over the persisted run queue
#[derive(Debug, Clone, Copy, Default)]
pub struct RunQueueDispatch;

impl RunQueueDispatch {
    pub fn new() -> Self {
        Self
    }
}

impl KernelQueue for RunQueueDispatch {
    fn enqueue_send(
        &mut self,
        store: &mut KernelStore,
        target: KRef,
        message: KernelMessage,
    ) -> Result<(), KernelError> {
        store.inc_ref_count(&target)?;
        retain_message(store, &message)?;
        log::debug!("send queued for {}", target);
        store.enqueue_run(&RunQueueItem::Send { target, message })
    }

    fn resolve_promises(
        &mut self,
        store: &mut KernelStore,
        endpoint: EndpointId,
        resolutions: Vec<KernelResolution>,
    ) -> Result<(), KernelError> {
        for resolution in &resolutions {
            check_decider(store, endpoint, &resolution.promise)?;
        }
        for resolution in resolutions {
            // catches the same promise named twice in one call
            check_decider(store, endpoint, &resolution.promise)?;
            settle_promise(store, &resolution.promise, resolution.rejected, &resolution.data)?;
            if store.forget_kref(endpoint, &resolution.promise)? {
                store.dec_ref_count(&resolution.promise)?;
            }
        }
        Ok(())
    }

    fn enqueue_notify(
        &mut self,
        store: &mut KernelStore,
        endpoint: EndpointId,
        kpid: KRef,
    ) -> Result<(), KernelError> {
        push_notify(store, endpoint, kpid)
    }
}

fn check_decider(
    store: &KernelStore,
    endpoint: EndpointId,
    kpid: &KRef,
) -> Result<(), KernelError> {
    let promise = store.get_kernel_promise(kpid)?;
    if promise.is_resolved() {
        return Err(KernelError::PromiseAlreadyResolved(*kpid));
    }
    if promise.decider != Some(endpoint) {
        return Err(KernelError::NotDecider {
            endpoint,
            kpid: *kpid,
        });
    }
    Ok(())
}

fn push_notify(store: &mut KernelStore, endpoint: EndpointId, kpid: KRef) -> Result<(), KernelError> {
    store.inc_ref_count(&kpid)?;
    store.enqueue_run(&RunQueueItem::Notify { endpoint, kpid })
}

/// Resolves `kpid` without checking who is asking.
///
/// Subscribers are notified and messages parked on the promise are sent
/// again, now addressed to a settled promise.
pub(crate) fn settle_promise(
    store: &mut KernelStore,
    kpid: &KRef,
    rejected: bool,
    data: &CapData<KRef>,
) -> Result<(), KernelError> {
    let promise = store.get_kernel_promise(kpid)?;
    if promise.state != PromiseState::Unresolved {
        return Err(KernelError::PromiseAlreadyResolved(*kpid));
    }
    for slot in &data.slots {
        store.inc_ref_count(slot)?;
    }
    store.resolve_kernel_promise(kpid, rejected, data)?;
    log::debug!(
        "{} {}",
        kpid,
        if rejected { "rejected" } else { "fulfilled" }
    );

    for subscriber in promise.subscribers {
        push_notify(store, subscriber, *kpid)?;
    }
    for message in store.get_kernel_promise_message_queue(kpid)? {
        // the parked message already holds its counts
        store.enqueue_run(&RunQueueItem::Send {
            target: *kpid,
            message,
        })?;
    }
    Ok(())
}

pub(crate) fn retain_message(
    store: &mut KernelStore,
    message: &KernelMessage,
) -> Result<(), KernelError> {
    for kref in message.methargs.slots.iter().chain(message.result.iter()) {
        store.inc_ref_count(kref)?;
    }
    Ok(())
}

pub(crate) fn release_message(
    store: &mut KernelStore,
    message: &KernelMessage,
) -> Result<(), KernelError> {
    for kref in message.methargs.slots.iter().chain(message.result.iter()) {
        release(store, kref)?;
    }
    Ok(())
}

/// Drops one count, tolerating krefs that were already collected.
pub(crate) fn release(store: &mut KernelStore, kref: &KRef) -> Result<(), KernelError> {
    if store.ref_exists(kref) {
        store.dec_ref_count(kref)?;
    }
    Ok(())
}
