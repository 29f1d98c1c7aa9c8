//! Reference translation across the c-list boundary
//!
//! Every c-list entry holds one reference count on its kref. Translating
//! into the kernel may create objects and promises (a vat exporting something
//! new); translating out of the kernel may create import entries.

use crate::store::KernelStore;
use core_types::{
    CapData, Direction, ERef, EndpointId, KRef, KernelMessage, KernelResolution, RefKind,
    VatMessage, VatOneResolution,
};
use kernel_api::KernelError;

/// Maps an endpoint-local reference to its kernel reference.
///
/// Unknown exports are minted on the spot: an object owned by `endpoint`, or
/// a promise decided by it. Unknown imports are an error, since an endpoint
/// can only import what the kernel gave it.
pub fn vat_to_kernel(
    store: &mut KernelStore,
    endpoint: EndpointId,
    eref: &ERef,
) -> Result<KRef, KernelError> {
    if let Some(kref) = store.eref_to_kref(endpoint, eref)? {
        return Ok(kref);
    }
    if eref.is_import() {
        return Err(KernelError::UnknownEndpointRef {
            endpoint,
            eref: *eref,
        });
    }
    let kref = match eref.kind() {
        RefKind::Object => store.init_kernel_object(endpoint)?,
        RefKind::Promise => {
            let (kpid, _) = store.init_kernel_promise()?;
            store.set_promise_decider(&kpid, endpoint)?;
            kpid
        }
    };
    store.add_clist_entry(endpoint, &kref, eref)?;
    log::debug!("{} exported {} as {}", endpoint, eref, kref);
    Ok(kref)
}

/// Maps a kernel reference into `endpoint`'s namespace, importing it if the
/// endpoint has not seen it yet.
pub fn kernel_to_vat(
    store: &mut KernelStore,
    endpoint: EndpointId,
    kref: &KRef,
) -> Result<ERef, KernelError> {
    if let Some(eref) = store.kref_to_eref(endpoint, kref)? {
        store.set_reachable_flag(endpoint, kref)?;
        return Ok(eref);
    }
    let eref = store.allocate_eref_for_kref(endpoint, kref, Direction::Import)?;
    store.inc_ref_count(kref)?;
    Ok(eref)
}

pub fn message_to_kernel(
    store: &mut KernelStore,
    endpoint: EndpointId,
    message: &VatMessage,
) -> Result<KernelMessage, KernelError> {
    message.map_refs(|eref| vat_to_kernel(store, endpoint, eref))
}

pub fn message_to_vat(
    store: &mut KernelStore,
    endpoint: EndpointId,
    message: &KernelMessage,
) -> Result<VatMessage, KernelError> {
    message.map_refs(|kref| kernel_to_vat(store, endpoint, kref))
}

pub fn resolution_to_kernel(
    store: &mut KernelStore,
    endpoint: EndpointId,
    resolution: &VatOneResolution,
) -> Result<KernelResolution, KernelError> {
    let promise = vat_to_kernel(store, endpoint, &resolution.promise)?;
    let data = resolution
        .data
        .map_slots(|eref| vat_to_kernel(store, endpoint, eref))?;
    Ok(KernelResolution::new(promise, resolution.rejected, data))
}

pub fn data_to_vat(
    store: &mut KernelStore,
    endpoint: EndpointId,
    data: &CapData<KRef>,
) -> Result<CapData<ERef>, KernelError> {
    data.map_slots(|kref| kernel_to_vat(store, endpoint, kref))
}
