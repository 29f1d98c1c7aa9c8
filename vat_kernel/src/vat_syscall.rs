//! Per-vat syscall handling
//!
//! A [`VatSyscall`] is the only path from a vat into the kernel. It checks
//! every reference the vat names against the vat's own c-list, translates
//! into kernel space, and hands the work to the [`KernelQueue`].
//!
//! The GC syscalls form a three-tier protocol on each c-list entry:
//!
//! - `dropImports`: reachable to recognizable; the entry stays
//! - `retireImports` / `retireExports`: forget an entry that is no longer reachable
//! - `abandonExports`: forget an export regardless of reachability
//!
//! All refs of a GC syscall are validated before any of them is applied.

use crate::kernel_queue::KernelQueue;
use crate::store::KernelStore;
use crate::syscall_audit::{SyscallAuditLog, SyscallEvent};
use crate::translate;
use core_types::{ERef, EndpointId, KRef, VatId, VatMessage, VatOneResolution};
use kernel_api::syscalls::{ABANDON_EXPORTS, DROP_IMPORTS, RETIRE_EXPORTS, RETIRE_IMPORTS, SUBSCRIBE};
use kernel_api::{KernelError, VatSyscallObject};

/// Syscall handler bound to one vat
pub struct VatSyscall {
    vat_id: VatId,
    audit: SyscallAuditLog,
    audit_enabled: bool,
}

impl VatSyscall {
    pub fn new(vat_id: VatId, audit_enabled: bool) -> Self {
        Self {
            vat_id,
            audit: SyscallAuditLog::new(),
            audit_enabled,
        }
    }

    pub fn vat_id(&self) -> VatId {
        self.vat_id
    }

    /// Returns the audit log (test-only)
    pub fn audit_log(&self) -> &SyscallAuditLog {
        &self.audit
    }

    /// Clears the audit log (test-only)
    pub fn clear_audit_log(&mut self) {
        self.audit.clear();
    }

    fn endpoint(&self) -> EndpointId {
        EndpointId::Vat(self.vat_id)
    }

    fn record(&mut self, event: SyscallEvent) {
        if self.audit_enabled {
            self.audit.record(event);
        }
    }

    /// Applies one syscall issued by this vat.
    ///
    /// Protocol violations are returned to the caller untouched; unsupported
    /// syscalls are logged and ignored.
    pub fn handle_syscall<Q>(
        &mut self,
        store: &mut KernelStore,
        queue: &mut Q,
        vso: VatSyscallObject,
    ) -> Result<(), KernelError>
    where
        Q: KernelQueue + ?Sized,
    {
        let vat = self.vat_id;
        let syscall = vso.name().to_string();
        self.record(SyscallEvent::Invoked {
            vat,
            syscall: syscall.clone(),
        });

        let result = match vso {
            VatSyscallObject::Send { target, message } => {
                self.send(store, queue, &target, &message)
            }
            VatSyscallObject::Resolve { resolutions } => {
                self.resolve(store, queue, &resolutions)
            }
            VatSyscallObject::Subscribe { vpid } => self.subscribe(store, queue, &vpid),
            VatSyscallObject::DropImports(refs) => self.drop_imports(store, &refs),
            VatSyscallObject::RetireImports(refs) => self.retire_imports(store, &refs),
            VatSyscallObject::RetireExports(refs) => self.retire_exports(store, &refs),
            VatSyscallObject::AbandonExports(refs) => self.abandon_exports(store, &refs),
            VatSyscallObject::VatstoreGet { .. }
            | VatSyscallObject::VatstoreGetNextKey { .. }
            | VatSyscallObject::VatstoreSet { .. }
            | VatSyscallObject::VatstoreDelete { .. } => {
                let reason = format!("invalid syscall {}", syscall);
                log::warn!("{}", reason);
                self.record(SyscallEvent::Ignored {
                    vat,
                    syscall,
                    reason,
                });
                return Ok(());
            }
            VatSyscallObject::Unknown { op } => {
                let reason = format!("unknown syscall {}", op);
                log::warn!("{}", reason);
                self.record(SyscallEvent::Ignored {
                    vat,
                    syscall,
                    reason,
                });
                return Ok(());
            }
        };

        match &result {
            Ok(()) => self.record(SyscallEvent::Completed { vat, syscall }),
            Err(error) => self.record(SyscallEvent::Rejected {
                vat,
                syscall,
                reason: error.to_string(),
            }),
        }
        result
    }

    fn send<Q: KernelQueue + ?Sized>(
        &self,
        store: &mut KernelStore,
        queue: &mut Q,
        target: &ERef,
        message: &VatMessage,
    ) -> Result<(), KernelError> {
        let endpoint = self.endpoint();
        let target = translate::vat_to_kernel(store, endpoint, target)?;
        let message = translate::message_to_kernel(store, endpoint, message)?;
        queue.enqueue_send(store, target, message)
    }

    fn resolve<Q: KernelQueue + ?Sized>(
        &self,
        store: &mut KernelStore,
        queue: &mut Q,
        resolutions: &[VatOneResolution],
    ) -> Result<(), KernelError> {
        let endpoint = self.endpoint();
        let resolutions = resolutions
            .iter()
            .map(|resolution| translate::resolution_to_kernel(store, endpoint, resolution))
            .collect::<Result<Vec<_>, _>>()?;
        queue.resolve_promises(store, endpoint, resolutions)
    }

    fn subscribe<Q: KernelQueue + ?Sized>(
        &self,
        store: &mut KernelStore,
        queue: &mut Q,
        vpid: &ERef,
    ) -> Result<(), KernelError> {
        if !vpid.is_promise() {
            return Err(self.invalid(SUBSCRIBE, vpid));
        }
        let endpoint = self.endpoint();
        let kpid = translate::vat_to_kernel(store, endpoint, vpid)?;
        let promise = store.get_kernel_promise(&kpid)?;
        if promise.is_resolved() {
            // the resolution already went out; deliver it directly
            queue.enqueue_notify(store, endpoint, kpid)
        } else {
            store.add_promise_subscriber(&kpid, endpoint)
        }
    }

    fn drop_imports(&self, store: &mut KernelStore, refs: &[ERef]) -> Result<(), KernelError> {
        let endpoint = self.endpoint();
        let krefs = self.lookup_all(store, DROP_IMPORTS, refs, |eref| {
            eref.is_import() && !eref.is_promise()
        })?;
        for (_, kref) in krefs {
            store.clear_reachable_flag(endpoint, &kref)?;
        }
        Ok(())
    }

    fn retire_imports(&self, store: &mut KernelStore, refs: &[ERef]) -> Result<(), KernelError> {
        let krefs = self.lookup_all(store, RETIRE_IMPORTS, refs, ERef::is_import)?;
        self.require_unreachable(store, RETIRE_IMPORTS, &krefs)?;
        for (_, kref) in krefs {
            self.forget(store, &kref)?;
        }
        Ok(())
    }

    fn retire_exports(&self, store: &mut KernelStore, refs: &[ERef]) -> Result<(), KernelError> {
        let krefs = self.lookup_all(store, RETIRE_EXPORTS, refs, |eref| {
            eref.is_export() && !eref.is_promise()
        })?;
        self.require_unreachable(store, RETIRE_EXPORTS, &krefs)?;
        for (eref, kref) in krefs {
            if self.forget(store, &kref)? {
                log::debug!("retireExports: deleted object {}", eref);
            }
        }
        Ok(())
    }

    fn abandon_exports(&self, store: &mut KernelStore, refs: &[ERef]) -> Result<(), KernelError> {
        let krefs = self.lookup_all(store, ABANDON_EXPORTS, refs, |eref| {
            eref.is_export() && !eref.is_promise()
        })?;
        for (eref, kref) in krefs {
            if self.forget(store, &kref)? {
                log::debug!("abandonExports: deleted object {}", eref);
            }
        }
        Ok(())
    }

    /// Checks each ref's shape, then resolves it through the c-list.
    fn lookup_all<F>(
        &self,
        store: &KernelStore,
        syscall: &'static str,
        refs: &[ERef],
        allowed: F,
    ) -> Result<Vec<(ERef, KRef)>, KernelError>
    where
        F: Fn(&ERef) -> bool,
    {
        let endpoint = self.endpoint();
        refs.iter()
            .map(|eref| {
                if !allowed(eref) {
                    return Err(self.invalid(syscall, eref));
                }
                let kref = store
                    .eref_to_kref(endpoint, eref)?
                    .ok_or(KernelError::UnknownEndpointRef {
                        endpoint,
                        eref: *eref,
                    })?;
                Ok((*eref, kref))
            })
            .collect()
    }

    fn require_unreachable(
        &self,
        store: &KernelStore,
        syscall: &'static str,
        krefs: &[(ERef, KRef)],
    ) -> Result<(), KernelError> {
        for (eref, kref) in krefs {
            if store.get_reachable_flag(self.endpoint(), kref)? {
                return Err(KernelError::StillReachable {
                    syscall,
                    eref: *eref,
                });
            }
        }
        Ok(())
    }

    /// Removes the c-list entry and releases the count it held. A ref named
    /// twice in one syscall is only released once.
    fn forget(&self, store: &mut KernelStore, kref: &KRef) -> Result<bool, KernelError> {
        let removed = store.forget_kref(self.endpoint(), kref)?;
        if removed {
            store.dec_ref_count(kref)?;
        }
        Ok(removed)
    }

    fn invalid(&self, syscall: &'static str, eref: &ERef) -> KernelError {
        KernelError::InvalidSyscall {
            vat: self.vat_id,
            syscall,
            eref: *eref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{eref, store_with_vats, vat_message, QueueCall, RecordingQueue};
    use core_types::{CapData, KernelResolution};

    fn setup() -> (KernelStore, RecordingQueue, VatSyscall) {
        (
            store_with_vats(2),
            RecordingQueue::new(),
            VatSyscall::new(VatId::new(1), true),
        )
    }

    fn v(n: u64) -> EndpointId {
        EndpointId::Vat(VatId::new(n))
    }

    /// Gives v1 an import `o-1` of an object exported by v2.
    fn import_into_v1(store: &mut KernelStore) -> KRef {
        let kref = translate::vat_to_kernel(store, v(2), &eref("o+1")).unwrap();
        let imported = translate::kernel_to_vat(store, v(1), &kref).unwrap();
        assert_eq!(imported, eref("o-1"));
        kref
    }

    #[test]
    fn test_send_translates_target_and_message() {
        let (mut store, mut queue, mut vat) = setup();
        let target = import_into_v1(&mut store);

        vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::Send {
                target: eref("o-1"),
                message: vat_message("#[\"go\",[\"$0\"]]", vec![eref("o+7")], Some(eref("p+1"))),
            },
        )
        .unwrap();

        let QueueCall::Send { target: sent, message } = &queue.calls()[0] else {
            panic!("expected send");
        };
        assert_eq!(*sent, target);
        let arg = message.methargs.slots[0];
        assert_eq!(store.get_owner(&arg).unwrap(), v(1));
        let result = message.result.unwrap();
        assert_eq!(store.get_kernel_promise(&result).unwrap().decider, Some(v(1)));
    }

    #[test]
    fn test_resolve_forwards_translated_resolutions() {
        let (mut store, mut queue, mut vat) = setup();
        vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::Resolve {
                resolutions: vec![VatOneResolution::new(
                    eref("p+3"),
                    false,
                    CapData::plain("#\"done\""),
                )],
            },
        )
        .unwrap();

        let kpid = store.eref_to_kref(v(1), &eref("p+3")).unwrap().unwrap();
        assert_eq!(
            queue.calls(),
            &[QueueCall::Resolve {
                endpoint: v(1),
                resolutions: vec![KernelResolution::new(kpid, false, CapData::plain("#\"done\""))],
            }]
        );
    }

    #[test]
    fn test_subscribe_unresolved_adds_subscriber() {
        let (mut store, mut queue, mut vat) = setup();
        let kpid = translate::vat_to_kernel(&mut store, v(2), &eref("p+1")).unwrap();
        translate::kernel_to_vat(&mut store, v(1), &kpid).unwrap();

        vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::Subscribe { vpid: eref("p-1") },
        )
        .unwrap();

        assert!(store
            .get_kernel_promise(&kpid)
            .unwrap()
            .subscribers
            .contains(&v(1)));
        assert!(queue.calls().is_empty());
    }

    #[test]
    fn test_subscribe_resolved_notifies_immediately() {
        let (mut store, mut queue, mut vat) = setup();
        let kpid = translate::vat_to_kernel(&mut store, v(2), &eref("p+1")).unwrap();
        translate::kernel_to_vat(&mut store, v(1), &kpid).unwrap();
        store
            .resolve_kernel_promise(&kpid, false, &CapData::plain("#1"))
            .unwrap();

        vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::Subscribe { vpid: eref("p-1") },
        )
        .unwrap();

        assert_eq!(
            queue.calls(),
            &[QueueCall::Notify {
                endpoint: v(1),
                kpid
            }]
        );
        assert!(store.get_kernel_promise(&kpid).unwrap().subscribers.is_empty());
    }

    #[test]
    fn test_drop_imports_requires_import() {
        let (mut store, mut queue, mut vat) = setup();
        let error = vat
            .handle_syscall(
                &mut store,
                &mut queue,
                VatSyscallObject::DropImports(vec![eref("o+1")]),
            )
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "vat v1 issued invalid syscall dropImports for o+1"
        );
    }

    #[test]
    fn test_drop_imports_clears_reachable_flag() {
        let (mut store, mut queue, mut vat) = setup();
        let kref = import_into_v1(&mut store);

        vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::DropImports(vec![eref("o-1")]),
        )
        .unwrap();

        assert!(!store.get_reachable_flag(v(1), &kref).unwrap());
        assert_eq!(store.kref_to_eref(v(1), &kref).unwrap(), Some(eref("o-1")));
        assert_eq!(store.get_ref_count(&kref).unwrap(), 2);
    }

    #[test]
    fn test_retire_imports_gated_on_reachability() {
        let (mut store, mut queue, mut vat) = setup();
        let kref = import_into_v1(&mut store);

        let error = vat
            .handle_syscall(
                &mut store,
                &mut queue,
                VatSyscallObject::RetireImports(vec![eref("o-1")]),
            )
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "syscall.retireImports but o-1 is still reachable"
        );

        store.clear_reachable_flag(v(1), &kref).unwrap();
        vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::RetireImports(vec![eref("o-1")]),
        )
        .unwrap();
        assert_eq!(store.kref_to_eref(v(1), &kref).unwrap(), None);
        assert_eq!(store.get_ref_count(&kref).unwrap(), 1);
    }

    #[test]
    fn test_retire_exports_gated_on_reachability() {
        let (mut store, mut queue, mut vat) = setup();
        let kref = translate::vat_to_kernel(&mut store, v(1), &eref("o+4")).unwrap();

        let error = vat
            .handle_syscall(
                &mut store,
                &mut queue,
                VatSyscallObject::RetireExports(vec![eref("o+4")]),
            )
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "syscall.retireExports but o+4 is still reachable"
        );

        store.clear_reachable_flag(v(1), &kref).unwrap();
        vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::RetireExports(vec![eref("o+4")]),
        )
        .unwrap();
        assert_eq!(store.get_ref_count(&kref).unwrap(), 0);
    }

    #[test]
    fn test_abandon_exports_skips_reachability_check() {
        let (mut store, mut queue, mut vat) = setup();
        let kref = translate::vat_to_kernel(&mut store, v(1), &eref("o+4")).unwrap();
        assert!(store.get_reachable_flag(v(1), &kref).unwrap());

        vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::AbandonExports(vec![eref("o+4")]),
        )
        .unwrap();
        assert_eq!(store.eref_to_kref(v(1), &eref("o+4")).unwrap(), None);

        let error = vat
            .handle_syscall(
                &mut store,
                &mut queue,
                VatSyscallObject::AbandonExports(vec![eref("o-4")]),
            )
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "vat v1 issued invalid syscall abandonExports for o-4"
        );
    }

    #[test]
    fn test_abandon_exports_rejects_promises() {
        let (mut store, mut queue, mut vat) = setup();
        let kpid = translate::vat_to_kernel(&mut store, v(1), &eref("p+1")).unwrap();
        let count = store.get_ref_count(&kpid).unwrap();

        let error = vat
            .handle_syscall(
                &mut store,
                &mut queue,
                VatSyscallObject::AbandonExports(vec![eref("p+1")]),
            )
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "vat v1 issued invalid syscall abandonExports for p+1"
        );
        assert_eq!(store.eref_to_kref(v(1), &eref("p+1")).unwrap(), Some(kpid));
        assert_eq!(store.get_kernel_promise(&kpid).unwrap().decider, Some(v(1)));
        assert_eq!(store.get_ref_count(&kpid).unwrap(), count);
    }

    #[test]
    fn test_retire_imports_counts_repeated_ref_once() {
        let (mut store, mut queue, mut vat) = setup();
        let kref = import_into_v1(&mut store);
        store.clear_reachable_flag(v(1), &kref).unwrap();

        vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::RetireImports(vec![eref("o-1"), eref("o-1")]),
        )
        .unwrap();

        assert_eq!(store.kref_to_eref(v(1), &kref).unwrap(), None);
        assert_eq!(store.get_ref_count(&kref).unwrap(), 1);
        assert_eq!(store.get_owner(&kref).unwrap(), v(2));
        assert_eq!(store.kref_to_eref(v(2), &kref).unwrap(), Some(eref("o+1")));
    }

    #[test]
    fn test_abandon_exports_counts_repeated_ref_once() {
        let (mut store, mut queue, mut vat) = setup();
        let kref = translate::vat_to_kernel(&mut store, v(1), &eref("o+4")).unwrap();
        store.inc_ref_count(&kref).unwrap();

        vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::AbandonExports(vec![eref("o+4"), eref("o+4")]),
        )
        .unwrap();

        assert_eq!(store.eref_to_kref(v(1), &eref("o+4")).unwrap(), None);
        assert_eq!(store.get_ref_count(&kref).unwrap(), 1);
    }

    #[test]
    fn test_gc_syscall_validates_before_mutating() {
        let (mut store, mut queue, mut vat) = setup();
        let kref = import_into_v1(&mut store);

        let error = vat
            .handle_syscall(
                &mut store,
                &mut queue,
                VatSyscallObject::DropImports(vec![eref("o-1"), eref("o+2")]),
            )
            .unwrap_err();
        assert!(matches!(error, KernelError::InvalidSyscall { .. }));
        assert!(store.get_reachable_flag(v(1), &kref).unwrap());
    }

    #[test]
    fn test_unsupported_syscalls_ignored() {
        let (mut store, mut queue, mut vat) = setup();
        let before = store.keys_with_prefix("");

        for vso in [
            VatSyscallObject::VatstoreGet {
                key: "k".to_string(),
            },
            VatSyscallObject::VatstoreSet {
                key: "k".to_string(),
                value: "v".to_string(),
            },
            VatSyscallObject::Unknown {
                op: "exit".to_string(),
            },
        ] {
            vat.handle_syscall(&mut store, &mut queue, vso).unwrap();
        }

        assert_eq!(store.keys_with_prefix(""), before);
        assert!(queue.calls().is_empty());
        assert_eq!(
            vat.audit_log()
                .count_events(|e| matches!(e, SyscallEvent::Ignored { .. })),
            3
        );
        assert!(vat.audit_log().has_event(|e| matches!(
            e,
            SyscallEvent::Ignored { reason, .. } if reason == "unknown syscall exit"
        )));
    }

    #[test]
    fn test_audit_records_rejections() {
        let (mut store, mut queue, mut vat) = setup();
        let _ = vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::RetireImports(vec![eref("o+1")]),
        );
        assert!(vat.audit_log().has_event(|e| matches!(
            e,
            SyscallEvent::Rejected { reason, .. }
                if reason == "vat v1 issued invalid syscall retireImports for o+1"
        )));
    }

    #[test]
    fn test_audit_can_be_disabled() {
        let (mut store, mut queue, _) = setup();
        let mut vat = VatSyscall::new(VatId::new(1), false);
        vat.handle_syscall(
            &mut store,
            &mut queue,
            VatSyscallObject::Unknown {
                op: "exit".to_string(),
            },
        )
        .unwrap();
        assert!(vat.audit_log().events().is_empty());
    }
}
