//! Reference-count driven garbage collection
//!
//! `dec_ref_count` records krefs whose count fell to 1 or below in the
//! persisted `gc.maybeFree` set. A collection pass examines exactly those
//! krefs:
//!
//! - an object at 0 is deleted;
//! - an object at 1 whose owner still holds a reachable export entry is only
//!   referenced by its owner, so the owner's flag is cleared and the owner is
//!   told to drop the export;
//! - a resolved promise at 0 is deleted and the references in its value are
//!   released, which may free further krefs in the same pass.

use super::KernelStore;
use core_types::{EndpointId, KRef, RefKind};
use kernel_api::KernelError;
use std::collections::BTreeSet;

const MAYBE_FREE: &str = "gc.maybeFree";

/// One effect of a collection pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcAction {
    DeletedObject(KRef),
    DeletedPromise(KRef),
    /// The owner is the only remaining holder and should drop its export
    DropExport { owner: EndpointId, kref: KRef },
}

impl KernelStore {
    pub(crate) fn add_maybe_free(&mut self, kref: &KRef) -> Result<(), KernelError> {
        let mut pending = self.maybe_free_krefs()?;
        if pending.insert(*kref) {
            self.set_json(MAYBE_FREE, &pending)?;
        }
        Ok(())
    }

    /// Returns the krefs awaiting examination by the next collection pass
    pub fn maybe_free_krefs(&self) -> Result<BTreeSet<KRef>, KernelError> {
        Ok(self.get_json(MAYBE_FREE)?.unwrap_or_default())
    }

    /// Runs collection passes until nothing more can be freed.
    pub fn collect_garbage(&mut self) -> Result<Vec<GcAction>, KernelError> {
        let mut actions = Vec::new();
        loop {
            let pending = self.maybe_free_krefs()?;
            if pending.is_empty() {
                break;
            }
            self.kv.delete(MAYBE_FREE);
            for kref in pending {
                if let Some(action) = self.examine(&kref)? {
                    log::debug!("gc: {:?}", action);
                    actions.push(action);
                }
            }
        }
        Ok(actions)
    }

    fn examine(&mut self, kref: &KRef) -> Result<Option<GcAction>, KernelError> {
        if !self.ref_exists(kref) {
            return Ok(None);
        }
        let count = self.get_ref_count(kref)?;
        match kref.kind() {
            RefKind::Object => {
                if count == 0 {
                    self.delete_kernel_object(kref);
                    return Ok(Some(GcAction::DeletedObject(*kref)));
                }
                if count == 1 {
                    let owner = self.get_owner(kref)?;
                    if self.get_reachable_flag(owner, kref)? {
                        self.clear_reachable_flag(owner, kref)?;
                        return Ok(Some(GcAction::DropExport { owner, kref: *kref }));
                    }
                }
                Ok(None)
            }
            RefKind::Promise => {
                if count != 0 {
                    return Ok(None);
                }
                let promise = self.get_kernel_promise(kref)?;
                if !promise.is_resolved() {
                    return Ok(None);
                }
                self.delete_kernel_promise(kref)?;
                if let Some(value) = promise.value {
                    for slot in &value.slots {
                        if self.ref_exists(slot) {
                            self.dec_ref_count(slot)?;
                        }
                    }
                }
                Ok(Some(GcAction::DeletedPromise(*kref)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GcAction;
    use crate::test_utils::memory_store;
    use core_types::{CapData, ERef, EndpointId, VatId};

    fn vat(n: u64) -> EndpointId {
        EndpointId::Vat(VatId::new(n))
    }

    fn eref(text: &str) -> ERef {
        text.parse().unwrap()
    }

    #[test]
    fn test_unreferenced_object_deleted() {
        let mut store = memory_store();
        let ko = store.init_kernel_object(vat(1)).unwrap();
        store.dec_ref_count(&ko).unwrap();

        let actions = store.collect_garbage().unwrap();
        assert_eq!(actions, vec![GcAction::DeletedObject(ko)]);
        assert!(!store.kernel_object_exists(&ko));
        assert!(store.maybe_free_krefs().unwrap().is_empty());
    }

    #[test]
    fn test_owner_only_reference_asks_for_drop() {
        let mut store = memory_store();
        let ko = store.init_kernel_object(vat(1)).unwrap();
        store.add_clist_entry(vat(1), &ko, &eref("o+1")).unwrap();
        store.inc_ref_count(&ko).unwrap();
        store.add_clist_entry(vat(2), &ko, &eref("o-1")).unwrap();

        store.forget_kref(vat(2), &ko).unwrap();
        store.dec_ref_count(&ko).unwrap();

        let actions = store.collect_garbage().unwrap();
        assert_eq!(actions, vec![GcAction::DropExport { owner: vat(1), kref: ko }]);
        assert!(!store.get_reachable_flag(vat(1), &ko).unwrap());
        assert!(store.kernel_object_exists(&ko));

        // a second pass has nothing left to do
        assert!(store.collect_garbage().unwrap().is_empty());
    }

    #[test]
    fn test_resolved_promise_releases_value() {
        let mut store = memory_store();
        let ko = store.init_kernel_object(vat(1)).unwrap();
        let (kp, _) = store.init_kernel_promise().unwrap();
        store
            .resolve_kernel_promise(&kp, false, &CapData::new("#\"$0\"", vec![ko]))
            .unwrap();
        // the value holds one count, the owner gives up its own
        store.inc_ref_count(&ko).unwrap();
        store.dec_ref_count(&ko).unwrap();
        store.dec_ref_count(&kp).unwrap();

        let actions = store.collect_garbage().unwrap();
        assert!(actions.contains(&GcAction::DeletedPromise(kp)));
        assert!(actions.contains(&GcAction::DeletedObject(ko)));
        assert!(!store.ref_exists(&kp));
    }

    #[test]
    fn test_unresolved_promise_kept() {
        let mut store = memory_store();
        let (kp, _) = store.init_kernel_promise().unwrap();
        store.dec_ref_count(&kp).unwrap();
        assert!(store.collect_garbage().unwrap().is_empty());
        assert!(store.kernel_promise_exists(&kp));
    }

    #[test]
    fn test_vanished_kref_skipped() {
        let mut store = memory_store();
        let ko = store.init_kernel_object(vat(1)).unwrap();
        store.dec_ref_count(&ko).unwrap();
        store.delete_kernel_object(&ko);
        assert!(store.collect_garbage().unwrap().is_empty());
    }
}
