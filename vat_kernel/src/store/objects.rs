//! Kernel objects

use super::{KernelStore, NEXT_OBJECT_ID};
use core_types::{EndpointId, KRef};
use kernel_api::KernelError;

pub(super) fn owner_key(kref: &KRef) -> String {
    format!("{}.owner", kref)
}

impl KernelStore {
    /// Allocates a kernel object owned by `owner`, with a reference count of 1
    pub fn init_kernel_object(&mut self, owner: EndpointId) -> Result<KRef, KernelError> {
        let kref = KRef::object(self.bump_counter(NEXT_OBJECT_ID)?);
        self.kv.set(&owner_key(&kref), &owner.to_string());
        self.set_ref_count(&kref, 1);
        Ok(kref)
    }

    /// Returns the endpoint that exported the object
    pub fn get_owner(&self, kref: &KRef) -> Result<EndpointId, KernelError> {
        self.get_parsed(&owner_key(kref))?
            .ok_or(KernelError::UnknownObject(*kref))
    }

    /// Returns whether the object exists
    pub fn kernel_object_exists(&self, kref: &KRef) -> bool {
        self.kv.get(&owner_key(kref)).is_some()
    }

    /// Removes the object record.
    ///
    /// C-list entries that still name the object are left alone; callers
    /// forget them separately.
    pub fn delete_kernel_object(&mut self, kref: &KRef) {
        self.kv.delete(&owner_key(kref));
        self.delete_ref_count(kref);
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::memory_store;
    use core_types::{EndpointId, KRef, VatId};
    use kernel_api::KernelError;

    #[test]
    fn test_object_lifecycle() {
        let mut store = memory_store();
        let owner = EndpointId::Vat(VatId::new(47));

        let kref = store.init_kernel_object(owner).unwrap();
        assert_eq!(kref.to_string(), "ko1");
        assert_eq!(store.get_owner(&kref).unwrap().to_string(), "v47");
        assert_eq!(store.get_ref_count(&kref).unwrap(), 1);

        store.delete_kernel_object(&kref);
        let error = store.get_owner(&kref).unwrap_err();
        assert_eq!(error.to_string(), "unknown kernel object ko1");
        assert!(!store.kernel_object_exists(&kref));
    }

    #[test]
    fn test_object_ids_not_reused_after_delete() {
        let mut store = memory_store();
        let owner = EndpointId::Vat(VatId::new(1));
        let first = store.init_kernel_object(owner).unwrap();
        store.delete_kernel_object(&first);
        assert_eq!(store.init_kernel_object(owner).unwrap(), KRef::object(2));
    }

    #[test]
    fn test_unknown_owner() {
        let store = memory_store();
        assert_eq!(
            store.get_owner(&KRef::object(9)),
            Err(KernelError::UnknownObject(KRef::object(9)))
        );
    }
}
