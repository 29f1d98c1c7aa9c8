//! Thread-safe kernel handle
//!
//! The kernel assumes a single writer. [`SharedKernel`] provides it for
//! hosts with several threads: every call holds one lock for its whole
//! duration, so no two operations ever interleave.

use crate::{Kernel, VatDelivery};
use core_types::{EndpointId, VatId};
use kernel_api::{KernelError, VatSyscallObject};
use std::sync::{Arc, Mutex};

/// Cloneable handle to one kernel
#[derive(Clone)]
pub struct SharedKernel {
    inner: Arc<Mutex<Kernel>>,
}

impl SharedKernel {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            inner: Arc::new(Mutex::new(kernel)),
        }
    }

    /// Runs `f` with exclusive access to the kernel.
    pub fn with<T, F>(&self, f: F) -> Result<T, KernelError>
    where
        F: FnOnce(&mut Kernel) -> Result<T, KernelError>,
    {
        let mut kernel = self
            .inner
            .lock()
            .map_err(|_| KernelError::StatePoisoned)?;
        f(&mut *kernel)
    }

    pub fn launch_vat(&self) -> Result<VatId, KernelError> {
        self.with(Kernel::launch_vat)
    }

    pub fn handle_syscall(&self, vat_id: VatId, vso: VatSyscallObject) -> Result<(), KernelError> {
        self.with(|kernel| kernel.handle_syscall(vat_id, vso))
    }

    pub fn handle_wire_syscall(&self, vat_id: VatId, text: &str) -> Result<(), KernelError> {
        self.with(|kernel| kernel.handle_wire_syscall(vat_id, text))
    }

    pub fn run(&self) -> Result<usize, KernelError> {
        self.with(Kernel::run)
    }

    pub fn take_deliveries(&self, endpoint: EndpointId) -> Result<Vec<VatDelivery>, KernelError> {
        self.with(|kernel| Ok(kernel.take_deliveries(endpoint)))
    }

    pub fn terminate_vat(&self, vat_id: VatId, reason: &str) -> Result<(), KernelError> {
        self.with(|kernel| kernel.terminate_vat(vat_id, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::memory_kernel;
    use std::thread;

    #[test]
    fn test_shared_kernel_serializes_launches() {
        let shared = SharedKernel::new(memory_kernel());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    (0..5)
                        .map(|_| shared.launch_vat().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<VatId> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        assert_eq!(shared.with(|kernel| Ok(kernel.vat_ids().len())).unwrap(), 20);
    }

    #[test]
    fn test_poisoned_lock_reported() {
        let shared = SharedKernel::new(memory_kernel());
        let poisoner = shared.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poison the kernel lock");
        })
        .join();

        assert_eq!(shared.launch_vat(), Err(KernelError::StatePoisoned));
    }
}
