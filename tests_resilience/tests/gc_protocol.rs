//! Distributed GC protocol tests
//!
//! Drives the full drop / retire / dropExports / retireExports exchange
//! between two vats and checks that nothing leaks.

use core_types::{EndpointId, KRef, PromiseState};
use kernel_api::{KernelError, VatSyscallObject};
use tests_resilience::{deliveries, send, test_bootstrap};
use vat_kernel::test_utils::{eref, export_to};
use vat_kernel::{GcAction, VatDelivery};

fn kref_of(kernel: &vat_kernel::Kernel, vat: core_types::VatId, text: &str) -> KRef {
    kernel
        .store()
        .eref_to_kref(EndpointId::Vat(vat), &eref(text))
        .unwrap()
        .expect("ref is in the c-list")
}

#[test]
fn test_full_drop_and_retire_cycle() {
    let (mut kernel, alice, bob) = test_bootstrap();
    let import = export_to(&mut kernel, bob, "o+1", alice);
    let ko = kref_of(&kernel, alice, &import.to_string());
    assert_eq!(kernel.store().get_ref_count(&ko).unwrap(), 2);

    // alice stops using the import, then retires it
    kernel
        .handle_syscall(alice, VatSyscallObject::DropImports(vec![import]))
        .unwrap();
    kernel
        .handle_syscall(alice, VatSyscallObject::RetireImports(vec![import]))
        .unwrap();
    assert_eq!(kernel.store().get_ref_count(&ko).unwrap(), 1);

    // only bob holds it now, so bob is told to drop the export
    let actions = kernel.collect_garbage().unwrap();
    assert_eq!(
        actions,
        vec![GcAction::DropExport {
            owner: EndpointId::Vat(bob),
            kref: ko,
        }]
    );
    assert_eq!(
        deliveries(&mut kernel, bob),
        vec![VatDelivery::DropExports {
            erefs: vec![eref("o+1")],
        }]
    );

    kernel
        .handle_syscall(bob, VatSyscallObject::RetireExports(vec![eref("o+1")]))
        .unwrap();
    let actions = kernel.collect_garbage().unwrap();
    assert_eq!(actions, vec![GcAction::DeletedObject(ko)]);
    assert!(!kernel.store().kernel_object_exists(&ko));
    assert!(kernel.store().clist_krefs(EndpointId::Vat(bob)).unwrap().is_empty());
    assert!(kernel.store().clist_krefs(EndpointId::Vat(alice)).unwrap().is_empty());
}

#[test]
fn test_repeated_retire_keeps_exporter_alive() {
    let (mut kernel, alice, bob) = test_bootstrap();
    let import = export_to(&mut kernel, bob, "o+1", alice);
    let ko = kref_of(&kernel, alice, &import.to_string());

    kernel
        .handle_syscall(alice, VatSyscallObject::DropImports(vec![import]))
        .unwrap();
    kernel
        .handle_syscall(alice, VatSyscallObject::RetireImports(vec![import, import]))
        .unwrap();
    assert_eq!(kernel.store().get_ref_count(&ko).unwrap(), 1);

    let actions = kernel.collect_garbage().unwrap();
    assert_eq!(
        actions,
        vec![GcAction::DropExport {
            owner: EndpointId::Vat(bob),
            kref: ko,
        }]
    );
    assert!(kernel.store().kernel_object_exists(&ko));
    assert_eq!(kref_of(&kernel, bob, "o+1"), ko);
}

#[test]
fn test_retire_before_drop_is_rejected() {
    let (mut kernel, alice, bob) = test_bootstrap();
    let import = export_to(&mut kernel, bob, "o+1", alice);

    let error = kernel
        .handle_syscall(alice, VatSyscallObject::RetireImports(vec![import]))
        .unwrap_err();
    assert!(matches!(error, KernelError::StillReachable { .. }));

    let error = kernel
        .handle_syscall(bob, VatSyscallObject::RetireExports(vec![eref("o+1")]))
        .unwrap_err();
    assert!(matches!(error, KernelError::StillReachable { .. }));

    let ko = kref_of(&kernel, alice, &import.to_string());
    assert_eq!(kernel.store().get_ref_count(&ko).unwrap(), 2);
}

#[test]
fn test_drop_exports_not_sent_while_imported() {
    let (mut kernel, alice, bob) = test_bootstrap();
    let import = export_to(&mut kernel, bob, "o+1", alice);
    kernel
        .handle_syscall(alice, VatSyscallObject::DropImports(vec![import]))
        .unwrap();

    // dropping alone releases no count
    assert!(kernel.collect_garbage().unwrap().is_empty());
    assert!(deliveries(&mut kernel, bob).is_empty());
}

#[test]
fn test_in_flight_reference_outlives_abandoned_export() {
    let (mut kernel, alice, bob) = test_bootstrap();
    let bob_obj = export_to(&mut kernel, bob, "o+1", alice);

    send(&mut kernel, alice, &bob_obj.to_string(), "take", &["o+5"], None).unwrap();
    let alice_obj = kref_of(&kernel, alice, "o+5");
    assert_eq!(kernel.store().get_ref_count(&alice_obj).unwrap(), 2);

    kernel
        .handle_syscall(alice, VatSyscallObject::AbandonExports(vec![eref("o+5")]))
        .unwrap();
    kernel.collect_garbage().unwrap();
    assert!(kernel.store().kernel_object_exists(&alice_obj));

    kernel.run().unwrap();
    let delivered = deliveries(&mut kernel, bob);
    let VatDelivery::Message { message, .. } = &delivered[0] else {
        panic!("expected a message delivery, got {:?}", delivered);
    };
    let handed = message.methargs.slots[0];
    assert!(handed.is_import());
    assert_eq!(kernel.store().get_ref_count(&alice_obj).unwrap(), 1);

    // the owner is gone, so a send to the abandoned object rejects
    send(&mut kernel, bob, &handed.to_string(), "ping", &[], Some("p+1")).unwrap();
    kernel
        .handle_syscall(bob, VatSyscallObject::Subscribe { vpid: eref("p+1") })
        .unwrap();
    let kpid = kref_of(&kernel, bob, "p+1");
    kernel.run().unwrap();

    let delivered = deliveries(&mut kernel, bob);
    assert!(matches!(
        delivered.as_slice(),
        [VatDelivery::Notify { resolutions }] if resolutions[0].rejected
    ));
    assert!(
        !kernel.store().kernel_promise_exists(&kpid)
            || kernel.store().get_kernel_promise(&kpid).unwrap().state == PromiseState::Rejected
    );
}

#[test]
fn test_terminated_vat_releases_its_imports() {
    let (mut kernel, alice, bob) = test_bootstrap();
    let import = export_to(&mut kernel, bob, "o+1", alice);
    let ko = kref_of(&kernel, alice, &import.to_string());

    kernel.terminate_vat(alice, "done").unwrap();
    assert_eq!(kernel.store().get_ref_count(&ko).unwrap(), 1);
    assert_eq!(
        deliveries(&mut kernel, bob),
        vec![VatDelivery::DropExports {
            erefs: vec![eref("o+1")],
        }]
    );
}
