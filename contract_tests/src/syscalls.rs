//! Syscall wire contract
//!
//! A syscall is a JSON array whose first element is the operation name.

use kernel_api::syscalls;

// ===== Operation Names =====
pub const SYSCALL_NAMES: [&str; 11] = [
    syscalls::SEND,
    syscalls::RESOLVE,
    syscalls::SUBSCRIBE,
    syscalls::DROP_IMPORTS,
    syscalls::RETIRE_IMPORTS,
    syscalls::RETIRE_EXPORTS,
    syscalls::ABANDON_EXPORTS,
    syscalls::VATSTORE_GET,
    syscalls::VATSTORE_GET_NEXT_KEY,
    syscalls::VATSTORE_SET,
    syscalls::VATSTORE_DELETE,
];
