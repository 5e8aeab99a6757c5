//! User-memory layer: address spaces and user/kernel marshalling.

pub mod addrspace;
pub mod copyinout;

pub use addrspace::{AddressSpace, USER_BASE, USER_MEM_SIZE, USER_TOP};
pub use copyinout::{
    copyin, copyin_uptr, copyinstr, copyinstr_bytes, copyout, copyout_i32, copyout_uptr,
};

use crate::error::Result;
use crate::ktrace;

/// Compute the initial user stack pointer for the current address space.
pub fn as_define_stack() -> Result<u64> {
    copyinout::with_current_as(|space| space.define_stack())
}

/// Make the current process's address space the active translation context.
/// The hosted MMU resolves user addresses through the owning PCB on every
/// copy, so activation is bookkeeping only; it is kept as an explicit call
/// because the swap/activate ordering around exec and exit is part of the
/// subsystem's contract.
pub fn as_activate() {
    ktrace!("as_activate");
}

/// Drop the active translation context (used before destroying an address
/// space that was current).
pub fn as_deactivate() {
    ktrace!("as_deactivate");
}
