//! Copy-in/copy-out between user and kernel memory.
//!
//! All user pointers are untrusted: every transfer is bounds-checked against
//! the calling process's address space, string copies carry an explicit
//! maximum, and pointer vectors are read one element at a time by the
//! callers. The PCB pointer lock is held only for the duration of the
//! memory copy itself, never across anything that can block.

use crate::error::{Errno, Result};
use crate::mem::addrspace::AddressSpace;
use crate::thread;

/// Size of a user pointer as laid out in user memory.
pub const USER_PTR_SIZE: usize = 8;

pub(crate) fn with_current_as<R>(f: impl FnOnce(&mut AddressSpace) -> Result<R>) -> Result<R> {
    let proc = thread::current_proc();
    let mut inner = proc.inner.lock();
    let space = inner.addrspace.as_mut().ok_or(Errno::EFAULT)?;
    f(space)
}

/// Copy `dst.len()` bytes in from user address `usrc`.
pub fn copyin(usrc: u64, dst: &mut [u8]) -> Result<()> {
    with_current_as(|space| space.read_bytes(usrc, dst))
}

/// Copy `src` out to user address `udst`.
pub fn copyout(src: &[u8], udst: u64) -> Result<()> {
    with_current_as(|space| space.write_bytes(udst, src))
}

/// Copy a NUL-terminated string in from user space, bounded by `maxlen`
/// bytes including the terminator. Returns the bytes without the NUL.
pub fn copyinstr_bytes(usrc: u64, maxlen: usize) -> Result<Vec<u8>> {
    with_current_as(|space| space.read_cstring(usrc, maxlen))
}

/// As `copyinstr_bytes`, decoded as UTF-8 for the path-taking syscalls.
pub fn copyinstr(usrc: u64, maxlen: usize) -> Result<String> {
    let bytes = copyinstr_bytes(usrc, maxlen)?;
    String::from_utf8(bytes).map_err(|_| Errno::EINVAL)
}

/// Read a single user pointer word.
pub fn copyin_uptr(uaddr: u64) -> Result<u64> {
    let mut raw = [0u8; USER_PTR_SIZE];
    copyin(uaddr, &mut raw)?;
    Ok(u64::from_le_bytes(raw))
}

/// Write a single user pointer word.
pub fn copyout_uptr(udst: u64, value: u64) -> Result<()> {
    copyout(&value.to_le_bytes(), udst)
}

/// Write a 32-bit value (waitpid status, and friends).
pub fn copyout_i32(udst: u64, value: i32) -> Result<()> {
    copyout(&value.to_le_bytes(), udst)
}
