//! execv: replace the calling process's image.
//!
//! Protocol: marshal the path and argv out of user memory, open the image,
//! build and activate a fresh address space, load the image, marshal argv
//! onto the new user stack, destroy the old address space, and enter user
//! mode at the new entry point. Any failure after the address-space swap
//! rolls the old one back in; the call does not return on success.

use crate::elf;
use crate::error::{Errno, Result};
use crate::ktrace;
use crate::limits::{AccessMode, OpenExtras, ARG_MAX, PATH_MAX};
use crate::mem::{
    self, copyin_uptr, copyinstr, copyinstr_bytes, copyout, AddressSpace,
};
use crate::proc;
use crate::thread::usermode;
use crate::vfs;

use crate::mem::copyinout::USER_PTR_SIZE;

fn round4(value: usize) -> usize {
    (value + 3) & !3
}

fn align4_down(value: u64) -> u64 {
    value & !3
}

fn align_ptr_down(value: u64) -> u64 {
    value & !(USER_PTR_SIZE as u64 - 1)
}

/// Copy the program path from user space. Null, empty, and overlong paths
/// are rejected before anything is allocated.
fn copyin_program_path(uprog: u64) -> Result<String> {
    if uprog == 0 {
        return Err(Errno::EFAULT);
    }
    let path = copyinstr(uprog, PATH_MAX)?;
    if path.is_empty() {
        return Err(Errno::EINVAL);
    }
    Ok(path)
}

/// Count argc by reading user pointers one at a time until the null
/// terminator. A vector longer than ARG_MAX worth of pointers is rejected
/// before any strings are copied.
fn count_user_args(uargv: u64) -> Result<usize> {
    let mut argc = 0usize;
    loop {
        let uptr = copyin_uptr(uargv + (argc * USER_PTR_SIZE) as u64)?;
        if uptr == 0 {
            return Ok(argc);
        }
        argc += 1;
        if argc > ARG_MAX / USER_PTR_SIZE {
            return Err(Errno::E2BIG);
        }
    }
}

/// Copy each argv string into an exactly sized kernel buffer, keeping a
/// running total of the stack footprint (strings padded to 4 bytes). The
/// pointer vector is re-read per element, never in bulk.
fn copyin_args_vector(uargv: u64, argc: usize) -> Result<Vec<Vec<u8>>> {
    let mut kargs = Vec::with_capacity(argc);
    let mut data_bytes = 0usize;

    for i in 0..argc {
        let uptr = copyin_uptr(uargv + (i * USER_PTR_SIZE) as u64)?;
        if uptr == 0 {
            // The vector shrank between the count pass and this one.
            return Err(Errno::EFAULT);
        }
        let arg = copyinstr_bytes(uptr, PATH_MAX)?;
        data_bytes = round4(data_bytes + arg.len() + 1);
        if data_bytes > ARG_MAX {
            return Err(Errno::E2BIG);
        }
        kargs.push(arg);
    }
    Ok(kargs)
}

/// Marshal argv onto the user stack of the current (new) address space.
///
/// Layout from low to high: the strings, each pushed with the stack pointer
/// aligned down to 4 bytes afterward, then the pointer array terminated by
/// a null entry and aligned to pointer size. Returns the final stack
/// pointer, which is also the user address of the array.
fn push_args_to_stack(mut sp: u64, kargs: &[Vec<u8>]) -> Result<(u64, u64)> {
    let mut data_bytes = 0usize;
    for arg in kargs {
        data_bytes = round4(data_bytes + arg.len() + 1);
    }
    let ptr_bytes = round4((kargs.len() + 1) * USER_PTR_SIZE);
    if ptr_bytes + data_bytes > ARG_MAX {
        return Err(Errno::E2BIG);
    }

    let mut uargv_ptrs = vec![0u64; kargs.len() + 1];
    for i in (0..kargs.len()).rev() {
        let len = kargs[i].len() + 1;
        sp = align4_down(sp - len as u64);
        let mut with_nul = Vec::with_capacity(len);
        with_nul.extend_from_slice(&kargs[i]);
        with_nul.push(0);
        copyout(&with_nul, sp)?;
        uargv_ptrs[i] = sp;
    }

    sp = align_ptr_down(sp - ((kargs.len() + 1) * USER_PTR_SIZE) as u64);
    let mut raw = Vec::with_capacity((kargs.len() + 1) * USER_PTR_SIZE);
    for uptr in &uargv_ptrs {
        raw.extend_from_slice(&uptr.to_le_bytes());
    }
    copyout(&raw, sp)?;

    Ok((sp, sp))
}

/// Put the old address space back and destroy the aborted new one.
fn rollback_as(old_space: Option<Box<AddressSpace>>) {
    let new_space = proc::proc_setas(old_space);
    mem::as_activate();
    drop(new_space);
}

/// execv(path, argv). Does not return on success.
pub fn sys_execv(uprog: u64, uargv: u64) -> Result<()> {
    if uprog == 0 || uargv == 0 {
        return Err(Errno::EFAULT);
    }

    let path = copyin_program_path(uprog)?;
    let argc = count_user_args(uargv)?;
    let kargs = copyin_args_vector(uargv, argc)?;

    let image = vfs::vfs_open(&path, AccessMode::ReadOnly, OpenExtras::empty())?;

    // From here to commit the new address space is current; every failure
    // swaps the old one back before surfacing the error.
    let new_space = match AddressSpace::new() {
        Ok(space) => space,
        Err(err) => {
            vfs::vfs_close(&image);
            return Err(err);
        }
    };
    let old_space = proc::proc_setas(Some(new_space));
    mem::as_activate();

    let entry = match elf::load_elf(&image) {
        Ok(entry) => entry,
        Err(err) => {
            rollback_as(old_space);
            vfs::vfs_close(&image);
            return Err(err);
        }
    };

    let stackptr = match mem::as_define_stack() {
        Ok(sp) => sp,
        Err(err) => {
            rollback_as(old_space);
            vfs::vfs_close(&image);
            return Err(err);
        }
    };

    let (stackptr, user_argv) = match push_args_to_stack(stackptr, &kargs) {
        Ok(result) => result,
        Err(err) => {
            rollback_as(old_space);
            vfs::vfs_close(&image);
            return Err(err);
        }
    };

    // Commit: the old image is gone, the new one is the process.
    drop(old_space);
    vfs::vfs_close(&image);
    drop(kargs);

    ktrace!("execv {:?}: entry {:#x}, sp {:#x}", path, entry, stackptr);
    usermode::enter_new_process(argc, user_argv, stackptr, entry)
}
