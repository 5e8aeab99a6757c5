//! Shared test harness.
//!
//! Binds the calling test thread to a console-equipped process with a live
//! address space, and stages data into that process's user memory so the
//! syscall layer can be driven with real user pointers. Plays the role of
//! the user-space side: program images are minimal ELF executables whose
//! bodies are registered against the entry points the loader reports.

#![allow(dead_code)]

use std::sync::Arc;

use astra_os::limits::{AccessMode, OpenExtras};
use astra_os::mem::{self, AddressSpace, USER_BASE, USER_TOP};
use astra_os::proc::{self, Process};
use astra_os::thread::{self, usermode};
use astra_os::vfs;

pub struct UserProc {
    pub proc: Arc<Process>,
    next: u64,
}

impl UserProc {
    /// Bootstrap the kernel, create a process, and bind it to this thread.
    pub fn spawn(name: &str) -> UserProc {
        astra_os::bootstrap();
        let proc = proc::proc_create_runprogram(name).expect("process creation");
        thread::attach_current(&proc);
        let old = proc::proc_setas(Some(AddressSpace::new().expect("address space")));
        assert!(old.is_none());
        mem::as_activate();
        UserProc {
            proc,
            next: USER_BASE + 0x1000,
        }
    }

    /// Reserve user scratch space.
    pub fn alloc(&mut self, len: usize) -> u64 {
        let addr = self.next;
        self.next = (self.next + len.max(1) as u64 + 7) & !7;
        assert!(
            self.next < USER_TOP - 0x20000,
            "user scratch region exhausted"
        );
        addr
    }

    /// Stage raw bytes into user memory; returns their user address.
    pub fn stage_bytes(&mut self, bytes: &[u8]) -> u64 {
        let addr = self.alloc(bytes.len());
        mem::copyout(bytes, addr).expect("stage bytes");
        addr
    }

    /// Stage a NUL-terminated string.
    pub fn stage_cstr(&mut self, s: &str) -> u64 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.stage_bytes(&bytes)
    }

    /// Stage a null-terminated pointer array (the terminator is appended).
    pub fn stage_ptr_array(&mut self, ptrs: &[u64]) -> u64 {
        let mut raw = Vec::with_capacity((ptrs.len() + 1) * 8);
        for ptr in ptrs {
            raw.extend_from_slice(&ptr.to_le_bytes());
        }
        raw.extend_from_slice(&0u64.to_le_bytes());
        self.stage_bytes(&raw)
    }

    /// Copy bytes back out of user memory.
    pub fn read_back(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        mem::copyin(addr, &mut buf).expect("read back");
        buf
    }
}

impl Drop for UserProc {
    fn drop(&mut self) {
        if let Some(current) = thread::detach_current() {
            proc::proc_destroy(current);
        }
    }
}

/// Build a minimal ELF64 executable with the given entry point and no
/// loadable segments.
pub fn minimal_exec_image(entry: u64) -> Vec<u8> {
    let mut raw = vec![0u8; 64];
    raw[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    raw[4] = 2; // 64-bit
    raw[5] = 1; // little-endian
    raw[6] = 1; // current version
    raw[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    raw[18..20].copy_from_slice(&62u16.to_le_bytes()); // x86-64
    raw[24..32].copy_from_slice(&entry.to_le_bytes());
    raw[52..54].copy_from_slice(&64u16.to_le_bytes()); // ehsize
    raw[54..56].copy_from_slice(&56u16.to_le_bytes()); // phentsize
    raw
}

/// Install an executable image in the filesystem and register the body that
/// runs when a process enters user mode at its entry point.
pub fn install_program(
    path: &str,
    entry: u64,
    body: impl Fn(&usermode::UserContext) + Send + Sync + 'static,
) {
    astra_os::bootstrap();
    let image = minimal_exec_image(entry);
    let vn = vfs::vfs_open(
        path,
        AccessMode::WriteOnly,
        OpenExtras::CREATE | OpenExtras::TRUNC,
    )
    .expect("install image");
    vn.write(&image, 0).expect("write image");
    vfs::vfs_close(&vn);
    usermode::register_program(entry, body);
}
