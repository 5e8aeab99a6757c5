//! Process control blocks and their lifecycle.
//!
//! A PCB owns its address space and descriptor table and shares its working
//! directory with the VFS through the vnode reference count. The pointer
//! lock (`inner`) is a short spin mutex guarding the pointer fields and the
//! thread count; the wait lock plus condition variable exist only for the
//! parent/child exit rendezvous and are never mixed with the pointer lock.

pub mod table;

use core::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex as BlockingMutex, Once};

use spin::Mutex;

use crate::error::Result;
use crate::limits::{AccessMode, OpenExtras, OPEN_MAX};
use crate::mem::{self, AddressSpace};
use crate::syscall::openfile::OpenFile;
use crate::thread;
use crate::vfs::{self, Vnode};
use crate::{kpanic, ktrace};

pub type Pid = i32;

/// PID of the kernel process.
pub const KERNEL_PID: Pid = 0;

/// Parent PID of a process with no parent (the first user process).
pub const NO_PARENT: Pid = -1;

/// Fields guarded by the PCB's short pointer lock.
pub struct ProcInner {
    pub addrspace: Option<Box<AddressSpace>>,
    pub cwd: Option<Arc<Vnode>>,
    pub numthreads: u32,
}

/// Exit rendezvous state, guarded by the wait lock.
pub struct WaitState {
    pub exited: bool,
    pub exitcode: i32,
}

pub type FileTable = [Option<Arc<OpenFile>>; OPEN_MAX];

pub struct Process {
    name: String,
    pid: AtomicI32,
    parent_pid: AtomicI32,
    pub(crate) inner: Mutex<ProcInner>,
    pub(crate) files: Mutex<FileTable>,
    pub(crate) wait: BlockingMutex<WaitState>,
    pub(crate) wait_cv: Condvar,
}

impl Process {
    fn new_pcb(name: &str) -> Process {
        Process {
            name: name.to_string(),
            pid: AtomicI32::new(NO_PARENT),
            parent_pid: AtomicI32::new(NO_PARENT),
            inner: Mutex::new(ProcInner {
                addrspace: None,
                cwd: None,
                numthreads: 0,
            }),
            files: Mutex::new([(); OPEN_MAX].map(|_| None)),
            wait: BlockingMutex::new(WaitState {
                exited: false,
                exitcode: 0,
            }),
            wait_cv: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Pid {
        self.pid.load(Ordering::Acquire)
    }

    fn set_pid(&self, pid: Pid) {
        self.pid.store(pid, Ordering::Release);
    }

    pub fn parent_pid(&self) -> Pid {
        self.parent_pid.load(Ordering::Acquire)
    }

    pub(crate) fn set_parent_pid(&self, pid: Pid) {
        self.parent_pid.store(pid, Ordering::Release);
    }

    /// Whether the process has run its exit path.
    pub fn has_exited(&self) -> bool {
        self.wait.lock().expect("wait lock poisoned").exited
    }

    /// Live kernel threads attached to this PCB.
    pub fn thread_count(&self) -> u32 {
        self.inner.lock().numthreads
    }

    /// The open-file object at a descriptor, if any. Diagnostic hook for
    /// the refcount invariant; the syscall layer owns all mutation.
    pub fn open_file_at(&self, fd: usize) -> Option<Arc<OpenFile>> {
        if fd >= OPEN_MAX {
            return None;
        }
        self.files.lock()[fd].clone()
    }
}

static KPROC_INIT: Once = Once::new();

/// Create the kernel process in PID slot 0. Idempotent.
pub fn proc_bootstrap() {
    KPROC_INIT.call_once(|| {
        let kproc = Arc::new(Process::new_pcb("[kernel]"));
        kproc.set_pid(KERNEL_PID);
        table::install_kernel(&kproc);
        ktrace!("kernel process installed at PID 0");
    });
}

/// The kernel process.
pub fn kproc() -> Arc<Process> {
    match table::lookup(KERNEL_PID) {
        Some(proc) => proc,
        None => kpanic!("kernel process missing; proc_bootstrap not run"),
    }
}

/// Allocate a PCB and register it under a fresh PID.
fn proc_create(name: &str) -> Result<Arc<Process>> {
    let proc = Arc::new(Process::new_pcb(name));
    let pid = table::install(&proc)?;
    proc.set_pid(pid);
    ktrace!("created process {:?} as PID {}", name, pid);
    Ok(proc)
}

/// Share the creator's working directory with a new PCB, bumping the VFS
/// reference under the creator's pointer lock.
fn inherit_cwd(child: &Arc<Process>) {
    if let Some(parent) = thread::try_current_proc() {
        let shared = {
            let parent_inner = parent.inner.lock();
            if let Some(cwd) = parent_inner.cwd.as_ref() {
                cwd.incref();
                Some(cwd.clone())
            } else {
                None
            }
        };
        if let Some(cwd) = shared {
            child.inner.lock().cwd = Some(cwd);
        }
    }
}

/// Bind one console descriptor on a fresh process.
fn start_console(proc: &Arc<Process>, fd: usize, access: AccessMode) -> Result<()> {
    let vn = vfs::vfs_open("con:", access, OpenExtras::empty())?;
    let of = OpenFile::create(vn, access, 0);
    proc.files.lock()[fd] = Some(of);
    Ok(())
}

/// Create a fresh process for launching a program: descriptors 0/1/2 bound
/// to the console (read-only, write-only, write-only) and the creator's
/// working directory shared in.
pub fn proc_create_runprogram(name: &str) -> Result<Arc<Process>> {
    let proc = proc_create(name)?;

    let consoles = [
        (0, AccessMode::ReadOnly),
        (1, AccessMode::WriteOnly),
        (2, AccessMode::WriteOnly),
    ];
    for (fd, access) in consoles {
        if let Err(err) = start_console(&proc, fd, access) {
            proc_destroy(proc);
            return Err(err);
        }
    }

    inherit_cwd(&proc);
    Ok(proc)
}

/// Create a child PCB for fork: same registration and cwd sharing as the
/// program-launch path, but no console descriptors, since fork inherits
/// every parent slot (consoles included) instead.
pub(crate) fn proc_create_child(name: &str) -> Result<Arc<Process>> {
    let proc = proc_create(name)?;
    inherit_cwd(&proc);
    Ok(proc)
}

/// Tear down a PCB: unregister the PID, release the working directory,
/// destroy the address space, and drop every descriptor reference. The
/// caller must hold the only meaningful reference; live threads or the
/// kernel PCB here are invariant violations.
pub fn proc_destroy(proc: Arc<Process>) {
    let pid = proc.pid();
    if pid == KERNEL_PID {
        kpanic!("attempt to destroy the kernel process");
    }

    table::remove(pid);

    let cwd = proc.inner.lock().cwd.take();
    if let Some(cwd) = cwd {
        cwd.decref();
    }

    // If the dying process is current, swap the address space out of the
    // PCB before deactivating, so a context switch cannot re-activate it
    // in between.
    let is_current = thread::try_current_proc().is_some_and(|cur| Arc::ptr_eq(&cur, &proc));
    let space = proc.inner.lock().addrspace.take();
    if space.is_some() && is_current {
        mem::as_deactivate();
    }
    drop(space);

    let detached: Vec<Arc<OpenFile>> = {
        let mut files = proc.files.lock();
        files.iter_mut().filter_map(|slot| slot.take()).collect()
    };
    for of in detached {
        of.release();
    }

    let threads = proc.inner.lock().numthreads;
    if threads != 0 {
        kpanic!("PID {}: destroyed with {} live threads", pid, threads);
    }

    ktrace!("destroyed PID {}", pid);
}

/// Account a new thread to a process.
pub fn proc_addthread(proc: &Arc<Process>) {
    proc.inner.lock().numthreads += 1;
}

/// Remove a thread from its process. A zero count here is an invariant
/// violation.
pub fn proc_remthread(proc: &Arc<Process>) {
    let mut inner = proc.inner.lock();
    if inner.numthreads == 0 {
        drop(inner);
        kpanic!("PID {}: thread count underflow", proc.pid());
    }
    inner.numthreads -= 1;
}

/// Swap the current process's address space, returning the old one for
/// restoration or disposal. Ownership transfers with the handle.
pub fn proc_setas(new: Option<Box<AddressSpace>>) -> Option<Box<AddressSpace>> {
    let proc = thread::current_proc();
    let mut inner = proc.inner.lock();
    core::mem::replace(&mut inner.addrspace, new)
}
