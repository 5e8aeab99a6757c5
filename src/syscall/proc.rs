//! Process system calls: getpid, fork, waitpid, _exit.

use std::sync::Arc;

use crate::error::{Errno, Result};
use crate::limits::{wait, OPEN_MAX, PROC_MAX};
use crate::mem::{self, copyout_i32};
use crate::proc::{self, table, Pid};
use crate::syscall::openfile::OpenFile;
use crate::thread::trapframe::Trapframe;
use crate::thread::{self, usermode};
use crate::{kpanic, ktrace};

/// getpid() -> pid. Cannot fail.
pub fn sys_getpid() -> Pid {
    thread::current_proc().pid()
}

/// fork(trapframe) -> child pid (parent side).
///
/// The child's kernel thread enters user mode through the forked-process
/// path and observes a zero return from the same syscall. Every allocation
/// made before a failure point is unwound before the error is returned.
pub fn sys_fork(tf: &Trapframe) -> Result<Pid> {
    let parent = thread::current_proc();

    // Child PCB: registered PID, shared cwd, empty descriptor table. The
    // console slots come from inheritance below, not console bootstrap.
    let child = proc::proc_create_child(parent.name())?;
    child.set_parent_pid(parent.pid());

    // Copy the address space.
    let child_space = {
        let parent_inner = parent.inner.lock();
        match parent_inner.addrspace.as_ref() {
            Some(space) => space.copy(),
            None => Err(Errno::EINVAL),
        }
    };
    let child_space = match child_space {
        Ok(space) => space,
        Err(err) => {
            proc::proc_destroy(child);
            return Err(err);
        }
    };
    child.inner.lock().addrspace = Some(child_space);

    // Share every open descriptor: same index, same object, one more
    // reference each. Parent and child tables stay independent; the
    // underlying objects and their offsets are shared.
    for idx in 0..OPEN_MAX {
        let inherited = { parent.files.lock()[idx].clone() };
        if let Some(of) = inherited {
            of.share();
            child.files.lock()[idx] = Some(of);
        }
    }

    // Heap snapshot of the trapframe for the child thread.
    let child_tf = Box::new(*tf);

    let child_pid = child.pid();
    let forked = thread::thread_fork(parent.name(), &child, move || {
        usermode::enter_forked_process(*child_tf);
    });

    if let Err(err) = forked {
        // Undo the descriptor shares, then tear the child down.
        let shared: Vec<Arc<OpenFile>> = {
            let mut files = child.files.lock();
            files.iter_mut().filter_map(|slot| slot.take()).collect()
        };
        for of in shared {
            of.release();
        }
        child.inner.lock().addrspace = None;
        proc::proc_destroy(child);
        return Err(err);
    }

    ktrace!("PID {}: forked child PID {}", parent.pid(), child_pid);
    Ok(child_pid)
}

/// waitpid(pid, status, options) -> pid
///
/// Blocks on the child's condition variable until its exit flag is set,
/// then reaps the PCB. Only the direct parent may wait.
pub fn sys_waitpid(pid: Pid, ustatus: u64, options: i32) -> Result<Pid> {
    if options != 0 {
        return Err(Errno::EINVAL);
    }
    if pid <= 0 || pid as usize > PROC_MAX {
        return Err(Errno::ESRCH);
    }

    let caller = thread::current_proc();
    let child = table::lookup(pid).ok_or(Errno::ESRCH)?;

    if child.parent_pid() != caller.pid() {
        return Err(Errno::ECHILD);
    }

    let exitcode = {
        let mut state = child.wait.lock().expect("wait lock poisoned");
        while !state.exited {
            state = child.wait_cv.wait(state).expect("wait lock poisoned");
        }
        state.exitcode
    };

    if ustatus != 0 {
        copyout_i32(ustatus, exitcode)?;
    }

    proc::proc_destroy(child);

    ktrace!("PID {}: reaped child PID {}", caller.pid(), pid);
    Ok(pid)
}

/// _exit(code). Does not return.
///
/// Ordering: detach the calling thread so the process quiesces, release
/// held resources, then publish the exit status under the wait lock and
/// wake any waiting parent. The PCB stays in the registry for the parent
/// to reap.
pub fn sys_exit(code: i32) -> ! {
    let proc = thread::current_proc();
    if proc.pid() == proc::KERNEL_PID {
        kpanic!("_exit called from the kernel process");
    }

    thread::detach_current();

    // Working directory back to the VFS.
    let cwd = proc.inner.lock().cwd.take();
    if let Some(cwd) = cwd {
        cwd.decref();
    }

    // Swap the address space out of the PCB, then deactivate, then destroy;
    // a context switch between the first two steps must not be able to
    // re-activate it.
    let space = proc.inner.lock().addrspace.take();
    if space.is_some() {
        mem::as_deactivate();
    }
    drop(space);

    // Close every descriptor with the detach-then-release ordering.
    let open: Vec<Arc<OpenFile>> = {
        let mut files = proc.files.lock();
        files.iter_mut().filter_map(|slot| slot.take()).collect()
    };
    for of in open {
        of.release();
    }

    {
        let mut state = proc.wait.lock().expect("wait lock poisoned");
        state.exitcode = wait::mkwait_exit(code);
        state.exited = true;
        proc.wait_cv.notify_all();
    }

    ktrace!("PID {}: exited with code {}", proc.pid(), code);
    thread::thread_exit()
}
