//! Kernel threads over host threads.
//!
//! Each kernel thread is bound to at most one process; the binding is the
//! host-thread-local `curproc`. `thread_fork` attaches the new thread to its
//! process before the thread runs, so a PCB's thread count never observes a
//! window where the thread exists but is unaccounted.

pub mod trapframe;
pub mod usermode;

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use crate::error::{Errno, Result};
use crate::proc::{self, Process};
use crate::{kfatal, kpanic, ktrace};

thread_local! {
    static CURRENT: RefCell<Option<Arc<Process>>> = const { RefCell::new(None) };
}

/// Payload used to unwind out of a kernel thread on `thread_exit`.
struct ThreadExitToken;

static EXIT_HOOK: Once = Once::new();

/// Silence the panic machinery for the controlled unwind `thread_exit`
/// performs; every other payload still reaches the previous hook.
pub(crate) fn install_exit_hook() {
    EXIT_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<ThreadExitToken>().is_some() {
                return;
            }
            previous(info);
        }));
    });
}

/// The process bound to the calling thread, if any.
pub fn try_current_proc() -> Option<Arc<Process>> {
    CURRENT.with(|cell| cell.borrow().clone())
}

/// The process bound to the calling thread. Calling from an unbound thread
/// is an invariant violation.
pub fn current_proc() -> Arc<Process> {
    match try_current_proc() {
        Some(proc) => proc,
        None => kpanic!("no current process on this kernel thread"),
    }
}

fn bind(proc: &Arc<Process>) {
    CURRENT.with(|cell| {
        let mut cur = cell.borrow_mut();
        if cur.is_some() {
            kpanic!("kernel thread already bound to a process");
        }
        *cur = Some(proc.clone());
    });
}

fn unbind() -> Option<Arc<Process>> {
    CURRENT.with(|cell| cell.borrow_mut().take())
}

/// Attach the calling thread to a process: thread-count accounting plus the
/// curproc binding. Used by the boot path and by harnesses that drive the
/// syscall layer directly from an existing thread.
pub fn attach_current(proc: &Arc<Process>) {
    proc::proc_addthread(proc);
    bind(proc);
}

/// Undo `attach_current`: clear the binding and drop the thread count.
pub fn detach_current() -> Option<Arc<Process>> {
    let proc = unbind();
    if let Some(ref proc) = proc {
        proc::proc_remthread(proc);
    }
    proc
}

/// Fork a kernel thread bound to `proc` running `entry`. The thread count
/// is taken in the caller's context; on spawn failure it is returned and
/// the error surfaces to the caller.
pub fn thread_fork(
    name: &str,
    proc: &Arc<Process>,
    entry: impl FnOnce() + Send + 'static,
) -> Result<()> {
    install_exit_hook();
    proc::proc_addthread(proc);

    let bound = proc.clone();
    let spawned = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            bind(&bound);
            drop(bound);

            let outcome = panic::catch_unwind(AssertUnwindSafe(entry));

            // A thread that returns without thread_exit still detaches.
            if let Some(proc) = unbind() {
                proc::proc_remthread(&proc);
            }

            match outcome {
                Ok(()) => {}
                Err(payload) if payload.downcast_ref::<ThreadExitToken>().is_some() => {}
                Err(payload) => {
                    kfatal!("kernel thread died on an unexpected panic");
                    panic::resume_unwind(payload);
                }
            }
        });

    match spawned {
        Ok(_handle) => Ok(()),
        Err(_) => {
            proc::proc_remthread(proc);
            Err(Errno::ENOMEM)
        }
    }
}

/// Terminate the calling kernel thread. Detaches from the bound process
/// first if the caller has not already done so.
pub fn thread_exit() -> ! {
    install_exit_hook();
    if let Some(proc) = unbind() {
        proc::proc_remthread(&proc);
    }
    ktrace!("thread_exit");
    panic::panic_any(ThreadExitToken)
}

/// Give up the CPU to another ready thread.
pub fn thread_yield() {
    std::thread::yield_now();
}
