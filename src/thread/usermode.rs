//! User-mode entry seam.
//!
//! The kernel proper ends at `enter_new_process` / `enter_forked_process`.
//! On hardware these would load a trapframe and drop to user mode; here the
//! user-space side registers a program body per entry address (the loader's
//! reported entry point, or the post-syscall PC a forked child resumes at)
//! and the kernel transfers control to it. Neither entry function returns.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::mem;
use crate::thread::trapframe::Trapframe;
use crate::thread::{self};
use crate::{kdebug, kwarn};

/// Everything a program body gets handed on entry to user mode.
#[derive(Clone, Copy, Debug)]
pub struct UserContext {
    pub argc: usize,
    /// User address of the argv pointer array (0 when entered without argv).
    pub uargv: u64,
    pub stackptr: u64,
    pub entry: u64,
    /// Present when this entry resumes a forked child.
    pub trapframe: Option<Trapframe>,
}

type ProgramBody = Arc<dyn Fn(&UserContext) + Send + Sync>;

lazy_static! {
    static ref ENTRIES: Mutex<BTreeMap<u64, ProgramBody>> = Mutex::new(BTreeMap::new());
    static ref RESUMES: Mutex<BTreeMap<u64, ProgramBody>> = Mutex::new(BTreeMap::new());
}

/// Register the body run when a process enters user mode at `entry`.
pub fn register_program(entry: u64, body: impl Fn(&UserContext) + Send + Sync + 'static) {
    ENTRIES.lock().insert(entry, Arc::new(body));
}

/// Register the body a forked child resumes at: keyed by the program
/// counter after the fork syscall instruction.
pub fn register_resume(pc: u64, body: impl Fn(&UserContext) + Send + Sync + 'static) {
    RESUMES.lock().insert(pc, Arc::new(body));
}

/// Enter user mode at a fresh program image. Does not return.
pub fn enter_new_process(argc: usize, uargv: u64, stackptr: u64, entry: u64) -> ! {
    kdebug!(
        "enter_new_process: argc={} uargv={:#x} sp={:#x} entry={:#x}",
        argc,
        uargv,
        stackptr,
        entry
    );

    let body = ENTRIES.lock().get(&entry).cloned();
    match body {
        Some(body) => {
            let ctx = UserContext {
                argc,
                uargv,
                stackptr,
                entry,
                trapframe: None,
            };
            body(&ctx);
        }
        None => kwarn!("no user program registered at entry {:#x}", entry),
    }
    thread::thread_exit()
}

/// First code run by a forked child's kernel thread: activate the child's
/// address space, patch the trapframe so the child observes a zero return
/// from fork, advance past the syscall, and enter user mode. Does not
/// return.
pub fn enter_forked_process(mut tf: Trapframe) -> ! {
    mem::as_activate();
    tf.set_syscall_return(0);

    kdebug!("enter_forked_process: resuming at pc {:#x}", tf.tf_epc);

    let body = RESUMES.lock().get(&tf.tf_epc).cloned();
    match body {
        Some(body) => {
            let ctx = UserContext {
                argc: 0,
                uargv: 0,
                stackptr: tf.tf_sp,
                entry: tf.tf_epc,
                trapframe: Some(tf),
            };
            body(&ctx);
        }
        None => kwarn!("no resume body registered at pc {:#x}", tf.tf_epc),
    }
    thread::thread_exit()
}
