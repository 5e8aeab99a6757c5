//! Launching the first user program.
//!
//! Creates a console-equipped process, gives it a kernel thread, and inside
//! that thread builds the address space, loads the image, and drops to user
//! mode. Processes started this way have no parent (parent PID −1), so a
//! failed launch tears the PCB down instead of leaving it for a reaper that
//! will never come.

use crate::error::Result;
use crate::kerror;
use crate::limits::{AccessMode, OpenExtras};
use crate::mem::{self, AddressSpace};
use crate::proc::{self, Pid};
use crate::thread::{self, usermode};
use crate::vfs;
use crate::elf;

/// Start `path` as a new user process; returns its PID to the caller (the
/// kernel menu or a harness).
pub fn runprogram(path: &str) -> Result<Pid> {
    let proc = proc::proc_create_runprogram(path)?;
    let pid = proc.pid();

    let path_owned = path.to_string();
    let launched = thread::thread_fork(path, &proc, move || {
        if let Err(err) = load_and_enter(&path_owned) {
            kerror!("runprogram {:?} failed: {}", path_owned, err);
            if let Some(dead) = thread::detach_current() {
                proc::proc_destroy(dead);
            }
            thread::thread_exit();
        }
    });

    if let Err(err) = launched {
        proc::proc_destroy(proc);
        return Err(err);
    }
    Ok(pid)
}

/// Open, load, and enter the image. Runs on the new process's thread;
/// diverges on success.
fn load_and_enter(path: &str) -> Result<()> {
    let vn = vfs::vfs_open(path, AccessMode::ReadOnly, OpenExtras::empty())?;

    let space = match AddressSpace::new() {
        Ok(space) => space,
        Err(err) => {
            vfs::vfs_close(&vn);
            return Err(err);
        }
    };

    // A fresh process has no prior address space to roll back to.
    let old = proc::proc_setas(Some(space));
    debug_assert!(old.is_none());
    mem::as_activate();

    let entry = match elf::load_elf(&vn) {
        Ok(entry) => entry,
        Err(err) => {
            vfs::vfs_close(&vn);
            return Err(err);
        }
    };
    vfs::vfs_close(&vn);

    let stackptr = mem::as_define_stack()?;

    // The plain launch path passes no arguments.
    usermode::enter_new_process(0, 0, stackptr, entry)
}
