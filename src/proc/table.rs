//! PID registry.
//!
//! A bounded array from PID to PCB. Slot 0 permanently holds the kernel
//! process; slots 1..=PROC_MAX hold live user processes. Allocation scans
//! circularly from the last allocated PID, which amortizes to constant time
//! under light load and bounds the worst case to one full pass. All
//! operations hold the registry's short mutex; nothing inside a critical
//! section can block.

use std::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{Errno, Result};
use crate::kpanic;
use crate::limits::PROC_MAX;
use crate::proc::{Pid, Process};

struct ProcessTable {
    slots: Vec<Option<Arc<Process>>>,
    last_pid: usize,
}

impl ProcessTable {
    fn new() -> ProcessTable {
        ProcessTable {
            slots: vec![None; PROC_MAX + 1],
            last_pid: 0,
        }
    }
}

lazy_static! {
    static ref PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());
}

/// Install the kernel process in slot 0. Called once at bootstrap.
pub(crate) fn install_kernel(proc: &Arc<Process>) {
    let mut table = PROCESS_TABLE.lock();
    if table.slots[0].is_some() {
        kpanic!("kernel process slot already occupied");
    }
    table.slots[0] = Some(proc.clone());
}

/// Allocate a PID for `proc` and install it, in one critical section so
/// concurrent forks cannot race onto the same slot.
pub(crate) fn install(proc: &Arc<Process>) -> Result<Pid> {
    let mut table = PROCESS_TABLE.lock();
    let cursor = table.last_pid;
    for step in 0..PROC_MAX {
        let pid = (cursor + step) % PROC_MAX + 1;
        if table.slots[pid].is_none() {
            table.slots[pid] = Some(proc.clone());
            table.last_pid = pid;
            return Ok(pid as Pid);
        }
    }
    Err(Errno::ENPROC)
}

/// Drop the registry's reference to a PID. Freed PIDs become eligible for
/// reuse by later allocations.
pub(crate) fn remove(pid: Pid) -> Option<Arc<Process>> {
    if pid <= 0 || pid as usize > PROC_MAX {
        return None;
    }
    PROCESS_TABLE.lock().slots[pid as usize].take()
}

/// Look up a PCB by PID. PID 0 resolves to the kernel process.
pub fn lookup(pid: Pid) -> Option<Arc<Process>> {
    if pid < 0 || pid as usize > PROC_MAX {
        return None;
    }
    PROCESS_TABLE.lock().slots[pid as usize].clone()
}

/// Number of live user PIDs (slot 0 excluded). Diagnostic hook.
pub fn live_user_count() -> usize {
    let table = PROCESS_TABLE.lock();
    table.slots[1..].iter().filter(|slot| slot.is_some()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_lookup_remove_roundtrip() {
        let proc = Arc::new(Process::new_pcb("table-roundtrip"));
        let pid = install(&proc).unwrap();
        assert!(pid >= 1 && pid as usize <= PROC_MAX);

        let found = lookup(pid).expect("installed PID must resolve");
        assert!(Arc::ptr_eq(&found, &proc));

        let removed = remove(pid).expect("remove returns the PCB");
        assert!(Arc::ptr_eq(&removed, &proc));
        assert!(lookup(pid).is_none());
    }

    #[test]
    fn allocation_cursor_rotates_past_freed_pids() {
        let first = Arc::new(Process::new_pcb("cursor-a"));
        let second = Arc::new(Process::new_pcb("cursor-b"));

        let first_pid = install(&first).unwrap();
        remove(first_pid);

        // The cursor has moved on; the freed PID is not handed out again
        // until the scan wraps around.
        let second_pid = install(&second).unwrap();
        assert_ne!(second_pid, first_pid);
        remove(second_pid);
    }

    #[test]
    fn out_of_range_pids_resolve_to_nothing() {
        assert!(lookup(-1).is_none());
        assert!(lookup((PROC_MAX + 1) as Pid).is_none());
        assert!(remove(-1).is_none());
        assert!(remove((PROC_MAX + 1) as Pid).is_none());
    }
}
