//! Process syscall scenarios: fork/wait/exit rendezvous, descriptor
//! inheritance, PID registry exhaustion and reuse.

mod common;

use astra_os::error::Errno;
use astra_os::limits::{wait, O_CREAT, O_RDONLY, O_TRUNC, O_WRONLY, PROC_MAX};
use astra_os::proc::{self, table};
use astra_os::syscall::{
    sys_close, sys_exit, sys_fork, sys_getpid, sys_open, sys_read, sys_waitpid, sys_write,
};
use astra_os::thread::trapframe::Trapframe;
use astra_os::thread::usermode;
use common::UserProc;
use serial_test::serial;

#[test]
#[serial]
fn getpid_matches_the_bound_process() {
    let up = UserProc::spawn("proc-getpid");
    assert_eq!(sys_getpid(), up.proc.pid());
}

#[test]
#[serial]
fn fork_shares_descriptors_and_waitpid_reaps_once() {
    let mut up = UserProc::spawn("proc-fork");
    let upath = up.stage_cstr("/forkfile");
    let fd = sys_open(upath, O_WRONLY | O_CREAT | O_TRUNC, 0).unwrap();

    let uparent = up.stage_bytes(b"Parent ");
    // Lands in the child's copied address space at the same address.
    let uchild = up.stage_bytes(b"Child ");

    const RESUME_PC: u64 = 0x7000_1000;
    usermode::register_resume(RESUME_PC + 4, move |ctx| {
        // Child side: zero return from fork, inherited descriptor.
        assert_eq!(ctx.trapframe.unwrap().tf_v0, 0);
        sys_write(fd, uchild, 6).unwrap();
        sys_exit(3);
    });

    let of = up.proc.open_file_at(fd as usize).unwrap();
    assert_eq!(of.refcount(), 1);

    let tf = Trapframe {
        tf_epc: RESUME_PC,
        ..Trapframe::default()
    };
    let child_pid = sys_fork(&tf).unwrap();
    assert!(child_pid > 0);
    assert_ne!(child_pid, sys_getpid());

    let looked_up = table::lookup(child_pid).expect("child registered");
    assert_eq!(looked_up.parent_pid(), up.proc.pid());

    sys_write(fd, uparent, 7).unwrap();

    let ustatus = up.alloc(4);
    assert_eq!(sys_waitpid(child_pid, ustatus, 0).unwrap(), child_pid);
    let status = i32::from_le_bytes(up.read_back(ustatus, 4).try_into().unwrap());
    assert!(wait::wifexited(status));
    assert_eq!(wait::wexitstatus(status), 3);

    // Reaping is exactly-once; the PID is gone afterwards.
    assert_eq!(sys_waitpid(child_pid, 0, 0), Err(Errno::ESRCH));
    assert!(table::lookup(child_pid).is_none());

    // The child's exit released its shared reference before signalling.
    assert_eq!(of.refcount(), 1);

    // Both writers went through the one offset stream.
    sys_close(fd).unwrap();
    let fd = sys_open(upath, O_RDONLY, 0).unwrap();
    let udst = up.alloc(32);
    let n = sys_read(fd, udst, 32).unwrap();
    assert_eq!(n, 13);
    let contents = up.read_back(udst, n);
    let text = String::from_utf8(contents).unwrap();
    assert!(text.contains("Parent"));
    assert!(text.contains("Child"));
    sys_close(fd).unwrap();
}

#[test]
#[serial]
fn waitpid_argument_and_identity_errors() {
    let _up = UserProc::spawn("proc-waitpid-errors");

    // Unsupported options.
    assert_eq!(sys_waitpid(1, 0, 1), Err(Errno::EINVAL));

    // Out of range; PID 0 is the kernel process, outside the user range.
    assert_eq!(sys_waitpid(-1, 0, 0), Err(Errno::ESRCH));
    assert_eq!(sys_waitpid(0, 0, 0), Err(Errno::ESRCH));
    assert_eq!(sys_waitpid((PROC_MAX + 1) as i32, 0, 0), Err(Errno::ESRCH));

    // Unoccupied PID.
    let free_pid = (1..=PROC_MAX as i32)
        .find(|&pid| table::lookup(pid).is_none())
        .expect("some free PID");
    assert_eq!(sys_waitpid(free_pid, 0, 0), Err(Errno::ESRCH));

    // A live process that is not our child.
    let stranger = proc::proc_create_runprogram("stranger").unwrap();
    assert_eq!(sys_waitpid(stranger.pid(), 0, 0), Err(Errno::ECHILD));
    proc::proc_destroy(stranger);
}

#[test]
#[serial]
fn waitpid_only_works_for_the_direct_parent() {
    let mut up = UserProc::spawn("proc-grandchild");

    const GRANDCHILD_PC: u64 = 0x7000_3000;
    const CHILD_PC: u64 = 0x7000_2000;

    usermode::register_resume(GRANDCHILD_PC + 4, |_ctx| {
        sys_exit(0);
    });
    usermode::register_resume(CHILD_PC + 4, |_ctx| {
        // Fork a grandchild and exit without waiting for it.
        let tf = Trapframe {
            tf_epc: GRANDCHILD_PC,
            ..Trapframe::default()
        };
        sys_fork(&tf).unwrap();
        sys_exit(5);
    });

    let tf = Trapframe {
        tf_epc: CHILD_PC,
        ..Trapframe::default()
    };
    let child = sys_fork(&tf).unwrap();

    let ustatus = up.alloc(4);
    assert_eq!(sys_waitpid(child, ustatus, 0).unwrap(), child);
    let status = i32::from_le_bytes(up.read_back(ustatus, 4).try_into().unwrap());
    assert_eq!(wait::wexitstatus(status), 5);

    // The child is reaped; waiting again finds no such process.
    assert_eq!(sys_waitpid(child, 0, 0), Err(Errno::ESRCH));
}

#[test]
#[serial]
fn fork_with_full_pid_registry_fails_cleanly() {
    let up = UserProc::spawn("proc-enproc");

    let mut fillers = Vec::new();
    loop {
        match proc::proc_create_runprogram("filler") {
            Ok(filler) => fillers.push(filler),
            Err(err) => {
                assert_eq!(err, Errno::ENPROC);
                break;
            }
        }
    }

    let live_before = table::live_user_count();
    let tf = Trapframe::default();
    assert_eq!(sys_fork(&tf), Err(Errno::ENPROC));

    // No partial side effects: no stray PCB, parent table intact.
    assert_eq!(table::live_user_count(), live_before);
    assert!(up.proc.open_file_at(0).is_some());
    assert!(up.proc.open_file_at(1).is_some());

    for filler in fillers {
        proc::proc_destroy(filler);
    }
}

#[test]
#[serial]
fn freed_pids_are_reusable_with_fresh_state() {
    let _up = UserProc::spawn("proc-reuse");

    let first = proc::proc_create_runprogram("reuse-probe").unwrap();
    let pid = first.pid();
    proc::proc_destroy(first);
    assert!(table::lookup(pid).is_none());

    // The allocator rotates, so the freed PID comes back within one full
    // pass of the registry.
    let mut made = Vec::new();
    let mut reused = None;
    for _ in 0..PROC_MAX {
        let probe = proc::proc_create_runprogram("reuse-scan").unwrap();
        if probe.pid() == pid {
            reused = Some(probe);
            break;
        }
        made.push(probe);
    }

    let fresh = reused.expect("freed PID reused within one registry pass");
    assert!(!fresh.has_exited());
    assert_eq!(fresh.thread_count(), 0);
    proc::proc_destroy(fresh);
    for probe in made {
        proc::proc_destroy(probe);
    }
}

#[test]
#[serial]
fn fork_requires_an_address_space() {
    let up = UserProc::spawn("proc-fork-noas");
    // Strip the address space: a kernel-context fork cannot copy one.
    let space = proc::proc_setas(None);
    assert!(space.is_some());

    let tf = Trapframe::default();
    assert_eq!(sys_fork(&tf), Err(Errno::EINVAL));
    assert!(table::lookup(up.proc.pid()).is_some());
}
