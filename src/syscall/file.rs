//! File system calls: open, close, read, write, lseek, dup2, chdir, getcwd.
//!
//! Descriptor tables are per-process; the objects behind them are shared.
//! I/O uses a kernel bounce buffer: copy in before the write, copy out the
//! read prefix after, with the VFS transfer itself made under the object's
//! mutex and never under a spin lock.

use std::sync::Arc;

use crate::error::{Errno, Result};
use crate::ktrace;
use crate::limits::{decode_open_flags, decode_whence, OpenExtras, OPEN_MAX, PATH_MAX};
use crate::mem::{copyin, copyinstr, copyout};
use crate::proc::Process;
use crate::syscall::openfile::OpenFile;
use crate::thread;
use crate::vfs::{self, console};

/// Descriptors below this route to the console when their table slot is
/// empty.
const CONSOLE_FDS: usize = 3;

fn fd_index(fd: i32) -> Result<usize> {
    if fd < 0 || fd as usize >= OPEN_MAX {
        return Err(Errno::EBADF);
    }
    Ok(fd as usize)
}

fn slot(proc: &Process, idx: usize) -> Option<Arc<OpenFile>> {
    proc.files.lock()[idx].clone()
}

/// open(path, flags, mode) -> fd
pub fn sys_open(upath: u64, flags: u32, _mode: u32) -> Result<i32> {
    if upath == 0 {
        return Err(Errno::EFAULT);
    }
    let path = copyinstr(upath, PATH_MAX)?;
    if path.is_empty() {
        return Err(Errno::EINVAL);
    }
    let (access, extras) = decode_open_flags(flags)?;

    let vn = vfs::vfs_open(&path, access, extras)?;

    let offset = if extras.contains(OpenExtras::APPEND) {
        match vn.stat() {
            Ok(stat) => stat.size,
            Err(err) => {
                vfs::vfs_close(&vn);
                return Err(err);
            }
        }
    } else {
        0
    };

    let of = OpenFile::create(vn, access, offset);

    let proc = thread::current_proc();
    let fd = {
        let mut files = proc.files.lock();
        match files.iter().position(|slot| slot.is_none()) {
            Some(idx) => {
                files[idx] = Some(of.clone());
                idx
            }
            None => {
                drop(files);
                of.release();
                return Err(Errno::EMFILE);
            }
        }
    };

    ktrace!("PID {}: open {:?} -> fd {}", proc.pid(), path, fd);
    Ok(fd as i32)
}

/// close(fd)
///
/// The slot is emptied before the reference is dropped, so no other thread
/// can re-observe the descriptor once the object may be gone.
pub fn sys_close(fd: i32) -> Result<()> {
    let idx = fd_index(fd)?;
    let proc = thread::current_proc();
    let of = { proc.files.lock()[idx].take().ok_or(Errno::EBADF)? };
    of.release();
    Ok(())
}

/// read(fd, buf, nbytes) -> bytes read
pub fn sys_read(fd: i32, ubuf: u64, nbytes: usize) -> Result<usize> {
    let idx = fd_index(fd)?;
    if ubuf == 0 {
        return Err(Errno::EFAULT);
    }
    let proc = thread::current_proc();

    let of = match slot(&proc, idx) {
        Some(of) => of,
        None if idx < CONSOLE_FDS => {
            // Standard descriptor with no table entry: console input.
            let mut kbuf = vec![0u8; nbytes];
            let n = console::read(&mut kbuf);
            copyout(&kbuf[..n], ubuf)?;
            return Ok(n);
        }
        None => return Err(Errno::EBADF),
    };

    if !of.access().readable() {
        return Err(Errno::EBADF);
    }

    let mut kbuf = vec![0u8; nbytes];
    let n = of.read(&mut kbuf)?;
    copyout(&kbuf[..n], ubuf)?;
    Ok(n)
}

/// write(fd, buf, nbytes) -> bytes written
pub fn sys_write(fd: i32, ubuf: u64, nbytes: usize) -> Result<usize> {
    let idx = fd_index(fd)?;
    if ubuf == 0 {
        return Err(Errno::EFAULT);
    }
    let proc = thread::current_proc();

    let mut kbuf = vec![0u8; nbytes];
    copyin(ubuf, &mut kbuf)?;

    let of = match slot(&proc, idx) {
        Some(of) => of,
        None if idx < CONSOLE_FDS => {
            // Standard descriptor with no table entry: console output.
            return Ok(console::write(&kbuf));
        }
        None => return Err(Errno::EBADF),
    };

    if !of.access().writable() {
        return Err(Errno::EBADF);
    }

    of.write(&kbuf)
}

/// lseek(fd, pos, whence) -> new offset
pub fn sys_lseek(fd: i32, pos: i64, whence: i32) -> Result<i64> {
    let idx = fd_index(fd)?;
    let proc = thread::current_proc();
    let of = slot(&proc, idx).ok_or(Errno::EBADF)?;
    let whence = decode_whence(whence)?;
    of.seek(pos, whence)
}

/// dup2(oldfd, newfd) -> newfd
pub fn sys_dup2(oldfd: i32, newfd: i32) -> Result<i32> {
    let old = fd_index(oldfd)?;
    let new = fd_index(newfd)?;
    let proc = thread::current_proc();

    let of = slot(&proc, old).ok_or(Errno::EBADF)?;
    if old == new {
        return Ok(newfd);
    }

    // An occupied target is closed first, with the usual detach-then-release
    // ordering.
    let displaced = { proc.files.lock()[new].take() };
    if let Some(displaced) = displaced {
        displaced.release();
    }

    of.dup_into(&proc, new);
    Ok(newfd)
}

/// chdir(path)
pub fn sys_chdir(upath: u64) -> Result<()> {
    if upath == 0 {
        return Err(Errno::EFAULT);
    }
    let path = copyinstr(upath, PATH_MAX)?;
    vfs::vfs_chdir(&path)
}

/// __getcwd(buf, buflen) -> bytes written
pub fn sys_getcwd(ubuf: u64, buflen: usize) -> Result<usize> {
    if ubuf == 0 {
        return Err(Errno::EFAULT);
    }
    let mut kbuf = vec![0u8; buflen];
    let n = vfs::vfs_getcwd(&mut kbuf)?;
    copyout(&kbuf[..n], ubuf)?;
    Ok(n)
}
