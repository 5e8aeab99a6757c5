//! Virtual file layer.
//!
//! Backs all file I/O and path resolution for the syscall layer: a
//! hierarchical in-memory filesystem plus the `con:` console device. Vnodes
//! carry an explicit reference count; `vfs_open` hands out a vnode at one
//! reference and `vfs_close` drops one.

pub mod console;
pub mod ramfs;

use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{Errno, Result};
use crate::limits::{AccessMode, OpenExtras};
use crate::thread;
use crate::{kpanic, ktrace};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    CharDevice,
}

/// Metadata returned by a vnode stat.
#[derive(Clone, Copy, Debug)]
pub struct VnodeStat {
    pub file_type: FileType,
    pub size: i64,
}

/// Per-object operations behind a vnode.
pub trait VnodeOps: Send + Sync {
    fn read(&self, buf: &mut [u8], offset: i64) -> Result<usize>;
    fn write(&self, buf: &[u8], offset: i64) -> Result<usize>;
    fn stat(&self) -> Result<VnodeStat>;
    fn is_seekable(&self) -> bool;
}

/// A handle onto an open filesystem object or device.
pub struct Vnode {
    path: String,
    refs: AtomicU32,
    ops: Box<dyn VnodeOps>,
}

impl Vnode {
    fn new(path: String, ops: Box<dyn VnodeOps>) -> Arc<Vnode> {
        Arc::new(Vnode {
            path,
            refs: AtomicU32::new(1),
            ops,
        })
    }

    pub(crate) fn new_device(path: &str, ops: Box<dyn VnodeOps>) -> Arc<Vnode> {
        Vnode::new(path.to_string(), ops)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn refcount(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Take an additional reference.
    pub fn incref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference. Dropping below zero is an invariant violation.
    pub fn decref(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            kpanic!("vnode {}: reference count underflow", self.path);
        }
        if prev == 1 {
            ktrace!("vnode {}: last reference dropped", self.path);
        }
    }

    pub fn read(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        self.ops.read(buf, offset)
    }

    pub fn write(&self, buf: &[u8], offset: i64) -> Result<usize> {
        self.ops.write(buf, offset)
    }

    pub fn stat(&self) -> Result<VnodeStat> {
        self.ops.stat()
    }

    pub fn is_seekable(&self) -> bool {
        self.ops.is_seekable()
    }
}

/// Initialize the filesystem root. Idempotent.
pub fn bootstrap() {
    ramfs::bootstrap();
}

/// Open a path relative to the caller's working directory. `con:` names the
/// console device. Returns a vnode holding one reference.
pub fn vfs_open(path: &str, access: AccessMode, extras: OpenExtras) -> Result<Arc<Vnode>> {
    if path.is_empty() {
        return Err(Errno::EINVAL);
    }
    if path == "con:" {
        return Ok(console::open());
    }

    let abs = resolve(path)?;
    let file = ramfs::open_file(&abs, access, extras)?;
    Ok(Vnode::new(abs, Box::new(ramfs::RamFileVnode::new(file))))
}

/// Release one reference on an open vnode.
pub fn vfs_close(vn: &Arc<Vnode>) {
    vn.decref();
}

/// Change the caller's working directory.
pub fn vfs_chdir(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Errno::EINVAL);
    }

    let abs = resolve(path)?;
    if !ramfs::is_dir(&abs) {
        return Err(if ramfs::exists(&abs) {
            Errno::ENOTDIR
        } else {
            Errno::ENOENT
        });
    }

    let new_cwd = Vnode::new(abs, Box::new(ramfs::DirVnode));

    let proc = thread::current_proc();
    let old = {
        let mut inner = proc.inner.lock();
        inner.cwd.replace(new_cwd)
    };
    if let Some(old) = old {
        old.decref();
    }
    Ok(())
}

/// Copy the caller's working directory path into `buf`; returns the number
/// of bytes written. No trailing NUL is added.
pub fn vfs_getcwd(buf: &mut [u8]) -> Result<usize> {
    let path = current_dir();
    let bytes = path.as_bytes();
    if bytes.len() > buf.len() {
        return Err(Errno::ENAMETOOLONG);
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

/// Create a directory. Parent must already exist.
pub fn vfs_mkdir(path: &str) -> Result<()> {
    let abs = resolve(path)?;
    ramfs::mkdir(&abs)
}

fn current_dir() -> String {
    thread::try_current_proc()
        .and_then(|proc| {
            let inner = proc.inner.lock();
            inner.cwd.as_ref().map(|vn| vn.path().to_string())
        })
        .unwrap_or_else(|| String::from("/"))
}

/// Resolve a path to canonical absolute form, collapsing `.` and `..`.
fn resolve(path: &str) -> Result<String> {
    let base = if path.starts_with('/') {
        String::new()
    } else {
        current_dir()
    };

    let mut parts: Vec<&str> = Vec::new();
    for component in base.split('/').chain(path.split('/')) {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Errno::EINVAL);
                }
            }
            name => parts.push(name),
        }
    }

    if parts.is_empty() {
        Ok(String::from("/"))
    } else {
        Ok(format!("/{}", parts.join("/")))
    }
}
