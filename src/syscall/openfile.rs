//! Shared open-file objects.
//!
//! One object per open(2), shared between descriptor-table slots by dup2
//! and fork. The object's mutex serializes I/O so offsets move in request
//! order even when parent and child write through the same object; it is a
//! blocking lock and is deliberately held across the underlying VFS call.
//! The reference count tracks descriptor-table slots; the last release
//! closes the vnode.

use std::sync::{Arc, Mutex as BlockingMutex};

use crate::error::{Errno, Result};
use crate::kpanic;
use crate::limits::{AccessMode, Whence};
use crate::proc::Process;
use crate::vfs::{self, Vnode};

struct OpenFileState {
    /// Live until the last reference is released.
    vn: Option<Arc<Vnode>>,
    offset: i64,
    count: u32,
}

pub struct OpenFile {
    access: AccessMode,
    state: BlockingMutex<OpenFileState>,
}

impl OpenFile {
    /// Wrap a freshly opened vnode at one reference.
    pub fn create(vn: Arc<Vnode>, access: AccessMode, offset: i64) -> Arc<OpenFile> {
        Arc::new(OpenFile {
            access,
            state: BlockingMutex::new(OpenFileState {
                vn: Some(vn),
                offset,
                count: 1,
            }),
        })
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Current descriptor reference count. Diagnostic hook: across all
    /// descriptor tables, slots referencing this object must sum to it.
    pub fn refcount(&self) -> u32 {
        self.state.lock().expect("open file lock poisoned").count
    }

    /// Current byte offset. Diagnostic hook.
    pub fn offset(&self) -> i64 {
        self.state.lock().expect("open file lock poisoned").offset
    }

    /// Take an additional descriptor reference (fork inheritance).
    pub(crate) fn share(&self) {
        let mut state = self.state.lock().expect("open file lock poisoned");
        state.count += 1;
    }

    /// Take a reference and install it at `proc`'s descriptor `fd`, both
    /// under the object's mutex (dup2).
    pub(crate) fn dup_into(self: &Arc<Self>, proc: &Process, fd: usize) {
        let mut state = self.state.lock().expect("open file lock poisoned");
        state.count += 1;
        proc.files.lock()[fd] = Some(self.clone());
    }

    /// Drop one descriptor reference. At zero the vnode is closed after the
    /// object's mutex has been released.
    pub(crate) fn release(&self) {
        let to_close = {
            let mut state = self.state.lock().expect("open file lock poisoned");
            if state.count == 0 {
                drop(state);
                kpanic!("open file reference count underflow");
            }
            state.count -= 1;
            if state.count == 0 {
                state.vn.take()
            } else {
                None
            }
        };
        if let Some(vn) = to_close {
            vfs::vfs_close(&vn);
        }
    }

    /// Read at the cursor, advancing it by the transfer length.
    pub(crate) fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().expect("open file lock poisoned");
        let vn = state.vn.clone().ok_or(Errno::EBADF)?;
        let n = vn.read(buf, state.offset)?;
        state.offset += n as i64;
        Ok(n)
    }

    /// Write at the cursor, advancing it by the transfer length.
    pub(crate) fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().expect("open file lock poisoned");
        let vn = state.vn.clone().ok_or(Errno::EBADF)?;
        let n = vn.write(buf, state.offset)?;
        state.offset += n as i64;
        Ok(n)
    }

    /// Reposition the cursor. The new offset is computed, stored, and
    /// returned without leaving the object's mutex.
    pub(crate) fn seek(&self, pos: i64, whence: Whence) -> Result<i64> {
        let mut state = self.state.lock().expect("open file lock poisoned");
        let vn = state.vn.clone().ok_or(Errno::EBADF)?;
        if !vn.is_seekable() {
            return Err(Errno::ESPIPE);
        }

        let new_offset = match whence {
            Whence::Set => pos,
            Whence::Cur => state.offset.checked_add(pos).ok_or(Errno::EINVAL)?,
            Whence::End => vn.stat()?.size.checked_add(pos).ok_or(Errno::EINVAL)?,
        };
        if new_offset < 0 {
            return Err(Errno::EINVAL);
        }

        state.offset = new_offset;
        Ok(new_offset)
    }
}
