//! Kernel limits, open/seek flag decoding, and wait-status encoding.

use bitflags::bitflags;

use crate::error::{Errno, Result};

/// Highest user PID. PID 0 is permanently the kernel process, so the user
/// range is [1, PROC_MAX].
pub const PROC_MAX: usize = 64;

/// Descriptor-table size per process.
pub const OPEN_MAX: usize = 128;

/// Longest path accepted from user space, terminator included.
pub const PATH_MAX: usize = 1024;

/// Upper bound on the combined argv footprint for execv: strings (padded)
/// plus the pointer array.
pub const ARG_MAX: usize = 65536;

/// Raw open(2) flag bits as seen at the syscall boundary.
pub const O_RDONLY: u32 = 0;
pub const O_WRONLY: u32 = 1;
pub const O_RDWR: u32 = 2;
pub const O_ACCMODE: u32 = 3;
pub const O_CREAT: u32 = 4;
pub const O_EXCL: u32 = 8;
pub const O_TRUNC: u32 = 16;
pub const O_APPEND: u32 = 32;

pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

/// Access mode of an open file, resolved from the low two flag bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub const fn readable(self) -> bool {
        !matches!(self, AccessMode::WriteOnly)
    }

    pub const fn writable(self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

bitflags! {
    /// Optional open(2) behavior bits beyond the access mode.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenExtras: u32 {
        const CREATE = O_CREAT;
        const EXCL   = O_EXCL;
        const TRUNC  = O_TRUNC;
        const APPEND = O_APPEND;
    }
}

/// Split raw open flags into an access mode and the extra bits. Rejects an
/// invalid access-mode encoding, unknown bits, and append on a read-only
/// descriptor.
pub fn decode_open_flags(flags: u32) -> Result<(AccessMode, OpenExtras)> {
    let access = match flags & O_ACCMODE {
        O_RDONLY => AccessMode::ReadOnly,
        O_WRONLY => AccessMode::WriteOnly,
        O_RDWR => AccessMode::ReadWrite,
        _ => return Err(Errno::EINVAL),
    };

    let extras = OpenExtras::from_bits(flags & !O_ACCMODE).ok_or(Errno::EINVAL)?;

    if extras.contains(OpenExtras::APPEND) && access == AccessMode::ReadOnly {
        return Err(Errno::EINVAL);
    }

    Ok((access, extras))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

pub fn decode_whence(whence: i32) -> Result<Whence> {
    match whence {
        SEEK_SET => Ok(Whence::Set),
        SEEK_CUR => Ok(Whence::Cur),
        SEEK_END => Ok(Whence::End),
        _ => Err(Errno::EINVAL),
    }
}

/// Wait-status encoding reported by waitpid. The low two bits carry the
/// cause (00 = plain exit); the exit code sits above them.
pub mod wait {
    pub const fn mkwait_exit(code: i32) -> i32 {
        code << 2
    }

    pub const fn wifexited(status: i32) -> bool {
        status & 3 == 0
    }

    pub const fn wexitstatus(status: i32) -> i32 {
        status >> 2
    }
}
