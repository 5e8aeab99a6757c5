//! Kernel-wide error numbers.
//!
//! Every syscall path returns `Result<T>`; the user-facing ABI (negative
//! marker return plus errno cell) is applied by the syscall dispatcher, not
//! here. Codes follow the classic Unix numbering where one exists.

use core::fmt;

#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// Operation not permitted
    EPERM = 1,
    /// No such file or directory
    ENOENT = 2,
    /// No such process
    ESRCH = 3,
    /// Hardware I/O error
    EIO = 5,
    /// Argument list too long
    E2BIG = 7,
    /// Not executable: invalid or corrupt image
    ENOEXEC = 8,
    /// Bad file descriptor
    EBADF = 9,
    /// No child processes
    ECHILD = 10,
    /// Out of memory
    ENOMEM = 12,
    /// Bad user-space address
    EFAULT = 14,
    /// File exists
    EEXIST = 17,
    /// Not a directory
    ENOTDIR = 20,
    /// Is a directory
    EISDIR = 21,
    /// Invalid argument
    EINVAL = 22,
    /// Too many open files in system
    ENFILE = 23,
    /// Too many open files (per process)
    EMFILE = 24,
    /// No space left on device
    ENOSPC = 28,
    /// Illegal seek
    ESPIPE = 29,
    /// File name too long
    ENAMETOOLONG = 36,
    /// Function not implemented
    ENOSYS = 38,
    /// Too many processes
    ENPROC = 43,
}

impl Errno {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Errno::EPERM => "operation not permitted",
            Errno::ENOENT => "no such file or directory",
            Errno::ESRCH => "no such process",
            Errno::EIO => "input/output error",
            Errno::E2BIG => "argument list too long",
            Errno::ENOEXEC => "exec format error",
            Errno::EBADF => "bad file descriptor",
            Errno::ECHILD => "no child processes",
            Errno::ENOMEM => "out of memory",
            Errno::EFAULT => "bad address",
            Errno::EEXIST => "file exists",
            Errno::ENOTDIR => "not a directory",
            Errno::EISDIR => "is a directory",
            Errno::EINVAL => "invalid argument",
            Errno::ENFILE => "too many open files in system",
            Errno::EMFILE => "too many open files",
            Errno::ENOSPC => "no space left on device",
            Errno::ESPIPE => "illegal seek",
            Errno::ENAMETOOLONG => "file name too long",
            Errno::ENOSYS => "function not implemented",
            Errno::ENPROC => "too many processes",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

pub type Result<T> = core::result::Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_classic_numbering() {
        assert_eq!(Errno::EBADF.code(), 9);
        assert_eq!(Errno::EINVAL.code(), 22);
        assert_eq!(Errno::ESPIPE.code(), 29);
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(format!("{}", Errno::EMFILE), "too many open files (24)");
    }
}
