//! System-call layer.
//!
//! Each `sys_*` function returns `Result<T, Errno>`; the external dispatcher
//! translates that into the user-visible errno-and-marker ABI. User pointer
//! arguments arrive as raw addresses and are marshalled through the
//! copy-in/out layer before use.

pub mod exec;
pub mod file;
pub mod openfile;
pub mod proc;

pub use exec::sys_execv;
pub use file::{
    sys_chdir, sys_close, sys_dup2, sys_getcwd, sys_lseek, sys_open, sys_read, sys_write,
};
pub use proc::{sys_exit, sys_fork, sys_getpid, sys_waitpid};
