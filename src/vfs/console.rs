//! Console device (`con:`).
//!
//! Input is a byte queue fed by the platform layer (or a test harness);
//! reads block until at least one byte is available and then drain what is
//! queued. Output accumulates in a buffer the platform flushes to the
//! terminal. The console is not seekable.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex as BlockingMutex};

use lazy_static::lazy_static;

use crate::error::Result;
use crate::ktrace;
use crate::vfs::{FileType, Vnode, VnodeOps, VnodeStat};

lazy_static! {
    static ref INPUT: (BlockingMutex<VecDeque<u8>>, Condvar) =
        (BlockingMutex::new(VecDeque::new()), Condvar::new());
    static ref OUTPUT: BlockingMutex<Vec<u8>> = BlockingMutex::new(Vec::new());
}

/// Queue bytes for subsequent console reads.
pub fn push_input(bytes: &[u8]) {
    let (lock, cv) = &*INPUT;
    let mut queue = lock.lock().expect("console input lock poisoned");
    queue.extend(bytes.iter().copied());
    cv.notify_all();
}

/// Drain everything written to the console so far.
pub fn take_output() -> Vec<u8> {
    let mut out = OUTPUT.lock().expect("console output lock poisoned");
    core::mem::take(&mut *out)
}

/// Read from the console: block for the first byte, then return whatever is
/// queued, up to `buf.len()`.
pub(crate) fn read(buf: &mut [u8]) -> usize {
    if buf.is_empty() {
        return 0;
    }
    let (lock, cv) = &*INPUT;
    let mut queue = lock.lock().expect("console input lock poisoned");
    while queue.is_empty() {
        queue = cv.wait(queue).expect("console input lock poisoned");
    }
    let mut n = 0;
    while n < buf.len() {
        match queue.pop_front() {
            Some(byte) => {
                buf[n] = byte;
                n += 1;
            }
            None => break,
        }
    }
    n
}

/// Write to the console. Never fails; the buffer is unbounded.
pub(crate) fn write(buf: &[u8]) -> usize {
    let mut out = OUTPUT.lock().expect("console output lock poisoned");
    out.extend_from_slice(buf);
    ktrace!("console: wrote {} bytes", buf.len());
    buf.len()
}

/// Open a fresh vnode onto the console device.
pub(crate) fn open() -> Arc<Vnode> {
    Vnode::new_device("con:", Box::new(ConsoleVnode))
}

pub struct ConsoleVnode;

impl VnodeOps for ConsoleVnode {
    fn read(&self, buf: &mut [u8], _offset: i64) -> Result<usize> {
        Ok(read(buf))
    }

    fn write(&self, buf: &[u8], _offset: i64) -> Result<usize> {
        Ok(write(buf))
    }

    fn stat(&self) -> Result<VnodeStat> {
        Ok(VnodeStat {
            file_type: FileType::CharDevice,
            size: 0,
        })
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_accumulates_output() {
        take_output();
        write(b"con");
        write(b"sole");
        assert_eq!(take_output(), b"console");
    }

    #[test]
    fn read_drains_queued_input() {
        push_input(b"ab");
        let mut buf = [0u8; 4];
        let n = read(&mut buf);
        assert!(n >= 1 && n <= 2);
        assert_eq!(buf[0], b'a');
        // Drain any remainder so later tests start clean.
        if n == 1 {
            let mut rest = [0u8; 1];
            assert_eq!(read(&mut rest), 1);
            assert_eq!(rest[0], b'b');
        }
    }

    #[test]
    fn console_vnode_is_not_seekable() {
        assert!(!ConsoleVnode.is_seekable());
        assert_eq!(
            ConsoleVnode.stat().unwrap().file_type,
            FileType::CharDevice
        );
    }
}
