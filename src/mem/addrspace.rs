//! Address spaces.
//!
//! The hosted MMU models one contiguous user region per process. Code and
//! data load toward the bottom; the stack grows down from the top. An
//! address space is exclusively owned by the PCB referencing it, and
//! ownership transfers whole on exec.

use core::ops::Range;

use crate::error::{Errno, Result};

/// Bottom of the user virtual region.
pub const USER_BASE: u64 = 0x0040_0000;

/// Span of the user region (code, data, heap, stack).
pub const USER_MEM_SIZE: u64 = 0x0010_0000;

/// One past the highest user address; also the initial stack pointer.
pub const USER_TOP: u64 = USER_BASE + USER_MEM_SIZE;

pub struct AddressSpace {
    mem: Vec<u8>,
}

impl AddressSpace {
    /// Create a zero-filled address space.
    pub fn new() -> Result<Box<AddressSpace>> {
        Ok(Box::new(AddressSpace {
            mem: vec![0; USER_MEM_SIZE as usize],
        }))
    }

    /// Clone the full user image (fork).
    pub fn copy(&self) -> Result<Box<AddressSpace>> {
        Ok(Box::new(AddressSpace {
            mem: self.mem.clone(),
        }))
    }

    /// Compute the initial user stack pointer.
    pub fn define_stack(&self) -> Result<u64> {
        Ok(USER_TOP)
    }

    /// Bounds-check a user range and map it onto the backing image.
    fn translate(&self, addr: u64, len: usize) -> Result<Range<usize>> {
        let end = addr.checked_add(len as u64).ok_or(Errno::EFAULT)?;
        if addr < USER_BASE || end > USER_TOP {
            return Err(Errno::EFAULT);
        }
        let start = (addr - USER_BASE) as usize;
        Ok(start..start + len)
    }

    pub fn read_bytes(&self, addr: u64, dst: &mut [u8]) -> Result<()> {
        let range = self.translate(addr, dst.len())?;
        dst.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    pub fn write_bytes(&mut self, addr: u64, src: &[u8]) -> Result<()> {
        let range = self.translate(addr, src.len())?;
        self.mem[range].copy_from_slice(src);
        Ok(())
    }

    /// Scan for a NUL within `maxlen` bytes of `addr`; returns the string
    /// bytes without the terminator. A missing terminator inside the window
    /// is a too-long name; running off the user region is a fault.
    pub fn read_cstring(&self, addr: u64, maxlen: usize) -> Result<Vec<u8>> {
        if maxlen == 0 {
            return Err(Errno::ENAMETOOLONG);
        }
        self.translate(addr, 1)?;
        let window = (USER_TOP - addr).min(maxlen as u64) as usize;
        let range = self.translate(addr, window)?;
        let bytes = &self.mem[range];
        match bytes.iter().position(|&b| b == 0) {
            Some(nul) => Ok(bytes[..nul].to_vec()),
            None if window < maxlen => Err(Errno::EFAULT),
            None => Err(Errno::ENAMETOOLONG),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_roundtrip() {
        let mut space = AddressSpace::new().unwrap();
        space.write_bytes(USER_BASE + 0x100, b"payload").unwrap();
        let mut buf = [0u8; 7];
        space.read_bytes(USER_BASE + 0x100, &mut buf).unwrap();
        assert_eq!(&buf, b"payload");
    }

    #[test]
    fn out_of_range_faults() {
        let mut space = AddressSpace::new().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(space.read_bytes(0, &mut buf), Err(Errno::EFAULT));
        assert_eq!(
            space.write_bytes(USER_TOP - 2, &[0u8; 4]),
            Err(Errno::EFAULT)
        );
        assert_eq!(
            space.read_bytes(u64::MAX - 1, &mut buf),
            Err(Errno::EFAULT)
        );
    }

    #[test]
    fn copy_is_independent() {
        let mut parent = AddressSpace::new().unwrap();
        parent.write_bytes(USER_BASE, b"abc").unwrap();
        let mut child = parent.copy().unwrap();
        child.write_bytes(USER_BASE, b"xyz").unwrap();

        let mut buf = [0u8; 3];
        parent.read_bytes(USER_BASE, &mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        child.read_bytes(USER_BASE, &mut buf).unwrap();
        assert_eq!(&buf, b"xyz");
    }

    #[test]
    fn cstring_scan() {
        let mut space = AddressSpace::new().unwrap();
        space.write_bytes(USER_BASE, b"name\0tail").unwrap();
        assert_eq!(space.read_cstring(USER_BASE, 64).unwrap(), b"name");
        // No terminator within the window.
        space.write_bytes(USER_BASE + 0x40, &[b'x'; 16]).unwrap();
        assert_eq!(
            space.read_cstring(USER_BASE + 0x40, 8),
            Err(Errno::ENAMETOOLONG)
        );
    }

    #[test]
    fn stack_pointer_is_region_top() {
        let space = AddressSpace::new().unwrap();
        assert_eq!(space.define_stack().unwrap(), USER_TOP);
    }
}
