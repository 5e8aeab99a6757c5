//! ELF64 executable loader.
//!
//! Parses the header and program headers out of a vnode and copies PT_LOAD
//! segments into the current (already activated) address space through the
//! user-copy path, so a bad segment address faults exactly like any other
//! bad user pointer. Returns the entry point.

use std::sync::Arc;

use crate::error::{Errno, Result};
use crate::ktrace;
use crate::mem;
use crate::vfs::Vnode;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

struct ElfHeader {
    entry: u64,
    phoff: u64,
    phentsize: u16,
    phnum: u16,
}

struct ProgramHeader {
    p_type: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
}

fn read_u16(raw: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([raw[at], raw[at + 1]])
}

fn read_u32(raw: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

fn read_u64(raw: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Read exactly `buf.len()` bytes at `offset`; a short read means the image
/// is truncated.
fn read_exact(vn: &Arc<Vnode>, buf: &mut [u8], offset: u64) -> Result<()> {
    let n = vn.read(buf, offset as i64)?;
    if n != buf.len() {
        return Err(Errno::ENOEXEC);
    }
    Ok(())
}

fn parse_header(raw: &[u8; EHDR_SIZE]) -> Result<ElfHeader> {
    if raw[0..4] != ELF_MAGIC {
        return Err(Errno::ENOEXEC);
    }
    if raw[4] != ELFCLASS64 || raw[5] != ELFDATA2LSB {
        return Err(Errno::ENOEXEC);
    }
    if read_u16(raw, 16) != ET_EXEC {
        return Err(Errno::ENOEXEC);
    }

    Ok(ElfHeader {
        entry: read_u64(raw, 24),
        phoff: read_u64(raw, 32),
        phentsize: read_u16(raw, 54),
        phnum: read_u16(raw, 56),
    })
}

fn parse_phdr(raw: &[u8; PHDR_SIZE]) -> ProgramHeader {
    ProgramHeader {
        p_type: read_u32(raw, 0),
        offset: read_u64(raw, 8),
        vaddr: read_u64(raw, 16),
        filesz: read_u64(raw, 32),
        memsz: read_u64(raw, 40),
    }
}

/// Load an executable image into the current address space; returns the
/// entry point.
pub fn load_elf(vn: &Arc<Vnode>) -> Result<u64> {
    let mut ehdr_raw = [0u8; EHDR_SIZE];
    read_exact(vn, &mut ehdr_raw, 0)?;
    let ehdr = parse_header(&ehdr_raw)?;

    if ehdr.phnum > 0 && (ehdr.phentsize as usize) < PHDR_SIZE {
        return Err(Errno::ENOEXEC);
    }

    for i in 0..ehdr.phnum as u64 {
        let mut phdr_raw = [0u8; PHDR_SIZE];
        let at = ehdr
            .phoff
            .checked_add(i * ehdr.phentsize as u64)
            .ok_or(Errno::ENOEXEC)?;
        read_exact(vn, &mut phdr_raw, at)?;
        let phdr = parse_phdr(&phdr_raw);

        if phdr.p_type != PT_LOAD {
            continue;
        }
        if phdr.memsz < phdr.filesz {
            return Err(Errno::ENOEXEC);
        }

        ktrace!(
            "load_elf: segment vaddr={:#x} filesz={:#x} memsz={:#x}",
            phdr.vaddr,
            phdr.filesz,
            phdr.memsz
        );

        if phdr.filesz > 0 {
            let mut data = vec![0u8; phdr.filesz as usize];
            read_exact(vn, &mut data, phdr.offset)?;
            mem::copyout(&data, phdr.vaddr)?;
        }

        let bss = (phdr.memsz - phdr.filesz) as usize;
        if bss > 0 {
            let zeros = vec![0u8; bss];
            mem::copyout(&zeros, phdr.vaddr + phdr.filesz)?;
        }
    }

    Ok(ehdr.entry)
}
