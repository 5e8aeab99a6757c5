//! In-memory filesystem backing the VFS.
//!
//! One global tree keyed by canonical absolute path. File contents live
//! behind a blocking lock per file so reads and writes can run while the
//! tree lock stays short.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as BlockingMutex};

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{Errno, Result};
use crate::limits::{AccessMode, OpenExtras};
use crate::vfs::{FileType, VnodeOps, VnodeStat};

/// Cap on a single file's size; writes past it report a full device.
const FILE_MAX_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
enum Node {
    Dir,
    File(Arc<RamFile>),
}

lazy_static! {
    static ref TREE: Mutex<BTreeMap<String, Node>> = {
        let mut tree = BTreeMap::new();
        tree.insert(String::from("/"), Node::Dir);
        Mutex::new(tree)
    };
}

pub struct RamFile {
    data: BlockingMutex<Vec<u8>>,
}

impl RamFile {
    fn new() -> Arc<RamFile> {
        Arc::new(RamFile {
            data: BlockingMutex::new(Vec::new()),
        })
    }

    pub fn size(&self) -> usize {
        self.data.lock().expect("ramfs file lock poisoned").len()
    }

    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.data.lock().expect("ramfs file lock poisoned");
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    /// Write at an offset, zero-filling any gap past the current end.
    pub fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize> {
        let end = offset.checked_add(buf.len()).ok_or(Errno::EINVAL)?;
        if end > FILE_MAX_BYTES {
            return Err(Errno::ENOSPC);
        }
        let mut data = self.data.lock().expect("ramfs file lock poisoned");
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn truncate(&self) {
        self.data.lock().expect("ramfs file lock poisoned").clear();
    }
}

/// Seed the root directory. The tree is created with the root preinstalled,
/// so this only forces initialization.
pub fn bootstrap() {
    let _ = TREE.lock().len();
}

pub(crate) fn exists(path: &str) -> bool {
    TREE.lock().contains_key(path)
}

pub(crate) fn is_dir(path: &str) -> bool {
    matches!(TREE.lock().get(path), Some(Node::Dir))
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => String::from("/"),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Look up or create the file at `path` according to the open flags.
pub(crate) fn open_file(
    path: &str,
    access: AccessMode,
    extras: OpenExtras,
) -> Result<Arc<RamFile>> {
    let mut tree = TREE.lock();

    let file = match tree.get(path) {
        Some(Node::Dir) => return Err(Errno::EISDIR),
        Some(Node::File(file)) => {
            if extras.contains(OpenExtras::CREATE | OpenExtras::EXCL) {
                return Err(Errno::EEXIST);
            }
            file.clone()
        }
        None => {
            if !extras.contains(OpenExtras::CREATE) {
                return Err(Errno::ENOENT);
            }
            match tree.get(&parent_of(path)) {
                Some(Node::Dir) => {}
                Some(Node::File(_)) => return Err(Errno::ENOTDIR),
                None => return Err(Errno::ENOENT),
            }
            let file = RamFile::new();
            tree.insert(path.to_string(), Node::File(file.clone()));
            file
        }
    };
    drop(tree);

    if extras.contains(OpenExtras::TRUNC) && access.writable() {
        file.truncate();
    }
    Ok(file)
}

pub(crate) fn mkdir(path: &str) -> Result<()> {
    let mut tree = TREE.lock();
    if tree.contains_key(path) {
        return Err(Errno::EEXIST);
    }
    match tree.get(&parent_of(path)) {
        Some(Node::Dir) => {}
        Some(Node::File(_)) => return Err(Errno::ENOTDIR),
        None => return Err(Errno::ENOENT),
    }
    tree.insert(path.to_string(), Node::Dir);
    Ok(())
}

/// Vnode operations over a regular RAM file.
pub struct RamFileVnode {
    file: Arc<RamFile>,
}

impl RamFileVnode {
    pub(crate) fn new(file: Arc<RamFile>) -> RamFileVnode {
        RamFileVnode { file }
    }
}

impl VnodeOps for RamFileVnode {
    fn read(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        if offset < 0 {
            return Err(Errno::EINVAL);
        }
        Ok(self.file.read_at(buf, offset as usize))
    }

    fn write(&self, buf: &[u8], offset: i64) -> Result<usize> {
        if offset < 0 {
            return Err(Errno::EINVAL);
        }
        self.file.write_at(buf, offset as usize)
    }

    fn stat(&self) -> Result<VnodeStat> {
        Ok(VnodeStat {
            file_type: FileType::Regular,
            size: self.file.size() as i64,
        })
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Vnode operations over a directory; used for working-directory handles.
/// Directories carry no byte stream.
pub struct DirVnode;

impl VnodeOps for DirVnode {
    fn read(&self, _buf: &mut [u8], _offset: i64) -> Result<usize> {
        Err(Errno::EISDIR)
    }

    fn write(&self, _buf: &[u8], _offset: i64) -> Result<usize> {
        Err(Errno::EISDIR)
    }

    fn stat(&self) -> Result<VnodeStat> {
        Ok(VnodeStat {
            file_type: FileType::Directory,
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

    fn unique(name: &str) -> String {
        format!("/ramfs_test_{name}")
    }

    #[test]
    fn create_then_read_back() {
        let path = unique("rw");
        let file = open_file(
            &path,
            AccessMode::ReadWrite,
            OpenExtras::CREATE,
        )
        .unwrap();
        assert_eq!(file.write_at(b"hello", 0).unwrap(), 5);

        let again = open_file(&path, AccessMode::ReadOnly, OpenExtras::empty()).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(again.read_at(&mut buf, 0), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn open_missing_without_create_fails() {
        assert_eq!(
            open_file(&unique("missing"), AccessMode::ReadOnly, OpenExtras::empty())
                .err(),
            Some(Errno::ENOENT)
        );
    }

    #[test]
    fn excl_rejects_existing() {
        let path = unique("excl");
        open_file(&path, AccessMode::WriteOnly, OpenExtras::CREATE).unwrap();
        assert_eq!(
            open_file(
                &path,
                AccessMode::WriteOnly,
                OpenExtras::CREATE | OpenExtras::EXCL
            )
            .err(),
            Some(Errno::EEXIST)
        );
    }

    #[test]
    fn trunc_clears_contents() {
        let path = unique("trunc");
        let file = open_file(&path, AccessMode::WriteOnly, OpenExtras::CREATE).unwrap();
        file.write_at(b"payload", 0).unwrap();
        open_file(
            &path,
            AccessMode::WriteOnly,
            OpenExtras::CREATE | OpenExtras::TRUNC,
        )
        .unwrap();
        assert_eq!(file.size(), 0);
    }

    #[test]
    fn sparse_write_zero_fills() {
        let path = unique("sparse");
        let file = open_file(&path, AccessMode::ReadWrite, OpenExtras::CREATE).unwrap();
        file.write_at(b"x", 4).unwrap();
        let mut buf = [0xffu8; 5];
        assert_eq!(file.read_at(&mut buf, 0), 5);
        assert_eq!(&buf, &[0, 0, 0, 0, b'x']);
    }

    #[test]
    fn mkdir_and_nested_create() {
        let dir = unique("dir");
        mkdir(&dir).unwrap();
        assert!(is_dir(&dir));
        let nested = format!("{dir}/leaf");
        open_file(&nested, AccessMode::WriteOnly, OpenExtras::CREATE).unwrap();
        assert!(exists(&nested));
    }

    #[test]
    fn mkdir_without_parent_fails() {
        assert_eq!(mkdir("/no_such_parent/child"), Err(Errno::ENOENT));
    }
}
