//! In-memory sdfs cluster used for development and tests.
//!
//! A [`MemoryCluster`] plays the remote side: one namespace shared by every
//! session its [`Connector`] hands out. Semantics follow the HDFS-style client
//! the real deployment exposes:
//! - write-only open creates missing parents and truncates the target
//! - writes stay buffered on the handle until flush/hflush/hsync/close
//! - rename refuses an existing destination with `EEXIST`
//! - non-recursive delete of a non-empty directory fails with `ENOTEMPTY`
//!
//! Faults can be queued per operation to exercise error paths.

use crate::client::{
    Connector, FileHandle, FileInfo, ObjectKind, OpenMode, Result, SdfsFileSystem,
};
use crate::path;
use nix::errno::Errno;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Remote calls that can be made to fail with [`MemoryCluster::inject_fault`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Connect,
    Disconnect,
    PathInfo,
    CreateDirectory,
    ListDirectory,
    Open,
    Tell,
    Seek,
    Read,
    Pread,
    Write,
    Exists,
    Delete,
    Rename,
    Close,
    Flush,
    HFlush,
    HSync,
}

struct Node {
    kind: ObjectKind,
    data: Vec<u8>,
    mtime: i64,
}

impl Node {
    fn dir() -> Self {
        Self {
            kind: ObjectKind::Directory,
            data: Vec::new(),
            mtime: now_secs(),
        }
    }

    fn file() -> Self {
        Self {
            kind: ObjectKind::File,
            data: Vec::new(),
            mtime: now_secs(),
        }
    }
}

struct OpenFile {
    session: u64,
    path: String,
    mode: OpenMode,
    pos: u64,
    pending: Vec<u8>,
}

struct Namespace {
    nodes: BTreeMap<String, Node>,
    handles: HashMap<u64, OpenFile>,
    next_handle: u64,
    next_session: u64,
    faults: HashMap<Op, VecDeque<Errno>>,
    capacity: Option<u64>,
}

impl Namespace {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::dir());
        Self {
            nodes,
            handles: HashMap::new(),
            next_handle: 0,
            next_session: 0,
            faults: HashMap::new(),
            capacity: None,
        }
    }

    fn take_fault(&mut self, op: Op) -> Result<()> {
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(errno) => {
                debug!(?op, %errno, "injected sdfs fault");
                Err(errno)
            }
            None => Ok(()),
        }
    }

    fn used_bytes(&self) -> u64 {
        let committed: usize = self.nodes.values().map(|n| n.data.len()).sum();
        let pending: usize = self.handles.values().map(|f| f.pending.len()).sum();
        (committed + pending) as u64
    }

    fn mkdirs(&mut self, dir: &str) -> Result<()> {
        let mut cur = String::from("/");
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            cur = path::join(&cur, part);
            match self.nodes.get(&cur) {
                Some(node) if node.kind == ObjectKind::Directory => {}
                Some(_) => return Err(Errno::ENOTDIR),
                None => {
                    self.nodes.insert(cur.clone(), Node::dir());
                }
            }
        }
        Ok(())
    }

    fn has_children(&self, dir: &str) -> bool {
        self.nodes.keys().any(|k| path::is_descendant(k, dir))
    }

    fn handle(&mut self, file: FileHandle) -> Result<&mut OpenFile> {
        self.handles.get_mut(&file.raw()).ok_or(Errno::EBADF)
    }

    fn commit(&mut self, file: FileHandle) -> Result<()> {
        let open = self.handles.get_mut(&file.raw()).ok_or(Errno::EBADF)?;
        if open.pending.is_empty() {
            return Ok(());
        }
        let node = self.nodes.get_mut(&open.path).ok_or(Errno::ENOENT)?;
        node.data.append(&mut open.pending);
        node.mtime = now_secs();
        Ok(())
    }
}

/// Shared in-memory namespace. Cloning yields another view of the same cluster.
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<Mutex<Namespace>>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Namespace::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Namespace> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a one-shot failure: the next `op` call answers `errno`.
    pub fn inject_fault(&self, op: Op, errno: Errno) {
        self.lock().faults.entry(op).or_default().push_back(errno);
    }

    /// Limits the bytes the cluster accepts. Writes past the limit are cut
    /// short, then refused with `ENOSPC`.
    pub fn set_capacity(&self, bytes: Option<u64>) {
        self.lock().capacity = bytes;
    }

    /// Number of remote handles currently open across all sessions.
    pub fn open_handles(&self) -> usize {
        self.lock().handles.len()
    }

    /// Committed content of a file, as new readers would see it.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let path = path::normalize(path).ok()?;
        let ns = self.lock();
        ns.nodes
            .get(&path)
            .filter(|n| n.kind == ObjectKind::File)
            .map(|n| n.data.clone())
    }
}

impl Connector for MemoryCluster {
    fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn SdfsFileSystem>> {
        let mut ns = self.lock();
        ns.take_fault(Op::Connect)?;
        ns.next_session += 1;
        let id = ns.next_session;
        debug!(host, port, session = id, "memory sdfs session opened");
        Ok(Arc::new(MemorySession {
            cluster: self.clone(),
            id,
            connected: AtomicBool::new(true),
        }))
    }
}

/// One session against a [`MemoryCluster`].
pub struct MemorySession {
    cluster: MemoryCluster,
    id: u64,
    connected: AtomicBool,
}

impl MemorySession {
    fn call<T>(&self, op: Op, f: impl FnOnce(&mut Namespace) -> Result<T>) -> Result<T> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Errno::ENOTCONN);
        }
        let mut ns = self.cluster.lock();
        ns.take_fault(op)?;
        f(&mut ns)
    }
}

impl SdfsFileSystem for MemorySession {
    fn disconnect(&self) -> Result<()> {
        self.call(Op::Disconnect, |ns| {
            let owned: Vec<u64> = ns
                .handles
                .iter()
                .filter(|(_, f)| f.session == self.id)
                .map(|(h, _)| *h)
                .collect();
            for h in owned {
                // Best effort; a failed commit drops the unflushed tail.
                let _ = ns.commit(FileHandle::new(h));
                ns.handles.remove(&h);
            }
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }

    fn path_info(&self, path: &str) -> Result<FileInfo> {
        let path = path::normalize(path)?;
        self.call(Op::PathInfo, |ns| {
            let node = ns.nodes.get(&path).ok_or(Errno::ENOENT)?;
            Ok(FileInfo {
                kind: node.kind,
                size: node.data.len() as u64,
                last_modified: node.mtime,
            })
        })
    }

    fn create_directory(&self, path: &str) -> Result<()> {
        let path = path::normalize(path)?;
        self.call(Op::CreateDirectory, |ns| match ns.nodes.get(&path) {
            Some(node) if node.kind == ObjectKind::Directory => Ok(()),
            Some(_) => Err(Errno::EEXIST),
            None => ns.mkdirs(&path),
        })
    }

    fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        let path = path::normalize(path)?;
        self.call(Op::ListDirectory, |ns| {
            let node = ns.nodes.get(&path).ok_or(Errno::ENOENT)?;
            if node.kind != ObjectKind::Directory {
                return Err(Errno::ENOTDIR);
            }
            Ok(ns
                .nodes
                .keys()
                .filter(|k| k.as_str() != "/" && path::split_parent(k).0 == path)
                .cloned()
                .collect())
        })
    }

    fn open_file(&self, path: &str, mode: OpenMode) -> Result<FileHandle> {
        let path = path::normalize(path)?;
        self.call(Op::Open, |ns| {
            match mode {
                OpenMode::ReadOnly => {
                    let node = ns.nodes.get(&path).ok_or(Errno::ENOENT)?;
                    if node.kind == ObjectKind::Directory {
                        return Err(Errno::EISDIR);
                    }
                }
                OpenMode::WriteOnly => {
                    if path == "/" {
                        return Err(Errno::EISDIR);
                    }
                    let (parent, _) = path::split_parent(&path);
                    ns.mkdirs(parent)?;
                    match ns.nodes.get_mut(&path) {
                        Some(node) if node.kind == ObjectKind::Directory => {
                            return Err(Errno::EISDIR);
                        }
                        Some(node) => {
                            node.data.clear();
                            node.mtime = now_secs();
                        }
                        None => {
                            ns.nodes.insert(path.clone(), Node::file());
                        }
                    }
                }
            }
            ns.next_handle += 1;
            let raw = ns.next_handle;
            ns.handles.insert(
                raw,
                OpenFile {
                    session: self.id,
                    path,
                    mode,
                    pos: 0,
                    pending: Vec::new(),
                },
            );
            Ok(FileHandle::new(raw))
        })
    }

    fn tell(&self, file: FileHandle) -> Result<u64> {
        self.call(Op::Tell, |ns| Ok(ns.handle(file)?.pos))
    }

    fn seek(&self, file: FileHandle, pos: u64) -> Result<()> {
        self.call(Op::Seek, |ns| {
            let open = ns.handles.get(&file.raw()).ok_or(Errno::EBADF)?;
            if open.mode != OpenMode::ReadOnly {
                return Err(Errno::EINVAL);
            }
            let size = ns.nodes.get(&open.path).ok_or(Errno::ENOENT)?.data.len() as u64;
            if pos > size {
                return Err(Errno::EINVAL);
            }
            ns.handle(file)?.pos = pos;
            Ok(())
        })
    }

    fn read(&self, file: FileHandle, buf: &mut [u8]) -> Result<usize> {
        self.call(Op::Read, |ns| {
            let open = ns.handles.get_mut(&file.raw()).ok_or(Errno::EBADF)?;
            if open.mode != OpenMode::ReadOnly {
                return Err(Errno::EBADF);
            }
            let node = ns.nodes.get(&open.path).ok_or(Errno::ENOENT)?;
            let n = copy_at(&node.data, open.pos, buf);
            open.pos += n as u64;
            Ok(n)
        })
    }

    fn pread(&self, file: FileHandle, pos: u64, buf: &mut [u8]) -> Result<usize> {
        self.call(Op::Pread, |ns| {
            let open = ns.handles.get(&file.raw()).ok_or(Errno::EBADF)?;
            if open.mode != OpenMode::ReadOnly {
                return Err(Errno::EBADF);
            }
            let node = ns.nodes.get(&open.path).ok_or(Errno::ENOENT)?;
            Ok(copy_at(&node.data, pos, buf))
        })
    }

    fn write(&self, file: FileHandle, buf: &[u8]) -> Result<usize> {
        self.call(Op::Write, |ns| {
            let room = match ns.capacity {
                Some(cap) => cap.saturating_sub(ns.used_bytes()) as usize,
                None => usize::MAX,
            };
            let open = ns.handle(file)?;
            if open.mode != OpenMode::WriteOnly {
                return Err(Errno::EBADF);
            }
            if room == 0 && !buf.is_empty() {
                return Err(Errno::ENOSPC);
            }
            let n = buf.len().min(room);
            open.pending.extend_from_slice(&buf[..n]);
            open.pos += n as u64;
            Ok(n)
        })
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let path = path::normalize(path)?;
        self.call(Op::Exists, |ns| Ok(ns.nodes.contains_key(&path)))
    }

    fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        let path = path::normalize(path)?;
        self.call(Op::Delete, |ns| {
            if path == "/" {
                return Err(Errno::EBUSY);
            }
            if !ns.nodes.contains_key(&path) {
                return Err(Errno::ENOENT);
            }
            if ns.has_children(&path) {
                if !recursive {
                    return Err(Errno::ENOTEMPTY);
                }
                ns.nodes.retain(|k, _| !path::is_descendant(k, &path));
            }
            ns.nodes.remove(&path);
            Ok(())
        })
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old_path = path::normalize(old_path)?;
        let new_path = path::normalize(new_path)?;
        self.call(Op::Rename, |ns| {
            if !ns.nodes.contains_key(&old_path) {
                return Err(Errno::ENOENT);
            }
            if ns.nodes.contains_key(&new_path) {
                return Err(Errno::EEXIST);
            }
            if old_path == "/" || path::is_descendant(&new_path, &old_path) {
                return Err(Errno::EINVAL);
            }
            let (parent, _) = path::split_parent(&new_path);
            match ns.nodes.get(parent) {
                Some(node) if node.kind == ObjectKind::Directory => {}
                Some(_) => return Err(Errno::ENOTDIR),
                None => return Err(Errno::ENOENT),
            }

            let moved: Vec<String> = ns
                .nodes
                .keys()
                .filter(|k| **k == old_path || path::is_descendant(k, &old_path))
                .cloned()
                .collect();
            for key in moved {
                let renamed = format!("{new_path}{}", &key[old_path.len()..]);
                if let Some(node) = ns.nodes.remove(&key) {
                    ns.nodes.insert(renamed, node);
                }
            }
            for open in ns.handles.values_mut() {
                if open.path == old_path || path::is_descendant(&open.path, &old_path) {
                    open.path = format!("{new_path}{}", &open.path[old_path.len()..]);
                }
            }
            Ok(())
        })
    }

    fn close_file(&self, file: FileHandle) -> Result<()> {
        self.call(Op::Close, |ns| {
            let committed = ns.commit(file);
            ns.handles.remove(&file.raw());
            committed
        })
    }

    fn flush(&self, file: FileHandle) -> Result<()> {
        self.call(Op::Flush, |ns| ns.commit(file))
    }

    fn hflush(&self, file: FileHandle) -> Result<()> {
        self.call(Op::HFlush, |ns| ns.commit(file))
    }

    fn hsync(&self, file: FileHandle) -> Result<()> {
        self.call(Op::HSync, |ns| ns.commit(file))
    }
}

fn copy_at(data: &[u8], pos: u64, buf: &mut [u8]) -> usize {
    let start = (pos as usize).min(data.len());
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (MemoryCluster, Arc<dyn SdfsFileSystem>) {
        let cluster = MemoryCluster::new();
        let fs = cluster.connect("localhost", 9000).unwrap();
        (cluster, fs)
    }

    #[test]
    fn test_writes_visible_after_flush() {
        let (cluster, fs) = session();
        let fh = fs.open_file("/db/000001.log", OpenMode::WriteOnly).unwrap();
        assert_eq!(fs.write(fh, b"hello").unwrap(), 5);
        assert_eq!(cluster.contents("/db/000001.log").unwrap(), b"");

        fs.flush(fh).unwrap();
        assert_eq!(cluster.contents("/db/000001.log").unwrap(), b"hello");
        assert_eq!(fs.tell(fh).unwrap(), 5);

        fs.write(fh, b" world").unwrap();
        fs.close_file(fh).unwrap();
        assert_eq!(cluster.contents("/db/000001.log").unwrap(), b"hello world");
        assert_eq!(cluster.open_handles(), 0);
        assert_eq!(fs.close_file(fh), Err(Errno::EBADF));
    }

    #[test]
    fn test_read_cursor_and_pread() {
        let (_cluster, fs) = session();
        let w = fs.open_file("/f", OpenMode::WriteOnly).unwrap();
        fs.write(w, b"0123456789").unwrap();
        fs.close_file(w).unwrap();

        let r = fs.open_file("/f", OpenMode::ReadOnly).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(r, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(fs.pread(r, 8, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
        assert_eq!(fs.tell(r).unwrap(), 4);

        fs.seek(r, 10).unwrap();
        assert_eq!(fs.read(r, &mut buf).unwrap(), 0);
        assert_eq!(fs.seek(r, 11), Err(Errno::EINVAL));
        assert_eq!(fs.write(r, b"x"), Err(Errno::EBADF));
    }

    #[test]
    fn test_namespace_rules() {
        let (_cluster, fs) = session();
        assert_eq!(
            fs.open_file("/missing", OpenMode::ReadOnly),
            Err(Errno::ENOENT)
        );
        fs.create_directory("/a/b").unwrap();
        fs.create_directory("/a/b").unwrap();
        let w = fs.open_file("/a/b/c", OpenMode::WriteOnly).unwrap();
        fs.close_file(w).unwrap();

        let mut children = fs.list_directory("/a/b").unwrap();
        children.sort();
        assert_eq!(children, vec!["/a/b/c".to_string()]);
        assert_eq!(fs.list_directory("/a/b/c"), Err(Errno::ENOTDIR));

        assert_eq!(fs.delete("/a", false), Err(Errno::ENOTEMPTY));
        assert_eq!(fs.rename("/a/b/c", "/a/b"), Err(Errno::EEXIST));
        fs.rename("/a/b", "/x").unwrap();
        assert!(fs.exists("/x/c").unwrap());
        assert!(!fs.exists("/a/b/c").unwrap());

        fs.delete("/x", true).unwrap();
        assert!(!fs.exists("/x/c").unwrap());
        assert_eq!(fs.delete("/x", true), Err(Errno::ENOENT));
    }

    #[test]
    fn test_injected_fault_is_one_shot() {
        let (cluster, fs) = session();
        cluster.inject_fault(Op::Exists, Errno::EIO);
        assert_eq!(fs.exists("/"), Err(Errno::EIO));
        assert_eq!(fs.exists("/"), Ok(true));
    }

    #[test]
    fn test_capacity_short_write_then_enospc() {
        let (cluster, fs) = session();
        cluster.set_capacity(Some(4));
        let w = fs.open_file("/f", OpenMode::WriteOnly).unwrap();
        assert_eq!(fs.write(w, b"abcdef").unwrap(), 4);
        assert_eq!(fs.write(w, b"g"), Err(Errno::ENOSPC));
    }

    #[test]
    fn test_disconnect_releases_handles() {
        let (cluster, fs) = session();
        let w = fs.open_file("/f", OpenMode::WriteOnly).unwrap();
        fs.write(w, b"tail").unwrap();
        fs.disconnect().unwrap();
        assert_eq!(cluster.open_handles(), 0);
        assert_eq!(cluster.contents("/f").unwrap(), b"tail");
        assert_eq!(fs.exists("/f"), Err(Errno::ENOTCONN));
    }
}
