//! Loopback sdfs backend rooted in a local directory.
//!
//! Every session a [`LocalConnector`] opens maps remote paths below one root
//! directory, whatever endpoint it was asked for. Namespace rules match the
//! in-memory cluster so both backends can stand in for a real deployment.

use crate::client::{
    Connector, FileHandle, FileInfo, ObjectKind, OpenMode, Result, SdfsFileSystem,
};
use crate::path;
use nix::errno::Errno;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::UNIX_EPOCH;
use tracing::debug;

pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Connector for LocalConnector {
    fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn SdfsFileSystem>> {
        fs::create_dir_all(&self.root).map_err(errno)?;
        debug!(host, port, root = %self.root.display(), "local sdfs session opened");
        Ok(Arc::new(LocalSession {
            root: self.root.clone(),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            connected: AtomicBool::new(true),
        }))
    }
}

struct LocalFile {
    file: File,
    mode: OpenMode,
}

pub struct LocalSession {
    root: PathBuf,
    handles: Mutex<HashMap<u64, LocalFile>>,
    next_handle: AtomicU64,
    connected: AtomicBool,
}

impl LocalSession {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Errno::ENOTCONN)
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<u64, LocalFile>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maps a remote path below the root.
    fn resolve(&self, remote: &str) -> Result<(String, PathBuf)> {
        self.ensure_connected()?;
        let remote = path::normalize(remote)?;
        let local = self.root.join(remote.trim_start_matches('/'));
        Ok((remote, local))
    }

    fn with_file<T>(
        &self,
        file: FileHandle,
        f: impl FnOnce(&mut LocalFile) -> Result<T>,
    ) -> Result<T> {
        self.ensure_connected()?;
        let mut handles = self.handles();
        let open = handles.get_mut(&file.raw()).ok_or(Errno::EBADF)?;
        f(open)
    }
}

impl SdfsFileSystem for LocalSession {
    fn disconnect(&self) -> Result<()> {
        self.ensure_connected()?;
        self.handles().clear();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn path_info(&self, path: &str) -> Result<FileInfo> {
        let (_, local) = self.resolve(path)?;
        let meta = fs::metadata(local).map_err(errno)?;
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Ok(FileInfo {
            kind: if meta.is_dir() {
                ObjectKind::Directory
            } else {
                ObjectKind::File
            },
            size: meta.len(),
            last_modified,
        })
    }

    fn create_directory(&self, path: &str) -> Result<()> {
        let (_, local) = self.resolve(path)?;
        match fs::metadata(&local) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Errno::EEXIST),
            Err(_) => fs::create_dir_all(&local).map_err(errno),
        }
    }

    fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        let (remote, local) = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(local).map_err(errno)? {
            let entry = entry.map_err(errno)?;
            if let Some(name) = entry.file_name().to_str() {
                entries.push(path::join(&remote, name));
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn open_file(&self, path: &str, mode: OpenMode) -> Result<FileHandle> {
        let (remote, local) = self.resolve(path)?;
        let file = match mode {
            OpenMode::ReadOnly => {
                if fs::metadata(&local).map_err(errno)?.is_dir() {
                    return Err(Errno::EISDIR);
                }
                File::open(&local).map_err(errno)?
            }
            OpenMode::WriteOnly => {
                if remote == "/" {
                    return Err(Errno::EISDIR);
                }
                if let Some(parent) = local.parent() {
                    fs::create_dir_all(parent).map_err(errno)?;
                }
                File::create(&local).map_err(errno)?
            }
        };
        let raw = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.handles().insert(raw, LocalFile { file, mode });
        Ok(FileHandle::new(raw))
    }

    fn tell(&self, file: FileHandle) -> Result<u64> {
        self.with_file(file, |open| open.file.stream_position().map_err(errno))
    }

    fn seek(&self, file: FileHandle, pos: u64) -> Result<()> {
        self.with_file(file, |open| {
            if open.mode != OpenMode::ReadOnly {
                return Err(Errno::EINVAL);
            }
            if pos > open.file.metadata().map_err(errno)?.len() {
                return Err(Errno::EINVAL);
            }
            open.file.seek(SeekFrom::Start(pos)).map_err(errno)?;
            Ok(())
        })
    }

    fn read(&self, file: FileHandle, buf: &mut [u8]) -> Result<usize> {
        self.with_file(file, |open| {
            if open.mode != OpenMode::ReadOnly {
                return Err(Errno::EBADF);
            }
            open.file.read(buf).map_err(errno)
        })
    }

    fn pread(&self, file: FileHandle, pos: u64, buf: &mut [u8]) -> Result<usize> {
        self.with_file(file, |open| {
            if open.mode != OpenMode::ReadOnly {
                return Err(Errno::EBADF);
            }
            open.file.read_at(buf, pos).map_err(errno)
        })
    }

    fn write(&self, file: FileHandle, buf: &[u8]) -> Result<usize> {
        self.with_file(file, |open| {
            if open.mode != OpenMode::WriteOnly {
                return Err(Errno::EBADF);
            }
            open.file.write(buf).map_err(errno)
        })
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let (_, local) = self.resolve(path)?;
        match fs::symlink_metadata(local) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(errno(e)),
        }
    }

    fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        let (remote, local) = self.resolve(path)?;
        if remote == "/" {
            return Err(Errno::EBUSY);
        }
        let meta = fs::symlink_metadata(&local).map_err(errno)?;
        let removed = if !meta.is_dir() {
            fs::remove_file(&local)
        } else if recursive {
            fs::remove_dir_all(&local)
        } else {
            fs::remove_dir(&local)
        };
        removed.map_err(errno)
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let (_, from) = self.resolve(old_path)?;
        let (_, to) = self.resolve(new_path)?;
        fs::symlink_metadata(&from).map_err(errno)?;
        if fs::symlink_metadata(&to).is_ok() {
            return Err(Errno::EEXIST);
        }
        fs::rename(from, to).map_err(errno)
    }

    fn close_file(&self, file: FileHandle) -> Result<()> {
        self.ensure_connected()?;
        let mut open = self.handles().remove(&file.raw()).ok_or(Errno::EBADF)?;
        open.file.flush().map_err(errno)
    }

    fn flush(&self, file: FileHandle) -> Result<()> {
        self.with_file(file, |open| open.file.flush().map_err(errno))
    }

    fn hflush(&self, file: FileHandle) -> Result<()> {
        self.with_file(file, |open| open.file.flush().map_err(errno))
    }

    fn hsync(&self, file: FileHandle) -> Result<()> {
        self.with_file(file, |open| open.file.sync_data().map_err(errno))
    }
}

fn errno(err: io::Error) -> Errno {
    err.raw_os_error()
        .map(Errno::from_raw)
        .unwrap_or(Errno::EIO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_roundtrip_under_root() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let fs = LocalConnector::new(tmp.path()).connect("default", 0)?;

        let w = fs.open_file("/db/CURRENT", OpenMode::WriteOnly)?;
        assert_eq!(fs.write(w, b"MANIFEST-000005\n")?, 16);
        fs.hsync(w)?;
        fs.close_file(w)?;
        assert!(tmp.path().join("db/CURRENT").is_file());

        let r = fs.open_file("db/CURRENT", OpenMode::ReadOnly)?;
        let mut buf = [0u8; 8];
        assert_eq!(fs.pread(r, 9, &mut buf)?, 7);
        assert_eq!(&buf[..7], b"000005\n");
        assert_eq!(fs.read(r, &mut buf)?, 8);
        assert_eq!(&buf, b"MANIFEST");
        assert_eq!(fs.tell(r)?, 8);
        fs.close_file(r)?;

        assert_eq!(fs.list_directory("/db")?, vec!["/db/CURRENT".to_string()]);
        assert_eq!(fs.path_info("/db/CURRENT")?.size, 16);
        Ok(())
    }

    #[test]
    fn test_local_namespace_rules() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let fs = LocalConnector::new(tmp.path()).connect("default", 0)?;

        assert_eq!(fs.open_file("/../escape", OpenMode::WriteOnly), Err(Errno::EINVAL));
        assert_eq!(fs.delete("/nope", false), Err(Errno::ENOENT));

        fs.create_directory("/a/b")?;
        let w = fs.open_file("/a/b/f", OpenMode::WriteOnly)?;
        fs.close_file(w)?;
        assert_eq!(fs.delete("/a", false), Err(Errno::ENOTEMPTY));
        assert_eq!(fs.rename("/a/b/f", "/a/b"), Err(Errno::EEXIST));
        fs.delete("/a", true)?;
        assert!(!fs.exists("/a")?);

        fs.disconnect()?;
        assert_eq!(fs.exists("/"), Err(Errno::ENOTCONN));
        Ok(())
    }
}
