//! The sdfs call surface.
//!
//! Mirrors the native client library one call at a time: a session is opened
//! through a [`Connector`], files are addressed by an opaque [`FileHandle`],
//! and every call answers with `Ok(value)` or the errno the remote side
//! reported.

use nix::errno::Errno;
use std::fmt;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Errno>;

/// Opaque identifier of a file opened on the remote side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileHandle(u64);

impl FileHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    /// Create (or truncate) and write from the start.
    WriteOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    File,
    Directory,
}

/// Answer of a path-info (stat) call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub kind: ObjectKind,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub last_modified: i64,
}

/// One connected session to an sdfs deployment.
///
/// Paths are absolute, `/`-separated remote paths. Implementations must be
/// callable from several threads; ordering of calls on the same handle is the
/// caller's business.
pub trait SdfsFileSystem: Send + Sync {
    /// Ends the session. Later calls fail with `ENOTCONN`.
    fn disconnect(&self) -> Result<()>;

    fn path_info(&self, path: &str) -> Result<FileInfo>;

    /// Creates `path` and any missing parents. Succeeds if it already is a
    /// directory.
    fn create_directory(&self, path: &str) -> Result<()>;

    /// Lists the direct children of a directory as full remote paths.
    fn list_directory(&self, path: &str) -> Result<Vec<String>>;

    fn open_file(&self, path: &str, mode: OpenMode) -> Result<FileHandle>;

    fn tell(&self, file: FileHandle) -> Result<u64>;

    fn seek(&self, file: FileHandle, pos: u64) -> Result<()>;

    /// Reads at the handle's cursor. `Ok(0)` means end of stream.
    fn read(&self, file: FileHandle, buf: &mut [u8]) -> Result<usize>;

    /// Reads at `pos` without moving the cursor.
    fn pread(&self, file: FileHandle, pos: u64, buf: &mut [u8]) -> Result<usize>;

    /// Returns how many bytes the remote side accepted.
    fn write(&self, file: FileHandle, buf: &[u8]) -> Result<usize>;

    fn exists(&self, path: &str) -> Result<bool>;

    fn delete(&self, path: &str, recursive: bool) -> Result<()>;

    /// Fails with `EEXIST` when `new_path` is already taken.
    fn rename(&self, old_path: &str, new_path: &str) -> Result<()>;

    fn close_file(&self, file: FileHandle) -> Result<()>;

    /// Pushes client-side buffered writes to the remote side.
    fn flush(&self, file: FileHandle) -> Result<()>;

    /// Makes flushed data visible to new readers.
    fn hflush(&self, file: FileHandle) -> Result<()>;

    /// Makes flushed data durable.
    fn hsync(&self, file: FileHandle) -> Result<()>;
}

/// Opens sessions against an sdfs endpoint.
pub trait Connector: Send + Sync {
    fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn SdfsFileSystem>>;
}
