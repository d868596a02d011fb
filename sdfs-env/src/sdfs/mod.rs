//! [`Env`] implementation that keeps database files on an sdfs cluster.
//!
//! File and directory operations are forwarded one call at a time to an sdfs
//! session; scheduling, threads, the clock and everything else that is not a
//! file go to the wrapped base environment unchanged.

mod file;

pub use file::{SdfsDirectory, SdfsReadableFile, SdfsWritableFile};

use crate::env::{
    Directory, Env, EnvOptions, FileLock, Job, JobTag, Priority, RandomAccessFile,
    SequentialFile, WritableFile,
};
use crate::error::{Error, Result};
use crate::info_log;
use crate::logger::{FileLogger, InfoLogLevel, Logger, TracingLogger};
use crate::posix::current_thread_id;
use crate::uri::SdfsUri;
use libsdfs::{Connector, SdfsFileSystem};
use nix::errno::Errno;
use std::sync::Arc;
use tracing::{info, warn};

/// Lock files are advisory on sdfs; holding one guarantees nothing.
struct SdfsFileLock {
    path: String,
}

impl FileLock for SdfsFileLock {
    fn path(&self) -> &str {
        &self.path
    }
}

pub struct SdfsEnv {
    fs: Arc<dyn SdfsFileSystem>,
    base: Arc<dyn Env>,
    uri: SdfsUri,
    info_log: Arc<dyn Logger>,
}

impl SdfsEnv {
    /// Parses `uri` and opens a session through `connector`.
    pub fn connect(uri: &str, connector: &dyn Connector, base: Arc<dyn Env>) -> Result<Self> {
        let uri = SdfsUri::parse(uri)?;
        let fs = connector
            .connect(&uri.host, uri.port)
            .map_err(|e| Error::from_errno(uri.to_string(), e))?;
        info!(%uri, "connected to sdfs");
        Ok(Self {
            fs,
            base,
            uri,
            info_log: Arc::new(TracingLogger),
        })
    }

    /// Routes the env's own diagnostics to `info_log`.
    pub fn with_info_log(mut self, info_log: Arc<dyn Logger>) -> Self {
        self.info_log = info_log;
        self
    }

    pub fn uri(&self) -> &SdfsUri {
        &self.uri
    }

    pub fn base(&self) -> &Arc<dyn Env> {
        &self.base
    }

    fn exists(&self, path: &str) -> Result<bool> {
        self.fs.exists(path).map_err(|e| {
            info_log!(self.info_log, InfoLogLevel::Error, "[sdfs] exists({path}) failed: {}", e.desc());
            Error::io(path, format!("sdfs exists call failed: {}", e.desc()))
        })
    }
}

impl Env for SdfsEnv {
    fn new_sequential_file(
        &self,
        fname: &str,
        _options: &EnvOptions,
    ) -> Result<Box<dyn SequentialFile>> {
        let file = SdfsReadableFile::open(self.fs.clone(), fname, self.info_log.clone())?;
        Ok(Box::new(file))
    }

    fn new_random_access_file(
        &self,
        fname: &str,
        _options: &EnvOptions,
    ) -> Result<Box<dyn RandomAccessFile>> {
        let file = SdfsReadableFile::open(self.fs.clone(), fname, self.info_log.clone())?;
        Ok(Box::new(file))
    }

    fn new_writable_file(
        &self,
        fname: &str,
        _options: &EnvOptions,
    ) -> Result<Box<dyn WritableFile>> {
        let file = SdfsWritableFile::create(self.fs.clone(), fname, self.info_log.clone())?;
        Ok(Box::new(file))
    }

    fn new_directory(&self, name: &str) -> Result<Box<dyn Directory>> {
        if self.exists(name)? {
            Ok(Box::new(SdfsDirectory))
        } else {
            Err(Error::NotFound(name.to_string()))
        }
    }

    fn file_exists(&self, fname: &str) -> Result<()> {
        if self.exists(fname)? {
            Ok(())
        } else {
            Err(Error::NotFound(fname.to_string()))
        }
    }

    fn get_children(&self, dir: &str) -> Result<Vec<String>> {
        if !self.exists(dir)? {
            return Err(Error::NotFound(dir.to_string()));
        }
        let entries = self.fs.list_directory(dir).map_err(|e| {
            Error::io(dir, format!("sdfs list directory failed: {}", e.desc()))
        })?;
        Ok(entries
            .iter()
            .filter_map(|path| path.rfind('/').map(|at| path[at + 1..].to_string()))
            .collect())
    }

    fn delete_file(&self, fname: &str) -> Result<()> {
        self.fs
            .delete(fname, false)
            .map_err(|e| Error::from_errno(fname, e))
    }

    fn create_dir(&self, name: &str) -> Result<()> {
        self.fs
            .create_directory(name)
            .map_err(|e| Error::from_errno(name, e))
    }

    fn create_dir_if_missing(&self, name: &str) -> Result<()> {
        if self.exists(name)? {
            return Ok(());
        }
        self.create_dir(name)
    }

    fn delete_dir(&self, name: &str) -> Result<()> {
        self.fs
            .delete(name, true)
            .map_err(|e| Error::from_errno(name, e))
    }

    fn get_file_size(&self, fname: &str) -> Result<u64> {
        let info = self
            .fs
            .path_info(fname)
            .map_err(|e| Error::from_errno(fname, e))?;
        Ok(info.size)
    }

    fn get_file_modification_time(&self, fname: &str) -> Result<u64> {
        let info = self
            .fs
            .path_info(fname)
            .map_err(|e| Error::from_errno(fname, e))?;
        Ok(info.last_modified.max(0) as u64)
    }

    /// Not atomic: the target is deleted first, then `src` is renamed onto
    /// it. A failure in between loses the old target.
    fn rename_file(&self, src: &str, target: &str) -> Result<()> {
        // Deleting the target first would destroy the source.
        if src == target {
            return self.file_exists(src);
        }
        match self.fs.delete(target, true) {
            Ok(()) | Err(Errno::ENOENT) => {}
            Err(e) => return Err(Error::from_errno(target, e)),
        }
        self.fs
            .rename(src, target)
            .map_err(|e| Error::from_errno(src, e))
    }

    fn lock_file(&self, fname: &str) -> Result<Box<dyn FileLock>> {
        Ok(Box::new(SdfsFileLock {
            path: fname.to_string(),
        }))
    }

    fn unlock_file(&self, _lock: Box<dyn FileLock>) -> Result<()> {
        Ok(())
    }

    fn new_logger(&self, fname: &str) -> Result<Arc<dyn Logger>> {
        let file = SdfsWritableFile::create(self.fs.clone(), fname, self.info_log.clone())?;
        info_log!(self.info_log, InfoLogLevel::Debug, "[sdfs] SdfsLogger opened {fname}");
        Ok(Arc::new(FileLogger::new(Box::new(file), current_thread_id)))
    }

    fn schedule(&self, job: Job, pri: Priority, tag: Option<JobTag>, unschedule: Option<Job>) {
        self.base.schedule(job, pri, tag, unschedule)
    }

    fn unschedule(&self, tag: JobTag, pri: Priority) -> usize {
        self.base.unschedule(tag, pri)
    }

    fn start_thread(&self, job: Job) {
        self.base.start_thread(job)
    }

    fn wait_for_join(&self) {
        self.base.wait_for_join()
    }

    fn thread_pool_queue_len(&self, pri: Priority) -> usize {
        self.base.thread_pool_queue_len(pri)
    }

    fn test_directory(&self) -> Result<String> {
        self.base.test_directory()
    }

    fn now_micros(&self) -> u64 {
        self.base.now_micros()
    }

    fn sleep_for_microseconds(&self, micros: u64) {
        self.base.sleep_for_microseconds(micros)
    }

    fn host_name(&self) -> Result<String> {
        self.base.host_name()
    }

    fn current_time(&self) -> Result<i64> {
        self.base.current_time()
    }

    fn absolute_path(&self, db_path: &str) -> Result<String> {
        self.base.absolute_path(db_path)
    }

    fn set_background_threads(&self, number: usize, pri: Priority) {
        self.base.set_background_threads(number, pri)
    }

    fn background_threads(&self, pri: Priority) -> usize {
        self.base.background_threads(pri)
    }

    fn inc_background_threads_if_needed(&self, number: usize, pri: Priority) {
        self.base.inc_background_threads_if_needed(number, pri)
    }

    fn time_to_string(&self, secs: u64) -> String {
        self.base.time_to_string(secs)
    }

    fn thread_id(&self) -> u64 {
        self.base.thread_id()
    }
}

impl Drop for SdfsEnv {
    fn drop(&mut self) {
        match self.fs.disconnect() {
            Ok(()) => info!(uri = %self.uri, "disconnected from sdfs"),
            Err(e) => warn!(uri = %self.uri, "sdfs disconnect failed: {}", e.desc()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posix::PosixEnv;
    use libsdfs::{MemoryCluster, Op};

    fn env(cluster: &MemoryCluster) -> SdfsEnv {
        SdfsEnv::connect("sdfs:namenode:9000", cluster, Arc::new(PosixEnv::new())).unwrap()
    }

    #[test]
    fn test_connect_errors() {
        let cluster = MemoryCluster::new();
        let base: Arc<dyn Env> = Arc::new(PosixEnv::new());

        let err = SdfsEnv::connect("sdfs:namenode", &cluster, base.clone()).err().unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));

        cluster.inject_fault(Op::Connect, Errno::ECONNREFUSED);
        let err = SdfsEnv::connect("sdfs:namenode:9000", &cluster, base.clone())
            .err()
            .unwrap();
        assert!(err.is_io_error());

        let env = SdfsEnv::connect("file:///tmp/db", &cluster, base).unwrap();
        assert_eq!(env.uri(), &SdfsUri::default_cluster());
    }

    #[test]
    fn test_children_are_leaf_names() {
        let cluster = MemoryCluster::new();
        let env = env(&cluster);
        env.create_dir("/db").unwrap();
        for name in ["CURRENT", "LOCK", "000001.log"] {
            env.new_writable_file(&format!("/db/{name}"), &EnvOptions::default())
                .unwrap()
                .close()
                .unwrap();
        }
        let mut children = env.get_children("/db").unwrap();
        children.sort();
        assert_eq!(children, ["000001.log", "CURRENT", "LOCK"]);
        assert!(env.get_children("/missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_exists_failure_is_io_error() {
        let cluster = MemoryCluster::new();
        let env = env(&cluster);
        cluster.inject_fault(Op::Exists, Errno::EIO);
        assert!(env.file_exists("/db").unwrap_err().is_io_error());
        assert!(env.file_exists("/db").unwrap_err().is_not_found());
    }

    #[test]
    fn test_locks_are_advisory() {
        let cluster = MemoryCluster::new();
        let env = env(&cluster);
        let first = env.lock_file("/db/LOCK").unwrap();
        let second = env.lock_file("/db/LOCK").unwrap();
        assert_eq!(first.path(), second.path());
        env.unlock_file(first).unwrap();
        env.unlock_file(second).unwrap();
        assert!(env.file_exists("/db/LOCK").is_err());
    }

    #[test]
    fn test_drop_disconnects() {
        let cluster = MemoryCluster::new();
        let env = env(&cluster);
        let mut w = env
            .new_writable_file("/db/000005.log", &EnvOptions::default())
            .unwrap();
        w.append(b"tail").unwrap();
        drop(env);

        assert_eq!(cluster.open_handles(), 0);
        assert_eq!(cluster.contents("/db/000005.log").unwrap(), b"tail");
        assert!(w.append(b"more").unwrap_err().is_io_error());
    }
}
