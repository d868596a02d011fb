//! The environment contract the storage engine is written against.
//!
//! An [`Env`] owns every interaction with the outside world: file and
//! directory lifecycle, info logging, background work and the clock. File
//! objects returned from it are used by one caller at a time (`&mut self`),
//! except [`RandomAccessFile`] which must tolerate concurrent positioned reads.

use crate::error::{Error, Result};
use crate::logger::Logger;
use std::sync::Arc;

/// Work handed to a background thread pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Groups scheduled jobs so they can be withdrawn together.
pub type JobTag = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Priority {
    Bottom,
    Low,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Bottom, Priority::Low, Priority::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Bottom => "bottom",
            Priority::Low => "low",
            Priority::High => "high",
        }
    }
}

/// Hints passed along with every file open. Backends are free to ignore them.
#[derive(Clone, Debug, Default)]
pub struct EnvOptions {
    /// Writers sync their data once this many bytes were appended since the
    /// last sync. Zero disables it.
    pub bytes_per_sync: u64,
}

pub trait SequentialFile: Send {
    /// Fills `buf` from the cursor. Fewer bytes than requested means the end
    /// of the file was reached.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn skip(&mut self, n: u64) -> Result<()>;
}

pub trait RandomAccessFile: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    fn positioned_append(&mut self, _data: &[u8], _offset: u64) -> Result<()> {
        Err(Error::NotSupported("positioned append".into()))
    }

    fn flush(&mut self) -> Result<()>;

    fn sync(&mut self) -> Result<()>;

    fn fsync(&mut self) -> Result<()> {
        self.sync()
    }

    fn close(&mut self) -> Result<()>;
}

pub trait Directory: Send {
    fn fsync(&mut self) -> Result<()>;
}

/// Proof that a lock file is held. Hand it back to [`Env::unlock_file`].
pub trait FileLock: Send {
    fn path(&self) -> &str;
}

pub trait Env: Send + Sync {
    fn new_sequential_file(
        &self,
        fname: &str,
        options: &EnvOptions,
    ) -> Result<Box<dyn SequentialFile>>;

    fn new_random_access_file(
        &self,
        fname: &str,
        options: &EnvOptions,
    ) -> Result<Box<dyn RandomAccessFile>>;

    fn new_writable_file(&self, fname: &str, options: &EnvOptions)
        -> Result<Box<dyn WritableFile>>;

    fn new_directory(&self, name: &str) -> Result<Box<dyn Directory>>;

    /// `Ok(())` if the path exists, [`Error::NotFound`] if it does not.
    fn file_exists(&self, fname: &str) -> Result<()>;

    /// Names (not paths) of the entries of `dir`.
    fn get_children(&self, dir: &str) -> Result<Vec<String>>;

    fn delete_file(&self, fname: &str) -> Result<()>;

    fn create_dir(&self, name: &str) -> Result<()>;

    fn create_dir_if_missing(&self, name: &str) -> Result<()>;

    fn delete_dir(&self, name: &str) -> Result<()>;

    fn get_file_size(&self, fname: &str) -> Result<u64>;

    /// Seconds since the Unix epoch.
    fn get_file_modification_time(&self, fname: &str) -> Result<u64>;

    fn rename_file(&self, src: &str, target: &str) -> Result<()>;

    fn link_file(&self, _src: &str, _target: &str) -> Result<()> {
        Err(Error::NotSupported("link file".into()))
    }

    fn lock_file(&self, fname: &str) -> Result<Box<dyn FileLock>>;

    fn unlock_file(&self, lock: Box<dyn FileLock>) -> Result<()>;

    fn new_logger(&self, fname: &str) -> Result<Arc<dyn Logger>>;

    /// Queues `job` on the `pri` pool. `unschedule` runs instead of `job` if
    /// the job is withdrawn through [`Env::unschedule`] before it starts.
    fn schedule(&self, job: Job, pri: Priority, tag: Option<JobTag>, unschedule: Option<Job>);

    /// Withdraws queued jobs carrying `tag`; returns how many were dropped.
    fn unschedule(&self, tag: JobTag, pri: Priority) -> usize;

    fn start_thread(&self, job: Job);

    /// Waits for every thread started through [`Env::start_thread`].
    fn wait_for_join(&self);

    fn thread_pool_queue_len(&self, pri: Priority) -> usize;

    fn test_directory(&self) -> Result<String>;

    fn now_micros(&self) -> u64;

    fn sleep_for_microseconds(&self, micros: u64);

    fn host_name(&self) -> Result<String>;

    /// Seconds since the Unix epoch.
    fn current_time(&self) -> Result<i64>;

    fn absolute_path(&self, db_path: &str) -> Result<String>;

    fn set_background_threads(&self, number: usize, pri: Priority);

    fn background_threads(&self, pri: Priority) -> usize;

    fn inc_background_threads_if_needed(&self, number: usize, pri: Priority);

    fn time_to_string(&self, secs: u64) -> String;

    fn thread_id(&self) -> u64;
}
