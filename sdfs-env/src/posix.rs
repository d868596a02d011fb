//! Default local environment on top of the POSIX filesystem.

use crate::env::{
    Directory, Env, EnvOptions, FileLock, Job, JobTag, Priority, RandomAccessFile,
    SequentialFile, WritableFile,
};
use crate::error::{Error, Result};
use crate::logger::{FileLogger, Logger};
use crate::thread_pool::ThreadPool;
use chrono::{Local, TimeZone, Utc};
use nix::fcntl::{Flock, FlockArg};
use std::cell::Cell;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

/// Small process-unique number for the calling thread.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| {
        if id.get() == 0 {
            id.set(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        }
        id.get()
    })
}

/// Keeps reading until `buf` is full or the source is exhausted.
fn fill(mut read: impl FnMut(&mut [u8]) -> io::Result<usize>, buf: &mut [u8]) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match read(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

pub struct PosixSequentialFile {
    filename: String,
    file: File,
}

impl SequentialFile for PosixSequentialFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = &mut self.file;
        fill(|b| file.read(b), buf).map_err(|e| Error::from_io(&self.filename, e))
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let delta = i64::try_from(n)
            .map_err(|_| Error::InvalidArgument(format!("skip of {n} bytes")))?;
        self.file
            .seek(SeekFrom::Current(delta))
            .map_err(|e| Error::from_io(&self.filename, e))?;
        Ok(())
    }
}

pub struct PosixRandomAccessFile {
    filename: String,
    file: File,
}

impl RandomAccessFile for PosixRandomAccessFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut pos = offset;
        fill(
            |b| {
                let n = self.file.read_at(b, pos)?;
                pos += n as u64;
                Ok(n)
            },
            buf,
        )
        .map_err(|e| Error::from_io(&self.filename, e))
    }
}

pub struct PosixWritableFile {
    filename: String,
    file: Option<File>,
    bytes_per_sync: u64,
    unsynced: u64,
}

impl PosixWritableFile {
    fn file(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::io(&self.filename, "file already closed"))
    }
}

impl WritableFile for PosixWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        let filename = self.filename.clone();
        self.file()?
            .write_all(data)
            .map_err(|e| Error::from_io(filename, e))?;
        self.unsynced += data.len() as u64;
        if self.bytes_per_sync > 0 && self.unsynced >= self.bytes_per_sync {
            self.sync()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let filename = self.filename.clone();
        self.file()?.flush().map_err(|e| Error::from_io(filename, e))
    }

    fn sync(&mut self) -> Result<()> {
        let filename = self.filename.clone();
        self.file()?
            .sync_data()
            .map_err(|e| Error::from_io(filename, e))?;
        self.unsynced = 0;
        Ok(())
    }

    fn fsync(&mut self) -> Result<()> {
        let filename = self.filename.clone();
        self.file()?
            .sync_all()
            .map_err(|e| Error::from_io(filename, e))?;
        self.unsynced = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.file.take() {
            Some(mut file) => file.flush().map_err(|e| Error::from_io(&self.filename, e)),
            None => Ok(()),
        }
    }
}

pub struct PosixDirectory {
    name: String,
    dir: File,
}

impl Directory for PosixDirectory {
    fn fsync(&mut self) -> Result<()> {
        self.dir
            .sync_all()
            .map_err(|e| Error::from_io(&self.name, e))
    }
}

/// Exclusive `flock` held for as long as this value lives.
pub struct PosixFileLock {
    path: String,
    _lock: Flock<File>,
}

impl FileLock for PosixFileLock {
    fn path(&self) -> &str {
        &self.path
    }
}

pub struct PosixEnv {
    pools: [ThreadPool; 3],
    started: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for PosixEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl PosixEnv {
    /// One low and one high priority worker; the bottom pool starts empty.
    pub fn new() -> Self {
        let env = Self {
            pools: Priority::ALL.map(ThreadPool::new),
            started: Mutex::new(Vec::new()),
        };
        env.pool(Priority::Low).set_background_threads(1);
        env.pool(Priority::High).set_background_threads(1);
        env
    }

    fn pool(&self, pri: Priority) -> &ThreadPool {
        &self.pools[pri as usize]
    }

    fn open_writable(fname: &str, options: &EnvOptions) -> Result<PosixWritableFile> {
        let file = File::create(fname).map_err(|e| Error::from_io(fname, e))?;
        Ok(PosixWritableFile {
            filename: fname.to_string(),
            file: Some(file),
            bytes_per_sync: options.bytes_per_sync,
            unsynced: 0,
        })
    }

    fn metadata(fname: &str) -> Result<fs::Metadata> {
        fs::metadata(fname).map_err(|e| Error::from_io(fname, e))
    }
}

impl Env for PosixEnv {
    fn new_sequential_file(
        &self,
        fname: &str,
        _options: &EnvOptions,
    ) -> Result<Box<dyn SequentialFile>> {
        let file = File::open(fname).map_err(|e| Error::from_io(fname, e))?;
        Ok(Box::new(PosixSequentialFile {
            filename: fname.to_string(),
            file,
        }))
    }

    fn new_random_access_file(
        &self,
        fname: &str,
        _options: &EnvOptions,
    ) -> Result<Box<dyn RandomAccessFile>> {
        let file = File::open(fname).map_err(|e| Error::from_io(fname, e))?;
        Ok(Box::new(PosixRandomAccessFile {
            filename: fname.to_string(),
            file,
        }))
    }

    fn new_writable_file(
        &self,
        fname: &str,
        options: &EnvOptions,
    ) -> Result<Box<dyn WritableFile>> {
        Ok(Box::new(Self::open_writable(fname, options)?))
    }

    fn new_directory(&self, name: &str) -> Result<Box<dyn Directory>> {
        let dir = File::open(name).map_err(|e| Error::from_io(name, e))?;
        Ok(Box::new(PosixDirectory {
            name: name.to_string(),
            dir,
        }))
    }

    fn file_exists(&self, fname: &str) -> Result<()> {
        fs::symlink_metadata(fname)
            .map(|_| ())
            .map_err(|e| Error::from_io(fname, e))
    }

    fn get_children(&self, dir: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| Error::from_io(dir, e))? {
            let entry = entry.map_err(|e| Error::from_io(dir, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn delete_file(&self, fname: &str) -> Result<()> {
        fs::remove_file(fname).map_err(|e| Error::from_io(fname, e))
    }

    fn create_dir(&self, name: &str) -> Result<()> {
        fs::create_dir(name).map_err(|e| Error::from_io(name, e))
    }

    fn create_dir_if_missing(&self, name: &str) -> Result<()> {
        match fs::create_dir(name) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && Path::new(name).is_dir() => {
                Ok(())
            }
            Err(e) => Err(Error::from_io(name, e)),
        }
    }

    fn delete_dir(&self, name: &str) -> Result<()> {
        fs::remove_dir(name).map_err(|e| Error::from_io(name, e))
    }

    fn get_file_size(&self, fname: &str) -> Result<u64> {
        Ok(Self::metadata(fname)?.len())
    }

    fn get_file_modification_time(&self, fname: &str) -> Result<u64> {
        let modified = Self::metadata(fname)?
            .modified()
            .map_err(|e| Error::from_io(fname, e))?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default())
    }

    fn rename_file(&self, src: &str, target: &str) -> Result<()> {
        fs::rename(src, target).map_err(|e| Error::from_io(src, e))
    }

    fn link_file(&self, src: &str, target: &str) -> Result<()> {
        fs::hard_link(src, target).map_err(|e| Error::from_io(src, e))
    }

    fn lock_file(&self, fname: &str) -> Result<Box<dyn FileLock>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(fname)
            .map_err(|e| Error::from_io(fname, e))?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!(path = fname, "lock acquired");
                Ok(Box::new(PosixFileLock {
                    path: fname.to_string(),
                    _lock: lock,
                }))
            }
            Err((_file, errno)) => Err(Error::io(
                fname,
                format!("lock held elsewhere: {}", errno.desc()),
            )),
        }
    }

    fn unlock_file(&self, lock: Box<dyn FileLock>) -> Result<()> {
        debug!(path = lock.path(), "lock released");
        drop(lock);
        Ok(())
    }

    fn new_logger(&self, fname: &str) -> Result<Arc<dyn Logger>> {
        let file = Self::open_writable(fname, &EnvOptions::default())?;
        Ok(Arc::new(FileLogger::new(Box::new(file), current_thread_id)))
    }

    fn schedule(&self, job: Job, pri: Priority, tag: Option<JobTag>, unschedule: Option<Job>) {
        self.pool(pri).schedule(job, tag, unschedule);
    }

    fn unschedule(&self, tag: JobTag, pri: Priority) -> usize {
        self.pool(pri).unschedule(tag)
    }

    fn start_thread(&self, job: Job) {
        match thread::Builder::new().name("sdfs-thread".into()).spawn(job) {
            Ok(handle) => self
                .started
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle),
            Err(e) => error!("failed to start thread: {e}"),
        }
    }

    fn wait_for_join(&self) {
        let handles = std::mem::take(
            &mut *self.started.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if handle.join().is_err() {
                warn!("started thread panicked");
            }
        }
    }

    fn thread_pool_queue_len(&self, pri: Priority) -> usize {
        self.pool(pri).queue_len()
    }

    fn test_directory(&self) -> Result<String> {
        let dir = match std::env::var("TEST_TMPDIR") {
            Ok(dir) if !dir.is_empty() => dir,
            _ => std::env::temp_dir()
                .join(format!("sdfsenvtest-{}", nix::unistd::geteuid()))
                .to_string_lossy()
                .into_owned(),
        };
        self.create_dir_if_missing(&dir)?;
        Ok(dir)
    }

    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default()
    }

    fn sleep_for_microseconds(&self, micros: u64) {
        thread::sleep(Duration::from_micros(micros));
    }

    fn host_name(&self) -> Result<String> {
        gethostname::gethostname()
            .into_string()
            .map_err(|_| Error::io("host name", "not valid UTF-8"))
    }

    fn current_time(&self) -> Result<i64> {
        Ok(Utc::now().timestamp())
    }

    fn absolute_path(&self, db_path: &str) -> Result<String> {
        if db_path.starts_with('/') {
            return Ok(db_path.to_string());
        }
        let cwd = std::env::current_dir().map_err(|e| Error::from_io("current dir", e))?;
        Ok(cwd.join(db_path).to_string_lossy().into_owned())
    }

    fn set_background_threads(&self, number: usize, pri: Priority) {
        self.pool(pri).set_background_threads(number);
    }

    fn background_threads(&self, pri: Priority) -> usize {
        self.pool(pri).background_threads()
    }

    fn inc_background_threads_if_needed(&self, number: usize, pri: Priority) {
        self.pool(pri).inc_background_threads_if_needed(number);
    }

    fn time_to_string(&self, secs: u64) -> String {
        i64::try_from(secs)
            .ok()
            .and_then(|secs| Local.timestamp_opt(secs, 0).single())
            .map(|t| t.format("%Y/%m/%d-%H:%M:%S").to_string())
            .unwrap_or_else(|| secs.to_string())
    }

    fn thread_id(&self) -> u64 {
        current_thread_id()
    }
}
