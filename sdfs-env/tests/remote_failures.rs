//! Scripted remote failures, driven through a mocked sdfs session.

use libsdfs::{Connector, FileHandle, FileInfo, OpenMode, SdfsFileSystem};
use mockall::mock;
use nix::errno::Errno;
use sdfs_env::sdfs::{SdfsReadableFile, SdfsWritableFile};
use sdfs_env::{
    Env, Error, Logger, PosixEnv, RandomAccessFile, SdfsEnv, SequentialFile, TracingLogger,
    WritableFile,
};
use std::sync::Arc;

mock! {
    Fs {}

    impl SdfsFileSystem for Fs {
        fn disconnect(&self) -> libsdfs::Result<()>;
        fn path_info(&self, path: &str) -> libsdfs::Result<FileInfo>;
        fn create_directory(&self, path: &str) -> libsdfs::Result<()>;
        fn list_directory(&self, path: &str) -> libsdfs::Result<Vec<String>>;
        fn open_file(&self, path: &str, mode: OpenMode) -> libsdfs::Result<FileHandle>;
        fn tell(&self, file: FileHandle) -> libsdfs::Result<u64>;
        fn seek(&self, file: FileHandle, pos: u64) -> libsdfs::Result<()>;
        fn read(&self, file: FileHandle, buf: &mut [u8]) -> libsdfs::Result<usize>;
        fn pread(&self, file: FileHandle, pos: u64, buf: &mut [u8]) -> libsdfs::Result<usize>;
        fn write(&self, file: FileHandle, buf: &[u8]) -> libsdfs::Result<usize>;
        fn exists(&self, path: &str) -> libsdfs::Result<bool>;
        fn delete(&self, path: &str, recursive: bool) -> libsdfs::Result<()>;
        fn rename(&self, old_path: &str, new_path: &str) -> libsdfs::Result<()>;
        fn close_file(&self, file: FileHandle) -> libsdfs::Result<()>;
        fn flush(&self, file: FileHandle) -> libsdfs::Result<()>;
        fn hflush(&self, file: FileHandle) -> libsdfs::Result<()>;
        fn hsync(&self, file: FileHandle) -> libsdfs::Result<()>;
    }
}

const HANDLE: FileHandle = FileHandle::new(7);

struct FixedConnector(Arc<dyn SdfsFileSystem>);

impl Connector for FixedConnector {
    fn connect(&self, _host: &str, _port: u16) -> libsdfs::Result<Arc<dyn SdfsFileSystem>> {
        Ok(self.0.clone())
    }
}

fn log() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}

fn opened() -> MockFs {
    let mut fs = MockFs::new();
    fs.expect_open_file()
        .times(1)
        .returning(|_, mode| {
            assert_eq!(mode, OpenMode::WriteOnly);
            Ok(HANDLE)
        });
    fs
}

/// A session with one file open for reading, closed exactly once on drop.
fn opened_for_read() -> MockFs {
    let mut fs = MockFs::new();
    fs.expect_open_file()
        .times(1)
        .returning(|_, mode| {
            assert_eq!(mode, OpenMode::ReadOnly);
            Ok(HANDLE)
        });
    fs.expect_close_file().times(1).returning(|_| Ok(()));
    fs
}

fn env_over(fs: MockFs) -> SdfsEnv {
    let connector = FixedConnector(Arc::new(fs));
    SdfsEnv::connect("sdfs:namenode:9000", &connector, Arc::new(PosixEnv::new()))
        .expect("connect")
}

#[test]
fn short_write_and_no_space() {
    let mut fs = opened();
    let mut seq = mockall::Sequence::new();
    fs.expect_write()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, buf| Ok(buf.len() - 3));
    fs.expect_write()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(Errno::ENOSPC));
    fs.expect_close_file().times(1).returning(|_| Ok(()));

    let mut w = SdfsWritableFile::create(Arc::new(fs), "/db/000007.sst", log()).unwrap();
    match w.append(b"block-data").unwrap_err() {
        Error::Io { context, message } => {
            assert_eq!(context, "/db/000007.sst");
            assert!(message.contains("short write"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(w.append(b"more").unwrap_err().is_no_space());
}

#[test]
fn flush_failure_short_circuits_sync() {
    let mut fs = opened();
    fs.expect_flush()
        .times(1)
        .returning(|_| Err(Errno::EIO));
    fs.expect_hsync().times(0);
    fs.expect_close_file().times(1).returning(|_| Ok(()));

    let mut w = SdfsWritableFile::create(Arc::new(fs), "/db/000008.log", log()).unwrap();
    let err = w.sync().unwrap_err();
    assert_eq!(err, Error::from_errno("/db/000008.log", Errno::EIO));
}

#[test]
fn handle_released_exactly_once() {
    let mut fs = opened();
    fs.expect_close_file()
        .times(1)
        .returning(|file| {
            assert_eq!(file, HANDLE);
            Ok(())
        });

    let mut w = SdfsWritableFile::create(Arc::new(fs), "/db/LOG", log()).unwrap();
    w.close().unwrap();
    w.close().unwrap();
    assert!(w.flush().unwrap_err().is_io_error());
    drop(w);
}

#[test]
fn drop_swallows_close_failure() {
    let mut fs = opened();
    fs.expect_close_file()
        .times(1)
        .returning(|_| Err(Errno::EIO));

    let w = SdfsWritableFile::create(Arc::new(fs), "/db/LOG.old", log()).unwrap();
    drop(w);
}

#[test]
fn rename_ignores_missing_target() {
    let mut fs = MockFs::new();
    fs.expect_delete()
        .times(1)
        .returning(|path, recursive| {
            assert_eq!(path, "/db/CURRENT");
            assert!(recursive);
            Err(Errno::ENOENT)
        });
    fs.expect_rename().times(1).returning(|_, _| Ok(()));
    fs.expect_disconnect().times(1).returning(|| Ok(()));

    let env = env_over(fs);
    env.rename_file("/db/000009.dbtmp", "/db/CURRENT").unwrap();
}

#[test]
fn listing_failures_are_io_errors() {
    let mut fs = MockFs::new();
    fs.expect_exists().returning(|_| Ok(true));
    fs.expect_list_directory()
        .times(1)
        .returning(|_| Err(Errno::ETIMEDOUT));
    fs.expect_disconnect().times(1).returning(|| Err(Errno::ENOTCONN));

    let env = env_over(fs);
    let err = env.get_children("/db").unwrap_err();
    assert!(err.is_io_error());
    assert!(err.to_string().contains(Errno::ETIMEDOUT.desc()));
}

#[test]
fn stat_failures_keep_category() {
    let mut fs = MockFs::new();
    fs.expect_path_info()
        .returning(|path| match path {
            "/db/gone" => Err(Errno::ENOENT),
            _ => Err(Errno::EIO),
        });
    fs.expect_disconnect().returning(|| Ok(()));

    let env = env_over(fs);
    assert!(env.get_file_size("/db/gone").unwrap_err().is_not_found());
    assert!(env
        .get_file_modification_time("/db/000001.sst")
        .unwrap_err()
        .is_io_error());
}

#[test]
fn read_loops_over_short_reads() {
    let mut fs = opened_for_read();
    let mut seq = mockall::Sequence::new();
    fs.expect_read()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, buf| {
            buf[..2].copy_from_slice(b"ab");
            Ok(2)
        });
    fs.expect_read()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, buf| {
            assert_eq!(buf.len(), 6);
            buf[..3].copy_from_slice(b"cde");
            Ok(3)
        });
    fs.expect_read()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(0));

    let mut r = SdfsReadableFile::open(Arc::new(fs), "/db/000010.log", log()).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(r.read(&mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"abcde");
}

#[test]
fn read_failure_after_partial_read() {
    let mut fs = opened_for_read();
    let mut seq = mockall::Sequence::new();
    fs.expect_read()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(4));
    fs.expect_read()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(Errno::EIO));

    let mut r = SdfsReadableFile::open(Arc::new(fs), "/db/000011.log", log()).unwrap();
    let err = r.read(&mut [0u8; 16]).unwrap_err();
    assert_eq!(err, Error::from_errno("/db/000011.log", Errno::EIO));
    assert!(err.is_io_error());
}

#[test]
fn skip_stops_when_tell_fails() {
    let mut fs = opened_for_read();
    fs.expect_tell()
        .times(1)
        .returning(|file| {
            assert_eq!(file, HANDLE);
            Err(Errno::EIO)
        });
    fs.expect_seek().times(0);

    let mut r = SdfsReadableFile::open(Arc::new(fs), "/db/000012.log", log()).unwrap();
    assert!(r.skip(128).unwrap_err().is_io_error());
}

#[test]
fn skip_seeks_from_current_offset() {
    let mut fs = opened_for_read();
    fs.expect_tell().times(1).returning(|_| Ok(100));
    fs.expect_seek()
        .times(1)
        .returning(|_, pos| {
            assert_eq!(pos, 228);
            Err(Errno::EINVAL)
        });

    let mut r = SdfsReadableFile::open(Arc::new(fs), "/db/000013.log", log()).unwrap();
    assert!(r.skip(128).unwrap_err().is_io_error());
}

#[test]
fn pread_failures_keep_category() {
    let mut fs = opened_for_read();
    fs.expect_pread()
        .returning(|_, offset, _| match offset {
            0 => Err(Errno::EIO),
            _ => Err(Errno::ENOENT),
        });

    let r = SdfsReadableFile::open(Arc::new(fs), "/db/000014.sst", log()).unwrap();
    let err = r.read_at(0, &mut [0u8; 32]).unwrap_err();
    assert!(err.is_io_error());
    assert!(err.to_string().contains(Errno::EIO.desc()));
    assert!(r.read_at(4096, &mut [0u8; 32]).unwrap_err().is_not_found());
}
