//! File objects over remote sdfs handles.

use crate::env::{Directory, RandomAccessFile, SequentialFile, WritableFile};
use crate::error::{Error, Result};
use crate::info_log;
use crate::logger::{InfoLogLevel, Logger};
use libsdfs::{FileHandle, OpenMode, SdfsFileSystem};
use std::sync::Arc;

/// Read side of a remote file, usable both sequentially and by offset.
pub struct SdfsReadableFile {
    fs: Arc<dyn SdfsFileSystem>,
    filename: String,
    file: FileHandle,
    info_log: Arc<dyn Logger>,
}

impl SdfsReadableFile {
    pub fn open(
        fs: Arc<dyn SdfsFileSystem>,
        fname: &str,
        info_log: Arc<dyn Logger>,
    ) -> Result<Self> {
        info_log!(info_log, InfoLogLevel::Debug, "[sdfs] SdfsReadableFile opening file {fname}");
        let file = fs
            .open_file(fname, OpenMode::ReadOnly)
            .map_err(|e| Error::from_errno(fname, e))?;
        info_log!(
            info_log,
            InfoLogLevel::Debug,
            "[sdfs] SdfsReadableFile opened file {fname} handle={file}"
        );
        Ok(Self {
            fs,
            filename: fname.to_string(),
            file,
            info_log,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl SequentialFile for SdfsReadableFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        info_log!(
            self.info_log,
            InfoLogLevel::Debug,
            "[sdfs] SdfsReadableFile reading {} {}",
            self.filename,
            buf.len()
        );
        let mut total = 0;
        while total < buf.len() {
            match self.fs.read(self.file, &mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => return Err(Error::from_errno(&self.filename, e)),
            }
        }
        Ok(total)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        info_log!(self.info_log, InfoLogLevel::Debug, "[sdfs] SdfsReadableFile skip {}", self.filename);
        let current = self
            .fs
            .tell(self.file)
            .map_err(|e| Error::from_errno(&self.filename, e))?;
        self.fs
            .seek(self.file, current.saturating_add(n))
            .map_err(|e| Error::from_errno(&self.filename, e))
    }
}

impl RandomAccessFile for SdfsReadableFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        info_log!(self.info_log, InfoLogLevel::Debug, "[sdfs] SdfsReadableFile preading {}", self.filename);
        self.fs
            .pread(self.file, offset, buf)
            .map_err(|e| Error::from_errno(&self.filename, e))
    }
}

impl Drop for SdfsReadableFile {
    fn drop(&mut self) {
        info_log!(self.info_log, InfoLogLevel::Debug, "[sdfs] SdfsReadableFile closing file {}", self.filename);
        if let Err(e) = self.fs.close_file(self.file) {
            info_log!(
                self.info_log,
                InfoLogLevel::Warn,
                "[sdfs] closing {} failed: {}",
                self.filename,
                e.desc()
            );
        }
    }
}

/// Write side of a remote file. Nothing is buffered locally.
pub struct SdfsWritableFile {
    fs: Arc<dyn SdfsFileSystem>,
    filename: String,
    file: Option<FileHandle>,
    info_log: Arc<dyn Logger>,
}

impl SdfsWritableFile {
    /// Creates `fname`, truncating any previous content.
    pub fn create(
        fs: Arc<dyn SdfsFileSystem>,
        fname: &str,
        info_log: Arc<dyn Logger>,
    ) -> Result<Self> {
        info_log!(info_log, InfoLogLevel::Debug, "[sdfs] SdfsWritableFile opening {fname}");
        let file = fs
            .open_file(fname, OpenMode::WriteOnly)
            .map_err(|e| Error::from_errno(fname, e))?;
        info_log!(info_log, InfoLogLevel::Debug, "[sdfs] SdfsWritableFile opened {fname}");
        Ok(Self {
            fs,
            filename: fname.to_string(),
            file: Some(file),
            info_log,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    fn handle(&self) -> Result<FileHandle> {
        self.file
            .ok_or_else(|| Error::io(&self.filename, "file already closed"))
    }
}

impl WritableFile for SdfsWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        let file = self.handle()?;
        let written = self
            .fs
            .write(file, data)
            .map_err(|e| Error::from_errno(&self.filename, e))?;
        if written != data.len() {
            return Err(Error::io(
                &self.filename,
                format!("short write: {written} of {} bytes", data.len()),
            ));
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let file = self.handle()?;
        self.fs
            .flush(file)
            .map_err(|e| Error::from_errno(&self.filename, e))
    }

    fn sync(&mut self) -> Result<()> {
        info_log!(self.info_log, InfoLogLevel::Debug, "[sdfs] SdfsWritableFile Sync {}", self.filename);
        let file = self.handle()?;
        self.fs
            .flush(file)
            .map_err(|e| Error::from_errno(&self.filename, e))?;
        self.fs
            .hsync(file)
            .map_err(|e| Error::from_errno(&self.filename, e))?;
        info_log!(self.info_log, InfoLogLevel::Debug, "[sdfs] SdfsWritableFile Synced {}", self.filename);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        info_log!(self.info_log, InfoLogLevel::Debug, "[sdfs] SdfsWritableFile closing {}", self.filename);
        self.fs
            .close_file(file)
            .map_err(|e| Error::from_errno(&self.filename, e))
    }
}

impl Drop for SdfsWritableFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            info_log!(self.info_log, InfoLogLevel::Warn, "[sdfs] {e}");
        }
    }
}

/// Remote directories have nothing to fsync.
pub struct SdfsDirectory;

impl Directory for SdfsDirectory {
    fn fsync(&mut self) -> Result<()> {
        Ok(())
    }
}
