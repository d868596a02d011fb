//! Info logging for the storage engine.
//!
//! [`FileLogger`] is the on-disk (or on-sdfs) info log: every call becomes one
//! line `YYYY/MM/DD-HH:MM:SS.uuuuuu <thread> <message>` appended through the
//! logger's own [`WritableFile`] and flushed right away. [`TracingLogger`]
//! forwards the same calls to `tracing` and is what environments use for their
//! own diagnostics until the engine hands them a real log.

use crate::env::WritableFile;
use chrono::{DateTime, Local};
use std::fmt::{self, Write as _};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Lines are formatted on the stack first.
const STACK_LINE_BYTES: usize = 500;
/// Longest line ever written; longer messages are cut.
const MAX_LINE_BYTES: usize = 30000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InfoLogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Header,
}

pub trait Logger: Send + Sync {
    fn logv(&self, level: InfoLogLevel, args: fmt::Arguments<'_>);

    fn level(&self) -> InfoLogLevel {
        InfoLogLevel::Info
    }

    fn flush(&self) {}
}

/// Logs a formatted message through any [`Logger`] handle.
///
/// ```ignore
/// info_log!(self.info_log, InfoLogLevel::Debug, "[sdfs] opened {}", path);
/// ```
#[macro_export]
macro_rules! info_log {
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        #[allow(unused_imports)]
        use $crate::logger::Logger as _;
        $logger.logv($level, format_args!($($arg)+))
    }};
}

/// Writer-backed line logger.
pub struct FileLogger {
    file: Mutex<Box<dyn WritableFile>>,
    level: InfoLogLevel,
    thread_id: fn() -> u64,
}

impl FileLogger {
    pub fn new(file: Box<dyn WritableFile>, thread_id: fn() -> u64) -> Self {
        Self {
            file: Mutex::new(file),
            level: InfoLogLevel::Info,
            thread_id,
        }
    }

    pub fn with_level(mut self, level: InfoLogLevel) -> Self {
        self.level = level;
        self
    }
}

impl Logger for FileLogger {
    fn logv(&self, level: InfoLogLevel, args: fmt::Arguments<'_>) {
        if level < self.level {
            return;
        }
        let line = format_line(Local::now(), (self.thread_id)(), args);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file.append(&line).and_then(|()| file.flush()) {
            warn!("dropping info log line: {e}");
        }
    }

    fn level(&self) -> InfoLogLevel {
        self.level
    }

    fn flush(&self) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file.flush() {
            warn!("flushing info log: {e}");
        }
    }
}

impl Drop for FileLogger {
    fn drop(&mut self) {
        let file = self.file.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file.close() {
            warn!("closing info log: {e}");
        }
    }
}

/// Forwards engine log calls to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn logv(&self, level: InfoLogLevel, args: fmt::Arguments<'_>) {
        match level {
            InfoLogLevel::Debug => tracing::debug!("{}", args),
            InfoLogLevel::Info | InfoLogLevel::Header => tracing::info!("{}", args),
            InfoLogLevel::Warn => tracing::warn!("{}", args),
            InfoLogLevel::Error | InfoLogLevel::Fatal => tracing::error!("{}", args),
        }
    }

    fn level(&self) -> InfoLogLevel {
        InfoLogLevel::Debug
    }
}

/// Fixed-capacity sink that keeps one byte spare for the trailing newline.
struct LineBuf<'a> {
    buf: &'a mut [u8],
    len: usize,
    overflowed: bool,
}

impl fmt::Write for LineBuf<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - 1 - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        if n < s.len() {
            self.overflowed = true;
            return Err(fmt::Error);
        }
        Ok(())
    }
}

/// Renders into `buf`; `None` if the line did not fit and `truncate` is off.
fn render(
    buf: &mut [u8],
    now: &DateTime<Local>,
    thread_id: u64,
    args: fmt::Arguments<'_>,
    truncate: bool,
) -> Option<usize> {
    let mut line = LineBuf {
        buf,
        len: 0,
        overflowed: false,
    };
    let _ = write!(
        line,
        "{} {:x} ",
        now.format("%Y/%m/%d-%H:%M:%S%.6f"),
        thread_id
    );
    if !line.overflowed {
        let _ = line.write_fmt(args);
    }
    if line.overflowed && !truncate {
        return None;
    }
    if line.len == 0 || line.buf[line.len - 1] != b'\n' {
        line.buf[line.len] = b'\n';
        line.len += 1;
    }
    Some(line.len)
}

fn format_line(
    now: DateTime<Local>,
    thread_id: u64,
    args: fmt::Arguments<'_>,
) -> Vec<u8> {
    let mut stack = [0u8; STACK_LINE_BYTES];
    if let Some(len) = render(&mut stack, &now, thread_id, args, false) {
        return stack[..len].to_vec();
    }
    let mut heap = vec![0u8; MAX_LINE_BYTES];
    let len = render(&mut heap, &now, thread_id, args, true).unwrap_or(0);
    heap.truncate(len);
    heap
}
