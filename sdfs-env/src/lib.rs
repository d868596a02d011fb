//! Storage-engine environment backed by the sdfs distributed filesystem.
//!
//! [`SdfsEnv`] implements the [`Env`] contract by forwarding file and
//! directory work to an sdfs session and everything else to a local base
//! environment, normally [`PosixEnv`].

pub mod config;
pub mod env;
pub mod error;
pub mod logger;
pub mod posix;
pub mod sdfs;
mod thread_pool;
pub mod uri;

pub use config::EnvConfig;
pub use env::{
    Directory, Env, EnvOptions, FileLock, Job, JobTag, Priority, RandomAccessFile,
    SequentialFile, WritableFile,
};
pub use error::{Error, Result};
pub use logger::{FileLogger, InfoLogLevel, Logger, TracingLogger};
pub use posix::PosixEnv;
pub use sdfs::SdfsEnv;
pub use uri::SdfsUri;
