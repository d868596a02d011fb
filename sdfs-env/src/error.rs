use nix::errno::Errno;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome categories the storage engine distinguishes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("no space left: {context}: {message}")]
    NoSpace { context: String, message: String },

    #[error("IO error: {context}: {message}")]
    Io { context: String, message: String },

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Categorizes an errno reported for `context` (usually a path).
    pub fn from_errno(context: impl Into<String>, errno: Errno) -> Self {
        let context = context.into();
        match errno {
            Errno::ENOENT => Self::NotFound(context),
            Errno::ENOSPC => Self::NoSpace {
                context,
                message: errno.desc().to_string(),
            },
            _ => Self::Io {
                context,
                message: errno.desc().to_string(),
            },
        }
    }

    pub fn from_io(context: impl Into<String>, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Self::from_errno(context, Errno::from_raw(code)),
            None if err.kind() == io::ErrorKind::NotFound => Self::NotFound(context.into()),
            None => Self::Io {
                context: context.into(),
                message: err.to_string(),
            },
        }
    }

    pub fn io(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_no_space(&self) -> bool {
        matches!(self, Self::NoSpace { .. })
    }

    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported(_))
    }
}
