//! Client API for the sdfs distributed filesystem.
//!
//! Submodules:
//! - `client`: the synchronous call surface (`SdfsFileSystem`) and the
//!   `Connector` that opens sessions against a `host:port` endpoint
//! - `memory`: an in-memory cluster, used for development and tests
//! - `local`: a loopback backend that serves the namespace out of a local
//!   directory
//!
//! Every call blocks until the remote side answers and reports failure as a
//! plain errno, so callers decide how to categorize it.

pub mod client;
pub mod local;
pub mod memory;
mod path;

pub use client::{
    Connector, FileHandle, FileInfo, ObjectKind, OpenMode, Result, SdfsFileSystem,
};
pub use local::LocalConnector;
pub use memory::{MemoryCluster, Op};
