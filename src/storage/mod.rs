//! Storage abstraction
//!
//! The index only touches named files inside one directory-like namespace.
//! `FileStorage` maps them onto a filesystem directory.

mod fs;
mod lock;

use std::fmt::Debug;

use bytes::Bytes;
use tempfile::TempDir;

use crate::error::Result;

pub use fs::FileStorage;
pub use lock::{acquire_lock, WriteLock};

/// Name of the advisory lock file held by an open writer
pub const WRITE_LOCK: &str = "WRITELOCK";

pub trait Storage: Send + Sync + Debug {
    /// Create or replace `name` with `data`, durably
    fn write_file(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Whole contents of `name`
    fn read_file(&self, name: &str) -> Result<Bytes>;

    fn exists(&self, name: &str) -> bool;

    fn delete(&self, name: &str) -> Result<()>;

    /// Atomically replace `to` with `from`
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Names of every file in the namespace
    fn list(&self) -> Result<Vec<String>>;

    /// A private scratch directory, removed when dropped
    fn temp_dir(&self) -> Result<TempDir>;

    /// Try once to take the exclusive advisory lock `name`
    fn try_lock(&self, name: &str) -> Result<Option<WriteLock>>;
}
