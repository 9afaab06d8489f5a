//! File system abstraction for testability.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Abstraction over file system operations for testability.
pub trait FileSystem {
    /// Checks if a file exists at the given path.
    fn file_exists(&self, path: &Path) -> bool;

    /// Creates all directories in the given path.
    fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Creates (or truncates) a file for writing.
    fn create_file(&self, path: &Path) -> std::io::Result<Box<dyn Write>>;

    /// Renames a file, replacing the destination.
    fn rename_file(&self, from: &Path, to: &Path) -> std::io::Result<()>;

    /// Removes a file.
    fn remove_file(&self, path: &Path) -> std::io::Result<()>;
}

/// Default file system implementation using `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl StdFileSystem {
    /// Creates a new `StdFileSystem` instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FileSystem for StdFileSystem {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn create_file(&self, path: &Path) -> std::io::Result<Box<dyn Write>> {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }

    fn rename_file(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }
}
