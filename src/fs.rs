//! Filesystem access for capture and restore.
//!
//! Both engines only ever touch the filesystem through these capabilities,
//! so they can run against the real OS ([`os`]) or an in-memory tree
//! ([`memory`]) in tests. We record the executable bit rather than full
//! permission bits; richer ACLs ride along when an adapter exposes them.

use std::io::{Read, Write};

use anyhow::Result;
use jiff::Timestamp;

pub mod memory;
#[cfg(unix)]
pub mod os;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FileType {
    File,
    Dir,
    Symlink,
}

/// What every directory child can do, whatever its type.
pub trait Node: Send {
    fn name(&self) -> String;
    fn executable(&self) -> bool;
    fn modified(&self) -> Timestamp;
    fn delete(&self) -> Result<()>;
}

pub trait RegularFile: Node {
    fn open_read(&self) -> Result<Box<dyn Read + Send>>;
    fn open_write(&self) -> Result<Box<dyn Write + Send>>;
}

pub trait Dir: Node {
    fn read_dir(&self) -> Result<Vec<Entry>>;

    /// Looks up one child; `None` if there's no child with that name.
    fn get_child(&self, name: &str) -> Result<Option<Entry>>;

    fn create_child_file(&self, name: &str, executable: bool) -> Result<Box<dyn RegularFile>>;
    fn create_child_dir(&self, name: &str) -> Result<Box<dyn Dir>>;
    fn create_child_symlink(&self, name: &str, target: &str) -> Result<Box<dyn Symlink>>;

    /// Renames a child, replacing any existing regular file at `to`.
    fn rename_child(&self, from: &str, to: &str) -> Result<()>;
}

pub trait Symlink: Node {
    fn readlink(&self) -> Result<String>;
}

/// A typed directory child. One case per [`FileType`], so a caller that
/// matched the type holds the matching capability.
pub enum Entry {
    File(Box<dyn RegularFile>),
    Dir(Box<dyn Dir>),
    Symlink(Box<dyn Symlink>),
}

impl Entry {
    pub fn file_type(&self) -> FileType {
        match self {
            Entry::File(_) => FileType::File,
            Entry::Dir(_) => FileType::Dir,
            Entry::Symlink(_) => FileType::Symlink,
        }
    }

    pub fn as_node(&self) -> &dyn Node {
        match self {
            Entry::File(f) => f.as_ref(),
            Entry::Dir(d) => d.as_ref(),
            Entry::Symlink(s) => s.as_ref(),
        }
    }

    pub fn name(&self) -> String {
        self.as_node().name()
    }

    pub fn delete(&self) -> Result<()> {
        self.as_node().delete()
    }
}
