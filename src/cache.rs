//! The id cache: absolute path -> (mtime, file object id).
//!
//! Purely an optimization so captures can skip re-reading files whose mtime
//! hasn't moved; [`NopCache`] is always a correct substitute.
//!
//! Persisted as `<id> <unix sec> <unix nsec> <escaped path>` lines, with
//! backslashes and newlines in the path escaped so it can't break the line
//! format.

use std::fs::{self, File};
use std::io::{self, BufReader, prelude::*};

use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use jiff::Timestamp;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::hashing::ObjectId;

pub trait Cache {
    /// What do we know about `path`? Returns the mtime at capture time and
    /// the file object it hashed to.
    fn path_updated(&self, path: &str) -> Option<(Timestamp, ObjectId)>;

    fn set_path_updated(&mut self, path: &str, mtime: Timestamp, id: ObjectId);

    /// Persist, where that means anything.
    fn close(&mut self) -> Result<()>;
}

/// A cache that knows nothing and records nothing.
pub struct NopCache;

impl Cache for NopCache {
    fn path_updated(&self, _path: &str) -> Option<(Timestamp, ObjectId)> {
        None
    }

    fn set_path_updated(&mut self, _path: &str, _mtime: Timestamp, _id: ObjectId) {}

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A cache persisted to a single file.
pub struct FileCache {
    path: Utf8PathBuf,
    entries: FxHashMap<String, (Timestamp, ObjectId)>,
}

impl FileCache {
    /// An empty cache that will persist to `path`.
    /// (An empty path makes persistence a no-op, which tests use.)
    pub fn new(path: impl AsRef<Utf8Path>) -> FileCache {
        FileCache {
            path: path.as_ref().to_owned(),
            entries: FxHashMap::default(),
        }
    }

    /// Loads the cache at `path`; a missing file is just an empty cache.
    pub fn open(path: impl AsRef<Utf8Path>) -> Result<FileCache> {
        let path = path.as_ref().to_owned();
        let fh = match File::open(&path) {
            Ok(fh) => fh,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FileCache::new(path)),
            Err(e) => return Err(e).with_context(|| format!("Couldn't open cache {path}")),
        };

        let mut entries = FxHashMap::default();
        for line in BufReader::new(fh).lines() {
            let line = line?;
            let (id, rest) = line
                .split_once(' ')
                .ok_or_else(|| anyhow!("Malformed cache line '{line}'"))?;
            let (sec, rest) = rest
                .split_once(' ')
                .ok_or_else(|| anyhow!("Malformed cache line '{line}'"))?;
            let (nsec, escaped_path) = rest
                .split_once(' ')
                .ok_or_else(|| anyhow!("Malformed cache line '{line}'"))?;

            let mtime = Timestamp::new(sec.parse()?, nsec.parse()?)
                .with_context(|| format!("Bad cache timestamp in '{line}'"))?;
            entries.insert(unescape_path(escaped_path)?, (mtime, id.parse()?));
        }

        debug!("Loaded {} cache entries from {path}", entries.len());
        Ok(FileCache { path, entries })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Couldn't create {parent}"))?;
        }

        let dir = self.path.parent().unwrap_or(Utf8Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .context("Couldn't open a temporary cache file")?;
        for (path, (mtime, id)) in &self.entries {
            write!(
                temp,
                "{id} {} {} {}\n",
                mtime.as_second(),
                mtime.subsec_nanosecond(),
                escape_path(path)
            )?;
        }
        temp.persist(&self.path)
            .with_context(|| format!("Couldn't persist cache to {}", self.path))?;
        debug!("Wrote {} cache entries to {}", self.entries.len(), self.path);
        Ok(())
    }
}

impl Cache for FileCache {
    fn path_updated(&self, path: &str) -> Option<(Timestamp, ObjectId)> {
        self.entries.get(path).copied()
    }

    fn set_path_updated(&mut self, path: &str, mtime: Timestamp, id: ObjectId) {
        self.entries.insert(path.to_owned(), (mtime, id));
    }

    fn close(&mut self) -> Result<()> {
        if self.path.as_str().is_empty() {
            return Ok(());
        }
        self.save()
    }
}

fn escape_path(path: &str) -> String {
    path.replace('\\', "\\\\").replace('\n', "\\n")
}

fn unescape_path(escaped: &str) -> Result<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            other => return Err(anyhow!("Bad path escape \\{:?}", other)),
        }
    }
    Ok(out)
}
