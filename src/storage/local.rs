//! A storage that keeps objects on the local filesystem.
//!
//! Objects live under `<root>/<algo>/<first digest byte>/<rest>`, written to
//! a temp file and renamed into place so a torn write never leaves a partial
//! object at its final name. Since a directory tree can't list objects by
//! type, a typed [`Index`] rides along under `<root>/index/`: every writer
//! persists its own random-suffixed index on close, and open combines them
//! all, so concurrent writers don't clobber each other.

use std::fs::{self, File};
use std::io::{self, BufReader, prelude::*};
use std::sync::Mutex;

use anyhow::{Context, Result, bail, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::hashing::ObjectId;
use crate::index::Index;
use crate::object::Kind;
use crate::storage::{NotFound, Storage};

pub struct LocalStorage {
    root: Utf8PathBuf,
    index: Mutex<Index>,
    /// Index files read at open; compacted away once close() has written
    /// a combined replacement.
    read_indexes: Vec<Utf8PathBuf>,
}

impl LocalStorage {
    pub fn open(root: &Utf8Path) -> Result<LocalStorage> {
        match fs::metadata(root) {
            Ok(meta) => ensure!(meta.is_dir(), "{root}: Not a directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(root)
                .with_context(|| format!("Couldn't create {root}"))?,
            Err(e) => return Err(e).with_context(|| format!("Couldn't stat {root}")),
        }

        let mut index = Index::new();
        let mut read_indexes = Vec::new();

        let index_dir = root.join("index");
        match fs::read_dir(&index_dir) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Couldn't list {index_dir}")),
            Ok(entries) => {
                for entry in entries {
                    let path = Utf8PathBuf::try_from(entry?.path())
                        .context("Index path isn't UTF-8")?;
                    let fh = File::open(&path)
                        .with_context(|| format!("Couldn't open index {path}"))?;
                    index.combine(
                        Index::load(BufReader::new(fh))
                            .with_context(|| format!("Couldn't load index {path}"))?,
                    );
                    read_indexes.push(path);
                }
            }
        }

        debug!("Opened local storage at {root} ({} indexes)", read_indexes.len());
        Ok(LocalStorage {
            root: root.to_owned(),
            index: Mutex::new(index),
            read_indexes,
        })
    }

    fn object_path(&self, id: &ObjectId) -> Utf8PathBuf {
        let hex = id.to_string();
        let (algo, digest) = hex.split_once(':').unwrap();
        let mut path = self.root.join(algo);
        path.push(&digest[0..2]);
        path.push(&digest[2..]);
        path
    }
}

impl Storage for LocalStorage {
    fn get(&self, id: &ObjectId) -> Result<Vec<u8>> {
        match fs::read(self.object_path(id)) {
            Ok(raw) => Ok(raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => bail!(NotFound(*id)),
            Err(e) => Err(e).with_context(|| format!("Couldn't read object {id}")),
        }
    }

    fn has(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.object_path(id).is_file())
    }

    fn set(&self, id: &ObjectId, kind: Kind, raw: &[u8]) -> Result<()> {
        let path = self.object_path(id);
        let dir = path.parent().unwrap();
        fs::create_dir_all(dir).with_context(|| format!("Couldn't create {dir}"))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Couldn't open a temporary object in {dir}"))?;
        temp.write_all(raw)?;
        temp.persist(&path)
            .with_context(|| format!("Couldn't persist object to {path}"))?;

        self.index.lock().unwrap().add(*id, kind);
        Ok(())
    }

    fn list(&self, kind: Kind) -> Result<Vec<ObjectId>> {
        Ok(self.index.lock().unwrap().ids(kind))
    }

    /// Persists the combined index under a fresh random key, then deletes the
    /// ones open() read. A crash anywhere in between loses nothing; at worst
    /// the next open combines some overlapping indexes.
    fn close(&self) -> Result<()> {
        let index_dir = self.root.join("index");
        fs::create_dir_all(&index_dir).with_context(|| format!("Couldn't create {index_dir}"))?;

        let mut temp = tempfile::NamedTempFile::new_in(&index_dir)
            .context("Couldn't open a temporary index")?;
        self.index.lock().unwrap().save(&mut temp)?;

        let name = index_dir.join(format!("{:016x}", rand::random::<u64>()));
        temp.persist(&name)
            .with_context(|| format!("Couldn't persist index to {name}"))?;
        debug!("Wrote index {name}");

        for old in &self.read_indexes {
            fs::remove_file(old).with_context(|| format!("Couldn't remove old index {old}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::storage::set_object;
    use crate::object::RawObject;

    fn foo_blob() -> RawObject {
        RawObject {
            kind: Kind::Blob,
            payload: b"foo".to_vec(),
        }
    }

    fn storage_root(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(dir.path().join("repo")).unwrap()
    }

    #[test]
    fn round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = storage_root(&dir);

        let store = LocalStorage::open(&root)?;
        let id = set_object(&store, &foo_blob())?;
        assert!(store.has(&id)?);
        assert_eq!(store.get(&id)?, b"blob 3\nfoo");
        assert_eq!(store.list(Kind::Blob)?, vec![id]);

        // Objects fan out under <algo>/<first byte>.
        assert!(
            root.join("sha3-256")
                .join("ba")
                .join("632076629ff33238850c870fcb51e4b7b67b3d9dcb66314adbcf1770a5fea7")
                .is_file()
        );

        let missing = ObjectId::hash(b"nope");
        assert!(!store.has(&missing)?);
        assert!(store.get(&missing).is_err());
        Ok(())
    }

    #[test]
    fn index_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = storage_root(&dir);

        let store = LocalStorage::open(&root)?;
        let id = set_object(&store, &foo_blob())?;
        store.close()?;

        let store = LocalStorage::open(&root)?;
        assert_eq!(store.list(Kind::Blob)?, vec![id]);
        Ok(())
    }

    #[test]
    fn concurrent_writer_indexes_combine() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = storage_root(&dir);

        // Two writers against the same root, each closing separately.
        let a = LocalStorage::open(&root)?;
        let b = LocalStorage::open(&root)?;
        let blob_id = set_object(&a, &foo_blob())?;
        let tree_id = set_object(
            &b,
            &RawObject {
                kind: Kind::Tree,
                payload: Vec::new(),
            },
        )?;
        a.close()?;
        b.close()?;

        let combined = LocalStorage::open(&root)?;
        assert_eq!(combined.list(Kind::Blob)?, vec![blob_id]);
        assert_eq!(combined.list(Kind::Tree)?, vec![tree_id]);

        // And the reader compacts on close: one index file afterwards.
        combined.close()?;
        assert_eq!(fs::read_dir(root.join("index"))?.count(), 1);
        Ok(())
    }
}
