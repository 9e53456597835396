//! The capture engine: walk a directory tree, chunk and store every file,
//! and produce the id of a tree object describing the whole thing.
//!
//! The walk itself is single-threaded and depth-first; file contents are
//! handed to a pool of worker threads over a rendezvous channel. Within one
//! directory, everything that isn't a regular file is handled synchronously
//! first, then the directory waits for its scheduled file writes before
//! serializing its tree. Workers only ever chew on file contents, so they
//! can't block on each other or on the walker.

use std::io::{self, Read};
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use jiff::Timestamp;
use tracing::{debug, trace};

use crate::cache::Cache;
use crate::fs::{Dir, Entry, FileType, RegularFile};
use crate::hashing::ObjectId;
use crate::object::{FileFragment, Kind, Object, RawObject};
use crate::storage::{self, Storage};
use crate::tree::{EntryContent, Tree, TreeEntry};

/// Files are stored as fixed-size chunks of this many bytes.
///
/// Changing this changes the id of every file bigger than one chunk,
/// so don't.
pub const BLOB_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Captures the directory `dir` (at absolute path `abs_path`) into `store`
/// and returns the resulting tree id.
///
/// The cache is consulted per file: a hit whose recorded mtime is at least
/// the file's current mtime reuses the recorded id without opening the file.
pub fn write_dir(
    store: &dyn Storage,
    abs_path: &str,
    dir: &dyn Dir,
    cache: &mut dyn Cache,
) -> Result<ObjectId> {
    thread::scope(|s| {
        // Rendezvous channel: a send completes when a worker picks the task
        // up, and a dedicated enqueuer per directory keeps the walker from
        // ever parking on it.
        let (task_tx, task_rx) = bounded::<FileTask>(0);

        for _ in 0..num_cpus::get() {
            let rx = task_rx.clone();
            s.spawn(move || {
                for task in rx {
                    run_file_task(store, task);
                }
            });
        }
        drop(task_rx);

        let id = walk(s, store, abs_path, dir, cache, &task_tx);
        drop(task_tx);
        id
    })
}

struct FileTask {
    /// Absolute path, for the cache and for error messages.
    path: String,
    name: String,
    mtime: Timestamp,
    executable: bool,
    file: Box<dyn RegularFile>,
    results: Sender<FileResult>,
}

struct FileResult {
    path: String,
    name: String,
    mtime: Timestamp,
    executable: bool,
    outcome: Result<ObjectId>,
}

fn run_file_task(store: &dyn Storage, task: FileTask) {
    let FileTask {
        path,
        name,
        mtime,
        executable,
        file,
        results,
    } = task;

    let outcome = file
        .open_read()
        .and_then(|mut r| write_file(store, r.as_mut()))
        .with_context(|| format!("Couldn't capture {path}"));

    // The walker drains every outstanding result, so this only fails if the
    // whole capture is already being torn down.
    let _ = results.send(FileResult {
        path,
        name,
        mtime,
        executable,
        outcome,
    });
}

fn walk<'scope>(
    s: &'scope thread::Scope<'scope, '_>,
    store: &dyn Storage,
    path: &str,
    dir: &dyn Dir,
    cache: &mut dyn Cache,
    tasks: &Sender<FileTask>,
) -> Result<ObjectId> {
    let children = dir
        .read_dir()
        .with_context(|| format!("Couldn't list {path}"))?;

    let mut entries = Tree::new();

    // Everything that isn't a regular file is handled synchronously, before
    // any of this directory's files are scheduled on the pool.
    let (files, others): (Vec<Entry>, Vec<Entry>) = children
        .into_iter()
        .partition(|c| c.file_type() == FileType::File);

    for child in others {
        match child {
            Entry::Dir(d) => {
                let name = d.name();
                let subtree = walk(s, store, &format!("{path}/{name}"), d.as_ref(), cache, tasks)?;
                entries.insert(
                    name,
                    TreeEntry::new(EntryContent::Dir { id: subtree }, d.executable()),
                );
            }
            Entry::Symlink(l) => {
                let name = l.name();
                let target = l
                    .readlink()
                    .with_context(|| format!("Couldn't readlink {path}/{name}"))?;
                entries.insert(
                    name,
                    TreeEntry::new(EntryContent::Symlink { target }, l.executable()),
                );
            }
            Entry::File(_) => unreachable!("files are partitioned out"),
        }
    }

    // Schedule the files, skipping any the cache vouches for.
    let (result_tx, result_rx) = unbounded();
    let mut scheduled = Vec::new();

    for child in files {
        let Entry::File(file) = child else {
            unreachable!("partitioned on file type")
        };
        let name = file.name();
        let child_path = format!("{path}/{name}");
        let mtime = file.modified();

        if let Some((cached_mtime, id)) = cache.path_updated(&child_path)
            && cached_mtime >= mtime
        {
            trace!("{child_path} unchanged since its last capture");
            entries.insert(
                name,
                TreeEntry::new(EntryContent::File { id }, file.executable()),
            );
            continue;
        }

        scheduled.push(FileTask {
            path: child_path,
            name,
            mtime,
            executable: file.executable(),
            file,
            results: result_tx.clone(),
        });
    }
    drop(result_tx);

    let outstanding = scheduled.len();
    if outstanding > 0 {
        trace!("Scheduling {outstanding} file writes under {path}");
        let tx = tasks.clone();
        s.spawn(move || {
            for task in scheduled {
                if tx.send(task).is_err() {
                    break;
                }
            }
        });
    }

    // Drain every outstanding file before giving up on the directory;
    // bailing at the first error would leave workers blocked on sends
    // nobody will receive.
    let mut first_error = None;
    for _ in 0..outstanding {
        let result = drain(&result_rx);
        match result.outcome {
            Ok(id) => {
                cache.set_path_updated(&result.path, result.mtime, id);
                entries.insert(
                    result.name,
                    TreeEntry::new(EntryContent::File { id }, result.executable),
                );
            }
            Err(e) => first_error = first_error.or(Some(e)),
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let id = storage::set_object(store, &Object::Tree(entries).to_raw())
        .with_context(|| format!("Couldn't store tree for {path}"))?;
    debug!("{path} hashed to {id}");
    Ok(id)
}

fn drain(results: &Receiver<FileResult>) -> FileResult {
    results
        .recv()
        .expect("file workers hung up with results outstanding")
}

/// Chunks a stream into blobs of [`BLOB_CHUNK_SIZE`] and stores a `file`
/// object listing them in order. Returns the file object's id.
pub fn write_file(store: &dyn Storage, r: &mut dyn Read) -> Result<ObjectId> {
    let mut fragments = Vec::new();

    let mut buf = vec![0_u8; BLOB_CHUNK_SIZE];
    loop {
        let n = read_full(r, &mut buf)?;
        if n == 0 {
            break;
        }

        let blob = RawObject {
            kind: Kind::Blob,
            payload: buf[..n].to_vec(),
        };
        let id = storage::set_object(store, &blob)?;
        fragments.push(FileFragment {
            blob: id,
            size: n as u64,
        });

        if n < buf.len() {
            break;
        }
    }

    storage::set_object(store, &Object::File(fragments).to_raw())
}

/// Fills `buf` as far as the reader allows; a short count means end of input.
fn read_full(r: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::Write;
    use std::str::FromStr;

    use anyhow::bail;

    use crate::cache::{FileCache, NopCache};
    use crate::fs::memory::{MemNode, new_root};
    use crate::storage::memory::MemoryStorage;

    fn want_object(store: &dyn Storage, id_text: &str, want: &[u8]) {
        let id = ObjectId::from_str(id_text).unwrap();
        let have = store.get(&id).unwrap_or_else(|e| panic!("{id_text}: {e}"));
        assert_eq!(
            have,
            want,
            "wrong bytes for {id_text}: {}",
            String::from_utf8_lossy(&have)
        );
    }

    #[test]
    fn empty_file() -> Result<()> {
        let store = MemoryStorage::new();
        let id = write_file(&store, &mut io::empty())?;
        assert_eq!(
            id.to_string(),
            "sha3-256:4a10682307d5b5dc072d1b862497296640176109347b149aad38cd640000491b"
        );
        want_object(
            &store,
            "sha3-256:4a10682307d5b5dc072d1b862497296640176109347b149aad38cd640000491b",
            b"file 0\n",
        );
        Ok(())
    }

    #[test]
    fn large_file_chunks_and_deduplicates() -> Result<()> {
        let store = MemoryStorage::new();

        // Two full chunks of zeroes (which hash identically) and a 100-byte tail.
        let mut zeroes = io::repeat(0).take(2 * BLOB_CHUNK_SIZE as u64 + 100);
        let id = write_file(&store, &mut zeroes)?;
        assert_eq!(
            id.to_string(),
            "sha3-256:ab7907ee6b45b343422a0354de500bcf99f5ff69fe8125be84e43d421803c34e"
        );

        let mut want_large = format!("blob {BLOB_CHUNK_SIZE}\n").into_bytes();
        want_large.extend(std::iter::repeat_n(0, BLOB_CHUNK_SIZE));
        want_object(
            &store,
            "sha3-256:7287cbb09bdd8a0d96a6f6297413cd9d09a2763814636245a5a44120e6351be3",
            &want_large,
        );

        let mut want_small = b"blob 100\n".to_vec();
        want_small.extend([0; 100]);
        want_object(
            &store,
            "sha3-256:ddf124464f7b80e95f4a9c704f79e7037ff5d731648ba6b40c769893b428128c",
            &want_small,
        );

        want_object(
            &store,
            "sha3-256:ab7907ee6b45b343422a0354de500bcf99f5ff69fe8125be84e43d421803c34e",
            b"file 274\n\
blob=sha3-256:7287cbb09bdd8a0d96a6f6297413cd9d09a2763814636245a5a44120e6351be3&size=16777216\n\
blob=sha3-256:7287cbb09bdd8a0d96a6f6297413cd9d09a2763814636245a5a44120e6351be3&size=16777216\n\
blob=sha3-256:ddf124464f7b80e95f4a9c704f79e7037ff5d731648ba6b40c769893b428128c&size=100\n",
        );

        // The identical chunks were stored once.
        assert_eq!(store.list(Kind::Blob)?.len(), 2);
        Ok(())
    }

    fn mkfile(root: &MemNode, name: &str, executable: bool, content: &[u8]) {
        let f = root.create_child_file(name, executable).unwrap();
        f.open_write().unwrap().write_all(content).unwrap();
    }

    fn mixed_tree() -> MemNode {
        let root = new_root("root");
        mkfile(&root, "foo", false, b"foo");
        mkfile(&root, "bar", true, b"");
        root.create_child_symlink("baz", "foo").unwrap();
        let sub = root.create_child_dir("sub").unwrap();
        sub.create_child_file("a", false).unwrap();
        sub.create_child_dir("b").unwrap();
        root
    }

    #[test]
    fn mixed_directory() -> Result<()> {
        let store = MemoryStorage::new();
        let root = mixed_tree();

        let id = write_dir(&store, "", &root, &mut NopCache)?;
        assert_eq!(
            id.to_string(),
            "sha3-256:09e881f57befa1eacec744e3857a36f0d9d5dd1fa72ba96564b467a3d7d0c0d5"
        );

        want_object(
            &store,
            "sha3-256:4a10682307d5b5dc072d1b862497296640176109347b149aad38cd640000491b",
            b"file 0\n",
        );
        want_object(
            &store,
            "sha3-256:ba632076629ff33238850c870fcb51e4b7b67b3d9dcb66314adbcf1770a5fea7",
            b"blob 3\nfoo",
        );
        want_object(
            &store,
            "sha3-256:fa50ca1fc739852528ecc149b424a8ccbdf84b73c8718cde4525f2a410d79244",
            b"file 86\nblob=sha3-256:ba632076629ff33238850c870fcb51e4b7b67b3d9dcb66314adbcf1770a5fea7&size=3\n",
        );
        want_object(
            &store,
            "sha3-256:1dc6fae780ae4a1e823a5b8e26266356a2e1d22e5904b0652dcff6e3c0e72067",
            b"tree 0\n",
        );
        want_object(
            &store,
            "sha3-256:f1716a1b0cad23b6faab9712243402b8f8e7919c377fc5d5d87bd465cef056d7",
            b"tree 239\n\
acl=u::rw-,g::r--,o::r--&name=a&ref=sha3-256:4a10682307d5b5dc072d1b862497296640176109347b149aad38cd640000491b&type=file\n\
acl=u::rwx,g::r-x,o::r-x&name=b&ref=sha3-256:1dc6fae780ae4a1e823a5b8e26266356a2e1d22e5904b0652dcff6e3c0e72067&type=dir\n",
        );
        want_object(
            &store,
            "sha3-256:09e881f57befa1eacec744e3857a36f0d9d5dd1fa72ba96564b467a3d7d0c0d5",
            b"tree 423\n\
acl=u::rw-,g::r--,o::r--&name=baz&target=foo&type=symlink\n\
acl=u::rw-,g::r--,o::r--&name=foo&ref=sha3-256:fa50ca1fc739852528ecc149b424a8ccbdf84b73c8718cde4525f2a410d79244&type=file\n\
acl=u::rwx,g::r-x,o::r-x&name=bar&ref=sha3-256:4a10682307d5b5dc072d1b862497296640176109347b149aad38cd640000491b&type=file\n\
acl=u::rwx,g::r-x,o::r-x&name=sub&ref=sha3-256:f1716a1b0cad23b6faab9712243402b8f8e7919c377fc5d5d87bd465cef056d7&type=dir\n",
        );
        Ok(())
    }

    #[test]
    fn capture_is_deterministic() -> Result<()> {
        let store_a = MemoryStorage::new();
        let store_b = MemoryStorage::new();
        let id_a = write_dir(&store_a, "", &mixed_tree(), &mut NopCache)?;
        let id_b = write_dir(&store_b, "", &mixed_tree(), &mut NopCache)?;
        assert_eq!(id_a, id_b);
        Ok(())
    }

    #[test]
    fn cache_records_mtimes() -> Result<()> {
        let mut cache = FileCache::new("");
        let store = MemoryStorage::new();

        let root = new_root("foo");
        let file = root.create_child_file("bar", false)?;
        let want_mtime = file.modified();

        write_dir(&store, "/foo", &root, &mut cache)?;

        let (mtime, id) = cache.path_updated("/foo/bar").expect("no entry for /foo/bar");
        assert_eq!(mtime, want_mtime);
        assert_eq!(
            id.to_string(),
            "sha3-256:4a10682307d5b5dc072d1b862497296640176109347b149aad38cd640000491b"
        );
        Ok(())
    }

    #[test]
    fn cache_hits_skip_the_read() -> Result<()> {
        let mut cache = FileCache::new("");
        let store = MemoryStorage::new();

        let empty_file_id =
            ObjectId::from_str("sha3-256:4a10682307d5b5dc072d1b862497296640176109347b149aad38cd640000491b")
                .unwrap();
        store.set(&empty_file_id, Kind::File, b"file 0\n")?;

        let root = new_root("foo");
        let file = root.create_child_file("bar", false)?;
        cache.set_path_updated("/foo/bar", file.modified(), empty_file_id);

        write_dir(&store, "/foo", &root, &mut cache)?;
        assert_eq!(root.read_count("bar"), 0);
        Ok(())
    }

    #[test]
    fn stale_cache_entries_reread() -> Result<()> {
        let mut cache = FileCache::new("");
        let store = MemoryStorage::new();

        let root = new_root("foo");
        mkfile(&root, "bar", false, b"foo");
        // Cache something older than the file's mtime.
        cache.set_path_updated(
            "/foo/bar",
            Timestamp::new(0, 0).unwrap(),
            ObjectId::hash(b"stale"),
        );

        write_dir(&store, "/foo", &root, &mut cache)?;
        assert_eq!(root.read_count("bar"), 1);
        let (_, id) = cache.path_updated("/foo/bar").unwrap();
        assert_eq!(
            id.to_string(),
            "sha3-256:fa50ca1fc739852528ecc149b424a8ccbdf84b73c8718cde4525f2a410d79244"
        );
        Ok(())
    }

    /// A storage that refuses blobs, so every scheduled file write fails.
    struct NoBlobs(MemoryStorage);

    impl Storage for NoBlobs {
        fn get(&self, id: &ObjectId) -> Result<Vec<u8>> {
            self.0.get(id)
        }
        fn has(&self, id: &ObjectId) -> Result<bool> {
            self.0.has(id)
        }
        fn set(&self, id: &ObjectId, kind: Kind, raw: &[u8]) -> Result<()> {
            if kind == Kind::Blob {
                bail!("no blobs today");
            }
            self.0.set(id, kind, raw)
        }
        fn list(&self, kind: Kind) -> Result<Vec<ObjectId>> {
            self.0.list(kind)
        }
        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn worker_errors_fail_the_capture() {
        let store = NoBlobs(MemoryStorage::new());

        // Plenty of files, so workers are still busy when the first error
        // comes back; the walk has to drain them all and then fail.
        let root = new_root("root");
        for i in 0..32 {
            mkfile(&root, &format!("file{i}"), false, b"contents");
        }

        let err = write_dir(&store, "", &root, &mut NopCache).unwrap_err();
        assert!(format!("{err:#}").contains("no blobs today"), "{err:#}");
    }
}
