//! Check the consistency of the object graph: walk it from a set of roots
//! and report every reference that's missing, unreadable, or the wrong size.
//!
//! Problems stream out over a channel while the walk is still running, and
//! one broken object never stops the rest of the walk. Only a failure that
//! makes the whole walk impossible (listing the roots) comes back as an
//! error.

use std::fmt;
use std::sync::{Condvar, Mutex};
use std::thread;

use anyhow::Result;
use crossbeam_channel::{Sender, unbounded};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::hashing::ObjectId;
use crate::object::{Kind, Object, RawObject};
use crate::storage::{IdMismatch, Storage};

/// One thing wrong with one object.
#[derive(Debug)]
pub struct Problem {
    pub id: ObjectId,
    /// The chain of objects we followed to get here, outermost first.
    pub ancestors: Vec<AncestorInfo>,
    pub kind: ProblemKind,
}

#[derive(Debug)]
pub enum ProblemKind {
    /// The object is missing or the backend couldn't produce it
    /// (including bytes that no longer hash to the id).
    StorageError(anyhow::Error),
    /// The object was retrieved but couldn't be decoded.
    DeserializationError(anyhow::Error),
    /// A blob's length doesn't match the size its file fragment recorded.
    UnexpectedBlobSize { want: u64, have: u64 },
}

#[derive(Debug, Clone)]
pub struct AncestorInfo {
    pub id: ObjectId,
    pub kind: Kind,
    /// The name under which the next link was found, for tree ancestors.
    pub name: Option<String>,
}

impl fmt::Display for AncestorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} of {} {}", name, self.kind, self.id),
            None => write!(f, "{} {}", self.kind, self.id),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ProblemKind::StorageError(e) => {
                write!(f, "Failed retrieving object from storage: {e:#}")?
            }
            ProblemKind::DeserializationError(e) => {
                write!(f, "Object could not be deserialized: {e:#}")?
            }
            ProblemKind::UnexpectedBlobSize { want, have } => {
                write!(f, "Unexpected blob size: have {have}, want {want}")?
            }
        }

        write!(f, ". Object {}", self.id)?;
        if !self.ancestors.is_empty() {
            let chain: Vec<String> = self.ancestors.iter().map(AncestorInfo::to_string).collect();
            write!(f, " (path: {})", chain.join(" / "))?;
        }
        Ok(())
    }
}

struct QueueItem {
    id: ObjectId,
    ancestors: Vec<AncestorInfo>,
    /// The length the referring file fragment promised, for blobs.
    expected_size: Option<u64>,
}

impl QueueItem {
    fn root(id: ObjectId) -> QueueItem {
        QueueItem {
            id,
            ancestors: Vec::new(),
            expected_size: None,
        }
    }
}

/// Counts outstanding queue items; the walk is done when it hits zero.
#[derive(Default)]
struct WaitCounter {
    count: Mutex<usize>,
    zero: Condvar,
}

impl WaitCounter {
    fn add(&self, n: usize) {
        *self.count.lock().unwrap() += n;
    }

    fn done(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count != 0 {
            count = self.zero.wait(count).unwrap();
        }
    }
}

struct Walk<'a> {
    store: &'a dyn Storage,
    check_blobs: bool,
    problems: Sender<Problem>,
    queue: Mutex<Option<Sender<QueueItem>>>,
    pending: WaitCounter,
    seen: Mutex<FxHashSet<ObjectId>>,
}

impl Walk<'_> {
    /// Checks and inserts in one critical section, so no two workers can
    /// both claim an id.
    fn only_unseen(&self, items: Vec<QueueItem>) -> Vec<QueueItem> {
        let mut seen = self.seen.lock().unwrap();
        items
            .into_iter()
            .filter(|item| seen.insert(item.id))
            .collect()
    }

    fn enqueue(&self, items: Vec<QueueItem>) {
        let items = self.only_unseen(items);
        if items.is_empty() {
            return;
        }
        trace!("enqueueing {} objects", items.len());

        self.pending.add(items.len());
        let queue = self.queue.lock().unwrap();
        if let Some(tx) = queue.as_ref() {
            for item in items {
                tx.send(item).expect("fsck queue closed while pending");
            }
        }
    }

    fn report(&self, item: &QueueItem, kind: ProblemKind) {
        // If the caller stopped listening there's nobody left to tell.
        let _ = self.problems.send(Problem {
            id: item.id,
            ancestors: item.ancestors.clone(),
            kind,
        });
    }

    fn handle(&self, item: QueueItem) {
        let bytes = match self.fetch(&item.id) {
            Ok(bytes) => bytes,
            Err(e) => return self.report(&item, ProblemKind::StorageError(e)),
        };

        let obj = match decode(&bytes) {
            Ok(obj) => obj,
            Err(e) => return self.report(&item, ProblemKind::DeserializationError(e)),
        };

        match obj {
            Object::Blob(bytes) => {
                let Some(want) = item.expected_size else {
                    return;
                };
                let have = bytes.len() as u64;
                if have != want {
                    self.report(&item, ProblemKind::UnexpectedBlobSize { want, have });
                }
            }
            Object::File(fragments) => {
                if !self.check_blobs {
                    return;
                }
                let mut ancestors = item.ancestors.clone();
                ancestors.push(AncestorInfo {
                    id: item.id,
                    kind: Kind::File,
                    name: None,
                });
                self.enqueue(
                    fragments
                        .into_iter()
                        .map(|fragment| QueueItem {
                            id: fragment.blob,
                            ancestors: ancestors.clone(),
                            expected_size: Some(fragment.size),
                        })
                        .collect(),
                );
            }
            Object::Tree(tree) => {
                let children = tree
                    .into_iter()
                    .filter_map(|(name, entry)| {
                        let id = *entry.content.reference()?;
                        let mut ancestors = item.ancestors.clone();
                        ancestors.push(AncestorInfo {
                            id: item.id,
                            kind: Kind::Tree,
                            name: Some(name),
                        });
                        Some(QueueItem {
                            id,
                            ancestors,
                            expected_size: None,
                        })
                    })
                    .collect();
                self.enqueue(children);
            }
            Object::Snapshot(snapshot) => {
                self.enqueue(vec![QueueItem::root(snapshot.tree)]);
            }
        }
    }

    /// Gets the stored bytes, checking that they still hash to the id.
    /// Everything that fails here is the storage's fault; what fails in
    /// [`decode`] is the object's.
    fn fetch(&self, id: &ObjectId) -> Result<Vec<u8>> {
        let raw = self.store.get(id)?;

        let have = ObjectId::hash(&raw);
        if have != *id {
            anyhow::bail!(IdMismatch { want: *id, have });
        }

        Ok(raw)
    }
}

fn decode(bytes: &[u8]) -> Result<Object> {
    RawObject::unserialize(&mut &bytes[..])?.parse()
}

/// Walks the graph from `start` (or, if `None`, from every known file, tree,
/// and snapshot), streaming everything wrong over `problems`.
///
/// Blobs are only followed (and size-checked) when `check_blobs` is set;
/// an all-roots walk over a big store touches every file object either way,
/// but skipping blob reads makes it far cheaper.
pub fn fsck(
    store: &dyn Storage,
    start: Option<ObjectId>,
    check_blobs: bool,
    problems: Sender<Problem>,
) -> Result<()> {
    let mut roots = Vec::new();
    match start {
        Some(id) => roots.push(QueueItem::root(id)),
        None => {
            for kind in [Kind::File, Kind::Tree, Kind::Snapshot] {
                roots.extend(store.list(kind)?.into_iter().map(QueueItem::root));
            }
        }
    }
    if roots.is_empty() {
        return Ok(());
    }
    debug!("fsck from {} roots", roots.len());

    let (queue_tx, queue_rx) = unbounded();
    let walk = Walk {
        store,
        check_blobs,
        problems,
        queue: Mutex::new(Some(queue_tx)),
        pending: WaitCounter::default(),
        seen: Mutex::new(FxHashSet::default()),
    };

    thread::scope(|s| {
        let walk = &walk;
        for _ in 0..num_cpus::get() {
            let rx = queue_rx.clone();
            s.spawn(move || {
                for item in rx {
                    walk.handle(item);
                    walk.pending.done();
                }
            });
        }
        drop(queue_rx);

        walk.enqueue(roots);
        walk.pending.wait();
        // Nothing pending and nothing queued: close the channel so the
        // workers go home.
        walk.queue.lock().unwrap().take();
    });

    Ok(())
}
