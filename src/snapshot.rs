//! Build, read and write snapshots: a point-in-time binding of a tree to an
//! archive label, with an optional comment and an optional signature.

use std::fmt;

use anyhow::{Context, Result, anyhow, bail, ensure};
use jiff::Timestamp;

use crate::hashing::ObjectId;
use crate::object::{Kind, Object, RawObject};
use crate::storage::{self, Storage};

const BEGIN_MARKER: &str = "== BEGIN SNAPSHOT ==";
const END_MARKER: &str = "== END SNAPSHOT ==";
// Comments can't contain the end marker, or parsing would stop there.
const END_MARKER_SUBSTITUTE: &str = "~~ END SNAPSHOT ~~";

/// Wraps a payload in some byte-preserving signature envelope
/// (e.g. a GPG clear-signature).
pub trait Signer {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Checks a signed payload produced by the matching [`Signer`].
pub trait Verifier {
    fn verify(&self, payload: &[u8]) -> Result<()>;
}

/// A stored binding of a root tree to a timestamp and an archive label.
///
/// When a snapshot is read back from storage it keeps the original payload
/// bytes; signature verification runs over those, since re-serializing
/// can't reproduce a signature envelope.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tree: ObjectId,
    pub date: Timestamp,
    pub archive: String,
    pub comment: String,
    pub signed: bool,
    raw: Option<Vec<u8>>,
}

// The retained payload bytes don't make two snapshots different.
impl PartialEq for Snapshot {
    fn eq(&self, o: &Self) -> bool {
        self.tree == o.tree
            && self.date == o.date
            && self.archive == o.archive
            && self.comment == o.comment
            && self.signed == o.signed
    }
}

impl Eq for Snapshot {}

fn push_header(out: &mut String, key: &str, value: impl fmt::Display) {
    out.push_str(key);
    out.push(' ');
    out.push_str(&value.to_string());
    out.push('\n');
}

impl Snapshot {
    pub fn new(
        tree: ObjectId,
        date: Timestamp,
        archive: String,
        comment: String,
        signed: bool,
    ) -> Snapshot {
        Snapshot {
            tree,
            date,
            archive,
            comment,
            signed,
            raw: None,
        }
    }

    /// Renders the canonical payload: begin marker, headers in fixed order,
    /// the comment (if any) after a blank line, end marker.
    pub fn payload(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(BEGIN_MARKER);
        out.push('\n');

        push_header(&mut out, "archive", &self.archive);
        push_header(&mut out, "date", self.date);
        if self.signed {
            push_header(&mut out, "signed", "true");
        }
        push_header(&mut out, "tree", self.tree);

        if !self.comment.is_empty() {
            out.push('\n');
            for line in self.comment.lines() {
                out.push_str(if line == END_MARKER {
                    END_MARKER_SUBSTITUTE
                } else {
                    line
                });
                out.push('\n');
            }
        }

        out.push_str(END_MARKER);
        out.push('\n');
        out.into_bytes()
    }

    /// Parses a stored payload, which may be wrapped in a clear-signature
    /// envelope; anything before the begin marker and after the end marker
    /// is ignored.
    pub fn from_payload(payload: &[u8]) -> Result<Snapshot> {
        let text = str::from_utf8(payload).context("Snapshot payload is not UTF-8")?;
        let mut lines = text.lines();

        loop {
            let line = lines
                .next()
                .ok_or_else(|| anyhow!("Snapshot has no begin marker"))?;
            if line == BEGIN_MARKER {
                break;
            }
        }

        let mut archive = None;
        let mut date = None;
        let mut tree = None;
        let mut signed = false;
        let mut comment = String::new();
        let mut terminated = false;

        while let Some(line) = lines.next() {
            if line == END_MARKER {
                terminated = true;
                break;
            }

            if line.trim().is_empty() {
                // Headers are done; the rest is the comment body.
                for line in lines.by_ref() {
                    if line == END_MARKER {
                        terminated = true;
                        break;
                    }
                    comment.push_str(line);
                    comment.push('\n');
                }
                break;
            }

            let (key, value) = line
                .split_once(' ')
                .ok_or_else(|| anyhow!("Invalid snapshot header: {line}"))?;
            let value = value.trim();
            match key {
                "archive" => archive = Some(value.to_owned()),
                "date" => {
                    date = Some(
                        value
                            .parse::<Timestamp>()
                            .with_context(|| format!("Invalid snapshot date {value}"))?,
                    )
                }
                "tree" => tree = Some(value.parse::<ObjectId>()?),
                "signed" => signed = value == "true",
                _ => {}
            }
        }
        ensure!(terminated, "Snapshot has no end marker");

        let missing = |what| move || anyhow!("Missing {what} header");
        Ok(Snapshot {
            tree: tree.ok_or_else(missing("tree"))?,
            date: date.ok_or_else(missing("date"))?,
            archive: archive.ok_or_else(missing("archive"))?,
            comment: comment.trim().to_owned(),
            signed,
            raw: Some(payload.to_vec()),
        })
    }

    /// Checks the signature on a snapshot read back from storage.
    ///
    /// Unsigned snapshots verify trivially. A signed snapshot that was never
    /// round-tripped through storage has nothing to verify against, which is
    /// an error rather than a silent pass.
    pub fn verify(&self, verifier: &dyn Verifier) -> Result<()> {
        if !self.signed {
            return Ok(());
        }
        match &self.raw {
            Some(raw) => verifier
                .verify(raw)
                .context("Snapshot signature verification failed"),
            None => bail!("Snapshot was never stored; there is no signed payload to verify"),
        }
    }
}

/// Binds `tree` into a new snapshot, signs it if a signer is given,
/// and stores it. Returns the snapshot's id.
pub fn create_snapshot(
    store: &dyn Storage,
    tree: ObjectId,
    date: Timestamp,
    archive: &str,
    comment: &str,
    signer: Option<&dyn Signer>,
) -> Result<ObjectId> {
    let snapshot = Snapshot::new(
        tree,
        date,
        archive.to_owned(),
        comment.to_owned(),
        signer.is_some(),
    );

    let payload = match signer {
        Some(signer) => signer
            .sign(&snapshot.payload())
            .context("Couldn't sign snapshot")?,
        None => snapshot.payload(),
    };

    storage::set_object(
        store,
        &RawObject {
            kind: Kind::Snapshot,
            payload,
        },
    )
}

/// Finds the newest snapshot, optionally restricted to one archive.
pub fn find_latest(
    store: &dyn Storage,
    archive: Option<&str>,
) -> Result<Option<(ObjectId, Snapshot)>> {
    let mut latest: Option<(ObjectId, Snapshot)> = None;

    for id in store.list(Kind::Snapshot)? {
        let snapshot = storage::get_object_of_type(store, &id, Kind::Snapshot)?.into_snapshot();
        if archive.is_some_and(|want| snapshot.archive != want) {
            continue;
        }
        if latest.as_ref().is_none_or(|(_, l)| snapshot.date > l.date) {
            latest = Some((id, snapshot));
        }
    }
    Ok(latest)
}

/// Loads every snapshot; broken ones come back as errors alongside their ids
/// so a listing can warn and move on.
pub fn load_all(store: &dyn Storage) -> Result<Vec<(ObjectId, Result<Snapshot>)>> {
    let mut snapshots = Vec::new();
    for id in store.list(Kind::Snapshot)? {
        let loaded =
            storage::get_object_of_type(store, &id, Kind::Snapshot).map(Object::into_snapshot);
        snapshots.push((id, loaded));
    }
    Ok(snapshots)
}
