//! The object model: four immutable, content-addressed variants
//! and their byte-exact framing.
//!
//! Every persisted object is laid out as
//! ```text
//! <type tag> <decimal payload length>\n<payload bytes>
//! ```
//! with no trailing newline. An object's ID is the hash of that whole frame,
//! so the same logical object always serializes to the same bytes and the
//! same ID, no matter who wrote it.

use std::fmt;
use std::io::{self, prelude::*};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use thiserror::Error;

use crate::hashing::{HashingWriter, ObjectId};
use crate::props::Properties;
use crate::snapshot::Snapshot;
use crate::tree::{self, Tree};

/// The four object variants.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Kind {
    Blob,
    File,
    Tree,
    Snapshot,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Blob => "blob",
            Kind::File => "file",
            Kind::Tree => "tree",
            Kind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(Kind::Blob),
            "file" => Ok(Kind::File),
            "tree" => Ok(Kind::Tree),
            "snapshot" => Ok(Kind::Snapshot),
            other => bail!("Unknown object type {other}"),
        }
    }
}

/// Framing or payload-length problems while reading an object back in.
#[derive(Debug, Error)]
pub enum UnserializeError {
    #[error("invalid object: missing header")]
    MissingHeader,
    #[error("invalid object: header is not `<type> <length>`")]
    MalformedHeader,
    #[error("invalid object: {0}")]
    UnknownType(anyhow::Error),
    #[error("invalid object: bad payload length: {0}")]
    BadLength(#[from] std::num::ParseIntError),
    #[error("invalid object: {0}")]
    Io(#[from] io::Error),
}

/// A framed object: a type tag and its raw payload bytes.
///
/// This is what moves in and out of storage; [`parse`](Self::parse) decodes
/// the payload into the typed [`Object`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RawObject {
    pub kind: Kind,
    pub payload: Vec<u8>,
}

impl RawObject {
    /// Writes the object's binary representation.
    pub fn serialize(&self, w: &mut impl Write) -> io::Result<()> {
        write!(w, "{} {}\n", self.kind, self.payload.len())?;
        w.write_all(&self.payload)
    }

    /// Serializes into `w` while computing the object's ID in the same pass.
    pub fn serialize_and_id<W: Write>(&self, w: W) -> io::Result<(ObjectId, W)> {
        let mut tee = HashingWriter::new(w);
        self.serialize(&mut tee)?;
        Ok(tee.finalize())
    }

    /// Reads one framed object.
    ///
    /// The header runs up to the first newline and must be exactly two
    /// space-separated fields; exactly `length` payload bytes follow.
    pub fn unserialize(r: &mut impl BufRead) -> Result<RawObject, UnserializeError> {
        let mut header = Vec::new();
        r.read_until(b'\n', &mut header)?;
        if header.pop() != Some(b'\n') {
            return Err(UnserializeError::MissingHeader);
        }

        let header = str::from_utf8(&header).map_err(|_| UnserializeError::MalformedHeader)?;
        let (kind, length) = header
            .split_once(' ')
            .ok_or(UnserializeError::MalformedHeader)?;
        let kind: Kind = kind.parse().map_err(UnserializeError::UnknownType)?;
        let length: usize = length.parse()?;

        let mut payload = vec![0; length];
        r.read_exact(&mut payload)?;

        Ok(RawObject { kind, payload })
    }

    /// Decodes the payload into a typed object.
    pub fn parse(&self) -> Result<Object> {
        match self.kind {
            Kind::Blob => Ok(Object::Blob(self.payload.clone())),
            Kind::File => Ok(Object::File(file_from_payload(&self.payload)?)),
            Kind::Tree => Ok(Object::Tree(tree::from_payload(&self.payload)?)),
            Kind::Snapshot => Ok(Object::Snapshot(Snapshot::from_payload(&self.payload)?)),
        }
    }
}

/// One element of a `file` object: a blob and how long it should be.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FileFragment {
    pub blob: ObjectId,
    pub size: u64,
}

impl FileFragment {
    fn to_props(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("blob", self.blob.to_string());
        props.insert("size", self.size.to_string());
        props
    }

    fn from_props(props: &Properties) -> Result<FileFragment> {
        let blob = props
            .get("blob")
            .ok_or_else(|| anyhow!("Field `blob` is missing"))?
            .parse()?;
        let size = props
            .get("size")
            .ok_or_else(|| anyhow!("Field `size` is missing"))?
            .parse()
            .context("Field `size` is not an unsigned number")?;
        Ok(FileFragment { blob, size })
    }
}

/// A parsed object.
///
/// A `file` is an ordered list of fragments; restoring concatenates their
/// blobs in exactly this order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Object {
    Blob(Vec<u8>),
    File(Vec<FileFragment>),
    Tree(Tree),
    Snapshot(Snapshot),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Blob(_) => Kind::Blob,
            Object::File(_) => Kind::File,
            Object::Tree(_) => Kind::Tree,
            Object::Snapshot(_) => Kind::Snapshot,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        match self {
            Object::Blob(bytes) => bytes.clone(),
            Object::File(fragments) => file_payload(fragments),
            Object::Tree(tree) => tree::payload(tree),
            Object::Snapshot(snapshot) => snapshot.payload(),
        }
    }

    pub fn to_raw(&self) -> RawObject {
        RawObject {
            kind: self.kind(),
            payload: self.payload(),
        }
    }

    // Convenience accessors for when the type was already checked
    // (e.g. after storage::get_object_of_type).

    pub fn into_blob(self) -> Vec<u8> {
        match self {
            Object::Blob(bytes) => bytes,
            _ => panic!("Expected a blob"),
        }
    }

    pub fn into_file(self) -> Vec<FileFragment> {
        match self {
            Object::File(fragments) => fragments,
            _ => panic!("Expected a file"),
        }
    }

    pub fn into_tree(self) -> Tree {
        match self {
            Object::Tree(tree) => tree,
            _ => panic!("Expected a tree"),
        }
    }

    pub fn into_snapshot(self) -> Snapshot {
        match self {
            Object::Snapshot(snapshot) => snapshot,
            _ => panic!("Expected a snapshot"),
        }
    }
}

fn file_payload(fragments: &[FileFragment]) -> Vec<u8> {
    let mut out = String::new();
    for fragment in fragments {
        out.push_str(&fragment.to_props().render());
        out.push('\n');
    }
    out.into_bytes()
}

fn file_from_payload(payload: &[u8]) -> Result<Vec<FileFragment>> {
    let payload = str::from_utf8(payload).context("File payload is not UTF-8")?;

    let mut fragments = Vec::new();
    for line in payload.lines() {
        if line.is_empty() {
            continue;
        }
        let props = Properties::parse(line)?;
        fragments.push(FileFragment::from_props(&props)?);
    }
    Ok(fragments)
}
