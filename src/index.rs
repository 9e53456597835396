//! The typed index: which ids of which type a storage holds.
//!
//! Backends whose underlying store can't enumerate objects by type keep one
//! of these next to the objects, persisted as `<type> <id>` lines. Indices
//! from several writers combine by set union, so concurrent writers can each
//! persist their own and a reader can merge them all.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, prelude::*};

use anyhow::{Context, Result, anyhow};

use crate::hashing::ObjectId;
use crate::object::Kind;

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Index(BTreeMap<Kind, BTreeSet<ObjectId>>);

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: ObjectId, kind: Kind) {
        self.0.entry(kind).or_default().insert(id);
    }

    pub fn ids(&self, kind: Kind) -> Vec<ObjectId> {
        self.0
            .get(&kind)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Unions `other` into this index.
    pub fn combine(&mut self, other: Index) {
        for (kind, ids) in other.0 {
            self.0.entry(kind).or_default().extend(ids);
        }
    }

    /// Writes `<type> <id>` lines. BTree ordering makes the dump
    /// deterministic.
    pub fn save(&self, w: &mut impl Write) -> io::Result<()> {
        for (kind, ids) in &self.0 {
            for id in ids {
                write!(w, "{kind} {id}\n")?;
            }
        }
        Ok(())
    }

    pub fn load(r: impl BufRead) -> Result<Index> {
        let mut index = Index::new();
        for line in r.lines() {
            let line = line.context("Couldn't read index line")?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (kind, id) = line
                .split_once(' ')
                .ok_or_else(|| anyhow!("Index line '{line}' is not `<type> <id>`"))?;
            index.add(id.parse()?, kind.parse()?);
        }
        Ok(index)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_id(byte: u8) -> ObjectId {
        format!("sha3-256:{}", hex::encode([byte; 32]))
            .parse()
            .unwrap()
    }

    #[test]
    fn round_trip() {
        let mut index = Index::new();
        index.add(test_id(0x11), Kind::Blob);
        index.add(test_id(0x22), Kind::Blob);
        index.add(test_id(0x33), Kind::Tree);
        index.add(test_id(0x44), Kind::Snapshot);

        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();
        assert_eq!(Index::load(&buf[..]).unwrap(), index);
    }

    #[test]
    fn deterministic_dump() {
        let mut a = Index::new();
        a.add(test_id(0x22), Kind::Blob);
        a.add(test_id(0x11), Kind::Blob);
        let mut b = Index::new();
        b.add(test_id(0x11), Kind::Blob);
        b.add(test_id(0x22), Kind::Blob);

        let mut dump_a = Vec::new();
        a.save(&mut dump_a).unwrap();
        let mut dump_b = Vec::new();
        b.save(&mut dump_b).unwrap();
        assert_eq!(dump_a, dump_b);
    }

    #[test]
    fn combine_unions() {
        let mut a = Index::new();
        a.add(test_id(0x11), Kind::Blob);
        a.add(test_id(0x22), Kind::File);

        let mut b = Index::new();
        b.add(test_id(0x22), Kind::File);
        b.add(test_id(0x33), Kind::Tree);

        a.combine(b);
        assert_eq!(a.ids(Kind::Blob), vec![test_id(0x11)]);
        assert_eq!(a.ids(Kind::File), vec![test_id(0x22)]);
        assert_eq!(a.ids(Kind::Tree), vec![test_id(0x33)]);
    }

    #[test]
    fn load_rejects_junk() {
        assert!(Index::load(&b"blob\n"[..]).is_err());
        assert!(Index::load(&b"widget sha3-256:1111111111111111111111111111111111111111111111111111111111111111\n"[..]).is_err());
        assert!(Index::load(&b"blob nonsense\n"[..]).is_err());
    }
}
