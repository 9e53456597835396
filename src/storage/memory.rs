//! An in-memory storage. Rather useless for real backups; it exists for
//! tests and as a scratch target you can point a config at.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, bail};

use crate::hashing::ObjectId;
use crate::index::Index;
use crate::object::Kind;
use crate::storage::{NotFound, Storage};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<ObjectId, Vec<u8>>,
    index: Index,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, id: &ObjectId) -> Result<Vec<u8>> {
        match self.inner.lock().unwrap().objects.get(id) {
            Some(raw) => Ok(raw.clone()),
            None => bail!(NotFound(*id)),
        }
    }

    fn has(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.inner.lock().unwrap().objects.contains_key(id))
    }

    fn set(&self, id: &ObjectId, kind: Kind, raw: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(*id, raw.to_vec());
        inner.index.add(*id, kind);
        Ok(())
    }

    fn list(&self, kind: Kind) -> Result<Vec<ObjectId>> {
        Ok(self.inner.lock().unwrap().index.ids(kind))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
