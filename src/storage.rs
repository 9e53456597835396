//! Object storage: the key-value contract backends implement, and the
//! integrity-checked operations everything else uses on top of it.
//!
//! Objects are write-once: `set` of an id that's already present is a no-op,
//! which is where deduplication comes from. Reads re-hash what the backend
//! returned and compare against the requested id, so corruption anywhere
//! between `set` and `get` surfaces as an error instead of bad data.

use anyhow::{Context, Result, anyhow, ensure};
use thiserror::Error;

use crate::config::{self, Configuration, StorageConfig};
use crate::hashing::ObjectId;
use crate::object::{Kind, Object, RawObject};

pub mod filter;
pub mod local;
pub mod memory;

/// A referenced object doesn't exist in the backend.
#[derive(Debug, Error)]
#[error("Object {0} not found")]
pub struct NotFound(pub ObjectId);

/// The bytes stored under an id hash to something else.
#[derive(Debug, Error)]
#[error("Object {want} retrieved from storage hashes to {have}")]
pub struct IdMismatch {
    pub want: ObjectId,
    pub have: ObjectId,
}

/// An object decoded to a different type than the caller asked for.
#[derive(Debug, Error)]
#[error("Expected {want} object {id}, found a {have}")]
pub struct TypeMismatch {
    pub id: ObjectId,
    pub want: Kind,
    pub have: Kind,
}

/// The backend contract: a key-value store of serialized objects with
/// list-by-type support.
///
/// `set` must be idempotent. `has` must never report false positives.
/// Backends take `&self` and do their own locking, since capture and fsck
/// call them from several threads at once.
pub trait Storage: Send + Sync {
    fn get(&self, id: &ObjectId) -> Result<Vec<u8>>;
    fn has(&self, id: &ObjectId) -> Result<bool>;
    fn set(&self, id: &ObjectId, kind: Kind, raw: &[u8]) -> Result<()>;
    fn list(&self, kind: Kind) -> Result<Vec<ObjectId>>;

    /// Flush indices and release resources.
    fn close(&self) -> Result<()>;
}

/// Serializes an object, and stores it unless it's already present.
/// Returns its id either way.
pub fn set_object(store: &dyn Storage, obj: &RawObject) -> Result<ObjectId> {
    let mut buf = Vec::with_capacity(obj.payload.len() + 16);
    let (id, _) = obj.serialize_and_id(&mut buf)?;

    if !store.has(&id)? {
        store
            .set(&id, obj.kind, &buf)
            .with_context(|| format!("Couldn't store object {id}"))?;
    }
    Ok(id)
}

/// Fetches an object and re-frames it, verifying that the stored bytes
/// still hash to the requested id.
pub fn get_object(store: &dyn Storage, id: &ObjectId) -> Result<RawObject> {
    let raw = store.get(id)?;

    let have = ObjectId::hash(&raw);
    ensure!(have == *id, IdMismatch { want: *id, have });

    let obj = RawObject::unserialize(&mut &raw[..])
        .with_context(|| format!("Couldn't unserialize object {id}"))?;
    Ok(obj)
}

/// As [`get_object`], but also decodes the payload and checks the type.
pub fn get_object_of_type(store: &dyn Storage, id: &ObjectId, want: Kind) -> Result<Object> {
    let raw = get_object(store, id)?;
    ensure!(
        raw.kind == want,
        TypeMismatch {
            id: *id,
            want,
            have: raw.kind
        }
    );
    raw.parse().with_context(|| format!("Couldn't parse object {id}"))
}

/// Opens the storage `name` configured in `conf`.
pub fn open(conf: &Configuration, name: &str) -> Result<Box<dyn Storage>> {
    let section = conf
        .storage
        .get(name)
        .ok_or_else(|| anyhow!("No storage '{name}' in the config"))?;

    let opened: Box<dyn Storage> = match section {
        StorageConfig::Local { path } => Box::new(
            local::LocalStorage::open(&config::expand_tilde(path))
                .with_context(|| format!("Couldn't set up storage {name}"))?,
        ),
        StorageConfig::Memory => Box::new(memory::MemoryStorage::new()),
        StorageConfig::Filter {
            base,
            encode,
            decode,
        } => {
            let base = open(conf, base)?;
            Box::new(
                filter::FilterStorage::new(base, encode.clone(), decode.clone())
                    .with_context(|| format!("Couldn't set up storage {name}"))?,
            )
        }
    };
    Ok(opened)
}
