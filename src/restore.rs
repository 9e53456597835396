//! The restore engine: materialize stored trees and files back onto a
//! filesystem.
//!
//! Directory restore is a reconciliation: after it runs, the directory has
//! exactly the children the tree describes. Files are written to hidden
//! temp names and renamed into place, so an interrupted restore leaves
//! either the old file or a stray temp, never a half-written file under its
//! final name. Re-running the restore cleans the strays up.

use std::io::Write;
use std::process;

use anyhow::{Context, Result, ensure};
use tracing::{debug, trace};

use crate::fs::{Dir, Entry};
use crate::hashing::ObjectId;
use crate::object::Kind;
use crate::storage::{self, Storage};
use crate::tree::EntryContent;

/// Writes the contents of the file object `id` to `w`,
/// concatenating its blobs in fragment order.
pub fn restore_file(store: &dyn Storage, id: &ObjectId, w: &mut dyn Write) -> Result<()> {
    let fragments = storage::get_object_of_type(store, id, Kind::File)?.into_file();

    for (i, fragment) in fragments.iter().enumerate() {
        let blob = storage::get_object_of_type(store, &fragment.blob, Kind::Blob)?.into_blob();
        ensure!(
            blob.len() as u64 == fragment.size,
            "Blob {} is {} bytes; fragment {} of file {} says {}",
            fragment.blob,
            blob.len(),
            i,
            id,
            fragment.size
        );
        w.write_all(&blob)?;
    }

    Ok(())
}

/// Materializes the tree object `id` into `root`, creating, overwriting,
/// and deleting children until the directory matches the tree.
pub fn restore_dir(store: &dyn Storage, id: &ObjectId, root: &dyn Dir) -> Result<()> {
    let tree = storage::get_object_of_type(store, id, Kind::Tree)?.into_tree();

    for (name, entry) in &tree {
        match &entry.content {
            EntryContent::File { id: file_id } => {
                // Write to a hidden temp name, rename over the target once
                // the contents are all there.
                let tmpname = format!(
                    ".petrific-{}-{:08x}",
                    process::id(),
                    rand::random::<u32>()
                );
                let new_file = root.create_child_file(&tmpname, entry.acl.executable())?;
                let mut w = new_file.open_write()?;
                restore_file(store, file_id, w.as_mut())
                    .with_context(|| format!("Couldn't restore {name}"))?;
                w.flush()?;
                drop(w);

                root.rename_child(&tmpname, name)?;
                trace!("restored file {name}");
            }
            EntryContent::Dir { id: subtree } => {
                // Reuse an existing directory; anything else in the way
                // gets replaced.
                let subdir = match root.get_child(name)? {
                    Some(Entry::Dir(d)) => d,
                    Some(other) => {
                        other.delete()?;
                        root.create_child_dir(name)?
                    }
                    None => root.create_child_dir(name)?,
                };
                restore_dir(store, subtree, subdir.as_ref())
                    .with_context(|| format!("Couldn't restore {name}"))?;
            }
            EntryContent::Symlink { target } => {
                if let Some(existing) = root.get_child(name)? {
                    existing.delete()?;
                }
                root.create_child_symlink(name, target)?;
                trace!("restored symlink {name} -> {target}");
            }
        }
    }

    // Everything the tree doesn't mention goes, stray restore temps included.
    for child in root.read_dir()? {
        let name = child.name();
        if !tree.contains_key(&name) {
            debug!("deleting {name}: not in the restored tree");
            child.delete()?;
        }
    }

    Ok(())
}
