use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::ArgGroup;

use crate::gpg::GpgVerifier;
use crate::hashing::ObjectId;
use crate::object::Kind;
use crate::restore;
use crate::snapshot;
use crate::storage;
use crate::ui::{Env, absolute, open_dir};

/// Verify a snapshot and restore its tree into a directory
#[derive(Debug, clap::Args)]
#[command(group(ArgGroup::new("which").required(true).args(["id", "archive"])))]
pub struct Args {
    /// Object id of a snapshot
    #[arg(long)]
    pub id: Option<ObjectId>,

    /// Restore the latest snapshot of this archive
    #[arg(long)]
    pub archive: Option<String>,

    pub directory: Utf8PathBuf,
}

pub fn run(env: &mut Env, args: Args) -> Result<()> {
    let snapshot = match (&args.id, &args.archive) {
        (Some(id), _) => {
            storage::get_object_of_type(env.store.as_ref(), id, Kind::Snapshot)?.into_snapshot()
        }
        (None, Some(archive)) => {
            match snapshot::find_latest(env.store.as_ref(), Some(archive))? {
                Some((_, snapshot)) => snapshot,
                None => bail!("No snapshots in archive '{archive}'"),
            }
        }
        (None, None) => unreachable!("clap requires one of --id/--archive"),
    };

    snapshot
        .verify(&GpgVerifier)
        .context("Snapshot verification failed")?;

    let dir_path = absolute(&args.directory)?;
    std::fs::create_dir_all(&dir_path).with_context(|| format!("Couldn't create {dir_path}"))?;
    let dir = open_dir(&dir_path)?;

    restore::restore_dir(env.store.as_ref(), &snapshot.tree, dir.as_ref())
}
