use anyhow::Result;
use camino::Utf8PathBuf;

use crate::hashing::ObjectId;
use crate::restore;
use crate::ui::{Env, absolute, open_dir};

/// Materialize a tree object into a directory
#[derive(Debug, clap::Args)]
pub struct Args {
    pub directory: Utf8PathBuf,
    pub tree: ObjectId,
}

pub fn run(env: &mut Env, args: Args) -> Result<()> {
    let dir_path = absolute(&args.directory)?;
    let dir = open_dir(&dir_path)?;

    restore::restore_dir(env.store.as_ref(), &args.tree, dir.as_ref())
}
