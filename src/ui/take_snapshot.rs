use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use jiff::Timestamp;

use crate::backup;
use crate::snapshot::{self, Signer};
use crate::ui::{Env, absolute, open_dir};

/// Capture a directory and bind it into a new snapshot
#[derive(Debug, clap::Args)]
pub struct Args {
    /// Don't sign the snapshot (not recommended)
    #[arg(long)]
    pub no_sign: bool,

    /// Comment for the snapshot
    #[arg(short, long, default_value = "")]
    pub comment: String,

    /// Archive name the snapshot belongs to
    pub archive: String,

    pub directory: Utf8PathBuf,
}

pub fn run(env: &mut Env, args: Args) -> Result<()> {
    let dir_path = absolute(&args.directory)?;
    let dir = open_dir(&dir_path)?;

    let tree_id = backup::write_dir(
        env.store.as_ref(),
        dir_path.as_str(),
        dir.as_ref(),
        env.cache.as_mut(),
    )?;

    let signer = env.signer(args.no_sign)?;
    let snapshot_id = snapshot::create_snapshot(
        env.store.as_ref(),
        tree_id,
        Timestamp::now(),
        &args.archive,
        &args.comment,
        signer.as_ref().map(|s| s as &dyn Signer),
    )
    .with_context(|| {
        format!("Couldn't create the snapshot; the captured tree is {tree_id}")
    })?;

    println!("{snapshot_id}");
    Ok(())
}
