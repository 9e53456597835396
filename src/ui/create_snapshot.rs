use anyhow::Result;
use jiff::Timestamp;

use crate::hashing::ObjectId;
use crate::snapshot::{self, Signer};
use crate::ui::Env;

/// Bind an already-captured tree into a new snapshot
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

    pub tree: ObjectId,
}

pub fn run(env: &mut Env, args: Args) -> Result<()> {
    let signer = env.signer(args.no_sign)?;

    let snapshot_id = snapshot::create_snapshot(
        env.store.as_ref(),
        args.tree,
        Timestamp::now(),
        &args.archive,
        &args.comment,
        signer.as_ref().map(|s| s as &dyn Signer),
    )?;

    println!("{snapshot_id}");
    Ok(())
}
