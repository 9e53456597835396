use std::thread;

use anyhow::{Result, bail};
use crossbeam_channel::unbounded;
use tracing::warn;

use crate::fsck;
use crate::hashing::ObjectId;
use crate::ui::Env;

/// Check the object graph for missing, corrupt, or mis-sized objects
#[derive(Debug, clap::Args)]
pub struct Args {
    /// Also retrieve every blob and check its size
    #[arg(long)]
    pub blobs: bool,

    /// Start from this object instead of everything in the storage
    pub id: Option<ObjectId>,
}

pub fn run(env: &mut Env, args: Args) -> Result<()> {
    let store = env.store.as_ref();
    let (problem_tx, problem_rx) = unbounded();

    let (result, problems_found) = thread::scope(|s| {
        let walker = s.spawn(move || fsck::fsck(store, args.id, args.blobs, problem_tx));

        let mut problems_found = 0_usize;
        for problem in problem_rx {
            warn!("{problem}");
            problems_found += 1;
        }
        (walker.join().unwrap(), problems_found)
    });
    result?;

    if problems_found > 0 {
        bail!("Found {problems_found} problems. See the warnings in the log");
    }
    Ok(())
}
