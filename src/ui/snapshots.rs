use anyhow::{Result, bail};
use tracing::warn;

use crate::snapshot;
use crate::ui::Env;

/// List snapshots, newest first
#[derive(Debug, clap::Args)]
pub struct Args {
    /// Only list snapshots from this archive
    pub archive: Option<String>,
}

pub fn run(env: &mut Env, args: Args) -> Result<()> {
    let mut broken = 0;
    let mut listed = Vec::new();

    for (id, loaded) in snapshot::load_all(env.store.as_ref())? {
        match loaded {
            Ok(snapshot) => {
                if args
                    .archive
                    .as_ref()
                    .is_none_or(|want| &snapshot.archive == want)
                {
                    listed.push((id, snapshot));
                }
            }
            Err(e) => {
                warn!("Couldn't load snapshot {id}: {e:#}");
                broken += 1;
            }
        }
    }

    listed.sort_by(|(_, a), (_, b)| b.date.cmp(&a.date));
    for (id, snapshot) in listed {
        println!("{}\t{}\t{}", snapshot.archive, snapshot.date, id);
        if !snapshot.comment.is_empty() {
            println!("\t{}", snapshot.comment.replace('\n', "\n\t"));
        }
    }

    if broken > 0 {
        bail!("{broken} snapshots couldn't be loaded");
    }
    Ok(())
}
