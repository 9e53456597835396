use anyhow::Result;
use camino::Utf8PathBuf;

use crate::backup;
use crate::ui::{Env, absolute, open_dir};

/// Capture a directory and print the resulting tree id
#[derive(Debug, clap::Args)]
pub struct Args {
    pub directory: Utf8PathBuf,
}

pub fn run(env: &mut Env, args: Args) -> Result<()> {
    let dir_path = absolute(&args.directory)?;
    let dir = open_dir(&dir_path)?;

    let id = backup::write_dir(
        env.store.as_ref(),
        dir_path.as_str(),
        dir.as_ref(),
        env.cache.as_mut(),
    )?;

    println!("{id}");
    Ok(())
}
