//! CLI subcommands and the environment they share.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};

use crate::cache::{Cache, FileCache, NopCache};
use crate::config::{self, Configuration};
use crate::fs::{self, Dir, Entry};
use crate::gpg::GpgSigner;
use crate::storage::{self, Storage};

pub mod create_snapshot;
pub mod fsck;
pub mod restore_dir;
pub mod restore_snapshot;
pub mod snapshots;
pub mod take_snapshot;
pub mod write_dir;

/// Everything a subcommand needs: the loaded config, the opened storage,
/// and the id cache.
pub struct Env {
    pub config: Configuration,
    pub store: Box<dyn Storage>,
    pub cache: Box<dyn Cache>,
}

impl Env {
    pub fn open(config_path: Option<&Utf8Path>, storage_name: Option<&str>) -> Result<Env> {
        let config = config::load(config_path)?;

        let name = match storage_name {
            Some(name) => name,
            None if !config.default_storage.is_empty() => &config.default_storage,
            None => bail!("No --storage given and no default_storage configured"),
        };
        let store = storage::open(&config, name)?;

        let cache: Box<dyn Cache> = match &config.cache_path {
            Some(path) => Box::new(FileCache::open(config::expand_tilde(path))?),
            None => Box::new(NopCache),
        };

        Ok(Env {
            config,
            store,
            cache,
        })
    }

    /// Flushes the cache and the storage's indices.
    pub fn close(mut self) -> Result<()> {
        self.cache.close().context("Couldn't persist the id cache")?;
        self.store.close().context("Couldn't close the storage")
    }

    /// The configured snapshot signer, unless signing was turned off.
    pub fn signer(&self, no_sign: bool) -> Result<Option<GpgSigner>> {
        if no_sign {
            return Ok(None);
        }
        if self.config.signing.key.is_empty() {
            bail!("No signing key configured; set one or pass --no-sign");
        }
        Ok(Some(GpgSigner {
            key: self.config.signing.key.clone(),
        }))
    }
}

/// Makes a path absolute (against the current directory) without requiring
/// it to exist.
pub fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_owned());
    }
    let cwd = Utf8PathBuf::try_from(std::env::current_dir()?)
        .context("Current directory isn't UTF-8")?;
    Ok(cwd.join(path))
}

/// Opens `path`, requiring a directory.
pub fn open_dir(path: &Utf8Path) -> Result<Box<dyn Dir>> {
    match fs::os::open(path)? {
        Entry::Dir(d) => Ok(d),
        _ => bail!("{path} is not a directory"),
    }
}
