use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use serde_derive::Deserialize;

/// The config file: which storage to talk to by default, where the id cache
/// lives, the signing key, and a section per configured storage.
///
/// ```toml
/// default_storage = "local"
/// cache_path = "~/.cache/cairn/ids"
///
/// [signing]
/// key = "0xDEADBEEF"
///
/// [storage.local]
/// method = "local"
/// path = "~/.local/share/cairn"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub default_storage: String,
    #[serde(default)]
    pub cache_path: Option<String>,
    #[serde(default)]
    pub signing: Signing,
    #[serde(default)]
    pub storage: BTreeMap<String, StorageConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Signing {
    #[serde(default)]
    pub key: String,
}

/// One `[storage.<name>]` section, dispatched on its `method` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum StorageConfig {
    Local {
        path: String,
    },
    Memory,
    Filter {
        base: String,
        #[serde(default)]
        encode: Vec<String>,
        #[serde(default)]
        decode: Vec<String>,
    },
}

pub fn load(path: Option<&Utf8Path>) -> Result<Configuration> {
    let path = match path {
        Some(p) => p.to_owned(),
        None => default_path()?,
    };
    let s = fs::read_to_string(&path).with_context(|| format!("Couldn't open {path}"))?;
    let conf = toml::from_str(&s).with_context(|| format!("Couldn't parse {path}"))?;
    Ok(conf)
}

fn default_path() -> Result<Utf8PathBuf> {
    let mut confpath: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("Can't find home directory"))?
        .try_into()
        .context("Home directory isn't UTF-8")?;
    confpath.extend([".config", "cairn.toml"]);
    Ok(confpath)
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> Utf8PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(h) = home::home_dir()
        && let Ok(h) = Utf8PathBuf::try_from(h)
    {
        return h.join(rest);
    }
    Utf8PathBuf::from(path)
}
