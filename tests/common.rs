#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use assert_cmd::Command;
use walkdir::WalkDir;

/// Writes a config pointing at a local storage and cache inside `dir`,
/// returning the config's path.
pub fn write_config(dir: &Path) -> Result<PathBuf> {
    let conf_path = dir.join("cairn.toml");
    fs::write(
        &conf_path,
        format!(
            "default_storage = \"repo\"\n\
             cache_path = \"{}\"\n\
             \n\
             [storage.repo]\n\
             method = \"local\"\n\
             path = \"{}\"\n",
            dir.join("cache").display(),
            dir.join("repo").display(),
        ),
    )?;
    Ok(conf_path)
}

pub fn cli_run(config: &Path) -> Result<Command> {
    let bin_name = env!("CARGO_PKG_NAME");
    let mut cmd = Command::cargo_bin(bin_name)?;
    cmd.arg("--config").arg(config);
    cmd.arg("-vv");
    Ok(cmd)
}

pub fn make_file(path: &Path, contents: &[u8], executable: bool) {
    fs::write(path, contents).expect("Couldn't write test file");
    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .expect("Couldn't chmod test file");
}

/// Sets up the source tree the lifecycle tests capture:
/// a couple of files, an executable, a symlink, and a subdirectory.
pub fn build_source_tree(src: &Path) {
    fs::create_dir(src).expect("Couldn't create source dir");
    make_file(&src.join("foo"), b"foo contents\n", false);
    make_file(&src.join("script"), b"#!/bin/sh\nexit 0\n", true);
    std::os::unix::fs::symlink("foo", src.join("link")).expect("Couldn't create symlink");
    fs::create_dir(src.join("sub")).expect("Couldn't create subdir");
    make_file(&src.join("sub").join("a"), b"nested\n", false);
    fs::create_dir(src.join("sub").join("b")).expect("Couldn't create subdir");
}

#[derive(Debug, Eq, PartialEq)]
enum TreeItem {
    File { contents: Vec<u8>, executable: bool },
    Dir,
    Symlink { target: PathBuf },
}

fn walk(root: &Path) -> BTreeMap<PathBuf, TreeItem> {
    let mut items = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.expect("Couldn't walk tree");
        let rel = entry.path().strip_prefix(root).unwrap().to_owned();
        let ft = entry.file_type();

        let item = if ft.is_symlink() {
            TreeItem::Symlink {
                target: fs::read_link(entry.path()).expect("Couldn't readlink"),
            }
        } else if ft.is_dir() {
            TreeItem::Dir
        } else {
            let meta = entry.metadata().expect("Couldn't stat");
            TreeItem::File {
                contents: fs::read(entry.path()).expect("Couldn't read"),
                executable: meta.permissions().mode() & 0o100 != 0,
            }
        };
        items.insert(rel, item);
    }
    items
}

/// Asserts the two trees match in names, kinds, contents, symlink targets,
/// and executable bits.
pub fn assert_trees_equal(a: &Path, b: &Path) {
    assert_eq!(walk(a), walk(b));
}

/// Counts the object files in a local storage (indices excluded).
pub fn count_objects(repo: &Path) -> usize {
    WalkDir::new(repo.join("sha3-256"))
        .into_iter()
        .map(|e| e.expect("Couldn't walk repo"))
        .filter(|e| e.file_type().is_file())
        .count()
}
