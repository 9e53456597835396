//! Drive fsck through the binary against a repo we break on purpose.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use predicates::prelude::*;
use walkdir::WalkDir;

mod common;
use common::*;

fn object_files(repo: &Path) -> Vec<PathBuf> {
    WalkDir::new(repo.join("sha3-256"))
        .into_iter()
        .map(|e| e.expect("Couldn't walk repo"))
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

#[test]
fn fsck_flags_corruption() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path())?;

    let src = dir.path().join("src");
    build_source_tree(&src);

    cli_run(&config)?
        .args(["take-snapshot", "--no-sign", "home"])
        .arg(&src)
        .assert()
        .success();

    // Healthy first.
    cli_run(&config)?
        .args(["fsck", "--blobs"])
        .assert()
        .success();

    // Garble one stored object; its bytes no longer hash to its id.
    let repo = dir.path().join("repo");
    let victim = object_files(&repo)
        .into_iter()
        .next()
        .expect("repo has no objects");
    fs::write(&victim, b"blob 7\ngarbage")?;

    cli_run(&config)?
        .args(["fsck", "--blobs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("problem"));
    Ok(())
}

#[test]
fn fsck_flags_missing_objects() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path())?;

    let src = dir.path().join("src");
    build_source_tree(&src);

    cli_run(&config)?
        .args(["take-snapshot", "--no-sign", "home"])
        .arg(&src)
        .assert()
        .success();

    // Delete every blob; the files referencing them point into a hole.
    let repo = dir.path().join("repo");
    let mut deleted = 0;
    for object in object_files(&repo) {
        if fs::read(&object)?.starts_with(b"blob ") {
            fs::remove_file(&object)?;
            deleted += 1;
        }
    }
    assert!(deleted > 0, "captured repo should hold blobs");

    // Without --blobs nobody follows file fragments, so all is well...
    cli_run(&config)?.arg("fsck").assert().success();

    // ...but a full check notices.
    cli_run(&config)?
        .args(["fsck", "--blobs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
    Ok(())
}
