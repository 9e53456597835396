//! Snapshot signing and verification by shelling out to `gpg`.

use std::io::prelude::*;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result, ensure};

use crate::snapshot::{Signer, Verifier};

/// Clear-signs payloads with `gpg --clearsign`, preserving them byte-for-byte
/// inside the signature envelope.
pub struct GpgSigner {
    pub key: String,
}

impl Signer for GpgSigner {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        filter_through(
            Command::new("gpg").args(["--clearsign", "-u", &self.key]),
            payload,
        )
    }
}

/// Checks clear-signed payloads with `gpg --verify`.
pub struct GpgVerifier;

impl Verifier for GpgVerifier {
    fn verify(&self, payload: &[u8]) -> Result<()> {
        filter_through(Command::new("gpg").arg("--verify"), payload)?;
        Ok(())
    }
}

fn filter_through(cmd: &mut Command, input: &[u8]) -> Result<Vec<u8>> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .context("Couldn't run gpg")?;

    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = child.stdout.take().unwrap();

    let output = thread::scope(|s| -> Result<Vec<u8>> {
        let feeder = s.spawn(move || stdin.write_all(input));
        let mut output = Vec::new();
        stdout
            .read_to_end(&mut output)
            .context("Couldn't read gpg output")?;
        feeder.join().unwrap().context("Couldn't write gpg input")?;
        Ok(output)
    })?;

    let status = child.wait().context("Couldn't wait on gpg")?;
    ensure!(status.success(), "gpg failed: {status}");
    Ok(output)
}
