//! A storage layer that pipes object bytes through external commands on
//! their way in and out, e.g. `encode = ["gzip"]`, `decode = ["gzip", "-d"]`.
//!
//! Note that the base storage then holds *transformed* bytes: `get_object`'s
//! integrity check still works because it runs above this layer, after
//! decoding.

use std::io::prelude::*;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result, ensure};

use crate::hashing::ObjectId;
use crate::object::Kind;
use crate::storage::Storage;

/// An argv to pipe bytes through.
pub struct PipeFilter(Vec<String>);

impl PipeFilter {
    pub fn new(argv: Vec<String>) -> Result<PipeFilter> {
        ensure!(!argv.is_empty(), "A pipe filter needs at least one argument");
        Ok(PipeFilter(argv))
    }

    fn transform(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.0[0])
            .args(&self.0[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("Couldn't run filter {}", self.0[0]))?;

        let mut stdin = child.stdin.take().unwrap();
        let mut stdout = child.stdout.take().unwrap();

        // Feed stdin from its own thread; writing it all before reading can
        // deadlock once the child fills up the output pipe.
        let output = thread::scope(|s| -> Result<Vec<u8>> {
            let feeder = s.spawn(move || stdin.write_all(input));
            let mut output = Vec::new();
            stdout
                .read_to_end(&mut output)
                .context("Couldn't read filter output")?;
            feeder
                .join()
                .unwrap()
                .context("Couldn't write filter input")?;
            Ok(output)
        })?;

        let status = child.wait().context("Couldn't wait on filter")?;
        ensure!(status.success(), "Filter {} failed: {status}", self.0[0]);
        Ok(output)
    }
}

pub struct FilterStorage {
    base: Box<dyn Storage>,
    encode: Option<PipeFilter>,
    decode: Option<PipeFilter>,
}

impl FilterStorage {
    /// Layers `encode`/`decode` pipes over `base`.
    /// An empty argv means that direction passes through untouched.
    pub fn new(
        base: Box<dyn Storage>,
        encode: Vec<String>,
        decode: Vec<String>,
    ) -> Result<FilterStorage> {
        let build = |argv: Vec<String>| -> Result<Option<PipeFilter>> {
            if argv.is_empty() {
                Ok(None)
            } else {
                Ok(Some(PipeFilter::new(argv)?))
            }
        };
        Ok(FilterStorage {
            base,
            encode: build(encode)?,
            decode: build(decode)?,
        })
    }
}

impl Storage for FilterStorage {
    fn get(&self, id: &ObjectId) -> Result<Vec<u8>> {
        let raw = self.base.get(id)?;
        match &self.decode {
            Some(filter) => filter.transform(&raw),
            None => Ok(raw),
        }
    }

    fn has(&self, id: &ObjectId) -> Result<bool> {
        self.base.has(id)
    }

    fn set(&self, id: &ObjectId, kind: Kind, raw: &[u8]) -> Result<()> {
        match &self.encode {
            Some(filter) => self.base.set(id, kind, &filter.transform(raw)?),
            None => self.base.set(id, kind, raw),
        }
    }

    fn list(&self, kind: Kind) -> Result<Vec<ObjectId>> {
        self.base.list(kind)
    }

    fn close(&self) -> Result<()> {
        self.base.close()
    }
}
