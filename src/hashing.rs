//! Tools for hashing everything we care about into a unique [`ObjectId`]

use std::fmt;
use std::io;
use std::io::prelude::*;
use std::str::FromStr;

use anyhow::{Context, Result, bail, ensure};
use sha3::{Digest, Sha3_256};

/// Hash algorithms an [`ObjectId`] can be tagged with.
///
/// Only SHA3-256 is defined so far; the tag exists so every stored id names
/// its algorithm and another one can be added without rewriting history.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Algorithm {
    Sha3_256,
}

pub const DEFAULT_ALGORITHM: Algorithm = Algorithm::Sha3_256;

impl Algorithm {
    pub fn digest_length(self) -> usize {
        match self {
            Algorithm::Sha3_256 => 32,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Algorithm::Sha3_256 => "sha3-256",
        }
    }

    /// A write-only sink that IDs everything fed to it.
    pub fn generator(self) -> IdGenerator {
        IdGenerator {
            algo: self,
            hasher: Sha3_256::new(),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha3-256" => Ok(Algorithm::Sha3_256),
            other => bail!("Unknown hash algorithm {other}"),
        }
    }
}

/// The algorithm-tagged hash used to identify all objects in our system.
///
/// Its text form is `<algo>:<lowercase hex digest>`, and parsing checks that
/// the digest length matches the algorithm, so a parsed id is always
/// well-formed.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectId {
    algo: Algorithm,
    digest: [u8; 32],
}

impl ObjectId {
    /// Calculates an ID from the given bytes
    pub fn hash(bytes: &[u8]) -> Self {
        Self {
            algo: DEFAULT_ALGORITHM,
            digest: Sha3_256::digest(bytes).into(),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algo
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ digest: {self} }}")
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algo, hex::encode(self.digest))
    }
}

impl FromStr for ObjectId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (algo, digest) = s
            .split_once(':')
            .with_context(|| format!("No algorithm tag in object ID {s}"))?;
        let algo: Algorithm = algo.parse()?;

        let digest = hex::decode(digest).with_context(|| format!("Couldn't decode {s} as hex"))?;
        ensure!(
            digest.len() == algo.digest_length(),
            "Digest length of {s} doesn't match {algo}"
        );

        Ok(Self {
            algo,
            digest: digest.try_into().unwrap(),
        })
    }
}

/// Write-only sink wrapping a hash function; [`finish`](Self::finish) yields
/// the [`ObjectId`] of everything written. Writes never fail.
pub struct IdGenerator {
    algo: Algorithm,
    hasher: Sha3_256,
}

impl IdGenerator {
    fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finish(self) -> ObjectId {
        ObjectId {
            algo: self.algo,
            digest: self.hasher.finalize().into(),
        }
    }
}

impl Write for IdGenerator {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Tees writes into both the inner writer and an [`IdGenerator`],
/// so serializing and hashing an object is a single pass.
pub struct HashingWriter<W> {
    inner: W,
    generator: IdGenerator,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            generator: DEFAULT_ALGORITHM.generator(),
        }
    }

    pub fn finalize(self) -> (ObjectId, W) {
        (self.generator.finish(), self.inner)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.generator.update(&buf[..count]);
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
