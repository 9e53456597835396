//! A content-addressed snapshot backup system.
//!
//! Directory trees are captured into an immutable object graph (blobs,
//! files, trees, and snapshots, each named by the hash of its serialized
//! form) stored in a pluggable object store. See [`backup`] for capture,
//! [`restore`] for the way back, and [`fsck`] for checking the whole graph.

pub mod acl;
pub mod backup;
pub mod cache;
pub mod config;
pub mod fs;
pub mod fsck;
pub mod gpg;
pub mod hashing;
pub mod index;
pub mod object;
pub mod props;
pub mod restore;
pub mod snapshot;
pub mod storage;
pub mod tree;

// CLI stuff:
pub mod ui;
