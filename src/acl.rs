//! POSIX ACLs in their short text form.
//!
//! Tree entries carry one of these for every captured child. When the
//! filesystem only exposes classic mode bits, the ACL is just the owner,
//! group, and other entries built from those bits.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use thiserror::Error;

/// An `rwx` permission triple.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Perm(u8);

impl Perm {
    pub const NONE: Perm = Perm(0);
    pub const READ: Perm = Perm(4);
    pub const WRITE: Perm = Perm(2);
    pub const EXECUTE: Perm = Perm(1);

    pub fn contains(self, other: Perm) -> bool {
        self.0 & other.0 == other.0
    }

    fn from_mode_bits(bits: u32) -> Perm {
        Perm((bits & 0o7) as u8)
    }

    fn mode_bits(self) -> u32 {
        self.0 as u32
    }
}

impl BitOr for Perm {
    type Output = Perm;

    fn bitor(self, rhs: Perm) -> Perm {
        Perm(self.0 | rhs.0)
    }
}

impl fmt::Display for Perm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.contains(Perm::READ) { 'r' } else { '-' };
        let w = if self.contains(Perm::WRITE) { 'w' } else { '-' };
        let x = if self.contains(Perm::EXECUTE) { 'x' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}

/// Permissions per qualifier; the empty qualifier is the category's own entry
/// (`u::rwx`), non-empty ones name users or groups (`u:carol:r--`).
pub type QualifiedPerms = BTreeMap<String, Perm>;

#[derive(Debug, Error)]
#[error("invalid acl: entry #{entry}: {reason}")]
pub struct ParseError {
    entry: usize,
    reason: String,
}

/// A POSIX ACL: qualified permissions for the user, group, other, and mask
/// categories.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Acl {
    pub user: QualifiedPerms,
    pub group: QualifiedPerms,
    pub other: QualifiedPerms,
    pub mask: QualifiedPerms,
}

impl Acl {
    /// Builds the classic `u::`/`g::`/`o::` entries from Unix mode bits.
    pub fn from_unix_mode(mode: u32) -> Acl {
        Acl {
            user: [(String::new(), Perm::from_mode_bits(mode >> 6))].into(),
            group: [(String::new(), Perm::from_mode_bits(mode >> 3))].into(),
            other: [(String::new(), Perm::from_mode_bits(mode))].into(),
            mask: QualifiedPerms::new(),
        }
    }

    /// The ACL recorded for a captured child: 0755 when it's executable
    /// (directories always are), 0644 otherwise.
    pub fn from_executable(executable: bool) -> Acl {
        Acl::from_unix_mode(if executable { 0o755 } else { 0o644 })
    }

    pub fn to_unix_mode(&self) -> u32 {
        let bits = |perms: &QualifiedPerms| perms.get("").copied().unwrap_or_default().mode_bits();
        bits(&self.user) << 6 | bits(&self.group) << 3 | bits(&self.other)
    }

    /// Does the owner have the execute bit?
    pub fn executable(&self) -> bool {
        self.to_unix_mode() & 0o100 != 0
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let categories = [
            ('u', &self.user),
            ('g', &self.group),
            ('o', &self.other),
            ('m', &self.mask),
        ];
        let mut first = true;
        for (tag, perms) in categories {
            for (qualifier, perm) in perms {
                if !first {
                    f.write_str(",")?;
                }
                first = false;
                write!(f, "{tag}:{qualifier}:{perm}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Acl {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Acl, ParseError> {
        let mut acl = Acl::default();

        for (i, entry) in s.split(',').enumerate() {
            let err = |reason: &str| ParseError {
                entry: i + 1,
                reason: reason.to_owned(),
            };

            let parts: Vec<&str> = entry.trim().split(':').collect();
            let [tag, qualifier, perms] = parts[..] else {
                return Err(err("expected 3 ':' separated parts"));
            };

            let category = match tag {
                "u" | "user" => &mut acl.user,
                "g" | "group" => &mut acl.group,
                "o" | "other" => &mut acl.other,
                "m" | "mask" => &mut acl.mask,
                other => return Err(err(&format!("unknown tag \"{other}\""))),
            };

            let mut perm = Perm::NONE;
            if perms.contains('r') {
                perm = perm | Perm::READ;
            }
            if perms.contains('w') {
                perm = perm | Perm::WRITE;
            }
            if perms.contains('x') {
                perm = perm | Perm::EXECUTE;
            }
            category.insert(qualifier.to_owned(), perm);
        }

        Ok(acl)
    }
}
