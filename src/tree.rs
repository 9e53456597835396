//! Uniquely ID and store directories and their metadata
//!
//! A tree maps child names to entries; each entry is a file (referencing a
//! `file` object), a directory (referencing a subordinate `tree` object), or
//! a symlink (carrying its target inline). Every entry records an ACL and,
//! optionally, user and group names.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, bail};

use crate::acl::Acl;
use crate::hashing::ObjectId;
use crate::props::Properties;

/// What a directory entry points at.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EntryContent {
    File { id: ObjectId },
    Dir { id: ObjectId },
    Symlink { target: String },
}

impl EntryContent {
    fn type_tag(&self) -> &'static str {
        match self {
            EntryContent::File { .. } => "file",
            EntryContent::Dir { .. } => "dir",
            EntryContent::Symlink { .. } => "symlink",
        }
    }

    /// The object this entry references, if any. Symlinks reference nothing.
    pub fn reference(&self) -> Option<&ObjectId> {
        match self {
            EntryContent::File { id } | EntryContent::Dir { id } => Some(id),
            EntryContent::Symlink { .. } => None,
        }
    }
}

/// A single directory entry and its metadata.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TreeEntry {
    pub content: EntryContent,
    pub acl: Acl,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl TreeEntry {
    /// An entry as the capture engine records it: no user/group names,
    /// ACL from the executable bit.
    pub fn new(content: EntryContent, executable: bool) -> TreeEntry {
        TreeEntry {
            content,
            acl: Acl::from_executable(executable),
            user: None,
            group: None,
        }
    }

    fn to_props(&self, name: &str) -> Properties {
        let mut props = Properties::new();
        props.insert("name", name);
        props.insert("type", self.content.type_tag());
        match &self.content {
            EntryContent::File { id } | EntryContent::Dir { id } => {
                props.insert("ref", id.to_string())
            }
            EntryContent::Symlink { target } => props.insert("target", target.clone()),
        }
        props.insert("acl", self.acl.to_string());
        if let Some(user) = &self.user {
            props.insert("user", user.clone());
        }
        if let Some(group) = &self.group {
            props.insert("group", group.clone());
        }
        props
    }

    fn from_props(props: &Properties) -> Result<(String, TreeEntry)> {
        let name = props
            .get("name")
            .ok_or_else(|| anyhow!("Missing property: name"))?
            .to_owned();

        let reference = || -> Result<ObjectId> {
            props
                .get("ref")
                .ok_or_else(|| anyhow!("Missing property: ref"))?
                .parse()
        };

        let type_tag = props
            .get("type")
            .ok_or_else(|| anyhow!("Missing property: type"))?;
        let content = match type_tag {
            "file" => EntryContent::File { id: reference()? },
            "dir" => EntryContent::Dir { id: reference()? },
            "symlink" => EntryContent::Symlink {
                target: props
                    .get("target")
                    .ok_or_else(|| anyhow!("Missing property: target"))?
                    .to_owned(),
            },
            other => bail!("Unknown tree entry type: {other}"),
        };

        // Entries written before ACLs were recorded fall back to
        // 0644 for files and symlinks and 0775 for directories.
        let acl = match props.get("acl") {
            Some(text) => text.parse()?,
            None => match &content {
                EntryContent::Dir { .. } => Acl::from_unix_mode(0o775),
                _ => Acl::from_unix_mode(0o644),
            },
        };

        let entry = TreeEntry {
            content,
            acl,
            user: props.get("user").map(str::to_owned),
            group: props.get("group").map(str::to_owned),
        };
        Ok((name, entry))
    }
}

/// A tree represents a single directory, addressed by entry name.
pub type Tree = BTreeMap<String, TreeEntry>;

/// Renders the tree's payload: one property line per entry, sorted bytewise
/// over the whole rendered line so serialization is deterministic.
pub fn payload(tree: &Tree) -> Vec<u8> {
    let mut lines: Vec<String> = tree
        .iter()
        .map(|(name, entry)| {
            let mut line = entry.to_props(name).render();
            line.push('\n');
            line
        })
        .collect();
    lines.sort();
    lines.concat().into_bytes()
}

pub fn from_payload(payload: &[u8]) -> Result<Tree> {
    let payload = str::from_utf8(payload).context("Tree payload is not UTF-8")?;

    let mut tree = Tree::new();
    for line in payload.lines() {
        if line.is_empty() {
            continue;
        }
        let props = Properties::parse(line)?;
        let (name, entry) = TreeEntry::from_props(&props)?;
        tree.insert(name, entry);
    }
    Ok(tree)
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_id(byte: u8) -> ObjectId {
        format!("sha3-256:{}", hex::encode([byte; 32]))
            .parse()
            .unwrap()
    }

    fn test_tree() -> Tree {
        let mut tree = Tree::new();
        tree.insert(
            "a".to_owned(),
            TreeEntry::new(EntryContent::File { id: test_id(0x11) }, false),
        );
        tree.insert(
            "b".to_owned(),
            TreeEntry::new(EntryContent::Dir { id: test_id(0x22) }, true),
        );
        tree.insert(
            "baz".to_owned(),
            TreeEntry::new(
                EntryContent::Symlink {
                    target: "/föö&bär/💾".to_owned(),
                },
                false,
            ),
        );
        tree
    }

    const TEST_PAYLOAD: &[u8] = b"\
acl=u::rw-,g::r--,o::r--&name=a&ref=sha3-256:1111111111111111111111111111111111111111111111111111111111111111&type=file\n\
acl=u::rw-,g::r--,o::r--&name=baz&target=%2ff%c3%b6%c3%b6%26b%c3%a4r%2f%f0%9f%92%be&type=symlink\n\
acl=u::rwx,g::r-x,o::r-x&name=b&ref=sha3-256:2222222222222222222222222222222222222222222222222222222222222222&type=dir\n";

    #[test]
    fn serialize() {
        assert_eq!(payload(&test_tree()), TEST_PAYLOAD);
    }

    #[test]
    fn serialize_empty() {
        assert_eq!(payload(&Tree::new()), b"");
    }

    #[test]
    fn parse_round_trip() {
        assert_eq!(from_payload(TEST_PAYLOAD).unwrap(), test_tree());
    }

    #[test]
    fn parse_applies_default_acls() {
        let tree = from_payload(
            b"name=f&ref=sha3-256:1111111111111111111111111111111111111111111111111111111111111111&type=file\n\
              name=d&ref=sha3-256:2222222222222222222222222222222222222222222222222222222222222222&type=dir\n\
              name=l&target=f&type=symlink\n",
        )
        .unwrap();
        assert_eq!(tree["f"].acl, Acl::from_unix_mode(0o644));
        assert_eq!(tree["d"].acl, Acl::from_unix_mode(0o775));
        assert_eq!(tree["l"].acl, Acl::from_unix_mode(0o644));
    }

    #[test]
    fn parse_keeps_user_and_group() {
        let tree = from_payload(
            b"acl=u::rw-,g::r--,o::r--&group=staff&name=f&ref=sha3-256:1111111111111111111111111111111111111111111111111111111111111111&type=file&user=carol\n",
        )
        .unwrap();
        assert_eq!(tree["f"].user.as_deref(), Some("carol"));
        assert_eq!(tree["f"].group.as_deref(), Some("staff"));
    }

    #[test]
    fn parse_rejects() {
        let bad: [&[u8]; 6] = [
            b"ref=sha3-256:0000000000000000000000000000000000000000000000000000000000000000&type=file\n", // name missing
            b"name=foo\n", // type missing
            b"name=baz&type=foobar\n", // unknown type
            b"name=foo&type=file\n", // file ref missing
            b"name=foo&type=dir\n", // dir ref missing
            b"name=foo&type=symlink\n", // symlink target missing
        ];
        for payload in bad {
            assert!(
                from_payload(payload).is_err(),
                "{} parsed fine",
                String::from_utf8_lossy(payload)
            );
        }
    }
}
