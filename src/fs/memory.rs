//! An in-memory filesystem for tests.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail};
use jiff::Timestamp;

use super::{Dir, Entry, Node, RegularFile, Symlink};

type NodeRef = Arc<Mutex<Inode>>;

struct Inode {
    name: String,
    executable: bool,
    modified: Timestamp,
    kind: InodeKind,
}

enum InodeKind {
    File { content: Vec<u8>, reads: u64 },
    Dir { children: BTreeMap<String, NodeRef> },
    Symlink { target: String },
}

impl Inode {
    fn children(&mut self) -> &mut BTreeMap<String, NodeRef> {
        match &mut self.kind {
            InodeKind::Dir { children } => children,
            _ => panic!("Expected a directory inode"),
        }
    }
}

/// A handle to one in-memory file, directory, or symlink.
///
/// Handles share the underlying nodes, so a tree stays consistent across
/// however many handles and threads are poking at it.
#[derive(Clone)]
pub struct MemNode {
    node: NodeRef,
    parent: Option<NodeRef>,
}

/// Creates a new, empty in-memory tree and hands back its root.
pub fn new_root(name: &str) -> MemNode {
    MemNode {
        node: Arc::new(Mutex::new(Inode {
            name: name.to_owned(),
            executable: true,
            modified: Timestamp::now(),
            kind: InodeKind::Dir {
                children: BTreeMap::new(),
            },
        })),
        parent: None,
    }
}

impl MemNode {
    fn lock(&self) -> MutexGuard<'_, Inode> {
        self.node.lock().unwrap()
    }

    fn entry_for(node: &NodeRef, parent: NodeRef) -> Entry {
        let handle = MemNode {
            node: node.clone(),
            parent: Some(parent),
        };
        match &node.lock().unwrap().kind {
            InodeKind::File { .. } => Entry::File(Box::new(handle)),
            InodeKind::Dir { .. } => Entry::Dir(Box::new(handle)),
            InodeKind::Symlink { .. } => Entry::Symlink(Box::new(handle)),
        }
    }

    fn add_child(&self, name: &str, executable: bool, kind: InodeKind) -> NodeRef {
        let child = Arc::new(Mutex::new(Inode {
            name: name.to_owned(),
            executable,
            modified: Timestamp::now(),
            kind,
        }));
        self.lock().children().insert(name.to_owned(), child.clone());
        child
    }

    /// How many times the file child `name` has been opened for reading.
    /// Lets tests prove that cached captures don't touch the file.
    pub fn read_count(&self, name: &str) -> u64 {
        let mut node = self.lock();
        let child = node.children().get(name).expect("no such child").clone();
        drop(node);
        let child = child.lock().unwrap();
        match &child.kind {
            InodeKind::File { reads, .. } => *reads,
            _ => panic!("{name} isn't a file"),
        }
    }

}

impl Node for MemNode {
    fn name(&self) -> String {
        self.lock().name.clone()
    }

    fn executable(&self) -> bool {
        self.lock().executable
    }

    fn modified(&self) -> Timestamp {
        self.lock().modified
    }

    fn delete(&self) -> Result<()> {
        let parent = self
            .parent
            .as_ref()
            .ok_or_else(|| anyhow!("The root entry can not be deleted"))?;
        let name = self.name();
        parent.lock().unwrap().children().remove(&name);
        Ok(())
    }
}

impl RegularFile for MemNode {
    fn open_read(&self) -> Result<Box<dyn Read + Send>> {
        let mut node = self.lock();
        match &mut node.kind {
            InodeKind::File { content, reads } => {
                *reads += 1;
                Ok(Box::new(Cursor::new(content.clone())))
            }
            _ => bail!("{} is not a regular file", node.name),
        }
    }

    fn open_write(&self) -> Result<Box<dyn Write + Send>> {
        let mut node = self.lock();
        match &mut node.kind {
            InodeKind::File { content, .. } => {
                content.clear();
                Ok(Box::new(MemWriter {
                    node: self.node.clone(),
                }))
            }
            _ => bail!("{} is not a regular file", node.name),
        }
    }
}

struct MemWriter {
    node: NodeRef,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.node.lock().unwrap().kind {
            InodeKind::File { content, .. } => {
                content.extend_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(io::Error::other("not a regular file")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Dir for MemNode {
    fn read_dir(&self) -> Result<Vec<Entry>> {
        let mut node = self.lock();
        let children: Vec<NodeRef> = node.children().values().cloned().collect();
        drop(node);
        Ok(children
            .iter()
            .map(|c| Self::entry_for(c, self.node.clone()))
            .collect())
    }

    fn get_child(&self, name: &str) -> Result<Option<Entry>> {
        let mut node = self.lock();
        let child = node.children().get(name).cloned();
        drop(node);
        Ok(child.map(|c| Self::entry_for(&c, self.node.clone())))
    }

    fn create_child_file(&self, name: &str, executable: bool) -> Result<Box<dyn RegularFile>> {
        let node = self.add_child(
            name,
            executable,
            InodeKind::File {
                content: Vec::new(),
                reads: 0,
            },
        );
        Ok(Box::new(MemNode {
            node,
            parent: Some(self.node.clone()),
        }))
    }

    fn create_child_dir(&self, name: &str) -> Result<Box<dyn Dir>> {
        let node = self.add_child(
            name,
            true,
            InodeKind::Dir {
                children: BTreeMap::new(),
            },
        );
        Ok(Box::new(MemNode {
            node,
            parent: Some(self.node.clone()),
        }))
    }

    fn create_child_symlink(&self, name: &str, target: &str) -> Result<Box<dyn Symlink>> {
        let node = self.add_child(
            name,
            false,
            InodeKind::Symlink {
                target: target.to_owned(),
            },
        );
        Ok(Box::new(MemNode {
            node,
            parent: Some(self.node.clone()),
        }))
    }

    fn rename_child(&self, from: &str, to: &str) -> Result<()> {
        let mut node = self.lock();
        let children = node.children();
        let child = children
            .remove(from)
            .ok_or_else(|| anyhow!("No child named {from}"))?;
        child.lock().unwrap().name = to.to_owned();
        children.insert(to.to_owned(), child);
        Ok(())
    }
}

impl Symlink for MemNode {
    fn readlink(&self) -> Result<String> {
        let node = self.lock();
        match &node.kind {
            InodeKind::Symlink { target } => Ok(target.clone()),
            _ => bail!("{} is not a symlink", node.name),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::fs::FileType;

    #[test]
    fn tree_building() -> Result<()> {
        let root = new_root("root");

        let f = root.create_child_file("foo", false)?;
        f.open_write()?.write_all(b"foo")?;
        root.create_child_symlink("baz", "foo")?;
        let sub = root.create_child_dir("sub")?;
        sub.create_child_file("a", true)?;

        let kinds: Vec<(String, FileType)> = root
            .read_dir()?
            .iter()
            .map(|c| (c.name(), c.file_type()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("baz".to_owned(), FileType::Symlink),
                ("foo".to_owned(), FileType::File),
                ("sub".to_owned(), FileType::Dir),
            ]
        );

        let Some(Entry::File(foo)) = root.get_child("foo")? else {
            panic!("foo should be a file");
        };
        let mut contents = Vec::new();
        foo.open_read()?.read_to_end(&mut contents)?;
        assert_eq!(contents, b"foo");
        assert_eq!(root.read_count("foo"), 1);
        Ok(())
    }

    #[test]
    fn deletes_and_renames() -> Result<()> {
        let root = new_root("root");
        root.create_child_file("a", false)?;

        root.rename_child("a", "b")?;
        assert!(root.get_child("a")?.is_none());
        let b = root.get_child("b")?.unwrap();
        assert_eq!(b.name(), "b");

        b.delete()?;
        assert!(root.get_child("b")?.is_none());

        assert!(Node::delete(&root).is_err());
        Ok(())
    }

    #[test]
    fn handles_share_the_tree() -> Result<()> {
        let root = new_root("root");
        let sub = root.create_child_dir("sub")?;
        sub.create_child_file("inner", false)?;

        // A second handle to the same directory sees the file.
        let Some(Entry::Dir(sub2)) = root.get_child("sub")? else {
            panic!("sub should be a dir");
        };
        assert!(sub2.get_child("inner")?.is_some());
        Ok(())
    }
}
