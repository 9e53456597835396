//! The adapter bound to the host filesystem.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use jiff::Timestamp;

use super::{Dir, Entry, Node, RegularFile, Symlink};

/// A child of the host filesystem. Metadata comes from one `lstat` when the
/// handle is made, like a dirent snapshot; it doesn't chase later changes.
pub struct OsEntry {
    path: Utf8PathBuf,
    executable: bool,
    modified: Timestamp,
    is_dir: bool,
}

/// Opens `path` and wraps it in the right capability for its type.
pub fn open(path: &Utf8Path) -> Result<Entry> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("Couldn't stat {path}"))?;

    let modified = Timestamp::new(meta.mtime(), meta.mtime_nsec() as i32)
        .with_context(|| format!("{path} has an mtime out of range"))?;
    let entry = OsEntry {
        path: path.to_owned(),
        executable: meta.permissions().mode() & 0o100 != 0,
        modified,
        is_dir: meta.is_dir(),
    };

    let ft = meta.file_type();
    if ft.is_dir() {
        Ok(Entry::Dir(Box::new(entry)))
    } else if ft.is_symlink() {
        Ok(Entry::Symlink(Box::new(entry)))
    } else if ft.is_file() {
        Ok(Entry::File(Box::new(entry)))
    } else {
        bail!("{path} is neither a file, a directory, nor a symlink");
    }
}

fn mode_for(executable: bool) -> u32 {
    if executable { 0o755 } else { 0o644 }
}

impl Node for OsEntry {
    fn name(&self) -> String {
        self.path.file_name().unwrap_or("").to_owned()
    }

    fn executable(&self) -> bool {
        self.executable
    }

    fn modified(&self) -> Timestamp {
        self.modified
    }

    fn delete(&self) -> Result<()> {
        if self.is_dir {
            fs::remove_dir_all(&self.path)
                .with_context(|| format!("Couldn't remove {}", self.path))
        } else {
            fs::remove_file(&self.path).with_context(|| format!("Couldn't remove {}", self.path))
        }
    }
}

impl RegularFile for OsEntry {
    fn open_read(&self) -> Result<Box<dyn Read + Send>> {
        let fh = File::open(&self.path).with_context(|| format!("Couldn't open {}", self.path))?;
        Ok(Box::new(fh))
    }

    fn open_write(&self) -> Result<Box<dyn Write + Send>> {
        let fh = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("Couldn't open {} for writing", self.path))?;
        Ok(Box::new(fh))
    }
}

impl Dir for OsEntry {
    fn read_dir(&self) -> Result<Vec<Entry>> {
        let mut children = Vec::new();
        for dirent in
            fs::read_dir(&self.path).with_context(|| format!("Couldn't read {}", self.path))?
        {
            let path = Utf8PathBuf::try_from(dirent?.path())
                .with_context(|| format!("Child of {} isn't UTF-8", self.path))?;
            children.push(open(&path)?);
        }
        Ok(children)
    }

    fn get_child(&self, name: &str) -> Result<Option<Entry>> {
        let path = self.path.join(name);
        match fs::symlink_metadata(&path) {
            Ok(_) => Ok(Some(open(&path)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Couldn't stat {path}")),
        }
    }

    fn create_child_file(&self, name: &str, executable: bool) -> Result<Box<dyn RegularFile>> {
        let path = self.path.join(name);
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode_for(executable))
            .open(&path)
            .with_context(|| format!("Couldn't create {path}"))?;

        match open(&path)? {
            Entry::File(f) => Ok(f),
            _ => bail!("{path} isn't a regular file after creating it"),
        }
    }

    fn create_child_dir(&self, name: &str) -> Result<Box<dyn Dir>> {
        let path = self.path.join(name);
        fs::create_dir(&path).with_context(|| format!("Couldn't create {path}"))?;

        match open(&path)? {
            Entry::Dir(d) => Ok(d),
            _ => bail!("{path} isn't a directory after creating it"),
        }
    }

    fn create_child_symlink(&self, name: &str, target: &str) -> Result<Box<dyn Symlink>> {
        let path = self.path.join(name);
        std::os::unix::fs::symlink(target, &path)
            .with_context(|| format!("Couldn't create symlink {path}"))?;

        match open(&path)? {
            Entry::Symlink(s) => Ok(s),
            _ => bail!("{path} isn't a symlink after creating it"),
        }
    }

    fn rename_child(&self, from: &str, to: &str) -> Result<()> {
        let from = self.path.join(from);
        let to = self.path.join(to);
        fs::rename(&from, &to).with_context(|| format!("Couldn't rename {from} to {to}"))
    }
}

impl Symlink for OsEntry {
    fn readlink(&self) -> Result<String> {
        let target =
            fs::read_link(&self.path).with_context(|| format!("Couldn't readlink {}", self.path))?;
        Ok(Utf8PathBuf::try_from(target)
            .with_context(|| format!("Target of {} isn't UTF-8", self.path))?
            .into_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::fs::FileType;

    fn root(dir: &tempfile::TempDir) -> Box<dyn Dir> {
        let path = Utf8Path::from_path(dir.path()).unwrap();
        match open(path).unwrap() {
            Entry::Dir(d) => d,
            _ => panic!("tempdir isn't a dir"),
        }
    }

    #[test]
    fn create_and_list() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = root(&dir);

        let f = root.create_child_file("foo", false)?;
        f.open_write()?.write_all(b"foo")?;
        root.create_child_file("bar", true)?;
        root.create_child_symlink("baz", "foo")?;
        root.create_child_dir("sub")?;

        let mut children = root.read_dir()?;
        children.sort_by_key(Entry::name);
        let kinds: Vec<(String, FileType)> = children
            .iter()
            .map(|c| (c.name(), c.file_type()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("bar".to_owned(), FileType::File),
                ("baz".to_owned(), FileType::Symlink),
                ("foo".to_owned(), FileType::File),
                ("sub".to_owned(), FileType::Dir),
            ]
        );

        let Some(Entry::File(foo)) = root.get_child("foo")? else {
            panic!("foo should be a file");
        };
        assert!(!foo.executable());
        let mut contents = String::new();
        foo.open_read()?.read_to_string(&mut contents)?;
        assert_eq!(contents, "foo");

        let Some(Entry::File(bar)) = root.get_child("bar")? else {
            panic!("bar should be a file");
        };
        assert!(bar.executable());

        let Some(Entry::Symlink(baz)) = root.get_child("baz")? else {
            panic!("baz should be a symlink");
        };
        assert_eq!(baz.readlink()?, "foo");

        assert!(root.get_child("nope")?.is_none());
        Ok(())
    }

    #[test]
    fn rename_and_delete() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = root(&dir);

        root.create_child_file("a", false)?;
        root.rename_child("a", "b")?;
        assert!(root.get_child("a")?.is_none());

        root.get_child("b")?.unwrap().delete()?;
        assert!(root.get_child("b")?.is_none());

        // Deleting a directory takes its contents with it.
        let sub = root.create_child_dir("sub")?;
        sub.create_child_file("inner", false)?;
        root.get_child("sub")?.unwrap().delete()?;
        assert!(root.get_child("sub")?.is_none());
        Ok(())
    }
}
