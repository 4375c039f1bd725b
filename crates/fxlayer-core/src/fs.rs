//! File access used to load effect sources.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{FxError, Result};

pub trait FileHandle: Read + Seek {}

impl<T: Read + Seek> FileHandle for T {}

pub trait FileSystem {
    fn get_file(&self, path: &str) -> Result<Box<dyn FileHandle>>;

    fn read_to_string(&self, path: &str) -> Result<String> {
        let mut file = self.get_file(path)?;
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        Ok(text)
    }
}

/// Resolves relative paths against an ordered list of directories.
#[derive(Debug, Clone, Default)]
pub struct SearchPathFileSystem {
    paths: Vec<PathBuf>,
}

impl SearchPathFileSystem {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn push_path(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let requested = Path::new(path);
        if requested.is_absolute() {
            return requested.is_file().then(|| requested.to_path_buf());
        }
        self.paths
            .iter()
            .map(|dir| dir.join(requested))
            .find(|candidate| candidate.is_file())
    }
}

impl FileSystem for SearchPathFileSystem {
    fn get_file(&self, path: &str) -> Result<Box<dyn FileHandle>> {
        let resolved = self
            .resolve(path)
            .ok_or_else(|| FxError::FileNotFound(PathBuf::from(path)))?;
        trace!(?resolved, "opening {path}");
        Ok(Box::new(File::open(resolved)?))
    }
}

/// In-memory files, keyed by exact path.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }
}

impl FileSystem for MemoryFileSystem {
    fn get_file(&self, path: &str) -> Result<Box<dyn FileHandle>> {
        let contents = self
            .files
            .get(path)
            .ok_or_else(|| FxError::FileNotFound(PathBuf::from(path)))?;
        Ok(Box::new(Cursor::new(contents.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::SeekFrom;

    #[test]
    fn memory_files_read_and_seek() {
        let fs = MemoryFileSystem::new().with_file("fx/blur.fx", "abcdef");
        let mut file = fs.get_file("fx/blur.fx").unwrap();
        file.seek(SeekFrom::Start(3)).unwrap();
        let mut rest = String::new();
        file.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "def");
        assert_eq!(fs.read_to_string("fx/blur.fx").unwrap(), "abcdef");
    }

    #[test]
    fn missing_files_are_reported() {
        let fs = MemoryFileSystem::new();
        assert!(matches!(fs.get_file("nope.fx"), Err(FxError::FileNotFound(_))));
        let fs = SearchPathFileSystem::new(vec![std::env::temp_dir()]);
        assert!(matches!(
            fs.get_file("fxlayer-definitely-missing.fx"),
            Err(FxError::FileNotFound(_))
        ));
    }

    #[test]
    fn search_paths_are_tried_in_order() {
        let root = std::env::temp_dir().join(format!("fxlayer-fs-{}", std::process::id()));
        let first = root.join("first");
        let second = root.join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(second.join("only.fx"), "second").unwrap();
        std::fs::write(first.join("both.fx"), "first").unwrap();
        std::fs::write(second.join("both.fx"), "second").unwrap();

        let fs = SearchPathFileSystem::new(vec![first, second]);
        assert_eq!(fs.read_to_string("only.fx").unwrap(), "second");
        assert_eq!(fs.read_to_string("both.fx").unwrap(), "first");

        std::fs::remove_dir_all(root).unwrap();
    }
}
