//! File access for the mapping compiler.
//!
//! The compiler never touches the filesystem directly; it goes through a
//! [`FileSource`], which keeps compilation testable against in-memory trees.

use globset::Glob;
#[cfg(test)]
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Read-only access to the files a mapping set is built from.
pub trait FileSource: Send + Sync {
    /// Read the whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Expand a path whose file name may contain glob characters.
    ///
    /// Returns matching files sorted by name. Sources without glob support
    /// return the path unchanged.
    fn expand(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(vec![path.to_path_buf()])
    }
}

/// Returns true when the file name contains glob metacharacters.
pub fn is_glob(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains(['*', '?', '[', '{']))
}

/// The local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl FileSource for FsSource {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn expand(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !is_glob(path) {
            return Ok(vec![path.to_path_buf()]);
        }

        let Some(pattern) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(Vec::new());
        };
        let matcher = Glob::new(pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
            .compile_matcher();

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut matched = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if matcher.is_match(entry.file_name()) {
                matched.push(dir.join(entry.file_name()));
            }
        }
        matched.sort();
        Ok(matched)
    }
}

/// An in-memory file tree, keyed by full path.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: HashMap<PathBuf, Vec<u8>>,
}

#[cfg(test)]
impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, replacing any previous content.
    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

#[cfg(test)]
impl FileSource for MemorySource {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn expand(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !is_glob(path) {
            return Ok(vec![path.to_path_buf()]);
        }
        let matcher = Glob::new(&path.to_string_lossy())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
            .compile_matcher();
        let mut matched: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|p| p.parent() == path.parent() && matcher.is_match(p))
            .cloned()
            .collect();
        matched.sort();
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_glob() {
        assert!(is_glob(Path::new("maps/*.json")));
        assert!(is_glob(Path::new("maps/a?.json")));
        assert!(!is_glob(Path::new("maps*/a.json")));
        assert!(!is_glob(Path::new("a.json")));
    }

    #[test]
    fn test_fs_expand_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["b.json", "a.json", "c.txt"] {
            std::fs::write(dir.path().join(name), "[]").unwrap();
        }
        std::fs::create_dir(dir.path().join("d.json")).unwrap();

        let found = FsSource.expand(&dir.path().join("*.json")).unwrap();
        assert_eq!(
            found,
            vec![dir.path().join("a.json"), dir.path().join("b.json")]
        );

        let none = FsSource.expand(&dir.path().join("missing/*.json")).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_fs_read_missing() {
        let dir = TempDir::new().unwrap();
        let err = FsSource.read(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_memory_source() {
        let src = MemorySource::new()
            .with_file("/m/a.json", "1")
            .with_file("/m/b.json", "2")
            .with_file("/m/sub/c.json", "3");
        assert_eq!(src.read(Path::new("/m/a.json")).unwrap(), b"1");
        assert_eq!(
            src.expand(Path::new("/m/*.json")).unwrap(),
            vec![PathBuf::from("/m/a.json"), PathBuf::from("/m/b.json")]
        );
        assert!(src.read(Path::new("/m/x.json")).is_err());
    }
}
