//! Source location tracking.
//!
//! Positions are file/line/column triples; the [`SourceMap`] records every
//! file opened during a compilation so diagnostics can name them.
//!
//! # Examples
//!
//! ```
//! use cowc_util::span::{FileId, Pos};
//!
//! let pos = Pos::new(FileId(0), 3, 14);
//! assert_eq!(pos.line, 3);
//! ```

use std::path::{Path, PathBuf};

/// A unique identifier for a source file.
///
/// FileIds are assigned sequentially as files are added to the [`SourceMap`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    /// A dummy FileId for testing.
    pub const DUMMY: FileId = FileId(0);

    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A source position: file, line and column (both 1-based).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pos {
    /// File identifier.
    pub file: FileId,
    /// Line number (1-based).
    pub line: u32,
    /// Column number (1-based).
    pub col: u32,
}

impl Pos {
    /// Dummy position for testing.
    pub const DUMMY: Pos = Pos {
        file: FileId::DUMMY,
        line: 0,
        col: 0,
    };

    #[inline]
    pub fn new(file: FileId, line: u32, col: u32) -> Self {
        Self { file, line, col }
    }
}

/// A source file registered with the [`SourceMap`].
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path the file was opened from.
    pub path: PathBuf,
    /// Full file contents.
    pub content: String,
}

/// Registry of all files opened during one compilation.
///
/// Files are added in the order the preprocessor opens them; the returned
/// [`FileId`] is embedded in every position produced from that file.
///
/// # Examples
///
/// ```
/// use cowc_util::span::SourceMap;
///
/// let mut map = SourceMap::new();
/// let id = map.add(std::path::PathBuf::from("main.cow"), "var x: uint8;".into());
/// assert_eq!(map.get(id).unwrap().path.to_str(), Some("main.cow"));
/// ```
#[derive(Debug, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Register a file and return its id.
    pub fn add(&mut self, path: PathBuf, content: String) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files.push(SourceFile { path, content });
        id
    }

    pub fn get(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.index())
    }

    /// Display name for a file id, for use in diagnostics.
    pub fn name(&self, id: FileId) -> &Path {
        self.get(id)
            .map(|f| f.path.as_path())
            .unwrap_or_else(|| Path::new("<unknown>"))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FileId, &SourceFile)> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, f)| (FileId(i as u32), f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pos_new() {
        let pos = Pos::new(FileId(2), 10, 4);
        assert_eq!(pos.file, FileId(2));
        assert_eq!(pos.line, 10);
        assert_eq!(pos.col, 4);
    }

    #[test]
    fn test_source_map_ids_are_sequential() {
        let mut map = SourceMap::new();
        let a = map.add(PathBuf::from("a.cow"), String::new());
        let b = map.add(PathBuf::from("b.coh"), String::new());
        assert_eq!(a, FileId(0));
        assert_eq!(b, FileId(1));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_source_map_name_unknown() {
        let map = SourceMap::new();
        assert_eq!(map.name(FileId(9)), Path::new("<unknown>"));
    }
}
