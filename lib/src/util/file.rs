use std::{
    collections::HashMap,
    fs::File,
    ops::Deref,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use memmap2::{Mmap, MmapOptions};

/// Opens a memory mapped file.
pub fn map_file<P: AsRef<Path>>(path: P) -> Result<Mmap> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open file '{}'", path.as_ref().display()))?;
    let map = unsafe { MmapOptions::new().map(&file) }
        .with_context(|| format!("Failed to mmap file: '{}'", path.as_ref().display()))?;
    Ok(map)
}

/// A fully buffered input file.
pub enum FileData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for FileData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileData::Mapped(map) => &map[..],
            FileData::Owned(vec) => vec.as_slice(),
        }
    }
}

/// Abstract file access used by importers.
pub trait IoSystem {
    fn exists(&self, path: &Path) -> bool;

    /// Loads the whole file into memory.
    fn read(&self, path: &Path) -> Result<FileData>;
}

/// Reads from the local file system via memory mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultIoSystem;

impl IoSystem for DefaultIoSystem {
    fn exists(&self, path: &Path) -> bool { path.is_file() }

    fn read(&self, path: &Path) -> Result<FileData> {
        // Zero-length files can't be mapped on every platform
        let len = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat file '{}'", path.display()))?
            .len();
        if len == 0 {
            return Ok(FileData::Owned(Vec::new()));
        }
        Ok(FileData::Mapped(map_file(path)?))
    }
}

/// In-memory file table.
#[derive(Debug, Default, Clone)]
pub struct MemoryIoSystem {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemoryIoSystem {
    pub fn new() -> Self { Self::default() }

    pub fn insert<P: Into<PathBuf>>(&mut self, path: P, data: Vec<u8>) {
        self.files.insert(path.into(), data);
    }
}

impl IoSystem for MemoryIoSystem {
    fn exists(&self, path: &Path) -> bool { self.files.contains_key(path) }

    fn read(&self, path: &Path) -> Result<FileData> {
        self.files
            .get(path)
            .map(|data| FileData::Owned(data.clone()))
            .ok_or_else(|| anyhow!("File not found: '{}'", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_io_roundtrip() {
        let mut io = MemoryIoSystem::new();
        io.insert("a.3ds", vec![1, 2, 3]);
        assert!(io.exists(Path::new("a.3ds")));
        assert!(!io.exists(Path::new("b.3ds")));
        assert_eq!(&*io.read(Path::new("a.3ds")).unwrap(), &[1, 2, 3]);
        assert!(io.read(Path::new("b.3ds")).is_err());
    }
}
