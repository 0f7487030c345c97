//! Storage volume contract and the host-directory volume.
//!
//! The firmware needs a small FAT-style surface: mount, format, free space, open for
//! append or read, delete, and directory listing. [`HostVolume`] provides it on top of
//! a directory of the host file system, so recordings land as ordinary files.

use super::status::{FileResult, FileStatus};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Bytes per sector.
pub const SECTOR_SIZE: u64 = 512;

/// Longest line returned by a single line read.
pub const MAX_LINE: usize = 79;

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read/write, created if missing, positioned at the end.
    Append,
    /// Existing file, read only.
    ReadOnly,
}

/// Kind of directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Sub-directory.
    Directory,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name.
    pub name: String,
    /// Size in bytes, zero for directories.
    pub size: u32,
    /// File or directory.
    pub kind: EntryKind,
}

/// An open file.
pub trait OpenFile: Send {
    /// Read the next line without its terminator. An empty string at end of file.
    fn read_line(&mut self) -> FileResult<String>;

    /// Append `data` at the end of the file.
    fn append(&mut self, data: &[u8]) -> FileResult<()>;
}

/// A mountable volume.
pub trait Volume: Send {
    /// Make the volume usable. Fails with `NoFilesystem` on an unformatted card.
    fn mount(&mut self) -> FileResult<()>;

    /// Create an empty file system, discarding all content.
    fn format(&mut self) -> FileResult<()>;

    /// `(free clusters, sectors per cluster)`.
    fn free_space(&self) -> FileResult<(u32, u32)>;

    /// Open a file in the given mode.
    fn open(&mut self, name: &str, mode: OpenMode) -> FileResult<Box<dyn OpenFile>>;

    /// Delete a file or an empty directory.
    fn remove(&mut self, name: &str) -> FileResult<()>;

    /// Entries of a directory, in listing order.
    fn list_dir(&self, name: &str) -> FileResult<Vec<DirEntry>>;
}

// =============================================================================
// HostVolume
// =============================================================================

/// Volume backed by a host directory.
#[derive(Debug, Clone)]
pub struct HostVolume {
    root: PathBuf,
    capacity: u64,
    sectors_per_cluster: u32,
}

impl HostVolume {
    /// Volume rooted at `root` with the given capacity in bytes.
    pub fn new(root: impl Into<PathBuf>, capacity: u64, sectors_per_cluster: u32) -> Self {
        Self {
            root: root.into(),
            capacity,
            sectors_per_cluster: sectors_per_cluster.max(1),
        }
    }

    /// Host directory backing the volume.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a volume path onto the host, refusing anything that leaves the root.
    fn resolve(&self, name: &str) -> FileResult<PathBuf> {
        let relative = Path::new(name.trim().trim_start_matches('/'));
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return Err(FileStatus::InvalidName),
            }
        }
        Ok(path)
    }

    fn used_bytes(dir: &Path) -> std::io::Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            total += if meta.is_dir() {
                Self::used_bytes(&entry.path())?
            } else {
                meta.len()
            };
        }
        Ok(total)
    }
}

impl Volume for HostVolume {
    fn mount(&mut self) -> FileResult<()> {
        if self.root.is_dir() {
            debug!(root = %self.root.display(), "volume mounted");
            Ok(())
        } else {
            Err(FileStatus::NoFilesystem)
        }
    }

    fn format(&mut self) -> FileResult<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|_| FileStatus::MkfsAborted)?;
        }
        fs::create_dir_all(&self.root).map_err(|_| FileStatus::MkfsAborted)?;
        info!(root = %self.root.display(), "volume formatted");
        Ok(())
    }

    fn free_space(&self) -> FileResult<(u32, u32)> {
        if !self.root.is_dir() {
            return Err(FileStatus::NoFilesystem);
        }
        let used = Self::used_bytes(&self.root)?;
        let cluster = u64::from(self.sectors_per_cluster) * SECTOR_SIZE;
        let free = self.capacity.saturating_sub(used) / cluster;
        Ok((u32::try_from(free).unwrap_or(u32::MAX), self.sectors_per_cluster))
    }

    fn open(&mut self, name: &str, mode: OpenMode) -> FileResult<Box<dyn OpenFile>> {
        let path = self.resolve(name)?;
        if path.is_dir() {
            return Err(FileStatus::Denied);
        }
        let file = match mode {
            OpenMode::Append => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?,
            OpenMode::ReadOnly => File::open(&path)?,
        };
        Ok(Box::new(HostFile {
            file,
            read_pos: 0,
            writable: mode == OpenMode::Append,
        }))
    }

    fn remove(&mut self, name: &str) -> FileResult<()> {
        let path = self.resolve(name)?;
        if path == self.root {
            return Err(FileStatus::Denied);
        }
        let meta = fs::metadata(&path)?;
        if meta.is_dir() {
            fs::remove_dir(&path).map_err(|_| FileStatus::Denied)
        } else {
            fs::remove_file(&path).map_err(FileStatus::from)
        }
    }

    fn list_dir(&self, name: &str) -> FileResult<Vec<DirEntry>> {
        let path = self.resolve(name)?;
        let reader = fs::read_dir(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FileStatus::NoPath,
            _ => FileStatus::from(e),
        })?;
        let mut entries = Vec::new();
        for entry in reader {
            let entry = entry?;
            let meta = entry.metadata()?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: u32::try_from(meta.len()).unwrap_or(u32::MAX),
                kind: if meta.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

struct HostFile {
    file: File,
    read_pos: u64,
    writable: bool,
}

impl OpenFile for HostFile {
    fn read_line(&mut self) -> FileResult<String> {
        self.file.seek(SeekFrom::Start(self.read_pos))?;
        let mut line = Vec::with_capacity(MAX_LINE);
        let mut byte = [0u8; 1];
        while line.len() < MAX_LINE {
            if self.file.read(&mut byte)? == 0 {
                break;
            }
            self.read_pos += 1;
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        while line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn append(&mut self, data: &[u8]) -> FileResult<()> {
        if !self.writable {
            return Err(FileStatus::Denied);
        }
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }
}
