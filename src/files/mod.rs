//! File service.
//!
//! Wraps a [`Volume`] with the controller-level rules: a two-slot handle pool, one file
//! designated for writing (the recording target) and one for reading, a directory
//! cursor for `fd` and the mount state that gates most file commands.
//!
//! Every operation returns a [`FileResult`]; the dispatcher sends its code verbatim.

pub mod handles;
pub mod status;
pub mod volume;

pub use handles::{FileHandle, HandlePool, MAX_OPEN_FILES, NO_HANDLE};
pub use status::{status_code, FileResult, FileStatus};
pub use volume::{DirEntry, EntryKind, HostVolume, OpenFile, OpenMode, Volume};

use tracing::{debug, info, warn};

/// A file designated as the write or read target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Designation {
    /// Handle the file is open on.
    pub handle: FileHandle,
    /// Name given to the open command.
    pub name: String,
}

/// Result of one `fd` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirStep {
    Entry(DirEntry),
    End,
}

struct DirCursor {
    entries: Vec<DirEntry>,
    next: usize,
}

/// Controller-level file management.
pub struct FileService {
    volume: Box<dyn Volume>,
    pool: HandlePool<Box<dyn OpenFile>>,
    write: Option<Designation>,
    read: Option<Designation>,
    dir: Option<DirCursor>,
    usable: bool,
}

impl FileService {
    /// Wrap `volume` and try to mount it.
    pub fn new(volume: Box<dyn Volume>) -> Self {
        let mut service = Self {
            volume,
            pool: HandlePool::new(),
            write: None,
            read: None,
            dir: None,
            usable: false,
        };
        if let Err(status) = service.mount() {
            warn!(%status, code = status.code(), "volume not mounted at boot");
        }
        service
    }

    /// Whether the volume is mounted.
    pub fn is_usable(&self) -> bool {
        self.usable
    }

    /// File currently open for writing, if any.
    pub fn write_designation(&self) -> Option<&Designation> {
        self.write.as_ref()
    }

    /// File currently open for reading, if any.
    pub fn read_designation(&self) -> Option<&Designation> {
        self.read.as_ref()
    }

    /// Wire value of the write handle.
    pub fn write_handle_wire(&self) -> u8 {
        self.write.as_ref().map_or(NO_HANDLE, |d| d.handle.wire())
    }

    /// Wire value of the read handle.
    pub fn read_handle_wire(&self) -> u8 {
        self.read.as_ref().map_or(NO_HANDLE, |d| d.handle.wire())
    }

    fn reset_state(&mut self) {
        let closed = self.pool.clear();
        if !closed.is_empty() {
            debug!(count = closed.len(), "open files discarded");
        }
        self.write = None;
        self.read = None;
        self.dir = None;
    }

    /// (Re)mount the volume. Every open file is closed first.
    pub fn mount(&mut self) -> FileResult<()> {
        self.reset_state();
        let result = self.volume.mount();
        self.usable = result.is_ok();
        if self.usable {
            info!("file system mounted");
        }
        result
    }

    /// Create a fresh file system and mount it.
    pub fn make_filesystem(&mut self) -> FileResult<()> {
        self.reset_state();
        self.usable = false;
        self.volume.format()?;
        self.mount()
    }

    /// Free and total clusters on the volume.
    pub fn free_clusters(&self) -> FileResult<(u32, u32)> {
        self.volume.free_space()
    }

    /// Open `name` for appending and designate it as the write file.
    pub fn open_write(&mut self, name: &str) -> FileResult<FileHandle> {
        if self.write.is_some() {
            return Err(FileStatus::Denied);
        }
        let handle = self.open_into_pool(name, OpenMode::Append)?;
        self.write = Some(Designation {
            handle,
            name: name.to_string(),
        });
        info!(name, handle = handle.wire(), "write file opened");
        Ok(handle)
    }

    /// Open `name` read-only and designate it as the read file.
    pub fn open_read(&mut self, name: &str) -> FileResult<FileHandle> {
        if self.read.is_some() {
            return Err(FileStatus::Denied);
        }
        let handle = self.open_into_pool(name, OpenMode::ReadOnly)?;
        self.read = Some(Designation {
            handle,
            name: name.to_string(),
        });
        info!(name, handle = handle.wire(), "read file opened");
        Ok(handle)
    }

    fn open_into_pool(&mut self, name: &str, mode: OpenMode) -> FileResult<FileHandle> {
        if self.pool.open_count() >= MAX_OPEN_FILES {
            return Err(FileStatus::TooManyOpenFiles);
        }
        let file = self.volume.open(name, mode)?;
        self.pool.insert(file)
    }

    /// Whether `wire` names an open file.
    pub fn is_valid_handle(&self, wire: u8) -> bool {
        self.pool.resolve(wire).is_some()
    }

    /// Read the next line from the open file `wire`.
    pub fn read_line(&mut self, wire: u8) -> FileResult<String> {
        let handle = self.pool.resolve(wire).ok_or(FileStatus::InvalidObject)?;
        self.pool.get_mut(handle)?.read_line()
    }

    /// Close the open file `wire`, clearing any designation that pointed at it.
    ///
    /// Returns whether the write file was closed.
    pub fn close(&mut self, wire: u8) -> FileResult<bool> {
        let handle = self.pool.resolve(wire).ok_or(FileStatus::InvalidObject)?;
        self.pool.remove(handle)?;
        let mut closed_write = false;
        if self.write.as_ref().is_some_and(|d| d.handle == handle) {
            self.write = None;
            closed_write = true;
        }
        if self.read.as_ref().is_some_and(|d| d.handle == handle) {
            self.read = None;
        }
        debug!(handle = wire, closed_write, "file closed");
        Ok(closed_write)
    }

    /// Remove a file from the current directory.
    pub fn delete(&mut self, name: &str) -> FileResult<()> {
        self.volume.remove(name)?;
        info!(name, "file deleted");
        Ok(())
    }

    /// One directory step: a non-empty `name` opens that directory and returns its first
    /// entry, an empty one continues the open listing.
    pub fn read_dir_entry(&mut self, name: &str) -> FileResult<DirStep> {
        let name = name.trim();
        if !name.is_empty() {
            self.dir = None;
            let entries = self.volume.list_dir(name)?;
            self.dir = Some(DirCursor { entries, next: 0 });
        }
        let cursor = self.dir.as_mut().ok_or(FileStatus::InvalidObject)?;
        match cursor.entries.get(cursor.next) {
            Some(entry) => {
                cursor.next += 1;
                Ok(DirStep::Entry(entry.clone()))
            }
            None => Ok(DirStep::End),
        }
    }

    /// Append one record line to the write file, if one is designated.
    pub fn record_line(&mut self, line: &str) -> FileResult<()> {
        let Some(handle) = self.write.as_ref().map(|d| d.handle) else {
            return Err(FileStatus::InvalidObject);
        };
        self.pool.get_mut(handle)?.append(line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (tempfile::TempDir, FileService) {
        let dir = tempfile::tempdir().unwrap();
        let mut vol = HostVolume::new(dir.path().join("sd"), 8 << 20, 8);
        vol.format().unwrap();
        (dir, FileService::new(Box::new(vol)))
    }

    #[test]
    fn boots_mounted_when_volume_present() {
        let (_dir, files) = service();
        assert!(files.is_usable());
        assert_eq!(files.write_handle_wire(), NO_HANDLE);
    }

    #[test]
    fn unformatted_volume_is_not_usable() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileService::new(Box::new(HostVolume::new(dir.path().join("x"), 1 << 20, 1)));
        assert!(!files.is_usable());
    }

    #[test]
    fn second_write_open_is_denied() {
        let (_dir, mut files) = service();
        let h = files.open_write("a.txt").unwrap();
        assert_eq!(h.wire(), 0);
        assert_eq!(files.open_write("b.txt"), Err(FileStatus::Denied));
    }

    #[test]
    fn read_file_can_be_reopened_after_close() {
        let (_dir, mut files) = service();
        files.open_write("a.txt").unwrap();
        files.record_line("x\r\n").unwrap();
        files.open_read("a.txt").unwrap();
        files.close(1).unwrap();
        assert_eq!(files.read_designation(), None);
        files.open_read("a.txt").unwrap();
        assert_eq!(files.read_line(1).unwrap(), "x");
    }

    #[test]
    fn closing_write_file_clears_designation() {
        let (_dir, mut files) = service();
        let h = files.open_write("log.txt").unwrap();
        assert_eq!(files.close(h.wire()), Ok(true));
        assert_eq!(files.write_designation(), None);
        assert_eq!(files.close(h.wire()), Err(FileStatus::InvalidObject));
        assert_eq!(files.record_line("x"), Err(FileStatus::InvalidObject));
    }

    #[test]
    fn directory_cursor_walks_entries() {
        let (_dir, mut files) = service();
        files.open_write("one.txt").unwrap();
        assert_eq!(files.read_dir_entry(""), Err(FileStatus::InvalidObject));
        match files.read_dir_entry("/").unwrap() {
            DirStep::Entry(e) => assert_eq!(e.name, "one.txt"),
            DirStep::End => panic!("expected an entry"),
        }
        assert_eq!(files.read_dir_entry("").unwrap(), DirStep::End);
    }

    #[test]
    fn remount_closes_everything() {
        let (_dir, mut files) = service();
        files.open_write("a.txt").unwrap();
        files.mount().unwrap();
        assert_eq!(files.write_designation(), None);
        assert!(!files.is_valid_handle(0));
    }

    #[test]
    fn make_filesystem_wipes_files() {
        let (_dir, mut files) = service();
        files.open_write("a.txt").unwrap();
        files.make_filesystem().unwrap();
        assert!(files.is_usable());
        assert_eq!(files.read_dir_entry("/").unwrap(), DirStep::End);
    }
}
