//! Fixed pool of open-file slots.
//!
//! Slots carry a generation that changes every time they are freed, so a stored
//! [`FileHandle`] from an earlier open never resolves to a later file in the same slot.
//! On the wire only the slot index is sent, with [`NO_HANDLE`] meaning none.

use super::status::{FileResult, FileStatus};

/// Number of files that can be open at once.
pub const MAX_OPEN_FILES: usize = 2;

/// Wire value for "no handle".
pub const NO_HANDLE: u8 = 0xFF;

/// Slot index plus generation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle {
    index: u8,
    generation: u32,
}

impl FileHandle {
    /// Slot index sent on the wire.
    pub fn wire(self) -> u8 {
        self.index
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<T>,
}

/// Arena of `MAX_OPEN_FILES` slots.
#[derive(Debug)]
pub struct HandlePool<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Default for HandlePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandlePool<T> {
    /// Pool with every handle free.
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_OPEN_FILES)
                .map(|_| Slot {
                    generation: 0,
                    entry: None,
                })
                .collect(),
        }
    }

    /// Store `entry` in the lowest free slot.
    pub fn insert(&mut self, entry: T) -> FileResult<FileHandle> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.entry.is_none())
            .ok_or(FileStatus::TooManyOpenFiles)?;
        slot.entry = Some(entry);
        Ok(FileHandle {
            index: index as u8,
            generation: slot.generation,
        })
    }

    /// Current handle of the occupied slot with wire index `wire`.
    pub fn resolve(&self, wire: u8) -> Option<FileHandle> {
        let slot = self.slots.get(usize::from(wire))?;
        slot.entry.as_ref().map(|_| FileHandle {
            index: wire,
            generation: slot.generation,
        })
    }

    /// Borrow the object behind an open handle.
    pub fn get_mut(&mut self, handle: FileHandle) -> FileResult<&mut T> {
        self.slots
            .get_mut(usize::from(handle.index))
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(FileStatus::InvalidObject)
    }

    /// Free the slot, returning its entry.
    pub fn remove(&mut self, handle: FileHandle) -> FileResult<T> {
        let slot = self
            .slots
            .get_mut(usize::from(handle.index))
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(FileStatus::InvalidObject)?;
        let entry = slot.entry.take().ok_or(FileStatus::InvalidObject)?;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(entry)
    }

    /// Free every slot.
    pub fn clear(&mut self) -> Vec<T> {
        let mut entries = Vec::new();
        for slot in &mut self.slots {
            if let Some(entry) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                entries.push(entry);
            }
        }
        entries
    }

    /// Number of handles in use.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }
}
