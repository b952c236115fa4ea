//! Page table views over physical frames.
//!
//! A page table occupies exactly one physical frame holding `ENTRY_COUNT` little-endian
//! 64-bit entries. These views read and write entries in place, so a table is addressed
//! purely by the physical address of its frame.

use super::{ENTRY_COUNT, PAGE_SIZE, entry::PageEntry};

const ENTRY_SIZE: usize = core::mem::size_of::<u64>();

fn read_entry(frame: &[u8; PAGE_SIZE], index: usize) -> PageEntry {
    assert!(index < ENTRY_COUNT, "page table index out of bounds");
    let offset = index * ENTRY_SIZE;
    let mut raw = [0u8; ENTRY_SIZE];
    raw.copy_from_slice(&frame[offset..offset + ENTRY_SIZE]);
    PageEntry::from(u64::from_le_bytes(raw))
}

/// A read-only view of a page table stored in a physical frame.
#[derive(Clone, Copy)]
pub struct PageTable<'a> {
    frame: &'a [u8; PAGE_SIZE],
}

impl<'a> PageTable<'a> {
    /// Interprets `frame` as a page table.
    pub fn new(frame: &'a [u8; PAGE_SIZE]) -> Self {
        Self { frame }
    }

    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry(&self, index: usize) -> PageEntry {
        read_entry(self.frame, index)
    }

    /// Iterates over `(index, entry)` pairs for every present entry.
    pub fn present_entries(self) -> impl Iterator<Item = (usize, PageEntry)> + 'a {
        (0..ENTRY_COUNT)
            .map(move |index| (index, read_entry(self.frame, index)))
            .filter(|(_, entry)| entry.is_present())
    }
}

/// A mutable view of a page table stored in a physical frame.
pub struct PageTableMut<'a> {
    frame: &'a mut [u8; PAGE_SIZE],
}

impl<'a> PageTableMut<'a> {
    /// Interprets `frame` as a page table.
    pub fn new(frame: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { frame }
    }

    /// Returns the entry at the given index.
    pub fn entry(&self, index: usize) -> PageEntry {
        read_entry(self.frame, index)
    }

    /// Overwrites the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn set_entry(&mut self, index: usize, entry: PageEntry) {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        let offset = index * ENTRY_SIZE;
        self.frame[offset..offset + ENTRY_SIZE].copy_from_slice(&entry.as_u64().to_le_bytes());
    }
}
