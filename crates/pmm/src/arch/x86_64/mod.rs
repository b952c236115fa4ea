//! x86_64 page table layout.
//!
//! This module provides address validation, page table geometry, and the low-level
//! entry, flag, and table-view primitives used by the page directory.

mod entry;
mod flags;
mod table;

pub use entry::PageEntry;
pub use flags::PageFlags;
pub use table::{PageTable, PageTableMut};

/// Maximum number of bits in a physical address on x86_64.
/// This is typically 52 bits on modern CPUs, but we use 48 as a conservative default.
pub const MAX_PHYSICAL_BITS: usize = 48;

/// Maximum number of bits in a virtual address on x86_64 with 4-level paging.
pub const MAX_VIRTUAL_BITS: usize = 48;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of page table levels in x86_64 (4-level paging).
pub const PAGE_TABLE_LEVELS: usize = 4;

/// Number of entries in a single page table.
pub const ENTRY_COUNT: usize = 512;

/// First address past the canonical lower half, where user space ends.
pub const USER_SPACE_END: usize = 1 << (MAX_VIRTUAL_BITS - 1);

/// Returns the page table index for a given virtual address at the specified level.
///
/// Each level uses 9 bits, with level 0 being the page table (PT), level 1 the page
/// directory (PD), level 2 the page directory pointer table (PDPT), and level 3 the
/// page map level 4 (PML4).
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    assert!(
        level < PAGE_TABLE_LEVELS,
        "level out of range for x86_64 page table levels"
    );
    let shift = 12 + (level * 9);
    (address >> shift) & (ENTRY_COUNT - 1)
}

/// Returns the number of bytes of virtual address space covered by one entry at `level`.
#[inline]
pub const fn level_span(level: usize) -> usize {
    PAGE_SIZE << (9 * level)
}

/// Validates a physical address for x86_64.
///
/// Physical addresses must not exceed the maximum physical address width.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    let max_addr = (1usize << MAX_PHYSICAL_BITS) - 1;
    addr <= max_addr
}

/// Validates a virtual address for x86_64.
///
/// Virtual addresses must be canonical (bits 47-63 must be sign-extended from bit 47).
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    canonicalize_virtual(addr) == addr
}

/// Canonicalizes a virtual address for x86_64.
///
/// This sign-extends bit 47 to bits 48-63.
#[inline]
pub const fn canonicalize_virtual(addr: usize) -> usize {
    if (addr & (1 << 47)) != 0 {
        addr | 0xFFFF_0000_0000_0000
    } else {
        addr & 0x0000_FFFF_FFFF_FFFF
    }
}
