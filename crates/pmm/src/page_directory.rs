//! Multi-level page tables stored in physical memory.
//!
//! This module provides the `PageDirectory` type, which owns the root frame of a four-level
//! x86_64 page table. Every table node, root included, is a frame handed out by the
//! [`PhysicalMemoryManager`], and the tree is walked by physical address, so the directory
//! itself is just a handle. Operations take the memory manager explicitly.

use alloc::vec::Vec;
use core::ops::Range;

use crate::{
    AllocError, PhysicalAddress, PhysicalMemoryManager, VirtualAddress,
    arch::{self, PageEntry, PageFlags, PageTable, PageTableMut},
};

/// A single present leaf mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// Page-aligned virtual address of the mapping.
    pub virt: VirtualAddress,
    /// Frame the page is backed by.
    pub phys: PhysicalAddress,
    /// Permissions stored in the leaf entry.
    pub flags: PageFlags,
}

/// Handle to a page table tree rooted at a physical frame.
///
/// The directory owns one reference to each of its table nodes. Leaf frames are not owned
/// by the directory; callers decide which mappings hold references and release them
/// explicitly, except in [`PageDirectory::destroy`].
#[derive(Debug, PartialEq, Eq)]
pub struct PageDirectory {
    root: PhysicalAddress,
}

impl PageDirectory {
    /// Creates an empty page directory with a freshly zeroed root table.
    pub fn new(pmm: &mut PhysicalMemoryManager) -> Result<Self, AllocError> {
        let root = pmm.allocate()?;
        pmm.zero_page(root);
        Ok(Self { root })
    }

    /// Returns the physical address of the root table.
    pub fn root(&self) -> PhysicalAddress {
        self.root
    }

    /// Maps the page containing `virt` to the frame at `phys`.
    ///
    /// Any existing mapping for the page is replaced. Missing intermediate tables are
    /// allocated up front, so on failure nothing in the directory has changed.
    ///
    /// # Panics
    ///
    /// Panics if `phys` is not page-aligned or if `flags` is both writable and
    /// copy-on-write.
    pub fn map(
        &mut self,
        pmm: &mut PhysicalMemoryManager,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), AllocError> {
        assert!(phys.is_page_aligned(), "physical address must be page-aligned");
        assert_cow_not_writable(flags);

        let virt = virt.align_down(arch::PAGE_SIZE);
        let mut flags = flags;
        flags.set_present(true);

        let missing = self.missing_tables(pmm, virt);
        let mut fresh = [None; arch::PAGE_TABLE_LEVELS - 1];
        for i in 0..missing {
            match pmm.allocate() {
                Ok(node) => {
                    pmm.zero_page(node);
                    fresh[i] = Some(node);
                }
                Err(error) => {
                    for node in fresh[..i].iter().flatten() {
                        pmm.release(*node);
                    }
                    log::debug!("map {virt} failed: no frame for page table node");
                    return Err(error);
                }
            }
        }

        let mut fresh = fresh.into_iter().flatten();
        let mut node = self.root;
        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            let index = virt.table_index(level);
            let existing = PageTable::new(pmm.page(node)).entry(index).address();
            node = match existing {
                Some(next) => next,
                None => {
                    let next = fresh
                        .next()
                        .expect("page table node allocated for every missing level");
                    PageTableMut::new(pmm.page_mut(node))
                        .set_entry(index, PageEntry::new(next, PageFlags::user_read_write()));
                    next
                }
            };
        }

        PageTableMut::new(pmm.page_mut(node))
            .set_entry(virt.table_index(0), PageEntry::new(phys, flags));
        Ok(())
    }

    /// Rewrites the permissions of an existing mapping in place.
    ///
    /// Returns `false` if the page containing `virt` is not mapped.
    pub fn protect(
        &mut self,
        pmm: &mut PhysicalMemoryManager,
        virt: VirtualAddress,
        flags: PageFlags,
    ) -> bool {
        assert_cow_not_writable(flags);

        let Some(leaf) = self.leaf_table(pmm, virt) else {
            return false;
        };
        let index = virt.table_index(0);
        let mut table = PageTableMut::new(pmm.page_mut(leaf));
        let mut entry = table.entry(index);
        if !entry.is_present() {
            return false;
        }

        let mut flags = flags;
        flags.set_present(true);
        entry.set_flags(flags);
        table.set_entry(index, entry);
        true
    }

    /// Returns the mapping for the page containing `virt`, if any.
    pub fn lookup(&self, pmm: &PhysicalMemoryManager, virt: VirtualAddress) -> Option<Mapping> {
        let leaf = self.leaf_table(pmm, virt)?;
        let entry = PageTable::new(pmm.page(leaf)).entry(virt.table_index(0));
        Some(Mapping {
            virt: virt.align_down(arch::PAGE_SIZE),
            phys: entry.address()?,
            flags: entry.flags(),
        })
    }

    /// Removes the mapping for the page containing `virt` and returns it.
    ///
    /// The backing frame is not released.
    pub fn unmap(
        &mut self,
        pmm: &mut PhysicalMemoryManager,
        virt: VirtualAddress,
    ) -> Option<Mapping> {
        let mapping = self.lookup(pmm, virt)?;
        let leaf = self.leaf_table(pmm, virt)?;
        PageTableMut::new(pmm.page_mut(leaf)).set_entry(virt.table_index(0), PageEntry::default());
        Some(mapping)
    }

    /// Returns the first present mapping at or after `from` and below `end`.
    ///
    /// Absent subtrees are skipped whole. Calling this again with the returned address
    /// plus one page continues the traversal, so callers may change the directory
    /// between steps.
    pub fn next_mapping(
        &self,
        pmm: &PhysicalMemoryManager,
        from: VirtualAddress,
        end: VirtualAddress,
    ) -> Option<Mapping> {
        let end = end.as_usize().min(arch::USER_SPACE_END);
        let mut va = from.align_down(arch::PAGE_SIZE).as_usize();

        'search: while va < end {
            let mut node = self.root;
            for level in (0..arch::PAGE_TABLE_LEVELS).rev() {
                let entry = PageTable::new(pmm.page(node)).entry(arch::page_index(va, level));
                match entry.address() {
                    None => {
                        let span = arch::level_span(level);
                        va = (va & !(span - 1)).checked_add(span)?;
                        continue 'search;
                    }
                    Some(next) if level > 0 => node = next,
                    Some(phys) => {
                        return Some(Mapping {
                            virt: VirtualAddress::new(va),
                            phys,
                            flags: entry.flags(),
                        });
                    }
                }
            }
        }
        None
    }

    /// Iterates over the present mappings in `range` in increasing address order.
    pub fn mappings<'a>(
        &'a self,
        pmm: &'a PhysicalMemoryManager,
        range: Range<VirtualAddress>,
    ) -> Mappings<'a> {
        Mappings {
            directory: self,
            pmm,
            next: (range.start < range.end).then_some(range.start),
            end: range.end,
        }
    }

    /// Iterates over the present, user-accessible mappings in `range`.
    pub fn user_mappings<'a>(
        &'a self,
        pmm: &'a PhysicalMemoryManager,
        range: Range<VirtualAddress>,
    ) -> impl Iterator<Item = Mapping> + 'a {
        self.mappings(pmm, range).filter(|m| m.flags.is_user())
    }

    /// Calls `f` with the physical address of every table node below the root.
    pub fn for_each_table_node(
        &self,
        pmm: &PhysicalMemoryManager,
        mut f: impl FnMut(PhysicalAddress),
    ) {
        walk_entries(pmm, self.root, arch::PAGE_TABLE_LEVELS - 1, &mut |level, entry| {
            if level > 0 {
                if let Some(node) = entry.address() {
                    f(node);
                }
            }
        });
    }

    /// Tears down the directory and releases its frames.
    ///
    /// Every frame reached through a user-accessible leaf is released once, except frames
    /// the memory manager does not hand out, such as device memory. Then every table node
    /// and finally the root are released.
    pub fn destroy(self, pmm: &mut PhysicalMemoryManager) {
        let mut pages = Vec::new();
        let mut nodes = Vec::new();
        walk_entries(pmm, self.root, arch::PAGE_TABLE_LEVELS - 1, &mut |level, entry| {
            let Some(phys) = entry.address() else {
                return;
            };
            if level > 0 {
                nodes.push(phys);
            } else if entry.flags().is_user() && pmm.is_allocatable(phys) {
                pages.push(phys);
            }
        });

        log::trace!(
            "destroying page directory {}: {} pages, {} table nodes",
            self.root,
            pages.len(),
            nodes.len()
        );
        for phys in pages.into_iter().chain(nodes) {
            pmm.release(phys);
        }
        pmm.release(self.root);
    }

    /// Returns the number of tables that must be created to map `virt`.
    fn missing_tables(&self, pmm: &PhysicalMemoryManager, virt: VirtualAddress) -> usize {
        let mut node = self.root;
        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            match PageTable::new(pmm.page(node)).entry(virt.table_index(level)).address() {
                Some(next) => node = next,
                None => return level,
            }
        }
        0
    }

    /// Returns the last-level table covering `virt`, if all tables on the way exist.
    fn leaf_table(
        &self,
        pmm: &PhysicalMemoryManager,
        virt: VirtualAddress,
    ) -> Option<PhysicalAddress> {
        let mut node = self.root;
        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            node = PageTable::new(pmm.page(node))
                .entry(virt.table_index(level))
                .address()?;
        }
        Some(node)
    }
}

fn assert_cow_not_writable(flags: PageFlags) {
    assert!(
        !(flags.is_writable() && flags.is_copy_on_write()),
        "copy-on-write mapping must not be writable: {flags:?}"
    );
}

/// Visits every present entry below `node`, which sits at `level`, depth first.
fn walk_entries<F>(pmm: &PhysicalMemoryManager, node: PhysicalAddress, level: usize, f: &mut F)
where
    F: FnMut(usize, PageEntry),
{
    for (_, entry) in PageTable::new(pmm.page(node)).present_entries() {
        f(level, entry);
        if level > 0 {
            if let Some(child) = entry.address() {
                walk_entries(pmm, child, level - 1, f);
            }
        }
    }
}

/// Iterator over the present mappings of a [`PageDirectory`].
pub struct Mappings<'a> {
    directory: &'a PageDirectory,
    pmm: &'a PhysicalMemoryManager,
    next: Option<VirtualAddress>,
    end: VirtualAddress,
}

impl Iterator for Mappings<'_> {
    type Item = Mapping;

    fn next(&mut self) -> Option<Mapping> {
        let from = self.next.take()?;
        let mapping = self.directory.next_mapping(self.pmm, from, self.end)?;
        let after = mapping.virt.as_usize() + arch::PAGE_SIZE;
        if after < self.end.as_usize() {
            self.next = Some(VirtualAddress::new(after));
        }
        Some(mapping)
    }
}
