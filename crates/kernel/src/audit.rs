//! Reference-count census and page-table consistency checks.
//!
//! The census walks every page table the kernel knows about and recounts how many
//! holders each frame has. A frame's stored refcount must equal its holders exactly.

use alloc::{vec, vec::Vec};
use core::fmt;

use pmm::{PhysicalAddress, USER_SPACE_END, VirtualAddress};

use crate::{Kernel, Pid};

/// Top of the canonical lower half, the range every user mapping lives in.
const LOWER_HALF_END: VirtualAddress = VirtualAddress::new(USER_SPACE_END - 1);

/// A frame whose stored refcount disagrees with the census.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditError {
    pub frame: PhysicalAddress,
    /// Holders found by walking the page tables.
    pub expected: u32,
    /// Refcount stored in the frame metadata.
    pub actual: u32,
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {} has refcount {} but {} holders",
            self.frame, self.actual, self.expected
        )
    }
}

impl core::error::Error for AuditError {}

/// Who holds a physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameUsage {
    /// Never handed out by the allocator.
    Reserved,
    Free,
    /// A node of the kernel's own page table.
    Kernel,
    /// Held by a single process only.
    Process(Pid),
    /// Held by more than one address space.
    Shared,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Holder {
    Nobody,
    Kernel,
    Process(Pid),
    Several,
}

struct Census {
    counts: Vec<u32>,
    holders: Vec<Holder>,
}

impl Census {
    fn new(frames: usize) -> Self {
        Self {
            counts: vec![0; frames],
            holders: vec![Holder::Nobody; frames],
        }
    }

    fn add(&mut self, frame: PhysicalAddress, holder: Holder) {
        let index = frame.frame_number().as_usize();
        let (Some(count), Some(current)) = (self.counts.get_mut(index), self.holders.get_mut(index))
        else {
            return;
        };
        *count += 1;
        *current = match *current {
            Holder::Nobody => holder,
            same if same == holder => same,
            _ => Holder::Several,
        };
    }
}

impl Kernel {
    /// Recounts every frame's holders and compares them with the stored refcounts.
    ///
    /// Holders are page-table nodes (roots included) and present user mappings.
    pub fn audit(&self) -> Result<(), AuditError> {
        let census = self.census();
        for (number, frame) in self.pmm.memory_map().iter() {
            if frame.is_reserved() {
                continue;
            }
            let expected = census.counts[number.as_usize()];
            if frame.refcount() != expected {
                return Err(AuditError {
                    frame: number.start(),
                    expected,
                    actual: frame.refcount(),
                });
            }
        }
        Ok(())
    }

    /// Classifies every physical frame, indexed by frame number.
    pub fn frame_usage(&self) -> Vec<FrameUsage> {
        let census = self.census();
        self.pmm
            .memory_map()
            .iter()
            .map(|(number, frame)| {
                if frame.is_reserved() {
                    return FrameUsage::Reserved;
                }
                match census.holders[number.as_usize()] {
                    _ if frame.refcount() == 0 => FrameUsage::Free,
                    Holder::Nobody => FrameUsage::Free,
                    Holder::Kernel => FrameUsage::Kernel,
                    Holder::Process(pid) => FrameUsage::Process(pid),
                    Holder::Several => FrameUsage::Shared,
                }
            })
            .collect()
    }

    /// Number of frames that only `pid` holds, i.e. what its exit would free.
    pub fn frames_held_by(&self, pid: Pid) -> usize {
        self.frame_usage()
            .into_iter()
            .filter(|usage| *usage == FrameUsage::Process(pid))
            .count()
    }

    fn census(&self) -> Census {
        let mut census = Census::new(self.pmm.memory_map().frame_count());

        census.add(self.kernel_directory.root(), Holder::Kernel);
        self.kernel_directory
            .for_each_table_node(&self.pmm, |node| census.add(node, Holder::Kernel));

        for process in self.processes.iter() {
            let Some(directory) = process.directory() else {
                continue;
            };
            let holder = Holder::Process(process.pid());
            census.add(directory.root(), holder);
            directory.for_each_table_node(&self.pmm, |node| census.add(node, holder));
            for mapping in directory.user_mappings(&self.pmm, VirtualAddress::ZERO..LOWER_HALF_END)
            {
                if self.pmm.is_allocatable(mapping.phys) {
                    census.add(mapping.phys, holder);
                }
            }
        }
        census
    }

    /// Checks the page table of `pid` before it runs.
    ///
    /// # Panics
    ///
    /// Panics if a table node is free, if the mappings below the user start differ from
    /// the kernel's, or if a user mapping points at a free frame.
    pub(crate) fn check_directory(&self, pid: Pid) {
        let directory = self
            .processes
            .get(pid)
            .and_then(|process| process.directory())
            .unwrap_or_else(|| panic!("process {pid} has no address space"));
        let pmm = &self.pmm;

        assert!(
            pmm.refcount(directory.root()) > 0,
            "process {pid} page table root {} is free",
            directory.root()
        );
        directory.for_each_table_node(pmm, |node| {
            assert!(
                pmm.is_allocatable(node) && pmm.refcount(node) > 0,
                "process {pid} page table node {node} is not a live frame"
            );
        });

        let low_memory = VirtualAddress::ZERO..self.config.user_start;
        for mapping in self.kernel_directory.mappings(pmm, low_memory.clone()) {
            assert_eq!(
                directory.lookup(pmm, mapping.virt),
                Some(mapping),
                "process {pid} lost kernel mapping at {}",
                mapping.virt
            );
        }
        for mapping in directory.mappings(pmm, low_memory) {
            assert_eq!(
                self.kernel_directory.lookup(pmm, mapping.virt),
                Some(mapping),
                "process {pid} has extra low mapping at {}",
                mapping.virt
            );
        }

        for mapping in directory.user_mappings(pmm, self.config.user_start..LOWER_HALF_END) {
            assert!(
                !pmm.is_allocatable(mapping.phys) || pmm.refcount(mapping.phys) > 0,
                "process {pid} maps free frame {} at {}",
                mapping.phys,
                mapping.virt
            );
        }
    }
}
