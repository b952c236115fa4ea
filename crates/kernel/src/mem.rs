//! Physical memory layout and allocator bring-up.

use alloc::vec::Vec;

use pmm::{BootMemoryRegion, MemoryMap, PAGE_SIZE, PhysicalAddress, PhysicalMemoryManager};

use crate::KernelConfig;

/// Classification of a physical address under a given configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryArea {
    /// The first page, kept unmapped so null dereferences fault.
    Null,
    /// The kernel's code and data.
    KernelImage,
    /// The kernel's stack page.
    KernelStack,
    /// The text console device page.
    Console,
    /// Device memory other than the console.
    IoHole,
    /// Memory the allocator may hand out.
    Available,
}

impl MemoryArea {
    /// Returns the area containing `address`.
    pub fn containing(config: &KernelConfig, address: PhysicalAddress) -> Self {
        let page = address.align_down(PAGE_SIZE);
        if page == PhysicalAddress::ZERO {
            MemoryArea::Null
        } else if page == config.console_address {
            MemoryArea::Console
        } else if config.io_hole.contains(&page) {
            MemoryArea::IoHole
        } else if config.kernel_image.contains(&page) {
            MemoryArea::KernelImage
        } else if config.kernel_stack.contains(&page) {
            MemoryArea::KernelStack
        } else {
            MemoryArea::Available
        }
    }

    /// Returns true if frames in this area are never allocated.
    pub fn is_reserved(self) -> bool {
        self != MemoryArea::Available
    }

    pub fn name(self) -> &'static str {
        match self {
            MemoryArea::Null => "NULL",
            MemoryArea::KernelImage => "KERNEL_IMAGE",
            MemoryArea::KernelStack => "KERNEL_STACK",
            MemoryArea::Console => "CONSOLE",
            MemoryArea::IoHole => "IO_HOLE",
            MemoryArea::Available => "AVAILABLE",
        }
    }
}

/// One entry of the boot memory map derived from a [`KernelConfig`].
#[derive(Debug, Clone, Copy)]
pub struct BootRegion {
    base: PhysicalAddress,
    size: usize,
    area: MemoryArea,
}

impl BootMemoryRegion for BootRegion {
    fn base(&self) -> PhysicalAddress {
        self.base
    }

    fn size(&self) -> usize {
        self.size
    }

    fn is_usable(&self) -> bool {
        !self.area.is_reserved()
    }
}

/// Builds the boot memory map: all of physical memory usable, minus the reserved areas.
pub fn boot_regions(config: &KernelConfig) -> Vec<BootRegion> {
    let mut regions = Vec::new();
    regions.push(BootRegion {
        base: PhysicalAddress::ZERO,
        size: config.physical_memory_size,
        area: MemoryArea::Available,
    });
    regions.push(BootRegion {
        base: PhysicalAddress::ZERO,
        size: PAGE_SIZE,
        area: MemoryArea::Null,
    });

    for (range, area) in [
        (&config.kernel_image, MemoryArea::KernelImage),
        (&config.kernel_stack, MemoryArea::KernelStack),
        (&config.io_hole, MemoryArea::IoHole),
    ] {
        regions.push(BootRegion {
            base: range.start,
            size: range.end - range.start,
            area,
        });
    }
    regions
}

/// Initializes the physical memory manager for the configured machine.
pub fn init_pmm(config: &KernelConfig) -> PhysicalMemoryManager {
    let regions = boot_regions(config);
    for region in &regions {
        log::debug!(
            "memory region {:#010x}-{:#010x} {}",
            region.base.as_usize(),
            region.base.as_usize() + region.size,
            region.area.name()
        );
    }

    let pmm = PhysicalMemoryManager::new(MemoryMap::from_boot_map(&regions));
    log::info!(
        "physical memory: {} KiB, {} allocatable pages",
        pmm.memory_size() / 1024,
        pmm.total_frames()
    );
    pmm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_default_layout() {
        let config = KernelConfig::default();
        let area = |addr| MemoryArea::containing(&config, PhysicalAddress::new(addr));
        assert_eq!(area(0x0), MemoryArea::Null);
        assert_eq!(area(0x1000), MemoryArea::Available);
        assert_eq!(area(0x4_0000), MemoryArea::KernelImage);
        assert_eq!(area(0x7_F123), MemoryArea::KernelStack);
        assert_eq!(area(0xB_8000), MemoryArea::Console);
        assert_eq!(area(0xC_0000), MemoryArea::IoHole);
        assert_eq!(area(0x10_0000), MemoryArea::Available);
    }

    #[test]
    fn allocator_skips_reserved_frames() {
        let config = KernelConfig::default();
        let pmm = init_pmm(&config);
        // 512 frames less the null page, 32 image frames, 1 stack frame and 96 hole frames.
        assert_eq!(pmm.total_frames(), 382);
        assert!(!pmm.is_allocatable(config.console_address));
        assert!(!pmm.is_allocatable(PhysicalAddress::new(0x4_1000)));
        assert!(pmm.is_allocatable(PhysicalAddress::new(0x8_0000)));
    }
}
