//! Machine and kernel configuration.

use core::ops::Range;

use pmm::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

use crate::BootError;

/// Describes the emulated machine and the kernel's layout within it.
///
/// The defaults match a small PC: 2 MiB of physical memory, the kernel image at
/// `0x40000`, the kernel stack just below `0x80000`, the legacy I/O hole from `0xA0000`
/// to `0x100000` with the text console at `0xB8000`, and a 3 MiB virtual address
/// space per process whose growable part starts at `0x100000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Bytes of physical memory.
    pub physical_memory_size: usize,
    /// Bytes of virtual address space available to each process.
    pub virtual_memory_size: usize,
    /// Lowest address user code may load at or grow into.
    pub user_start: VirtualAddress,
    /// Physical address of the console device page.
    pub console_address: PhysicalAddress,
    /// Frames occupied by the kernel image.
    pub kernel_image: Range<PhysicalAddress>,
    /// Frames occupied by the kernel stack.
    pub kernel_stack: Range<PhysicalAddress>,
    /// Device memory that is never allocatable.
    pub io_hole: Range<PhysicalAddress>,
    /// Number of process table slots, including the unused slot 0.
    pub process_count: usize,
    /// Timer interrupt frequency.
    pub timer_hz: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            physical_memory_size: 0x20_0000,
            virtual_memory_size: 0x30_0000,
            user_start: VirtualAddress::new(0x10_0000),
            console_address: PhysicalAddress::new(0xB_8000),
            kernel_image: PhysicalAddress::new(0x4_0000)..PhysicalAddress::new(0x6_0000),
            kernel_stack: PhysicalAddress::new(0x7_F000)..PhysicalAddress::new(0x8_0000),
            io_hole: PhysicalAddress::new(0xA_0000)..PhysicalAddress::new(0x10_0000),
            process_count: 16,
            timer_hz: 100,
        }
    }
}

impl KernelConfig {
    /// Sets the amount of physical memory.
    pub fn with_physical_memory_size(mut self, size: usize) -> Self {
        self.physical_memory_size = size;
        self
    }

    /// Sets the size of every process's virtual address space.
    pub fn with_virtual_memory_size(mut self, size: usize) -> Self {
        self.virtual_memory_size = size;
        self
    }

    /// Sets the number of process table slots.
    pub fn with_process_count(mut self, count: usize) -> Self {
        self.process_count = count;
        self
    }

    /// Sets the timer interrupt frequency.
    pub fn with_timer_hz(mut self, hz: u32) -> Self {
        self.timer_hz = hz;
        self
    }

    /// First address past the end of every process's address space.
    pub fn virtual_ceiling(&self) -> VirtualAddress {
        VirtualAddress::new(self.virtual_memory_size)
    }

    /// Address of the page every process gets as its stack.
    pub fn stack_page(&self) -> VirtualAddress {
        VirtualAddress::new(self.virtual_memory_size - PAGE_SIZE)
    }

    /// Checks that the configuration describes a machine the kernel can run on.
    pub fn validate(&self) -> Result<(), BootError> {
        let aligned = |value: usize| value % PAGE_SIZE == 0;
        let ranges = [&self.kernel_image, &self.kernel_stack, &self.io_hole];

        if !aligned(self.physical_memory_size) || !aligned(self.virtual_memory_size) {
            return Err(BootError::InvalidConfig("memory sizes must be page-aligned"));
        }
        if !self.user_start.is_page_aligned() {
            return Err(BootError::InvalidConfig("user start must be page-aligned"));
        }
        if self.physical_memory_size <= self.user_start.as_usize() {
            return Err(BootError::InvalidConfig(
                "physical memory must extend past the user start",
            ));
        }
        if self.virtual_memory_size < self.user_start.as_usize() + 2 * PAGE_SIZE {
            return Err(BootError::InvalidConfig(
                "virtual memory must hold at least one heap page and the stack",
            ));
        }
        if ranges.iter().any(|range| {
            !range.start.is_page_aligned()
                || !range.end.is_page_aligned()
                || range.start > range.end
                || range.end.as_usize() > self.user_start.as_usize()
        }) {
            return Err(BootError::InvalidConfig(
                "reserved regions must be page-aligned and below the user start",
            ));
        }
        if !self.console_address.is_page_aligned() || !self.io_hole.contains(&self.console_address)
        {
            return Err(BootError::InvalidConfig(
                "console must be a page inside the I/O hole",
            ));
        }
        if self.process_count < 2 {
            return Err(BootError::InvalidConfig(
                "process table needs at least one usable slot",
            ));
        }
        if self.timer_hz == 0 {
            return Err(BootError::InvalidConfig("timer frequency must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = KernelConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.stack_page(), VirtualAddress::new(0x2F_F000));
        assert_eq!(config.virtual_ceiling(), VirtualAddress::new(0x30_0000));
    }

    #[test]
    fn rejects_unaligned_memory() {
        let config = KernelConfig::default().with_physical_memory_size(0x20_0001);
        assert!(matches!(config.validate(), Err(BootError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_console_outside_io_hole() {
        let config = KernelConfig {
            console_address: PhysicalAddress::new(0x3_0000),
            ..KernelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn layout_follows_virtual_memory_size() {
        let config = KernelConfig::default().with_virtual_memory_size(0x18_0000);
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.virtual_ceiling(), VirtualAddress::new(0x18_0000));
        assert_eq!(config.stack_page(), VirtualAddress::new(0x17_F000));

        let cramped = KernelConfig::default().with_virtual_memory_size(0x10_1000);
        assert!(cramped.validate().is_err());
    }

    #[test]
    fn rejects_stopped_timer() {
        assert_eq!(KernelConfig::default().with_timer_hz(1000).validate(), Ok(()));
        assert!(KernelConfig::default().with_timer_hz(0).validate().is_err());
    }

    #[test]
    fn rejects_tiny_process_table() {
        let config = KernelConfig::default().with_process_count(1);
        assert!(config.validate().is_err());
    }
}
