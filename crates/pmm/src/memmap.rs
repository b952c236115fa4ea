//! Memory map for tracking physical frame metadata.
//!
//! The memory map holds one [`Frame`] per physical frame from address zero up to the end
//! of the highest region reported at boot. Frames not covered by a usable region are
//! reserved and never handed out.
//!
//! # Building a Memory Map
//!
//! To build a memory map, implement the [`BootMemoryRegion`] trait on your boot-time
//! memory map entry type, then call [`MemoryMap::from_boot_map`]:
//!
//! ```ignore
//! struct MyBootEntry { /* ... */ }
//!
//! impl BootMemoryRegion for MyBootEntry {
//!     fn base(&self) -> PhysicalAddress { /* ... */ }
//!     fn size(&self) -> usize { /* ... */ }
//!     fn is_usable(&self) -> bool { /* ... */ }
//! }
//!
//! let boot_entries: &[MyBootEntry] = /* ... */;
//! let memory_map = MemoryMap::from_boot_map(boot_entries);
//! ```

use alloc::boxed::Box;

use crate::{Frame, FrameFlag, FrameNumber, PhysicalAddress, arch};

/// Represents a single entry in a boot-time memory map.
///
/// Implement this trait on boot-specific memory map entry types
/// to allow pmm to build its internal memory map from the boot map.
pub trait BootMemoryRegion {
    /// Returns the base physical address of this region.
    fn base(&self) -> PhysicalAddress;

    /// Returns the size of this region in bytes.
    fn size(&self) -> usize;

    /// Returns whether this region contains usable memory.
    ///
    /// Usable memory can be freely used by the kernel for allocation.
    /// Non-usable memory (kernel image, device memory, etc.) should
    /// return `false`.
    fn is_usable(&self) -> bool;
}

/// Holds metadata for all physical memory frames.
pub struct MemoryMap {
    frames: Box<[Frame]>,
}

impl MemoryMap {
    /// Constructs a memory map from a boot-time memory map.
    ///
    /// Usable regions are shrunk inward to whole frames. Non-usable regions win over
    /// usable ones where they overlap, regardless of order.
    pub fn from_boot_map<R: BootMemoryRegion>(boot_map: &[R]) -> Self {
        let max_address = boot_map
            .iter()
            .map(|r| r.base().as_usize() + r.size())
            .max()
            .unwrap_or(0);
        let frame_count = max_address.div_ceil(arch::PAGE_SIZE);

        let mut frames: Box<[Frame]> = (0..frame_count).map(|_| Frame::reserved()).collect();

        for region in boot_map.iter().filter(|r| r.is_usable()) {
            let (start, end) = Self::inner_frames(region);
            for frame in &mut frames[start..end] {
                frame.flags.clear(FrameFlag::Reserved);
            }
        }

        for region in boot_map.iter().filter(|r| !r.is_usable()) {
            let start = region.base().as_usize() / arch::PAGE_SIZE;
            let end = (region.base().as_usize() + region.size()).div_ceil(arch::PAGE_SIZE);
            for frame in &mut frames[start..end] {
                frame.flags.set(FrameFlag::Reserved);
            }
        }

        let map = Self { frames };
        log::trace!(
            "built memory map: {} frames, {} allocatable",
            map.frame_count(),
            map.allocatable_frame_count()
        );
        map
    }

    /// Returns the frame indices fully contained in a region, as a half-open range.
    fn inner_frames<R: BootMemoryRegion>(region: &R) -> (usize, usize) {
        let start = region.base().align_up(arch::PAGE_SIZE).as_usize() / arch::PAGE_SIZE;
        let end = (region.base().as_usize() + region.size()) / arch::PAGE_SIZE;
        (start, end.max(start))
    }

    /// Returns a reference to the frame at the given frame number.
    pub fn frame(&self, frame_number: FrameNumber) -> Option<&Frame> {
        self.frames.get(frame_number.as_usize())
    }

    /// Returns a mutable reference to the frame at the given frame number.
    pub fn frame_mut(&mut self, frame_number: FrameNumber) -> Option<&mut Frame> {
        self.frames.get_mut(frame_number.as_usize())
    }

    /// Returns a reference to the frame for the given physical address.
    pub fn frame_for(&self, address: PhysicalAddress) -> Option<&Frame> {
        self.frame(address.frame_number())
    }

    /// Returns a mutable reference to the frame for the given physical address.
    pub fn frame_for_mut(&mut self, address: PhysicalAddress) -> Option<&mut Frame> {
        self.frame_mut(address.frame_number())
    }

    /// Returns the number of frames described by this map, reserved ones included.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of frames that may ever be allocated.
    pub fn allocatable_frame_count(&self) -> usize {
        self.frames.iter().filter(|f| !f.is_reserved()).count()
    }

    /// Iterates over every frame with its frame number.
    pub fn iter(&self) -> impl Iterator<Item = (FrameNumber, &Frame)> {
        self.frames
            .iter()
            .enumerate()
            .map(|(index, frame)| (FrameNumber::new(index), frame))
    }
}
