//! Physical memory manager with per-frame reference counts.
//!
//! This module owns the pool of physical frames and the bytes backing them. Every frame
//! that is not reserved in the [`MemoryMap`] can be handed out one at a time; ownership is
//! tracked by a reference count on the frame's metadata, so a single frame can be shared
//! by several page tables and reclaimed when the last owner lets go.

use alloc::{boxed::Box, vec};
use core::fmt;

use crate::{FrameNumber, MemoryMap, PhysicalAddress, arch};

/// Byte pattern written into every freshly allocated page.
///
/// `0xCC` decodes as `int3` on x86, so jumping into memory nobody initialized traps
/// immediately instead of running garbage.
pub const ALLOCATION_SENTINEL: u8 = 0xCC;

/// Errors that can occur during physical memory allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Every allocatable frame is already in use.
    OutOfMemory,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfMemory => write!(f, "out of physical memory"),
        }
    }
}

impl core::error::Error for AllocError {}

/// Physical memory manager using a next-fit sweep over reference-counted frames.
///
/// The manager owns both the frame metadata (through the memory map) and the emulated
/// contents of physical memory, one `PAGE_SIZE` array per frame. Page tables and user
/// pages alike live in this memory and are addressed by physical address.
pub struct PhysicalMemoryManager {
    memory_map: MemoryMap,
    memory: Box<[[u8; arch::PAGE_SIZE]]>,
    cursor: usize,
    free_frames: usize,
}

impl PhysicalMemoryManager {
    /// Creates a new physical memory manager over every frame described by `memory_map`.
    ///
    /// All allocatable frames start out free and zeroed.
    pub fn new(memory_map: MemoryMap) -> Self {
        let frame_count = memory_map.frame_count();
        let free_frames = memory_map.allocatable_frame_count();
        log::debug!(
            "physical memory: {} frames, {} allocatable",
            frame_count,
            free_frames
        );

        Self {
            memory_map,
            memory: vec![[0u8; arch::PAGE_SIZE]; frame_count].into_boxed_slice(),
            cursor: 0,
            free_frames,
        }
    }

    /// Allocates a single frame.
    ///
    /// The search starts where the previous one stopped and wraps around once. The
    /// returned frame has a reference count of one and is filled with
    /// [`ALLOCATION_SENTINEL`].
    pub fn allocate(&mut self) -> Result<PhysicalAddress, AllocError> {
        let frame_count = self.memory_map.frame_count();
        for _ in 0..frame_count {
            let number = FrameNumber::new(self.cursor);
            self.cursor = (self.cursor + 1) % frame_count;

            let Some(frame) = self.memory_map.frame_mut(number) else {
                continue;
            };
            if !frame.is_free() {
                continue;
            }

            frame.acquire();
            self.free_frames -= 1;
            self.memory[number.as_usize()].fill(ALLOCATION_SENTINEL);

            let address = number.start();
            log::trace!("allocated frame {address}");
            return Ok(address);
        }

        log::warn!("physical memory exhausted");
        Err(AllocError::OutOfMemory)
    }

    /// Drops one reference to the frame at `address`.
    ///
    /// When the last reference goes away the frame is zeroed and becomes free again.
    /// An address that is not page-aligned is ignored.
    ///
    /// # Panics
    ///
    /// Panics if the frame is reserved, outside physical memory, or already free.
    pub fn release(&mut self, address: PhysicalAddress) {
        if !address.is_page_aligned() {
            return;
        }

        let frame = self.allocatable_frame_mut(address, "release");
        if frame.drop_owner() == 0 {
            self.free_frames += 1;
            self.memory[address.frame_number().as_usize()].fill(0);
            log::trace!("freed frame {address}");
        }
    }

    /// Adds one reference to the in-use frame at `address`.
    ///
    /// # Panics
    ///
    /// Panics if the frame is reserved, outside physical memory, or free.
    pub fn retain(&mut self, address: PhysicalAddress) {
        let frame = self.allocatable_frame_mut(address, "retain");
        assert!(frame.refcount() > 0, "retain of free frame {address}");
        frame.acquire();
    }

    fn allocatable_frame_mut(
        &mut self,
        address: PhysicalAddress,
        operation: &str,
    ) -> &mut crate::Frame {
        let frame = self
            .memory_map
            .frame_for_mut(address)
            .unwrap_or_else(|| panic!("{operation} of frame {address} outside physical memory"));
        assert!(
            !frame.is_reserved(),
            "{operation} of reserved frame {address}"
        );
        frame
    }

    /// Returns the reference count of the frame at `address`.
    ///
    /// Reserved frames and addresses outside physical memory report zero.
    pub fn refcount(&self, address: PhysicalAddress) -> u32 {
        self.memory_map
            .frame_for(address)
            .map_or(0, |frame| frame.refcount())
    }

    /// Returns true if the frame at `address` is one this manager hands out.
    pub fn is_allocatable(&self, address: PhysicalAddress) -> bool {
        self.memory_map
            .frame_for(address)
            .is_some_and(|frame| !frame.is_reserved())
    }

    /// Returns the number of frames that can ever be allocated.
    pub fn total_frames(&self) -> usize {
        self.memory_map.allocatable_frame_count()
    }

    /// Returns the number of frames currently free.
    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    /// Returns the number of bytes of emulated physical memory.
    pub fn memory_size(&self) -> usize {
        self.memory.len() * arch::PAGE_SIZE
    }

    /// Returns the frame metadata.
    pub fn memory_map(&self) -> &MemoryMap {
        &self.memory_map
    }

    /// Returns the contents of the frame containing `address`.
    ///
    /// # Panics
    ///
    /// Panics if `address` lies outside physical memory.
    pub fn page(&self, address: PhysicalAddress) -> &[u8; arch::PAGE_SIZE] {
        self.memory
            .get(address.frame_number().as_usize())
            .unwrap_or_else(|| panic!("physical address {address} outside memory"))
    }

    /// Returns the mutable contents of the frame containing `address`.
    ///
    /// # Panics
    ///
    /// Panics if `address` lies outside physical memory.
    pub fn page_mut(&mut self, address: PhysicalAddress) -> &mut [u8; arch::PAGE_SIZE] {
        self.memory
            .get_mut(address.frame_number().as_usize())
            .unwrap_or_else(|| panic!("physical address {address} outside memory"))
    }

    /// Copies the full contents of frame `from` into frame `to`.
    pub fn copy_page(&mut self, from: PhysicalAddress, to: PhysicalAddress) {
        let source = from.frame_number().as_usize();
        let destination = to.frame_number().as_usize();
        assert!(
            source < self.memory.len() && destination < self.memory.len(),
            "page copy outside physical memory"
        );
        if source != destination {
            self.memory.copy_within(source..source + 1, destination);
        }
    }

    /// Fills the frame containing `address` with zeroes.
    pub fn zero_page(&mut self, address: PhysicalAddress) {
        self.page_mut(address).fill(0);
    }
}
