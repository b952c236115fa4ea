#![cfg_attr(not(test), no_std)]

//! # Physical Memory Manager (PMM)
//!
//! The memory-management layer of the Cinder kernel. It provides:
//!
//! - Physical and virtual address types.
//! - A memory map describing which physical frames may be handed out.
//! - A reference-counting frame allocator owning the contents of physical memory.
//! - Four-level x86_64 page tables whose nodes live in that same physical memory.
//!
//! Physical memory is emulated: every frame is a `PAGE_SIZE` byte array owned by the
//! [`PhysicalMemoryManager`], and page-table walks go through it by physical address.

extern crate alloc;

mod address;
mod arch;
mod frame;
mod memmap;
mod numbers;
mod page_directory;
mod physical_memory_manager;

pub use address::{PhysicalAddress, VirtualAddress};
pub use frame::{Frame, FrameFlag, FrameFlags};
pub use memmap::{BootMemoryRegion, MemoryMap};
pub use numbers::FrameNumber;
pub use page_directory::{Mapping, Mappings, PageDirectory};
pub use physical_memory_manager::{ALLOCATION_SENTINEL, AllocError, PhysicalMemoryManager};

pub use arch::{PAGE_SIZE, PageFlags, USER_SPACE_END};
