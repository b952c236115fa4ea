//! Program images that processes are created from.

use alloc::vec::Vec;

use pmm::VirtualAddress;

/// A loadable segment of a program image.
pub trait ImageSegment {
    /// Address the segment is loaded at.
    fn virtual_address(&self) -> VirtualAddress;

    /// Size of the segment in memory.
    fn total_size(&self) -> usize;

    /// Number of bytes backed by the image; the rest of the segment is zero-filled.
    fn file_size(&self) -> usize;

    /// Whether the process may write to the segment.
    fn writable(&self) -> bool;

    /// The first `file_size` bytes of the segment.
    fn data(&self) -> &[u8];
}

/// An executable a process can be set up from.
pub trait ProgramImage {
    type Segment: ImageSegment;

    /// Address execution starts at.
    fn entry_point(&self) -> VirtualAddress;

    fn segments(&self) -> &[Self::Segment];
}

/// A segment held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySegment {
    address: VirtualAddress,
    data: Vec<u8>,
    total_size: usize,
    writable: bool,
}

impl MemorySegment {
    /// A read-only segment holding `data`.
    pub fn code(address: VirtualAddress, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            address,
            total_size: data.len(),
            data,
            writable: false,
        }
    }

    /// A writable segment holding `data`.
    pub fn data(address: VirtualAddress, data: impl Into<Vec<u8>>) -> Self {
        Self {
            writable: true,
            ..Self::code(address, data)
        }
    }

    /// A writable, zero-filled segment of `size` bytes.
    pub fn zeroed(address: VirtualAddress, size: usize) -> Self {
        Self::data(address, Vec::new()).with_total_size(size)
    }

    /// Extends the segment in memory beyond its data; the extra bytes are zero.
    pub fn with_total_size(mut self, size: usize) -> Self {
        self.total_size = size.max(self.data.len());
        self
    }
}

impl ImageSegment for MemorySegment {
    fn virtual_address(&self) -> VirtualAddress {
        self.address
    }

    fn total_size(&self) -> usize {
        self.total_size
    }

    fn file_size(&self) -> usize {
        self.data.len()
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A program image assembled in memory.
///
/// ```
/// use cinder_kernel::{MemoryImage, MemorySegment};
/// use pmm::VirtualAddress;
///
/// let image = MemoryImage::new(VirtualAddress::new(0x10_0000))
///     .with_segment(MemorySegment::code(VirtualAddress::new(0x10_0000), [0x90; 16]))
///     .with_segment(MemorySegment::zeroed(VirtualAddress::new(0x10_1000), 0x2000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    entry_point: VirtualAddress,
    segments: Vec<MemorySegment>,
}

impl MemoryImage {
    pub fn new(entry_point: VirtualAddress) -> Self {
        Self {
            entry_point,
            segments: Vec::new(),
        }
    }

    pub fn with_segment(mut self, segment: MemorySegment) -> Self {
        self.segments.push(segment);
        self
    }
}

impl ProgramImage for MemoryImage {
    type Segment = MemorySegment;

    fn entry_point(&self) -> VirtualAddress {
        self.entry_point
    }

    fn segments(&self) -> &[MemorySegment] {
        &self.segments
    }
}
