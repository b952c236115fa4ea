//! Recoverable kernel errors.

use core::fmt;

use pmm::AllocError;

/// An error a system call reports back to the calling process.
///
/// These are the recoverable failures: nothing is left half-changed when one is
/// returned. Broken invariants are not represented here; they halt the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The physical page pool is exhausted.
    OutOfMemory,
    /// Every process slot is in use.
    TableFull,
    /// A system call argument was misaligned or out of range.
    InvalidArgument,
}

impl KernelError {
    /// Returns the negative errno value handed back to user code.
    pub const fn errno(self) -> i64 {
        match self {
            KernelError::OutOfMemory => -12,
            KernelError::TableFull => -11,
            KernelError::InvalidArgument => -22,
        }
    }

    /// Returns the error as the raw value placed in `rax`.
    pub const fn as_return_value(self) -> u64 {
        self.errno() as u64
    }
}

impl From<AllocError> for KernelError {
    fn from(error: AllocError) -> Self {
        match error {
            AllocError::OutOfMemory => KernelError::OutOfMemory,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::TableFull => write!(f, "process table full"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

impl core::error::Error for KernelError {}

/// An error that prevents the kernel from booting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// The configuration describes an impossible machine.
    InvalidConfig(&'static str),
    /// Physical memory ran out while building the kernel page table.
    OutOfMemory,
}

impl From<AllocError> for BootError {
    fn from(_: AllocError) -> Self {
        BootError::OutOfMemory
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::InvalidConfig(reason) => write!(f, "invalid configuration: {reason}"),
            BootError::OutOfMemory => write!(f, "out of memory during boot"),
        }
    }
}

impl core::error::Error for BootError {}
