#![cfg_attr(not(test), no_std)]

//! # Cinder kernel core
//!
//! Processes, scheduling and memory management for the Cinder teaching kernel, written
//! against an emulated machine so the whole thing runs as an ordinary library.
//!
//! The platform around the core (trap entry stubs, interrupt controller, keyboard and
//! console drivers) hands each trap to a [`Kernel`] and acts on the [`Resume`] it gets
//! back. Processes are created from a [`ProgramImage`], grow their heap a page at a time,
//! and fork with copy-on-write sharing of every user page.

extern crate alloc;

mod audit;
mod config;
mod console;
mod devices;
mod error;
mod fork;
mod image;
mod interrupts;
mod kernel;
mod mem;
mod mmu;
mod process;
mod scheduler;
mod syscall;

#[cfg(test)]
mod test_support;

pub use audit::{AuditError, FrameUsage};
pub use config::KernelConfig;
pub use console::{Console, ConsoleSink};
pub use devices::{Devices, NullDevices};
pub use error::{BootError, KernelError};
pub use image::{ImageSegment, MemoryImage, MemorySegment, ProgramImage};
pub use interrupts::{InterruptVector, PendingFault, TrapFrame};
pub use kernel::Kernel;
pub use mem::MemoryArea;
pub use mmu::{Access, PageFault, translate};
pub use process::{Pid, Process, ProcessState, ProcessTable, Registers};
pub use scheduler::{Resume, pick_next};
pub use syscall::Syscall;
