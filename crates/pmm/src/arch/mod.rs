//! Architecture-specific page table layout.
//!
//! Page tables are kept in the x86_64 4-level format so that a directory built here has
//! the same shape as one the hardware would walk, even though the backing frames live in
//! emulated physical memory.

mod x86_64;

pub use self::x86_64::*;
