//! Text rendering of physical memory usage.

use std::fmt::Write;

use cinder_kernel::{FrameUsage, Kernel, MemoryArea};
use pmm::{PAGE_SIZE, PhysicalAddress};

const FRAMES_PER_ROW: usize = 64;

fn glyph(usage: FrameUsage, area: MemoryArea) -> char {
    match usage {
        FrameUsage::Reserved if area == MemoryArea::Console => 'C',
        FrameUsage::Reserved => 'R',
        FrameUsage::Free => '.',
        FrameUsage::Kernel => 'K',
        FrameUsage::Shared => 'S',
        FrameUsage::Process(pid) => char::from_digit(pid.as_usize() as u32 % 36, 36)
            .unwrap_or('?'),
    }
}

/// Renders one character per physical frame, prefixed with each row's start address.
pub fn render(kernel: &Kernel) -> String {
    let usage = kernel.frame_usage();
    let mut out = String::new();
    for (row, frames) in usage.chunks(FRAMES_PER_ROW).enumerate() {
        let start = row * FRAMES_PER_ROW;
        let _ = write!(out, "{:#08x} ", start * PAGE_SIZE);
        out.extend(frames.iter().enumerate().map(|(offset, &frame)| {
            let address = PhysicalAddress::new((start + offset) * PAGE_SIZE);
            glyph(frame, MemoryArea::containing(kernel.config(), address))
        }));
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "{} of {} allocatable pages free",
        kernel.pmm().free_frames(),
        kernel.pmm().memory_map().allocatable_frame_count()
    );
    out
}
