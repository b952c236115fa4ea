//! Scripted user programs.
//!
//! A program is a function of a process's saved registers and memory: each step picks
//! up where the last trap left off and runs until the next trap. All program state lives
//! in registers, so a forked child carries on from its parent's state with `rax = 0`.
//!
//! Register use: `r12` is the next heap page, `r13` is set while a page request is
//! outstanding, `r14` is set once the process has stamped its data page, and `r15`
//! counts the forks made so far.

use cinder_kernel::{Kernel, MemoryImage, MemorySegment, Pid, Registers, Syscall, TrapFrame};
use clap::ValueEnum;
use pmm::{PAGE_SIZE, VirtualAddress};

const CODE_START: usize = 0x10_0000;
const DATA_START: usize = 0x10_1000;
const HEAP_START: usize = 0x10_2000;

/// Which program the initial processes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Program {
    /// Grows its heap one page at a time until memory runs out.
    Allocator,
    /// Forks twice, then every process grows its heap.
    Fork,
}

impl Program {
    fn forks(self) -> u64 {
        match self {
            Program::Allocator => 0,
            Program::Fork => 2,
        }
    }
}

/// The image every program is loaded from; the code itself is simulated.
pub fn image() -> MemoryImage {
    let entry = VirtualAddress::new(CODE_START);
    MemoryImage::new(entry)
        .with_segment(MemorySegment::code(entry, *b"\xeb\xfe"))
        .with_segment(MemorySegment::data(
            VirtualAddress::new(DATA_START),
            *b"cinder\0",
        ))
}

/// What ended a step.
#[derive(Debug, Clone, Copy)]
pub enum Trap {
    Syscall(Registers),
    Exception(TrapFrame),
}

/// Limits shared by all running programs.
#[derive(Debug, Clone, Copy)]
pub struct Script {
    pub program: Program,
    /// Pages a process allocates before exiting; `None` runs until memory is exhausted.
    pub exit_after: Option<usize>,
}

impl Script {
    /// Runs `pid` from its saved `registers` until it traps.
    pub fn step(&self, kernel: &mut Kernel, pid: Pid, mut registers: Registers) -> Trap {
        if registers.r15 < self.program.forks() {
            registers.r15 += 1;
            return syscall(registers, Syscall::Fork, 0);
        }
        // Forked processes share the data page until this write.
        if registers.r14 == 0 {
            let address = VirtualAddress::new(DATA_START + 0x100 + pid.as_usize());
            match kernel.write_memory(pid, address, &[pid.as_usize() as u8]) {
                Ok(()) => registers.r14 = 1,
                Err(fault) => return Trap::Exception(fault.trap_frame(registers)),
            }
        }
        if registers.r12 == 0 {
            registers.r12 = HEAP_START as u64;
        }

        if registers.r13 == 0 {
            let allocated = (registers.r12 as usize - HEAP_START) / PAGE_SIZE;
            if self.exit_after.is_some_and(|limit| allocated >= limit) {
                return syscall(registers, Syscall::Exit, 0);
            }
            if registers.r12 as usize >= kernel.config().stack_page().as_usize() {
                return syscall(registers, Syscall::Yield, 0);
            }
            registers.r13 = 1;
            let page = registers.r12;
            return syscall(registers, Syscall::PageAlloc, page);
        }

        // The page request has completed.
        registers.r13 = 0;
        if registers.rax != 0 {
            return syscall(registers, Syscall::Yield, 0);
        }

        let address = VirtualAddress::new(registers.r12 as usize);
        let stamp = [pid.as_usize() as u8; 16];
        match kernel.write_memory(pid, address, &stamp) {
            Ok(()) => {
                registers.r12 += PAGE_SIZE as u64;
                syscall(registers, Syscall::Yield, 0)
            }
            Err(fault) => {
                // Retried once the fault has been handled.
                registers.r13 = 1;
                Trap::Exception(fault.trap_frame(registers))
            }
        }
    }
}

fn syscall(mut registers: Registers, syscall: Syscall, arg: u64) -> Trap {
    registers.rax = syscall.number();
    registers.rdi = arg;
    Trap::Syscall(registers)
}
