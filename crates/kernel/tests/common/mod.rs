#![allow(dead_code)]

use cinder_kernel::{
    Kernel, KernelConfig, MemoryImage, MemorySegment, NullDevices, Pid, ProcessState, Resume,
    Syscall,
};
use pmm::{Mapping, VirtualAddress};

pub const HEAP: usize = 0x11_0000;

pub fn program() -> MemoryImage {
    MemoryImage::new(VirtualAddress::new(0x10_0000))
        .with_segment(MemorySegment::code(VirtualAddress::new(0x10_0000), *b"\xeb\xfe"))
        .with_segment(MemorySegment::data(VirtualAddress::new(0x10_1000), *b"hello\0"))
}

pub fn booted(count: usize) -> Kernel {
    let mut kernel = Kernel::boot(KernelConfig::default(), NullDevices).unwrap();
    for _ in 0..count {
        kernel.spawn(&program()).unwrap();
    }
    assert_eq!(kernel.start(), Resume::Run(Pid::new(1)));
    kernel
}

pub fn heap(page: usize) -> VirtualAddress {
    VirtualAddress::new(HEAP + page * pmm::PAGE_SIZE)
}

/// Issues a system call from the running process and returns where execution resumes.
pub fn call(kernel: &mut Kernel, syscall: Syscall, arg: u64) -> Resume {
    let pid = kernel.current().expect("no process is running");
    let mut registers = *kernel.process(pid).unwrap().registers();
    registers.rax = syscall.number();
    registers.rdi = arg;
    kernel.syscall(&registers)
}

/// Issues a system call and returns the caller's `rax` afterwards.
pub fn call_value(kernel: &mut Kernel, syscall: Syscall, arg: u64) -> i64 {
    let pid = kernel.current().expect("no process is running");
    call(kernel, syscall, arg);
    kernel.process(pid).unwrap().registers().rax as i64
}

/// Switches to `pid` by yielding until it runs.
pub fn switch_to(kernel: &mut Kernel, pid: Pid) {
    for _ in 0..kernel.processes().capacity() {
        if kernel.current() == Some(pid) {
            return;
        }
        call(kernel, Syscall::Yield, 0);
    }
    panic!("process {pid} never ran");
}

/// Writes as the running process the way the CPU would, taking page faults as they come.
///
/// Returns false if the process did not survive the write.
pub fn write(kernel: &mut Kernel, address: VirtualAddress, data: &[u8]) -> bool {
    let pid = kernel.current().expect("no process is running");
    loop {
        let Err(fault) = kernel.write_memory(pid, address, data) else {
            return true;
        };
        let registers = *kernel.process(pid).unwrap().registers();
        let resume = kernel.exception(&fault.trap_frame(registers));
        if resume != Resume::Run(pid) {
            return false;
        }
    }
}

pub fn read_byte(kernel: &Kernel, pid: Pid, address: VirtualAddress) -> u8 {
    let mut byte = [0u8];
    kernel.read_memory(pid, address, &mut byte).unwrap();
    byte[0]
}

pub fn lookup(kernel: &Kernel, pid: Pid, address: VirtualAddress) -> Option<Mapping> {
    kernel
        .process(pid)?
        .directory()?
        .lookup(kernel.pmm(), address)
}

pub fn is_runnable(kernel: &Kernel, pid: Pid) -> bool {
    kernel
        .process(pid)
        .is_some_and(|process| process.state() == ProcessState::Runnable)
}
