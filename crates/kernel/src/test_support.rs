//! Helpers shared by the unit tests.

use pmm::VirtualAddress;

use crate::{Kernel, KernelConfig, MemoryImage, MemorySegment, NullDevices, Pid, Resume, Syscall};

/// A page-aligned heap address no test program maps on its own.
pub(crate) const HEAP: usize = 0x12_0000;

pub(crate) fn program() -> MemoryImage {
    MemoryImage::new(VirtualAddress::new(0x10_0000))
        .with_segment(MemorySegment::code(
            VirtualAddress::new(0x10_0000),
            *b"\x90\x90\xf4",
        ))
        .with_segment(MemorySegment::data(VirtualAddress::new(0x10_1000), *b"data"))
}

/// Boots a default kernel with `count` copies of [`program`] and starts the first one.
pub(crate) fn booted(count: usize) -> Kernel {
    let mut kernel = Kernel::boot(KernelConfig::default(), NullDevices).unwrap();
    for _ in 0..count {
        kernel.spawn(&program()).unwrap();
    }
    assert_eq!(kernel.start(), Resume::Run(Pid::new(1)));
    kernel
}

/// Makes the running process issue `syscall` with `arg` in `rdi`.
pub(crate) fn call(kernel: &mut Kernel, syscall: Syscall, arg: u64) -> Resume {
    let pid = kernel.current().expect("no process is running");
    let mut registers = *kernel.process(pid).unwrap().registers();
    registers.rax = syscall.number();
    registers.rdi = arg;
    kernel.syscall(&registers)
}

pub(crate) fn return_value(kernel: &Kernel, pid: Pid) -> u64 {
    kernel.process(pid).unwrap().registers().rax
}

/// Writes as the running process, delivering page faults until the write goes through.
pub(crate) fn write(kernel: &mut Kernel, address: VirtualAddress, data: &[u8]) {
    let pid = kernel.current().expect("no process is running");
    for _ in 0..4 {
        match kernel.write_memory(pid, address, data) {
            Ok(()) => return,
            Err(fault) => {
                let registers = *kernel.process(pid).unwrap().registers();
                assert_eq!(
                    kernel.exception(&fault.trap_frame(registers)),
                    Resume::Run(pid),
                    "fault at {} was not resolved",
                    fault.address
                );
            }
        }
    }
    panic!("write at {address} kept faulting");
}
