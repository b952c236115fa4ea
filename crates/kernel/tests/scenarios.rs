mod common;

use cinder_kernel::{KernelError, Pid, ProcessState, Resume, Syscall};
use common::*;
use pmm::VirtualAddress;

#[test]
fn fork_then_write_on_both_sides() {
    let mut kernel = booted(1);
    let (a, b) = (Pid::new(1), Pid::new(2));
    let address = heap(0) + 0x10;

    assert_eq!(call_value(&mut kernel, Syscall::PageAlloc, HEAP as u64), 0);
    assert!(write(&mut kernel, address, &[0x11]));
    assert_eq!(call_value(&mut kernel, Syscall::Fork, 0), 2);
    assert_eq!(kernel.process(b).unwrap().registers().rax, 0);

    let shared = lookup(&kernel, a, heap(0)).unwrap();
    assert_eq!(lookup(&kernel, b, heap(0)).unwrap().phys, shared.phys);
    assert_eq!(read_byte(&kernel, b, address), 0x11);

    // A's write gets a private copy; B keeps the original, still copy-on-write.
    assert!(write(&mut kernel, address, &[0x22]));
    let a_page = lookup(&kernel, a, heap(0)).unwrap();
    let b_page = lookup(&kernel, b, heap(0)).unwrap();
    assert_ne!(a_page.phys, shared.phys);
    assert!(a_page.flags.is_writable() && !a_page.flags.is_copy_on_write());
    assert_eq!(b_page.phys, shared.phys);
    assert!(b_page.flags.is_copy_on_write() && !b_page.flags.is_writable());
    assert_eq!(read_byte(&kernel, b, address), 0x11);
    assert_eq!(kernel.pmm().refcount(shared.phys), 1);

    // B still faults on its first write even though it is the last sharer.
    switch_to(&mut kernel, b);
    assert!(kernel.write_memory(b, address, &[0x33]).is_err());
    assert!(write(&mut kernel, address, &[0x33]));
    let b_page = lookup(&kernel, b, heap(0)).unwrap();
    assert_eq!(b_page.phys, shared.phys);
    assert!(b_page.flags.is_writable());

    assert_ne!(
        lookup(&kernel, a, heap(0)).unwrap().phys,
        lookup(&kernel, b, heap(0)).unwrap().phys
    );
    assert_eq!(read_byte(&kernel, a, address), 0x22);
    assert_eq!(read_byte(&kernel, b, address), 0x33);
    assert_eq!(kernel.audit(), Ok(()));
}

#[test]
fn forked_child_sees_parent_memory() {
    let mut kernel = booted(1);
    call(&mut kernel, Syscall::Fork, 0);
    let data = VirtualAddress::new(0x10_1000);

    let mut parent = [0u8; 6];
    let mut child = [0u8; 6];
    kernel.read_memory(Pid::new(1), data, &mut parent).unwrap();
    kernel.read_memory(Pid::new(2), data, &mut child).unwrap();
    assert_eq!(&parent, b"hello\0");
    assert_eq!(parent, child);

    // Read-only code is shared copy-on-write as well.
    let code = lookup(&kernel, Pid::new(2), VirtualAddress::new(0x10_0000)).unwrap();
    assert!(code.flags.is_copy_on_write());
    assert_eq!(kernel.pmm().refcount(code.phys), 2);

    // The console stays shared and writable.
    let console = lookup(&kernel, Pid::new(2), VirtualAddress::new(0xB_8000)).unwrap();
    assert!(console.flags.is_writable() && !console.flags.is_copy_on_write());
}

#[test]
fn page_alloc_just_below_user_start_is_rejected() {
    let mut kernel = booted(1);
    let pid = Pid::new(1);
    let below = kernel.config().user_start.as_usize() - 1;
    let free = kernel.pmm().free_frames();
    let before: Vec<_> = kernel
        .process(pid)
        .unwrap()
        .directory()
        .unwrap()
        .mappings(kernel.pmm(), VirtualAddress::ZERO..kernel.config().virtual_ceiling())
        .collect();

    assert_eq!(
        call_value(&mut kernel, Syscall::PageAlloc, below as u64),
        KernelError::InvalidArgument.errno()
    );

    let after: Vec<_> = kernel
        .process(pid)
        .unwrap()
        .directory()
        .unwrap()
        .mappings(kernel.pmm(), VirtualAddress::ZERO..kernel.config().virtual_ceiling())
        .collect();
    assert_eq!(before, after);
    assert_eq!(kernel.pmm().free_frames(), free);
}

#[test]
fn exhausting_memory_keeps_earlier_pages() {
    let mut kernel = booted(1);
    let pid = Pid::new(1);

    let mut allocated = 0;
    let failure = loop {
        let result = call_value(&mut kernel, Syscall::PageAlloc, heap(allocated).as_u64());
        if result != 0 {
            break result;
        }
        assert!(write(&mut kernel, heap(allocated), &[allocated as u8 ^ 0x5A]));
        allocated += 1;
    };

    assert_eq!(failure, KernelError::OutOfMemory.errno());
    assert_eq!(kernel.pmm().free_frames(), 0);
    assert!(allocated > 300);
    assert!(lookup(&kernel, pid, heap(allocated)).is_none());
    for page in 0..allocated {
        assert_eq!(read_byte(&kernel, pid, heap(page)), page as u8 ^ 0x5A);
    }
    assert_eq!(kernel.process(pid).unwrap().state(), ProcessState::Runnable);
    assert_eq!(kernel.audit(), Ok(()));
}

#[test]
fn page_alloc_replaces_shared_page_once() {
    let mut kernel = booted(1);
    call(&mut kernel, Syscall::PageAlloc, HEAP as u64);
    call(&mut kernel, Syscall::Fork, 0);
    let shared = lookup(&kernel, Pid::new(1), heap(0)).unwrap().phys;
    assert_eq!(kernel.pmm().refcount(shared), 2);

    call(&mut kernel, Syscall::PageAlloc, HEAP as u64);
    assert_eq!(kernel.pmm().refcount(shared), 1);
    assert_eq!(lookup(&kernel, Pid::new(2), heap(0)).unwrap().phys, shared);
    assert_ne!(lookup(&kernel, Pid::new(1), heap(0)).unwrap().phys, shared);
    assert_eq!(kernel.audit(), Ok(()));
}

#[test]
fn exit_releases_exclusive_pages_and_shared_references() {
    let mut kernel = booted(1);
    call(&mut kernel, Syscall::PageAlloc, HEAP as u64);
    let free_before_fork = kernel.pmm().free_frames();
    call(&mut kernel, Syscall::Fork, 0);
    let child = Pid::new(2);

    switch_to(&mut kernel, child);
    call(&mut kernel, Syscall::PageAlloc, heap(1).as_u64());
    let shared = lookup(&kernel, child, heap(0)).unwrap().phys;
    assert_eq!(kernel.pmm().refcount(shared), 2);

    assert_eq!(call(&mut kernel, Syscall::Exit, 0), Resume::Run(Pid::new(1)));
    assert_eq!(kernel.pmm().refcount(shared), 1);
    assert_eq!(kernel.pmm().free_frames(), free_before_fork);
    assert_eq!(kernel.audit(), Ok(()));
}

#[test]
fn faulted_process_is_never_scheduled() {
    let mut kernel = booted(2);
    let pid = Pid::new(1);

    // A user write to an unmapped page is not a copy-on-write fault.
    let fault = kernel.write_memory(pid, heap(3), b"x").unwrap_err();
    let registers = *kernel.process(pid).unwrap().registers();
    assert_eq!(
        kernel.exception(&fault.trap_frame(registers)),
        Resume::Run(Pid::new(2))
    );
    assert_eq!(kernel.process(pid).unwrap().state(), ProcessState::Faulted);

    for _ in 0..4 {
        assert_eq!(call(&mut kernel, Syscall::Yield, 0), Resume::Run(Pid::new(2)));
    }
    assert_eq!(kernel.audit(), Ok(()));
}

#[test]
fn timer_interrupt_preempts() {
    let mut kernel = booted(2);
    let registers = *kernel.process(Pid::new(1)).unwrap().registers();
    let resume = kernel.exception(&cinder_kernel::TrapFrame::timer(registers));
    assert_eq!(resume, Resume::Run(Pid::new(2)));
    assert_eq!(kernel.ticks(), 1);
    assert_eq!(kernel.uptime(), std::time::Duration::from_millis(10));
}
