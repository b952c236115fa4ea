//! Process descriptors and the process table.

use alloc::vec::Vec;
use core::fmt;

use pmm::{PageDirectory, VirtualAddress};
use x86_64::{PrivilegeLevel, registers::rflags::RFlags, structures::gdt::SegmentSelector};

use crate::KernelError;

/// Process identifier; also the index of the process's slot in the table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pid(usize);

impl Pid {
    pub const fn new(pid: usize) -> Self {
        Self(pid)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a process slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// The slot is unused.
    Free,
    /// The process can be scheduled.
    Runnable,
    /// The process took an unrecoverable fault and will never run again.
    Faulted,
}

/// Register snapshot of a trapped process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl Registers {
    const USER_CODE: SegmentSelector = SegmentSelector::new(3, PrivilegeLevel::Ring3);
    const USER_DATA: SegmentSelector = SegmentSelector::new(4, PrivilegeLevel::Ring3);
    const KERNEL_CODE: SegmentSelector = SegmentSelector::new(1, PrivilegeLevel::Ring0);
    const KERNEL_DATA: SegmentSelector = SegmentSelector::new(2, PrivilegeLevel::Ring0);

    /// Initial registers of a user process: user segments, interrupts enabled.
    pub fn user(entry: VirtualAddress, stack: VirtualAddress) -> Self {
        Self {
            rip: entry.as_u64(),
            rsp: stack.as_u64(),
            cs: Self::USER_CODE.0.into(),
            ss: Self::USER_DATA.0.into(),
            rflags: RFlags::INTERRUPT_FLAG.bits(),
            ..Self::default()
        }
    }

    /// Registers of code running in kernel mode.
    pub fn kernel(rip: u64, rsp: u64) -> Self {
        Self {
            rip,
            rsp,
            cs: Self::KERNEL_CODE.0.into(),
            ss: Self::KERNEL_DATA.0.into(),
            ..Self::default()
        }
    }

    /// Privilege level the trapped code ran at, taken from the code segment selector.
    pub fn privilege_level(&self) -> PrivilegeLevel {
        SegmentSelector(self.cs as u16).rpl()
    }

    pub fn is_user_mode(&self) -> bool {
        self.privilege_level() == PrivilegeLevel::Ring3
    }
}

/// A process slot.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    state: ProcessState,
    directory: Option<PageDirectory>,
    registers: Registers,
}

impl Process {
    fn free(pid: Pid) -> Self {
        Self {
            pid,
            state: ProcessState::Free,
            directory: None,
            registers: Registers::default(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn is_runnable(&self) -> bool {
        self.state == ProcessState::Runnable
    }

    /// The saved registers; current only while the process is not running.
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    /// The process's address space, absent while the slot is free.
    pub fn directory(&self) -> Option<&PageDirectory> {
        self.directory.as_ref()
    }

    pub(crate) fn directory_mut(&mut self) -> Option<&mut PageDirectory> {
        self.directory.as_mut()
    }
}

/// Fixed-capacity table of processes. Slot 0 is never used.
#[derive(Debug)]
pub struct ProcessTable {
    slots: Vec<Process>,
}

impl ProcessTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|pid| Process::free(Pid::new(pid))).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.slots.get(pid.as_usize())
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.slots.get_mut(pid.as_usize())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter()
    }

    /// Returns the lowest free pid, without claiming it.
    pub fn allocate_pid(&self) -> Result<Pid, KernelError> {
        self.slots
            .iter()
            .skip(1)
            .find(|process| process.state == ProcessState::Free)
            .map(|process| process.pid)
            .ok_or(KernelError::TableFull)
    }

    /// Makes a free slot runnable with the given address space and registers.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not free or is slot 0.
    pub(crate) fn install(&mut self, pid: Pid, directory: PageDirectory, registers: Registers) {
        assert!(pid.as_usize() != 0, "process slot 0 is reserved");
        let process = self.slot_mut(pid);
        assert_eq!(process.state, ProcessState::Free, "pid {pid} is in use");
        process.state = ProcessState::Runnable;
        process.directory = Some(directory);
        process.registers = registers;
    }

    /// Frees a slot and hands back its address space for teardown.
    pub(crate) fn release(&mut self, pid: Pid) -> Option<PageDirectory> {
        let process = self.slot_mut(pid);
        process.state = ProcessState::Free;
        process.registers = Registers::default();
        process.directory.take()
    }

    /// Marks a runnable process as faulted. Its address space stays allocated.
    pub(crate) fn mark_faulted(&mut self, pid: Pid) {
        let process = self.slot_mut(pid);
        assert_eq!(
            process.state,
            ProcessState::Runnable,
            "only a runnable process can fault"
        );
        process.state = ProcessState::Faulted;
    }

    fn slot_mut(&mut self, pid: Pid) -> &mut Process {
        self.slots
            .get_mut(pid.as_usize())
            .unwrap_or_else(|| panic!("pid {pid} outside the process table"))
    }
}
