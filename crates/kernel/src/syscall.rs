//! System call decoding and dispatch.

use core::fmt;

use pmm::{PAGE_SIZE, PageFlags, VirtualAddress};

use crate::{Kernel, KernelError, Pid, Process, Registers, Resume};

/// Longest message a process can hand to [`Syscall::Panic`].
const PANIC_MESSAGE_LIMIT: usize = 160;

/// System call numbers, passed in `rax`. The argument, if any, is in `rdi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Syscall {
    /// Returns the caller's pid.
    GetPid = 1,
    /// Gives up the CPU to the next runnable process.
    Yield = 2,
    /// Halts the kernel with a NUL-terminated message read from the caller.
    Panic = 3,
    /// Maps a fresh zeroed page at a page-aligned address.
    PageAlloc = 4,
    /// Creates a copy-on-write child of the caller.
    Fork = 5,
    /// Ends the caller and frees its memory.
    Exit = 6,
}

impl Syscall {
    pub const fn number(self) -> u64 {
        self as u64
    }
}

impl TryFrom<u64> for Syscall {
    type Error = u64;

    fn try_from(number: u64) -> Result<Self, Self::Error> {
        Ok(match number {
            1 => Syscall::GetPid,
            2 => Syscall::Yield,
            3 => Syscall::Panic,
            4 => Syscall::PageAlloc,
            5 => Syscall::Fork,
            6 => Syscall::Exit,
            unknown => return Err(unknown),
        })
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Syscall::GetPid => "getpid",
            Syscall::Yield => "yield",
            Syscall::Panic => "panic",
            Syscall::PageAlloc => "page_alloc",
            Syscall::Fork => "fork",
            Syscall::Exit => "exit",
        };
        f.write_str(name)
    }
}

impl Kernel {
    /// Handles a system call trap.
    ///
    /// The return value, if the call has one, is left in the caller's `rax`.
    ///
    /// # Panics
    ///
    /// Panics on a system call made from kernel mode, and on [`Syscall::Panic`].
    pub fn syscall(&mut self, registers: &Registers) -> Resume {
        self.devices.trap_entered();
        if !registers.is_user_mode() {
            panic!(
                "system call {} from kernel mode (rip={:#x})",
                registers.rax, registers.rip
            );
        }
        let pid = self.save_registers(registers);
        self.devices.poll_keyboard();

        let syscall = match Syscall::try_from(registers.rax) {
            Ok(syscall) => syscall,
            Err(number) => {
                log::warn!(
                    "process {pid} made unknown system call {number} (rip={:#x})",
                    registers.rip
                );
                self.processes.mark_faulted(pid);
                return self.schedule();
            }
        };

        log::trace!("process {pid}: {syscall}({:#x})", registers.rdi);

        match syscall {
            Syscall::GetPid => self.complete(pid, pid.as_usize() as u64),
            Syscall::Yield => {
                self.set_return_value(pid, 0);
                self.schedule()
            }
            Syscall::Panic => {
                let address = VirtualAddress::new_truncate(registers.rdi as usize);
                let message = self.read_user_string(pid, address, PANIC_MESSAGE_LIMIT);
                if message.is_empty() {
                    panic!("process {pid} panicked");
                }
                panic!("process {pid} panicked: {message}");
            }
            Syscall::PageAlloc => {
                let result = self.page_alloc(pid, registers.rdi).map(|()| 0);
                self.complete_with(pid, result)
            }
            Syscall::Fork => {
                let result = self.fork().map(|child| child.as_usize() as u64);
                self.complete_with(pid, result)
            }
            Syscall::Exit => {
                self.exit(pid);
                self.schedule()
            }
        }
    }

    /// Maps a zeroed, user-writable page at `address` for `pid`.
    ///
    /// Whatever page was mapped there before loses this reference.
    fn page_alloc(&mut self, pid: Pid, address: u64) -> Result<(), KernelError> {
        let address = usize::try_from(address).map_err(|_| KernelError::InvalidArgument)?;
        if address % PAGE_SIZE != 0
            || address < self.config.user_start.as_usize()
            || address >= self.config.virtual_ceiling().as_usize()
        {
            return Err(KernelError::InvalidArgument);
        }
        let virt = VirtualAddress::new(address);

        let page = self.allocate_zeroed()?;
        let directory = self
            .processes
            .get_mut(pid)
            .and_then(Process::directory_mut)
            .unwrap_or_else(|| panic!("process {pid} has no address space"));
        let previous = directory.lookup(&self.pmm, virt);
        if let Err(error) = directory.map(&mut self.pmm, virt, page, PageFlags::user_read_write()) {
            self.pmm.release(page);
            return Err(error.into());
        }

        if let Some(previous) = previous
            .filter(|mapping| mapping.flags.is_user() && self.pmm.is_allocatable(mapping.phys))
        {
            self.pmm.release(previous.phys);
        }
        Ok(())
    }

    fn set_return_value(&mut self, pid: Pid, value: u64) {
        if let Some(process) = self.processes.get_mut(pid) {
            process.registers_mut().rax = value;
        }
    }

    /// Stores the result and resumes the caller.
    fn complete(&mut self, pid: Pid, value: u64) -> Resume {
        self.set_return_value(pid, value);
        self.run(pid)
    }

    fn complete_with(&mut self, pid: Pid, result: Result<u64, KernelError>) -> Resume {
        let value = match result {
            Ok(value) => value,
            Err(error) => {
                log::debug!("process {pid}: {error}");
                error.as_return_value()
            }
        };
        self.complete(pid, value)
    }
}
