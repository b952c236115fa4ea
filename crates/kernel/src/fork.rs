//! Copy-on-write fork and write-fault resolution.
//!
//! Fork shares every user page at or above the user start between parent and child.
//! Both sides lose write access and carry the copy-on-write marker, and the page gains
//! one reference for the child. The first write from either side faults, and the fault
//! either takes the page over in place (last reference) or copies it.

use pmm::{AllocError, PAGE_SIZE, PageDirectory, VirtualAddress};

use crate::{Kernel, KernelError, Pid, Process, interrupts::PendingFault, mmu::Access};

/// Outcome of offering a page fault to the copy-on-write handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CowResolution {
    /// The page is now privately writable; retry the access.
    Resolved,
    /// A private copy was needed and no page was left for it.
    OutOfMemory,
    /// The fault has nothing to do with copy-on-write.
    NotCopyOnWrite,
}

impl Kernel {
    /// Forks the current process and returns the child's pid.
    ///
    /// The child's address space is completed before the parent is touched, so a failed
    /// fork leaves the parent exactly as it was.
    pub(crate) fn fork(&mut self) -> Result<Pid, KernelError> {
        let parent = self.current;
        let child = self.processes.allocate_pid()?;
        let mut directory = PageDirectory::new(&mut self.pmm)?;

        if let Err(error) = self.share_address_space(parent, &mut directory) {
            log::debug!("fork of process {parent} failed: {error}");
            directory.destroy(&mut self.pmm);
            return Err(error.into());
        }
        self.write_protect_user_pages(parent);

        let mut registers = *self.process_or_panic(parent).registers();
        registers.rax = 0;
        self.processes.install(child, directory, registers);
        log::debug!(
            "process {parent} forked {child}, {} pages free",
            self.pmm.free_frames()
        );
        Ok(child)
    }

    /// Fills `child` with the parent's mappings.
    ///
    /// Low memory and the console are mapped as they are. User pages above the user
    /// start are mapped copy-on-write and gain a reference each.
    fn share_address_space(
        &mut self,
        parent: Pid,
        child: &mut PageDirectory,
    ) -> Result<(), AllocError> {
        let source = self
            .processes
            .get(parent)
            .and_then(Process::directory)
            .unwrap_or_else(|| panic!("process {parent} has no address space"));
        let end = self.config.virtual_ceiling();

        let mut cursor = VirtualAddress::ZERO;
        while let Some(mapping) = source.next_mapping(&self.pmm, cursor, end) {
            cursor = mapping.virt + PAGE_SIZE;

            if mapping.virt < self.config.user_start
                || mapping.phys == self.config.console_address
            {
                child.map(&mut self.pmm, mapping.virt, mapping.phys, mapping.flags)?;
            } else if mapping.flags.is_user() {
                let flags = mapping.flags.write_protected();
                child.map(&mut self.pmm, mapping.virt, mapping.phys, flags)?;
                if self.pmm.is_allocatable(mapping.phys) {
                    self.pmm.retain(mapping.phys);
                }
            }
        }
        Ok(())
    }

    /// Turns every user page of `pid` above the user start into a copy-on-write page.
    fn write_protect_user_pages(&mut self, pid: Pid) {
        let console = self.config.console_address;
        let end = self.config.virtual_ceiling();
        let directory = self
            .processes
            .get_mut(pid)
            .and_then(Process::directory_mut)
            .unwrap_or_else(|| panic!("process {pid} has no address space"));

        let mut cursor = self.config.user_start;
        while let Some(mapping) = directory.next_mapping(&self.pmm, cursor, end) {
            cursor = mapping.virt + PAGE_SIZE;
            if mapping.flags.is_user() && mapping.phys != console {
                directory.protect(&mut self.pmm, mapping.virt, mapping.flags.write_protected());
            }
        }
    }

    /// Resolves a user write to a copy-on-write page of the current process.
    pub(crate) fn resolve_cow_fault(&mut self, fault: &PendingFault) -> CowResolution {
        if fault.access != Access::Write
            || !fault.protection_violation
            || !fault.user_mode
            || fault.address < self.config.user_start
        {
            return CowResolution::NotCopyOnWrite;
        }

        let pid = self.current;
        let virt = fault.address.align_down(PAGE_SIZE);
        let Some(directory) = self
            .processes
            .get_mut(pid)
            .and_then(Process::directory_mut)
        else {
            return CowResolution::NotCopyOnWrite;
        };
        let Some(mapping) = directory.lookup(&self.pmm, virt) else {
            return CowResolution::NotCopyOnWrite;
        };
        if !(mapping.flags.is_user() && mapping.flags.is_copy_on_write()) {
            return CowResolution::NotCopyOnWrite;
        }

        let promoted = mapping.flags.promoted();
        if self.pmm.refcount(mapping.phys) == 1 {
            directory.protect(&mut self.pmm, virt, promoted);
            log::trace!("process {pid} took over {virt} in place");
            return CowResolution::Resolved;
        }

        let Ok(copy) = self.pmm.allocate() else {
            return CowResolution::OutOfMemory;
        };
        self.pmm.copy_page(mapping.phys, copy);
        if directory.map(&mut self.pmm, virt, copy, promoted).is_err() {
            self.pmm.release(copy);
            return CowResolution::OutOfMemory;
        }
        self.pmm.release(mapping.phys);
        log::trace!("process {pid} copied {virt} to {copy}");
        CowResolution::Resolved
    }

    pub(crate) fn process_or_panic(&self, pid: Pid) -> &Process {
        self.processes
            .get(pid)
            .unwrap_or_else(|| panic!("pid {pid} outside the process table"))
    }
}
