//! The kernel context object and process lifecycle.

use alloc::{boxed::Box, vec::Vec};
use core::time::Duration;

use pmm::{
    AllocError, Mapping, PAGE_SIZE, PageDirectory, PageFlags, PhysicalAddress,
    PhysicalMemoryManager, VirtualAddress,
};

use crate::{
    BootError, Devices, KernelConfig, KernelError, Pid, Process, ProcessTable, Registers,
    Resume,
    image::{ImageSegment, ProgramImage},
    mem, scheduler,
};

/// All kernel state.
///
/// Every trap is handled through a `&mut Kernel`, one at a time, so nothing in here is
/// locked.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) pmm: PhysicalMemoryManager,
    pub(crate) kernel_directory: PageDirectory,
    pub(crate) processes: ProcessTable,
    /// The running process, or the last one that ran if none is runnable.
    pub(crate) current: Pid,
    pub(crate) ticks: u64,
    pub(crate) devices: Box<dyn Devices>,
}

impl Kernel {
    /// Brings up physical memory and the kernel page table.
    ///
    /// The kernel page table identity-maps physical memory. The null page is left
    /// unmapped, memory below the user start is kernel-only except for the console, and
    /// everything above is user-accessible.
    pub fn boot(config: KernelConfig, devices: impl Devices + 'static) -> Result<Self, BootError> {
        config.validate()?;

        let mut pmm = mem::init_pmm(&config);
        let kernel_directory = Self::build_kernel_directory(&config, &mut pmm)?;
        log::info!(
            "kernel page table at {}, {} pages free",
            kernel_directory.root(),
            pmm.free_frames()
        );

        Ok(Self {
            processes: ProcessTable::new(config.process_count),
            config,
            pmm,
            kernel_directory,
            current: Pid::new(0),
            ticks: 0,
            devices: Box::new(devices),
        })
    }

    fn build_kernel_directory(
        config: &KernelConfig,
        pmm: &mut PhysicalMemoryManager,
    ) -> Result<PageDirectory, AllocError> {
        let mut directory = PageDirectory::new(pmm)?;
        for address in (PAGE_SIZE..config.physical_memory_size).step_by(PAGE_SIZE) {
            let phys = PhysicalAddress::new(address);
            let flags =
                if address < config.user_start.as_usize() && phys != config.console_address {
                    PageFlags::kernel_read_write()
                } else {
                    PageFlags::user_read_write()
                };
            directory.map(pmm, VirtualAddress::new(address), phys, flags)?;
        }
        Ok(directory)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn pmm(&self) -> &PhysicalMemoryManager {
        &self.pmm
    }

    pub fn kernel_directory(&self) -> &PageDirectory {
        &self.kernel_directory
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(pid)
    }

    /// Returns the running process, if any.
    pub fn current(&self) -> Option<Pid> {
        self.processes
            .get(self.current)
            .filter(|process| process.is_runnable())
            .map(Process::pid)
    }

    /// Number of timer interrupts handled since boot.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn uptime(&self) -> Duration {
        Duration::from_millis(self.ticks * 1000 / u64::from(self.config.timer_hz))
    }

    /// Creates a runnable process from a program image.
    ///
    /// The process gets the kernel's mappings below the user start, one freshly
    /// allocated page per segment page with the image bytes copied in, and a stack page
    /// just below the virtual ceiling. On failure every page allocated along the way is
    /// released again.
    pub fn spawn(&mut self, image: &impl ProgramImage) -> Result<Pid, KernelError> {
        let pid = self.processes.allocate_pid()?;
        let mut directory = PageDirectory::new(&mut self.pmm)?;

        if let Err(error) = self.load_image(&mut directory, image) {
            log::warn!("failed to set up process {pid}: {error}");
            directory.destroy(&mut self.pmm);
            return Err(error);
        }

        let registers = Registers::user(image.entry_point(), self.config.virtual_ceiling());
        self.processes.install(pid, directory, registers);
        log::debug!("spawned process {pid} at {}", image.entry_point());
        Ok(pid)
    }

    fn load_image(
        &mut self,
        directory: &mut PageDirectory,
        image: &impl ProgramImage,
    ) -> Result<(), KernelError> {
        self.copy_kernel_mappings(directory)?;
        for segment in image.segments() {
            self.load_segment(directory, segment)?;
        }

        let stack = self.allocate_zeroed()?;
        let stack_page = self.config.stack_page();
        if let Err(error) =
            directory.map(&mut self.pmm, stack_page, stack, PageFlags::user_read_write())
        {
            self.pmm.release(stack);
            return Err(error.into());
        }
        Ok(())
    }

    /// Copies the kernel's mappings below the user start into `directory`.
    pub(crate) fn copy_kernel_mappings(
        &mut self,
        directory: &mut PageDirectory,
    ) -> Result<(), AllocError> {
        let low_memory = VirtualAddress::ZERO..self.config.user_start;
        let mappings: Vec<Mapping> = self
            .kernel_directory
            .mappings(&self.pmm, low_memory)
            .collect();
        for mapping in mappings {
            directory.map(&mut self.pmm, mapping.virt, mapping.phys, mapping.flags)?;
        }
        Ok(())
    }

    fn load_segment(
        &mut self,
        directory: &mut PageDirectory,
        segment: &impl ImageSegment,
    ) -> Result<(), KernelError> {
        let base = segment.virtual_address().as_usize();
        let end = base
            .checked_add(segment.total_size())
            .ok_or(KernelError::InvalidArgument)?;

        if base < self.config.user_start.as_usize()
            || end > self.config.stack_page().as_usize()
            || segment.file_size() > segment.total_size()
            || segment.data().len() < segment.file_size()
        {
            log::warn!(
                "segment {:#x}-{:#x} does not fit the user address space",
                base,
                end
            );
            return Err(KernelError::InvalidArgument);
        }

        let file_end = base + segment.file_size();
        let first_page = segment.virtual_address().align_down(PAGE_SIZE).as_usize();
        for page in (first_page..end).step_by(PAGE_SIZE) {
            let virt = VirtualAddress::new(page);
            let phys = match directory.lookup(&self.pmm, virt) {
                Some(existing) => {
                    if segment.writable() && !existing.flags.is_writable() {
                        directory.protect(&mut self.pmm, virt, PageFlags::user_read_write());
                    }
                    existing.phys
                }
                None => {
                    let phys = self.allocate_zeroed()?;
                    let flags = if segment.writable() {
                        PageFlags::user_read_write()
                    } else {
                        PageFlags::user_read_only()
                    };
                    if let Err(error) = directory.map(&mut self.pmm, virt, phys, flags) {
                        self.pmm.release(phys);
                        return Err(error.into());
                    }
                    phys
                }
            };

            let copy_start = page.max(base);
            let copy_end = (page + PAGE_SIZE).min(file_end);
            if copy_start < copy_end {
                self.pmm.page_mut(phys)[copy_start - page..copy_end - page]
                    .copy_from_slice(&segment.data()[copy_start - base..copy_end - base]);
            }
        }
        Ok(())
    }

    /// Allocates a page and clears the allocation sentinel out of it.
    pub(crate) fn allocate_zeroed(&mut self) -> Result<PhysicalAddress, AllocError> {
        let page = self.pmm.allocate()?;
        self.pmm.zero_page(page);
        Ok(page)
    }

    /// Starts running processes.
    pub fn start(&mut self) -> Resume {
        self.schedule()
    }

    /// Called after an idle halt is interrupted.
    pub fn idle(&mut self) -> Resume {
        self.devices.poll_keyboard();
        self.schedule()
    }

    /// Picks the next runnable process after the current one.
    pub(crate) fn schedule(&mut self) -> Resume {
        match scheduler::pick_next(&self.processes, self.current) {
            Some(pid) => self.run(pid),
            None => {
                log::trace!("no runnable process");
                Resume::Idle
            }
        }
    }

    /// Makes `pid` the current process and hands it back to the trap-entry code.
    pub(crate) fn run(&mut self, pid: Pid) -> Resume {
        assert!(
            self.processes.get(pid).is_some_and(Process::is_runnable),
            "process {pid} is not runnable"
        );
        self.current = pid;

        #[cfg(debug_assertions)]
        self.check_directory(pid);

        Resume::Run(pid)
    }

    /// Copies trapped user registers into the current process.
    ///
    /// # Panics
    ///
    /// Panics if no process is running.
    pub(crate) fn save_registers(&mut self, registers: &Registers) -> Pid {
        let pid = self.current;
        let process = self
            .processes
            .get_mut(pid)
            .filter(|process| process.is_runnable())
            .unwrap_or_else(|| panic!("user trap while process {pid} is not running"));
        *process.registers_mut() = *registers;
        pid
    }

    /// Frees the process's slot and every page only it was holding.
    pub(crate) fn exit(&mut self, pid: Pid) {
        if let Some(directory) = self.processes.release(pid) {
            directory.destroy(&mut self.pmm);
        }
        log::debug!(
            "process {pid} exited, {} pages free",
            self.pmm.free_frames()
        );
    }
}
