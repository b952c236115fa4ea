//! Software model of the MMU's translation and permission checks.
//!
//! Physical memory only exists inside the [`PhysicalMemoryManager`], so anything that
//! wants to touch a process's memory the way the CPU would goes through [`translate`].
//! A refused access yields the same error code the hardware would push for a page fault,
//! ready to be delivered through [`Kernel::exception`].

use alloc::{string::String, vec::Vec};
use core::ops::Range;

use pmm::{PAGE_SIZE, PageDirectory, PhysicalAddress, PhysicalMemoryManager, VirtualAddress};
use x86_64::structures::idt::PageFaultErrorCode;

use crate::{Kernel, Pid, Registers, TrapFrame};

/// Kind of memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// An access the MMU refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// The address that was accessed, as it would appear in `cr2`.
    pub address: VirtualAddress,
    pub error_code: PageFaultErrorCode,
}

impl PageFault {
    /// Packages the fault as the trap the CPU would raise for it.
    pub fn trap_frame(self, registers: Registers) -> TrapFrame {
        TrapFrame::page_fault(registers, self.address, self.error_code)
    }
}

/// Translates `address` through `directory`, checking permissions as the CPU would.
///
/// Kernel-mode writes honor the writable bit as well, as with `CR0.WP` set.
pub fn translate(
    pmm: &PhysicalMemoryManager,
    directory: &PageDirectory,
    address: VirtualAddress,
    access: Access,
    user: bool,
) -> Result<PhysicalAddress, PageFault> {
    let mut error_code = PageFaultErrorCode::empty();
    if access == Access::Write {
        error_code |= PageFaultErrorCode::CAUSED_BY_WRITE;
    }
    if user {
        error_code |= PageFaultErrorCode::USER_MODE;
    }

    let Some(mapping) = directory.lookup(pmm, address) else {
        return Err(PageFault {
            address,
            error_code,
        });
    };

    let privilege_ok = !user || mapping.flags.is_user();
    let access_ok = access == Access::Read || mapping.flags.is_writable();
    if !(privilege_ok && access_ok) {
        return Err(PageFault {
            address,
            error_code: error_code | PageFaultErrorCode::PROTECTION_VIOLATION,
        });
    }

    Ok(mapping.phys + address.page_offset())
}

impl Kernel {
    /// Reads `buffer.len()` bytes at `address` as the user code of process `pid` would.
    ///
    /// Nothing is read unless the whole range is accessible.
    ///
    /// # Panics
    ///
    /// Panics if `pid` has no address space.
    pub fn read_memory(
        &self,
        pid: Pid,
        address: VirtualAddress,
        buffer: &mut [u8],
    ) -> Result<(), PageFault> {
        let chunks = self.user_chunks(pid, address, buffer.len(), Access::Read)?;
        let mut offset = 0;
        for (phys, range) in chunks {
            let len = range.len();
            buffer[offset..offset + len].copy_from_slice(&self.pmm.page(phys)[range]);
            offset += len;
        }
        Ok(())
    }

    /// Writes `data` at `address` as the user code of process `pid` would.
    ///
    /// Nothing is written unless the whole range is writable. A refused write to a
    /// copy-on-write page succeeds once the returned fault has been delivered.
    ///
    /// # Panics
    ///
    /// Panics if `pid` has no address space.
    pub fn write_memory(
        &mut self,
        pid: Pid,
        address: VirtualAddress,
        data: &[u8],
    ) -> Result<(), PageFault> {
        let chunks = self.user_chunks(pid, address, data.len(), Access::Write)?;
        let mut offset = 0;
        for (phys, range) in chunks {
            let len = range.len();
            self.pmm.page_mut(phys)[range].copy_from_slice(&data[offset..offset + len]);
            offset += len;
        }
        Ok(())
    }

    /// Reads a NUL-terminated string of at most `limit` bytes from user memory.
    ///
    /// Stops early at the first inaccessible byte. Invalid UTF-8 is replaced.
    pub(crate) fn read_user_string(
        &self,
        pid: Pid,
        address: VirtualAddress,
        limit: usize,
    ) -> String {
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        for offset in 0..limit {
            let Some(at) = address.as_usize().checked_add(offset) else {
                break;
            };
            let at = VirtualAddress::new_truncate(at);
            if self.read_memory(pid, at, &mut byte).is_err() || byte[0] == 0 {
                break;
            }
            bytes.push(byte[0]);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Splits a user access into per-page pieces, translating each one up front.
    fn user_chunks(
        &self,
        pid: Pid,
        address: VirtualAddress,
        len: usize,
        access: Access,
    ) -> Result<Vec<(PhysicalAddress, Range<usize>)>, PageFault> {
        let directory = self
            .processes
            .get(pid)
            .and_then(|process| process.directory())
            .unwrap_or_else(|| panic!("pid {pid} has no address space"));

        let mut chunks = Vec::new();
        let mut cursor = address.as_usize();
        let end = cursor.saturating_add(len);
        while cursor < end {
            let virt = VirtualAddress::new_truncate(cursor);
            let phys = translate(&self.pmm, directory, virt, access, true)?;
            let offset = virt.page_offset();
            let len = (PAGE_SIZE - offset).min(end - cursor);
            chunks.push((phys.align_down(PAGE_SIZE), offset..offset + len));
            cursor += len;
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmm::{BootMemoryRegion, MemoryMap, PageFlags};

    struct Ram;

    impl BootMemoryRegion for Ram {
        fn base(&self) -> PhysicalAddress {
            PhysicalAddress::ZERO
        }

        fn size(&self) -> usize {
            64 * PAGE_SIZE
        }

        fn is_usable(&self) -> bool {
            true
        }
    }

    fn setup() -> (PhysicalMemoryManager, PageDirectory) {
        let mut pmm = PhysicalMemoryManager::new(MemoryMap::from_boot_map(&[Ram]));
        let mut directory = PageDirectory::new(&mut pmm).unwrap();
        let user = VirtualAddress::new(0x10_0000);
        let kernel = VirtualAddress::new(0x20_0000);
        let read_only = VirtualAddress::new(0x10_1000);
        for (virt, flags) in [
            (user, PageFlags::user_read_write()),
            (kernel, PageFlags::kernel_read_write()),
            (read_only, PageFlags::user_read_write().write_protected()),
        ] {
            let page = pmm.allocate().unwrap();
            directory.map(&mut pmm, virt, page, flags).unwrap();
        }
        (pmm, directory)
    }

    #[test]
    fn translates_with_offset() {
        let (pmm, directory) = setup();
        let phys = translate(&pmm, &directory, VirtualAddress::new(0x10_0042), Access::Write, true)
            .unwrap();
        assert_eq!(phys.page_offset(), 0x42);
    }

    #[test]
    fn missing_page_is_not_a_protection_violation() {
        let (pmm, directory) = setup();
        let fault = translate(&pmm, &directory, VirtualAddress::new(0x10_2000), Access::Read, true)
            .unwrap_err();
        assert_eq!(fault.error_code, PageFaultErrorCode::USER_MODE);
    }

    #[test]
    fn user_cannot_touch_kernel_pages() {
        let (pmm, directory) = setup();
        let kernel = VirtualAddress::new(0x20_0000);
        let fault = translate(&pmm, &directory, kernel, Access::Read, true).unwrap_err();
        assert!(fault.error_code.contains(PageFaultErrorCode::PROTECTION_VIOLATION));
        assert!(translate(&pmm, &directory, kernel, Access::Write, false).is_ok());
    }

    #[test]
    fn writes_to_read_only_pages_fault() {
        let (pmm, directory) = setup();
        let address = VirtualAddress::new(0x10_1000);
        assert!(translate(&pmm, &directory, address, Access::Read, true).is_ok());
        let fault = translate(&pmm, &directory, address, Access::Write, true).unwrap_err();
        assert_eq!(
            fault.error_code,
            PageFaultErrorCode::PROTECTION_VIOLATION
                | PageFaultErrorCode::CAUSED_BY_WRITE
                | PageFaultErrorCode::USER_MODE
        );
    }
}
