//! Page table entry flags for x86_64 architecture.

use core::fmt;

use x86_64::structures::paging::PageTableFlags;

/// Page table entry flags for x86_64.
///
/// This wraps the x86_64 crate's page table entry flags and adds the kernel-private
/// copy-on-write marker, stored in the first OS-available bit of the entry.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(PageTableFlags);

impl PageFlags {
    /// Kernel-private marker for pages shared copy-on-write between address spaces.
    const COPY_ON_WRITE: PageTableFlags = PageTableFlags::BIT_9;

    /// Bits this kernel stores in an entry; everything else is dropped.
    const KNOWN: PageTableFlags = PageTableFlags::from_bits_truncate(
        PageTableFlags::PRESENT.bits()
            | PageTableFlags::WRITABLE.bits()
            | PageTableFlags::USER_ACCESSIBLE.bits()
            | PageTableFlags::BIT_9.bits(),
    );

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(PageTableFlags::empty())
    }

    /// Present, writable, user-accessible: the permissions of a fresh heap page.
    pub const fn user_read_write() -> Self {
        Self(PageTableFlags::from_bits_truncate(
            PageTableFlags::PRESENT.bits()
                | PageTableFlags::WRITABLE.bits()
                | PageTableFlags::USER_ACCESSIBLE.bits(),
        ))
    }

    /// Present and user-accessible but read-only.
    pub const fn user_read_only() -> Self {
        Self(PageTableFlags::from_bits_truncate(
            PageTableFlags::PRESENT.bits() | PageTableFlags::USER_ACCESSIBLE.bits(),
        ))
    }

    /// Present and writable, reachable from kernel mode only.
    pub const fn kernel_read_write() -> Self {
        Self(PageTableFlags::from_bits_truncate(
            PageTableFlags::PRESENT.bits() | PageTableFlags::WRITABLE.bits(),
        ))
    }

    /// Creates flags from raw entry bits, discarding bits this kernel does not use.
    pub const fn from_bits(bits: u64) -> Self {
        Self(PageTableFlags::from_bits_truncate(
            bits & Self::KNOWN.bits(),
        ))
    }

    /// Returns the raw bits of these flags.
    pub const fn bits(self) -> u64 {
        self.0.bits()
    }

    /// Returns whether the present bit is set.
    pub fn is_present(self) -> bool {
        self.0.contains(PageTableFlags::PRESENT)
    }

    /// Sets or clears the present bit.
    pub fn set_present(&mut self, present: bool) {
        self.0.set(PageTableFlags::PRESENT, present);
    }

    /// Returns whether the writable bit is set.
    pub fn is_writable(self) -> bool {
        self.0.contains(PageTableFlags::WRITABLE)
    }

    /// Sets or clears the writable bit.
    pub fn set_writable(&mut self, writable: bool) {
        self.0.set(PageTableFlags::WRITABLE, writable);
    }

    /// Returns whether the user-accessible bit is set.
    pub fn is_user(self) -> bool {
        self.0.contains(PageTableFlags::USER_ACCESSIBLE)
    }

    /// Sets or clears the user-accessible bit.
    pub fn set_user(&mut self, user: bool) {
        self.0.set(PageTableFlags::USER_ACCESSIBLE, user);
    }

    /// Returns whether the copy-on-write marker is set.
    pub fn is_copy_on_write(self) -> bool {
        self.0.contains(Self::COPY_ON_WRITE)
    }

    /// Sets or clears the copy-on-write marker.
    pub fn set_copy_on_write(&mut self, cow: bool) {
        self.0.set(Self::COPY_ON_WRITE, cow);
    }

    /// Returns these flags write-protected and marked copy-on-write.
    pub fn write_protected(mut self) -> Self {
        self.set_writable(false);
        self.set_copy_on_write(true);
        self
    }

    /// Returns these flags promoted from copy-on-write to privately writable.
    pub fn promoted(mut self) -> Self {
        self.set_copy_on_write(false);
        self.set_writable(true);
        self
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "PageFlags({}{}{}{})",
            mark(self.is_present(), 'P'),
            mark(self.is_writable(), 'W'),
            mark(self.is_user(), 'U'),
            mark(self.is_copy_on_write(), 'C'),
        )
    }
}
