/// Holds metadata for a physical memory frame.
///
/// Modeled after Linux's `struct page`, this records whether the frame may be handed out
/// at all and, if so, how many owners currently hold it. A frame is free exactly when it
/// is not reserved and its reference count is zero.
#[derive(Debug, Default)]
pub struct Frame {
    /// Flags identifying the state of this frame.
    pub flags: FrameFlags,
    /// Number of owners: present user mappings plus page-table uses of this frame.
    refcount: u32,
}

impl Frame {
    /// Creates metadata for a frame that must never be allocated.
    pub const fn reserved() -> Self {
        Self {
            flags: FrameFlags::from_bits(FrameFlag::Reserved as u8),
            refcount: 0,
        }
    }

    /// Returns the current reference count.
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Returns true if the frame is reserved for the kernel or devices.
    pub fn is_reserved(&self) -> bool {
        self.flags.test(FrameFlag::Reserved)
    }

    /// Returns true if the frame can be handed out right now.
    pub fn is_free(&self) -> bool {
        !self.is_reserved() && self.refcount == 0
    }

    /// Adds an owner and returns the new count.
    pub(crate) fn acquire(&mut self) -> u32 {
        self.refcount = self
            .refcount
            .checked_add(1)
            .expect("frame reference count overflow");
        self.refcount
    }

    /// Drops an owner and returns the remaining count.
    ///
    /// # Panics
    ///
    /// Panics if the frame has no owners; a count below zero means the ownership
    /// bookkeeping has already diverged from the page tables.
    pub(crate) fn drop_owner(&mut self) -> u32 {
        assert!(self.refcount > 0, "frame reference count underflow");
        self.refcount -= 1;
        self.refcount
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FrameFlag {
    /// Frame is reserved and should not be allocated.
    Reserved = 1 << 0,
}

/// Flags for a physical memory frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Creates a new `FrameFlags` instance with all flags cleared.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Creates a new `FrameFlags` instance with the given initial flags.
    pub const fn from_bits(initial: u8) -> Self {
        Self(initial)
    }

    /// Sets the given flag.
    pub fn set(&mut self, flag: FrameFlag) {
        self.0 |= flag as u8;
    }

    /// Clears the given flag.
    pub fn clear(&mut self, flag: FrameFlag) {
        self.0 &= !(flag as u8);
    }

    /// Tests if the given flag is set.
    pub fn test(&self, flag: FrameFlag) -> bool {
        (self.0 & flag as u8) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_frames_are_never_free() {
        let frame = Frame::reserved();
        assert!(frame.is_reserved());
        assert!(!frame.is_free());
    }

    #[test]
    fn counts_owners() {
        let mut frame = Frame::default();
        assert!(frame.is_free());
        assert_eq!(frame.acquire(), 1);
        assert_eq!(frame.acquire(), 2);
        assert_eq!(frame.drop_owner(), 1);
        assert!(!frame.is_free());
        assert_eq!(frame.drop_owner(), 0);
        assert!(frame.is_free());
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn underflow_is_fatal() {
        Frame::default().drop_owner();
    }

    #[test]
    fn flags_set_and_clear() {
        let mut flags = FrameFlags::new();
        flags.set(FrameFlag::Reserved);
        assert!(flags.test(FrameFlag::Reserved));
        flags.clear(FrameFlag::Reserved);
        assert!(!flags.test(FrameFlag::Reserved));
    }
}
