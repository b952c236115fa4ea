//! Hooks into the hardware the kernel core does not drive itself.

/// Fire-and-forget notifications to the surrounding platform.
///
/// None of these report anything back; the kernel's behavior never depends on them, so
/// a test harness can ignore all of them.
pub trait Devices: Send {
    /// Called at the start of every trap, before it is dispatched.
    fn trap_entered(&mut self) {}

    /// Gives the platform a chance to check for operator input.
    fn poll_keyboard(&mut self) {}

    /// Acknowledges the timer interrupt that is being handled.
    fn acknowledge_timer(&mut self) {}
}

/// Devices that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDevices;

impl Devices for NullDevices {}
