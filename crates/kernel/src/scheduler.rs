//! Round-robin scheduling over the process table.

use crate::{Pid, ProcessTable};

/// Picks the next process to run after `current`.
///
/// Slots are scanned starting at `current + 1`, wrapping around the table, so `current`
/// itself is considered last. Returns `None` if nothing is runnable.
pub fn pick_next(table: &ProcessTable, current: Pid) -> Option<Pid> {
    let capacity = table.capacity();
    (1..=capacity)
        .map(|step| Pid::new((current.as_usize() + step) % capacity))
        .find(|pid| table.get(*pid).is_some_and(|process| process.is_runnable()))
}

/// What the trap-entry code should do once the kernel returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Restore the saved registers of this process and return to user mode.
    Run(Pid),
    /// Nothing is runnable: halt until the next interrupt, then call
    /// [`Kernel::idle`](crate::Kernel::idle) or deliver the interrupt.
    Idle,
}
