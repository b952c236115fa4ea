//! Trap frames, interrupt vectors and the exception dispatcher.

use core::fmt;

use pmm::VirtualAddress;
use x86_64::structures::idt::PageFaultErrorCode;

use crate::{Kernel, Registers, Resume, fork::CowResolution, mmu::Access};

#[macro_export]
macro_rules! interrupt_vectors {
    (
        $storage: ty,
        $(
            $name:ident = $value:expr,
        )*
    ) => {
        /// Represents an interrupt vector.
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct InterruptVector($storage);

        impl InterruptVector {
            $(
                pub const $name: Self = Self($value);
            )*

            /// Creates a new interrupt vector from a raw value.
            pub const fn new(value: $storage) -> Self {
                Self(value)
            }

            /// Returns the raw value of the interrupt vector.
            pub const fn value(&self) -> $storage {
                self.0
            }

            /// Returns the name of the interrupt vector, if known.
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $(
                        $value => Some(stringify!($name)),
                    )*
                    _ => None,
                }
            }
        }

        impl From<$storage> for InterruptVector {
            fn from(value: $storage) -> Self {
                Self(value)
            }
        }

        impl core::fmt::Debug for InterruptVector {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if let Some(name) = self.name() {
                    write!(f, "InterruptVector::{}({})", name, self.0)
                } else {
                    write!(f, "InterruptVector({})", self.0)
                }
            }
        }

        impl core::fmt::Display for InterruptVector {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if let Some(name) = self.name() {
                    write!(f, "{}", name)
                } else {
                    write!(f, "{}", self.0)
                }
            }
        }
    }
}

crate::interrupt_vectors! {
    u8,
    DIVIDE_ERROR = 0,
    DEBUG = 1,
    NON_MASKABLE_INTERRUPT = 2,
    BREAKPOINT = 3,
    OVERFLOW = 4,
    BOUND_RANGE_EXCEEDED = 5,
    INVALID_OPCODE = 6,
    DEVICE_NOT_AVAILABLE = 7,
    DOUBLE_FAULT = 8,
    INVALID_TSS = 10,
    SEGMENT_NOT_PRESENT = 11,
    STACK_SEGMENT_FAULT = 12,
    GENERAL_PROTECTION_FAULT = 13,
    PAGE_FAULT = 14,
    X87_FLOATING_POINT_EXCEPTION = 16,
    ALIGNMENT_CHECK = 17,
    MACHINE_CHECK = 18,
    SIMD_FLOATING_POINT_EXCEPTION = 19,
    TIMER = 32,
}

/// Everything the trap-entry code captured for one exception or interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    pub vector: InterruptVector,
    /// Hardware error code, zero for vectors that do not push one.
    pub error_code: u64,
    /// Contents of `cr2`; only meaningful for page faults.
    pub fault_address: VirtualAddress,
    pub registers: Registers,
}

impl TrapFrame {
    /// A trap without an error code.
    pub fn new(vector: InterruptVector, registers: Registers) -> Self {
        Self {
            vector,
            error_code: 0,
            fault_address: VirtualAddress::ZERO,
            registers,
        }
    }

    pub fn timer(registers: Registers) -> Self {
        Self::new(InterruptVector::TIMER, registers)
    }

    pub fn page_fault(
        registers: Registers,
        address: VirtualAddress,
        error_code: PageFaultErrorCode,
    ) -> Self {
        Self {
            vector: InterruptVector::PAGE_FAULT,
            error_code: error_code.bits(),
            fault_address: address,
            registers,
        }
    }
}

/// A page fault decoded from its trap frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFault {
    pub address: VirtualAddress,
    pub access: Access,
    /// The page was present; the access broke its permissions.
    pub protection_violation: bool,
    /// The trapped code segment was a user segment.
    pub user_mode: bool,
}

impl PendingFault {
    pub fn decode(frame: &TrapFrame) -> Self {
        let code = PageFaultErrorCode::from_bits_truncate(frame.error_code);
        Self {
            address: frame.fault_address,
            access: if code.contains(PageFaultErrorCode::CAUSED_BY_WRITE) {
                Access::Write
            } else {
                Access::Read
            },
            protection_violation: code.contains(PageFaultErrorCode::PROTECTION_VIOLATION),
            user_mode: frame.registers.is_user_mode(),
        }
    }
}

impl fmt::Display for PendingFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} on {}",
            match self.access {
                Access::Read => "read",
                Access::Write => "write",
            },
            if self.protection_violation {
                "protection problem"
            } else {
                "missing page"
            },
            self.address
        )
    }
}

impl Kernel {
    /// Handles an exception or hardware interrupt.
    ///
    /// # Panics
    ///
    /// Panics on any fault the kernel itself caused.
    pub fn exception(&mut self, frame: &TrapFrame) -> Resume {
        self.devices.trap_entered();
        let user = frame.registers.is_user_mode();
        if user {
            self.save_registers(&frame.registers);
        }
        self.devices.poll_keyboard();

        match frame.vector {
            InterruptVector::TIMER => {
                self.ticks += 1;
                self.devices.acknowledge_timer();
                return self.schedule();
            }
            InterruptVector::PAGE_FAULT => {
                let fault = PendingFault::decode(frame);
                match self.resolve_cow_fault(&fault) {
                    CowResolution::Resolved => return self.run(self.current),
                    CowResolution::OutOfMemory => {
                        log::warn!(
                            "process {} out of memory copying page {}; exiting",
                            self.current,
                            fault.address
                        );
                        self.exit(self.current);
                        return self.schedule();
                    }
                    CowResolution::NotCopyOnWrite => {}
                }

                if !user {
                    panic!(
                        "kernel page fault: {fault} (rip={:#x})",
                        frame.registers.rip
                    );
                }
                log::warn!(
                    "process {} page fault: {fault} (rip={:#x})",
                    self.current,
                    frame.registers.rip
                );
            }
            vector => {
                if !user {
                    panic!(
                        "unhandled exception {vector} in kernel mode (rip={:#x})",
                        frame.registers.rip
                    );
                }
                log::warn!(
                    "process {} unhandled exception {vector} (rip={:#x})",
                    self.current,
                    frame.registers.rip
                );
            }
        }

        self.processes.mark_faulted(self.current);
        self.schedule()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Pid, ProcessState, test_support::booted};

    #[test]
    fn vector_names() {
        assert_eq!(InterruptVector::PAGE_FAULT.value(), 14);
        assert_eq!(InterruptVector::from(32).name(), Some("TIMER"));
        assert_eq!(format!("{}", InterruptVector::new(99)), "99");
        assert_eq!(
            format!("{:?}", InterruptVector::GENERAL_PROTECTION_FAULT),
            "InterruptVector::GENERAL_PROTECTION_FAULT(13)"
        );
    }

    #[test]
    fn decodes_user_write_protection_fault() {
        let frame = TrapFrame::page_fault(
            Registers::user(VirtualAddress::new(0x10_0000), VirtualAddress::new(0x30_0000)),
            VirtualAddress::new(0x10_0010),
            PageFaultErrorCode::PROTECTION_VIOLATION
                | PageFaultErrorCode::CAUSED_BY_WRITE
                | PageFaultErrorCode::USER_MODE,
        );
        let fault = PendingFault::decode(&frame);
        assert_eq!(fault.access, Access::Write);
        assert!(fault.protection_violation);
        assert!(fault.user_mode);
        assert_eq!(format!("{fault}"), "write protection problem on 0x100010");
    }

    #[test]
    fn decodes_kernel_read_of_missing_page() {
        let frame = TrapFrame::page_fault(
            Registers::default(),
            VirtualAddress::ZERO,
            PageFaultErrorCode::empty(),
        );
        let fault = PendingFault::decode(&frame);
        assert_eq!(fault.access, Access::Read);
        assert!(!fault.protection_violation && !fault.user_mode);
    }

    #[test]
    fn privilege_comes_from_code_segment() {
        let frame = TrapFrame::page_fault(
            Registers::kernel(0x4_1000, 0x8_0000),
            VirtualAddress::new(0x10_0000),
            PageFaultErrorCode::CAUSED_BY_WRITE | PageFaultErrorCode::USER_MODE,
        );
        assert!(!PendingFault::decode(&frame).user_mode);
    }

    #[test]
    fn user_protection_fault_marks_process_faulted() {
        let mut kernel = booted(2);
        let pid = Pid::new(1);
        let registers = *kernel.process(pid).unwrap().registers();
        let frame = TrapFrame::new(InterruptVector::GENERAL_PROTECTION_FAULT, registers);

        assert_eq!(kernel.exception(&frame), Resume::Run(Pid::new(2)));
        assert_eq!(kernel.process(pid).unwrap().state(), ProcessState::Faulted);
        assert!(kernel.process(pid).unwrap().directory().is_some());
    }

    #[test]
    fn write_to_read_only_code_marks_process_faulted() {
        let mut kernel = booted(2);
        let pid = Pid::new(1);
        let code = VirtualAddress::new(0x10_0000);
        let fault = kernel.write_memory(pid, code, b"x").unwrap_err();
        let registers = *kernel.process(pid).unwrap().registers();

        assert_eq!(
            kernel.exception(&fault.trap_frame(registers)),
            Resume::Run(Pid::new(2))
        );
        assert_eq!(kernel.process(pid).unwrap().state(), ProcessState::Faulted);

        let mapping = kernel
            .process(pid)
            .unwrap()
            .directory()
            .unwrap()
            .lookup(kernel.pmm(), code)
            .unwrap();
        assert!(!mapping.flags.is_writable() && !mapping.flags.is_copy_on_write());
        assert_eq!(kernel.audit(), Ok(()));
    }

    #[test]
    #[should_panic(expected = "in kernel mode")]
    fn kernel_protection_fault_halts() {
        let mut kernel = booted(1);
        let frame = TrapFrame::new(
            InterruptVector::GENERAL_PROTECTION_FAULT,
            Registers::kernel(0x4_1000, 0x8_0000),
        );
        kernel.exception(&frame);
    }

    #[test]
    #[should_panic(expected = "kernel page fault")]
    fn kernel_page_fault_halts() {
        let mut kernel = booted(1);
        let frame = TrapFrame::page_fault(
            Registers::kernel(0x4_1000, 0x8_0000),
            VirtualAddress::ZERO,
            PageFaultErrorCode::empty(),
        );
        kernel.exception(&frame);
    }

    #[test]
    #[should_panic(expected = "kernel page fault")]
    fn kernel_page_fault_with_user_error_bit_halts() {
        let mut kernel = booted(1);
        let frame = TrapFrame::page_fault(
            Registers::kernel(0x4_1000, 0x8_0000),
            VirtualAddress::new(0x10_0000),
            PageFaultErrorCode::PROTECTION_VIOLATION
                | PageFaultErrorCode::CAUSED_BY_WRITE
                | PageFaultErrorCode::USER_MODE,
        );
        kernel.exception(&frame);
    }
}
