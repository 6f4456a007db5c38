use thiserror::Error;

use crate::state::psl::AccessMode;

/// Fault classes used for diagnostics aggregation and SCB routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Memory-management translation or protection violation.
    MemoryManagement,
    /// Operand, addressing-mode, or instruction encoding violation.
    Reserved,
    /// Privilege-gated operation violation.
    Privilege,
    /// Integer/decimal arithmetic trap condition.
    Arithmetic,
    /// Compatibility-mode entry or execution condition.
    Compatibility,
    /// Severe bus/parity/cache failure.
    MachineCheck,
}

/// Stable fault taxonomy routed through the SCB by the instruction loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultKind {
    /// Virtual page number exceeds the region length register.
    #[error("page-table length violation")]
    LengthViolation,
    /// PTE protection field denies the requested access.
    #[error("access-control violation")]
    AccessViolation,
    /// PTE valid bit is clear.
    #[error("translation not valid")]
    TranslationNotValid,
    /// Protection violation while translating a process page-table address.
    #[error("page-table access-control violation")]
    PageTableAccessViolation,
    /// Invalid translation while translating a process page-table address.
    #[error("page-table translation not valid")]
    PageTableTranslationNotValid,
    /// Operand value outside the architecturally permitted range.
    #[error("reserved operand")]
    ReservedOperand,
    /// Addressing form not permitted for this operand.
    #[error("reserved addressing mode")]
    ReservedAddressingMode,
    /// Opcode or opcode variant not implemented by this processor.
    #[error("reserved instruction")]
    ReservedInstruction,
    /// Kernel-only operation attempted from an outer mode.
    #[error("privileged instruction")]
    PrivilegedInstruction,
    /// Integer/decimal overflow, float underflow, or divide by zero.
    #[error("arithmetic trap")]
    ArithmeticTrap,
    /// Compatibility-mode exception.
    #[error("compatibility-mode fault")]
    CompatibilityFault,
    /// Severe bus, parity, or cache failure during an access.
    #[error("machine check")]
    MachineCheck,
}

impl FaultKind {
    /// Returns the diagnostics class for this fault kind.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::LengthViolation
            | Self::AccessViolation
            | Self::TranslationNotValid
            | Self::PageTableAccessViolation
            | Self::PageTableTranslationNotValid => FaultClass::MemoryManagement,
            Self::ReservedOperand | Self::ReservedAddressingMode | Self::ReservedInstruction => {
                FaultClass::Reserved
            }
            Self::PrivilegedInstruction => FaultClass::Privilege,
            Self::ArithmeticTrap => FaultClass::Arithmetic,
            Self::CompatibilityFault => FaultClass::Compatibility,
            Self::MachineCheck => FaultClass::MachineCheck,
        }
    }

    /// Faults whose delivery failure escalates to a fatal machine stop.
    #[must_use]
    pub const fn is_severe(self) -> bool {
        matches!(self, Self::MachineCheck)
    }
}

/// Single unwind payload carried by every faulting MMU/executor call.
///
/// `param1`/`param2` are the longwords the guest handler expects on its
/// stack: the reason mask and faulting virtual address for memory-management
/// faults, the trap type code for arithmetic traps, zero otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[error("{kind} (param1={param1:#010x}, param2={param2:#010x})")]
pub struct Fault {
    /// Taxonomy kind selecting the SCB vector.
    pub kind: FaultKind,
    /// First stacked fault parameter.
    pub param1: u32,
    /// Second stacked fault parameter.
    pub param2: u32,
}

impl Fault {
    /// Builds a fault with no stacked parameters.
    #[must_use]
    pub const fn new(kind: FaultKind) -> Self {
        Self {
            kind,
            param1: 0,
            param2: 0,
        }
    }

    /// Builds a memory-management fault carrying {reason mask, virtual address}.
    #[must_use]
    pub const fn memory(kind: FaultKind, reason: u32, va: u32) -> Self {
        Self {
            kind,
            param1: reason,
            param2: va,
        }
    }

    /// Builds an arithmetic trap carrying the architectural type code.
    #[must_use]
    pub const fn arithmetic(type_code: u32) -> Self {
        Self {
            kind: FaultKind::ArithmeticTrap,
            param1: type_code,
            param2: 0,
        }
    }
}

/// Memory-management fault reason-mask bits stacked as `param1`.
pub mod mm_reason {
    /// Set when the reference violated the length register.
    pub const LENGTH: u32 = 0x01;
    /// Set when the failure occurred on a page-table reference.
    pub const PTE_REF: u32 = 0x02;
    /// Set when the intent was a write or modify reference.
    pub const WRITE: u32 = 0x04;
}

/// Arithmetic trap type codes stacked as `param1`.
pub mod arith_code {
    /// Integer overflow trap.
    pub const INT_OVERFLOW: u32 = 1;
    /// Integer divide-by-zero trap.
    pub const INT_DIVZERO: u32 = 2;
    /// Floating underflow fault.
    pub const FLT_UNDERFLOW: u32 = 6;
    /// Decimal overflow trap.
    pub const DEC_OVERFLOW: u32 = 4;
}

/// Unrecoverable machine stops requiring a full external reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FatalStop {
    /// SCB vector longword has bit 1 set.
    #[error("illegal SCB vector {vector:#010x} at offset {offset:#x}")]
    IllegalVector {
        /// Vector longword as read from the SCB.
        vector: u32,
        /// Byte offset of the vector within the SCB.
        offset: u16,
    },
    /// A second machine check occurred while delivering a machine check.
    #[error("nested machine check during exception delivery")]
    DoubleMachineCheck,
    /// A change-mode instruction executed on the interrupt stack.
    #[error("change-mode instruction on the interrupt stack")]
    ChangeModeOnInterruptStack,
    /// The halt pin was asserted.
    #[error("halt pin asserted")]
    HaltPin,
}

/// Access intent used by translation, probing, and the virtual accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessIntent {
    /// Read or instruction-fetch reference.
    Read,
    /// Write or modify reference.
    Write,
}

impl AccessIntent {
    /// Returns the reason-mask contribution for this intent.
    #[must_use]
    pub const fn reason_bit(self) -> u32 {
        match self {
            Self::Read => 0,
            Self::Write => mm_reason::WRITE,
        }
    }
}

/// Builds the reserved-operand fault raised by mode-sensitive operand checks.
#[must_use]
pub const fn reserved_operand() -> Fault {
    Fault::new(FaultKind::ReservedOperand)
}

/// Builds the privileged-instruction fault for non-kernel callers.
#[must_use]
pub const fn privilege_violation(mode: AccessMode) -> Fault {
    Fault {
        kind: FaultKind::PrivilegedInstruction,
        param1: mode as u32,
        param2: 0,
    }
}
