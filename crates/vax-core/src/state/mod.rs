//! Architectural CPU state model primitives.

/// Processor Status Longword model and access modes.
pub mod psl;
/// Register file, stack bank, and system control registers.
pub mod registers;

pub use psl::{AccessMode, Psl};
pub use registers::{
    ControlRegisters, GENERAL_REGISTER_COUNT, REG_AP, REG_FP, REG_PC, REG_SP, RegisterFile,
    StackBank,
};
