//! Architectural register file, stack bank, and system control registers.

use crate::state::psl::AccessMode;

/// Number of architecturally visible general registers (`R0..R15`).
pub const GENERAL_REGISTER_COUNT: usize = 16;
/// Register index aliased as the Argument Pointer.
pub const REG_AP: usize = 12;
/// Register index aliased as the Frame Pointer.
pub const REG_FP: usize = 13;
/// Register index aliased as the Stack Pointer.
pub const REG_SP: usize = 14;
/// Register index aliased as the Program Counter.
pub const REG_PC: usize = 15;

/// Sixteen 32-bit general registers with AP/FP/SP/PC aliases.
///
/// Registers carry no inherent type; instructions interpret contents as
/// integers, addresses, or packed resumable-string state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    gpr: [u32; GENERAL_REGISTER_COUNT],
}

impl RegisterFile {
    /// Reads a general register by index (`0..=15`).
    #[must_use]
    pub const fn get(&self, index: usize) -> u32 {
        self.gpr[index]
    }

    /// Writes a general register by index (`0..=15`).
    pub const fn set(&mut self, index: usize, value: u32) {
        self.gpr[index] = value;
    }

    /// Reads the Argument Pointer (`R12`).
    #[must_use]
    pub const fn ap(&self) -> u32 {
        self.gpr[REG_AP]
    }

    /// Writes the Argument Pointer (`R12`).
    pub const fn set_ap(&mut self, value: u32) {
        self.gpr[REG_AP] = value;
    }

    /// Reads the Frame Pointer (`R13`).
    #[must_use]
    pub const fn fp(&self) -> u32 {
        self.gpr[REG_FP]
    }

    /// Writes the Frame Pointer (`R13`).
    pub const fn set_fp(&mut self, value: u32) {
        self.gpr[REG_FP] = value;
    }

    /// Reads the Stack Pointer (`R14`).
    #[must_use]
    pub const fn sp(&self) -> u32 {
        self.gpr[REG_SP]
    }

    /// Writes the Stack Pointer (`R14`).
    pub const fn set_sp(&mut self, value: u32) {
        self.gpr[REG_SP] = value;
    }

    /// Reads the Program Counter (`R15`).
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.gpr[REG_PC]
    }

    /// Writes the Program Counter (`R15`).
    pub const fn set_pc(&mut self, value: u32) {
        self.gpr[REG_PC] = value;
    }
}

/// Index of the interrupt stack pointer within the stack bank.
pub const STACK_INTERRUPT: usize = 4;

/// Five independent stack pointers; exactly one is live in `SP` at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StackBank {
    pointers: [u32; 5],
}

impl StackBank {
    /// Reads the saved stack pointer for an access mode.
    #[must_use]
    pub const fn mode(&self, mode: AccessMode) -> u32 {
        self.pointers[mode as usize]
    }

    /// Writes the saved stack pointer for an access mode.
    pub const fn set_mode(&mut self, mode: AccessMode, value: u32) {
        self.pointers[mode as usize] = value;
    }

    /// Reads the saved interrupt stack pointer.
    #[must_use]
    pub const fn interrupt(&self) -> u32 {
        self.pointers[STACK_INTERRUPT]
    }

    /// Writes the saved interrupt stack pointer.
    pub const fn set_interrupt(&mut self, value: u32) {
        self.pointers[STACK_INTERRUPT] = value;
    }

    /// Reads a stack slot by raw bank index (`0..=4`).
    #[must_use]
    pub const fn slot(&self, index: usize) -> u32 {
        self.pointers[index]
    }

    /// Writes a stack slot by raw bank index (`0..=4`).
    pub const fn set_slot(&mut self, index: usize, value: u32) {
        self.pointers[index] = value;
    }
}

/// Memory-management and dispatch control registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ControlRegisters {
    /// P0 region page-table base (system virtual byte address).
    pub p0br: u32,
    /// P0 region page-table length in PTEs.
    pub p0lr: u32,
    /// P1 region page-table base, pre-biased so `p1br + 4*vpn` addresses the PTE.
    pub p1br: u32,
    /// P1 region page-table length in PTEs; pages below it are unmapped.
    pub p1lr: u32,
    /// System region page-table base (physical byte address).
    pub sbr: u32,
    /// System region page-table length in PTEs.
    pub slr: u32,
    /// Process control block base (physical).
    pub pcbb: u32,
    /// System control block base (physical).
    pub scbb: u32,
    /// Asynchronous system trap level (0..=4).
    pub astlvl: u32,
    /// Software-interrupt summary, one bit per level 1..=15.
    pub sisr: u32,
    /// Memory-mapping enable; translation is identity when clear.
    pub mapen: u32,
    /// Performance-monitor enable.
    pub pme: u32,
}
