//! Owned CPU context: registers, PSL, stacks, control registers, TLB, and
//! pending interrupt lines. All mutation flows through this object so hosts
//! can run multiple independent instances.

use crate::state::psl::{AccessMode, PSL_IS, Psl};
use crate::state::registers::{ControlRegisters, RegisterFile, StackBank};
use crate::memory::tlb::Tlb;

/// Number of hardware device request levels (IPL 20..=23).
pub const DEVICE_IPL_LEVELS: usize = 4;
/// Lowest hardware device IPL.
pub const DEVICE_IPL_BASE: u32 = 20;
/// IPL of the interval-timer line.
pub const TIMER_IPL: u32 = 22;
/// IPL of the console line.
pub const CONSOLE_IPL: u32 = 20;

/// Per-level pending-request registers set by device/bus collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct InterruptLines {
    /// Halt pin; highest priority, not vectored.
    pub halt_pin: bool,
    /// Uncorrectable memory error.
    pub mem_err: bool,
    /// Corrected read data.
    pub crd_err: bool,
    /// One slot bit per device, indexed by IPL - 20.
    pub device: [u32; DEVICE_IPL_LEVELS],
    /// Interval timer line (IPL 22).
    pub timer: bool,
    /// Console line (IPL 20).
    pub console: bool,
}

impl InterruptLines {
    /// Returns `true` when any device slot is pending at `level` (20..=23).
    #[must_use]
    pub const fn device_pending(&self, level: u32) -> bool {
        self.device[(level - DEVICE_IPL_BASE) as usize] != 0
    }

    /// Asserts a device slot at `level` (20..=23).
    pub const fn request_device(&mut self, level: u32, slot: u8) {
        self.device[(level - DEVICE_IPL_BASE) as usize] |= 1 << slot;
    }
}

/// Immutable per-instance configuration, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuConfig {
    /// Memory mapping enable at reset; real machines boot with mapping off.
    pub mapen_at_reset: bool,
    /// Bytes processed between suspension polls inside string instructions.
    pub string_poll_interval: u32,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            mapen_at_reset: false,
            string_poll_interval: 64,
        }
    }
}

/// Complete CPU execution and memory-management state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Cpu {
    /// General register file (R0..R15 with AP/FP/SP/PC aliases).
    pub regs: RegisterFile,
    /// Processor status longword.
    pub psl: Psl,
    /// Saved per-mode and interrupt stack pointers; one is live in SP.
    pub stacks: StackBank,
    /// Memory-management and dispatch control registers.
    pub control: ControlRegisters,
    /// Two-bank direct-mapped translation buffer.
    pub tlb: Tlb,
    /// Pending interrupt request lines.
    pub lines: InterruptLines,
    /// Host hint that an interrupt is pending; resumable string instructions
    /// poll this and suspend via the first-part-done protocol when set.
    pub suspend_request: bool,
    /// Construction-time configuration.
    pub config: CpuConfig,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::with_config(CpuConfig::default())
    }
}

impl Cpu {
    /// Creates a CPU in the post-reset state for the given configuration.
    #[must_use]
    pub fn with_config(config: CpuConfig) -> Self {
        let mut cpu = Self {
            regs: RegisterFile::default(),
            psl: Psl::default(),
            stacks: StackBank::default(),
            control: ControlRegisters::default(),
            tlb: Tlb::default(),
            lines: InterruptLines::default(),
            suspend_request: false,
            config,
        };
        cpu.reset();
        cpu
    }

    /// Applies reset semantics: kernel mode, IPL 31, mapping per config,
    /// empty TLB, no pending requests. Physical memory is host-owned and
    /// untouched.
    pub fn reset(&mut self) {
        self.regs = RegisterFile::default();
        self.psl = Psl::default();
        self.psl.set_ipl(31);
        self.stacks = StackBank::default();
        self.control = ControlRegisters::default();
        self.control.mapen = u32::from(self.config.mapen_at_reset);
        self.tlb = Tlb::default();
        self.lines = InterruptLines::default();
        self.suspend_request = false;
    }

    /// Returns the current access mode from the PSL.
    #[must_use]
    pub const fn current_mode(&self) -> AccessMode {
        self.psl.current_mode()
    }

    /// Saves the live SP back into its stack-bank slot.
    pub const fn save_live_sp(&mut self) {
        if self.psl.is_set(PSL_IS) {
            self.stacks.set_interrupt(self.regs.sp());
        } else {
            let mode = self.psl.current_mode();
            self.stacks.set_mode(mode, self.regs.sp());
        }
    }

    /// Loads SP from the stack-bank slot selected by the current PSL.
    pub const fn load_live_sp(&mut self) {
        if self.psl.is_set(PSL_IS) {
            self.regs.set_sp(self.stacks.interrupt());
        } else {
            let mode = self.psl.current_mode();
            self.regs.set_sp(self.stacks.mode(mode));
        }
    }

    /// Consumes the host's suspension hint.
    pub const fn take_suspend_request(&mut self) -> bool {
        let pending = self.suspend_request;
        self.suspend_request = false;
        pending
    }
}
