//! MTPR/MFPR: the internal processor register file.

use log::trace;

use crate::cpu::Cpu;
use crate::fault::{Fault, FaultKind, privilege_violation};
use crate::state::psl::{AccessMode, PSL_IS, PSL_V};

/// Internal processor register numbers.
pub mod ipr {
    /// Kernel stack pointer.
    pub const KSP: u32 = 0;
    /// Executive stack pointer.
    pub const ESP: u32 = 1;
    /// Supervisor stack pointer.
    pub const SSP: u32 = 2;
    /// User stack pointer.
    pub const USP: u32 = 3;
    /// Interrupt stack pointer.
    pub const ISP: u32 = 4;
    /// P0 page-table base.
    pub const P0BR: u32 = 8;
    /// P0 page-table length.
    pub const P0LR: u32 = 9;
    /// P1 page-table base.
    pub const P1BR: u32 = 10;
    /// P1 page-table length.
    pub const P1LR: u32 = 11;
    /// System page-table base.
    pub const SBR: u32 = 12;
    /// System page-table length.
    pub const SLR: u32 = 13;
    /// Process control block base.
    pub const PCBB: u32 = 16;
    /// System control block base.
    pub const SCBB: u32 = 17;
    /// Interrupt priority level.
    pub const IPL: u32 = 18;
    /// Asynchronous system trap level.
    pub const ASTLVL: u32 = 19;
    /// Software interrupt request (write-only).
    pub const SIRR: u32 = 20;
    /// Software interrupt summary.
    pub const SISR: u32 = 21;
    /// Memory-mapping enable.
    pub const MAPEN: u32 = 56;
    /// Translation-buffer invalidate all (write-only).
    pub const TBIA: u32 = 57;
    /// Translation-buffer invalidate single (write-only).
    pub const TBIS: u32 = 58;
    /// Performance-monitor enable.
    pub const PME: u32 = 61;
    /// System identification (read-only).
    pub const SID: u32 = 62;
    /// Translation-buffer check (write-only, result in the V flag).
    pub const TBCHK: u32 = 63;
}

/// Value reported by the read-only SID register.
pub const SID_VALUE: u32 = 0x0A00_0001;

/// Maximum page-table length in PTEs (a region is 2^21 pages).
const MAX_REGION_PTES: u32 = 1 << 21;

fn reserved(register: u32, value: u32) -> Fault {
    Fault {
        kind: FaultKind::ReservedOperand,
        param1: register,
        param2: value,
    }
}

fn require_kernel(cpu: &Cpu) -> Result<(), Fault> {
    let mode = cpu.current_mode();
    if mode == AccessMode::Kernel {
        Ok(())
    } else {
        Err(privilege_violation(mode))
    }
}

/// `true` when the stack-bank slot is the one currently live in SP.
fn slot_is_live(cpu: &Cpu, slot: usize) -> bool {
    if slot == 4 {
        cpu.psl.is_set(PSL_IS)
    } else {
        !cpu.psl.is_set(PSL_IS) && cpu.current_mode() as usize == slot
    }
}

fn read_stack_slot(cpu: &Cpu, slot: usize) -> u32 {
    if slot_is_live(cpu, slot) {
        cpu.regs.sp()
    } else {
        cpu.stacks.slot(slot)
    }
}

fn write_stack_slot(cpu: &mut Cpu, slot: usize, value: u32) {
    if slot_is_live(cpu, slot) {
        cpu.regs.set_sp(value);
    } else {
        cpu.stacks.set_slot(slot, value);
    }
}

/// MTPR: writes an internal processor register.
///
/// Page-table base/length writes invalidate the affected translation-buffer
/// bank; TBCHK reports its probe through the V condition code.
///
/// # Errors
///
/// Faults privileged-instruction outside kernel mode and reserved-operand
/// for unknown registers, read-only registers, unaligned bases, and
/// out-of-range lengths, ASTLVL, or SIRR levels.
pub fn mtpr(cpu: &mut Cpu, register: u32, value: u32) -> Result<(), Fault> {
    require_kernel(cpu)?;
    trace!("mtpr: ipr {register} <- {value:#010x}");
    match register {
        ipr::KSP | ipr::ESP | ipr::SSP | ipr::USP | ipr::ISP => {
            write_stack_slot(cpu, register as usize, value);
        }
        ipr::P0BR | ipr::P1BR => {
            if value & 3 != 0 {
                return Err(reserved(register, value));
            }
            if register == ipr::P0BR {
                cpu.control.p0br = value;
            } else {
                cpu.control.p1br = value;
            }
            cpu.tlb.invalidate_process();
        }
        ipr::P0LR | ipr::P1LR => {
            if value > MAX_REGION_PTES {
                return Err(reserved(register, value));
            }
            if register == ipr::P0LR {
                cpu.control.p0lr = value;
            } else {
                cpu.control.p1lr = value;
            }
            cpu.tlb.invalidate_process();
        }
        ipr::SBR => {
            if value & 3 != 0 {
                return Err(reserved(register, value));
            }
            cpu.control.sbr = value;
            cpu.tlb.invalidate_system();
        }
        ipr::SLR => {
            if value > MAX_REGION_PTES {
                return Err(reserved(register, value));
            }
            cpu.control.slr = value;
            cpu.tlb.invalidate_system();
        }
        ipr::PCBB => {
            if value & 3 != 0 {
                return Err(reserved(register, value));
            }
            cpu.control.pcbb = value;
        }
        ipr::SCBB => {
            // The SCB occupies whole pages.
            if value & 0x1FF != 0 {
                return Err(reserved(register, value));
            }
            cpu.control.scbb = value;
        }
        ipr::IPL => cpu.psl.set_ipl(value & 0x1F),
        ipr::ASTLVL => {
            if value > 4 {
                return Err(reserved(register, value));
            }
            cpu.control.astlvl = value;
        }
        ipr::SIRR => {
            if !(1..=15).contains(&value) {
                return Err(reserved(register, value));
            }
            cpu.control.sisr |= 1 << value;
        }
        ipr::SISR => cpu.control.sisr = value & 0xFFFE,
        ipr::MAPEN => {
            cpu.control.mapen = value & 1;
            cpu.tlb.invalidate_all();
        }
        ipr::TBIA => cpu.tlb.invalidate_all(),
        ipr::TBIS => cpu.tlb.invalidate_single(value),
        ipr::PME => cpu.control.pme = value & 1,
        ipr::TBCHK => {
            let present = cpu.tlb.tag_present(value);
            cpu.psl.set_flag(PSL_V, present);
        }
        _ => return Err(reserved(register, value)),
    }
    Ok(())
}

/// MFPR: reads an internal processor register.
///
/// # Errors
///
/// Faults privileged-instruction outside kernel mode and reserved-operand
/// for unknown or write-only registers.
pub fn mfpr(cpu: &mut Cpu, register: u32) -> Result<u32, Fault> {
    require_kernel(cpu)?;
    let value = match register {
        ipr::KSP | ipr::ESP | ipr::SSP | ipr::USP | ipr::ISP => {
            read_stack_slot(cpu, register as usize)
        }
        ipr::P0BR => cpu.control.p0br,
        ipr::P0LR => cpu.control.p0lr,
        ipr::P1BR => cpu.control.p1br,
        ipr::P1LR => cpu.control.p1lr,
        ipr::SBR => cpu.control.sbr,
        ipr::SLR => cpu.control.slr,
        ipr::PCBB => cpu.control.pcbb,
        ipr::SCBB => cpu.control.scbb,
        ipr::IPL => cpu.psl.ipl(),
        ipr::ASTLVL => cpu.control.astlvl,
        ipr::SISR => cpu.control.sisr,
        ipr::MAPEN => cpu.control.mapen,
        ipr::PME => cpu.control.pme,
        ipr::SID => SID_VALUE,
        _ => return Err(reserved(register, 0)),
    };
    Ok(value)
}
