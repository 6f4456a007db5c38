//! Mode transitions: the CHMK/CHME/CHMS/CHMU family and REI.

#![allow(clippy::cast_sign_loss)]

use log::debug;

use crate::cpu::Cpu;
use crate::fault::{Fault, FaultKind, FatalStop};
use crate::interrupt::{self, DispatchError, scb};
use crate::memory::bus::PhysicalBus;
use crate::memory::virt;
use crate::state::psl::{
    AccessMode, PSL_CC_MASK, PSL_CM, PSL_DV, PSL_FPD, PSL_FU, PSL_IS, PSL_IV, PSL_T, PSL_TP,
    Psl,
};

/// CHMx: raises privilege to `requested` (clamped so the instruction can
/// never lower it), pushes {code, PC, PSL} on the target-mode stack, and
/// vectors through SCB offset `0x40 + 4 * mode`.
///
/// The pushed code is the sign-extended operand word.
///
/// # Errors
///
/// A CHMx on the interrupt stack is a fatal stop, as is a vector longword
/// with bit 1 set; the frame pushes may fault in the target mode.
pub fn chm(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    requested: AccessMode,
    code: i16,
) -> Result<(), DispatchError> {
    if cpu.psl.is_set(PSL_IS) {
        return Err(DispatchError::Fatal(FatalStop::ChangeModeOnInterruptStack));
    }
    let current = cpu.current_mode();
    let target = requested.more_privileged(current);
    let offset = scb::CHANGE_MODE_BASE + 4 * target as u16;
    let vector = interrupt::read_vector(cpu, bus, offset)?;

    let old_psl = cpu.psl;
    let old_pc = cpu.regs.pc();
    cpu.save_live_sp();

    let mut new_psl = Psl::from_raw(
        old_psl.raw() & !(PSL_CC_MASK | PSL_T | PSL_IV | PSL_FU | PSL_DV | PSL_FPD | PSL_TP),
    );
    new_psl.set_current_mode(target);
    new_psl.set_previous_mode(current);
    cpu.psl = new_psl;
    cpu.load_live_sp();

    debug!("chm: {current:?} -> {target:?} (code {code})");

    let sp = cpu.regs.sp().wrapping_sub(12);
    virt::write_long(cpu, bus, sp, code as u32, target)?;
    virt::write_long(cpu, bus, sp.wrapping_add(4), old_pc, target)?;
    virt::write_long(cpu, bus, sp.wrapping_add(8), old_psl.raw(), target)?;
    cpu.regs.set_sp(sp);
    cpu.regs.set_pc(vector & !3);
    Ok(())
}

/// The consistency rules a popped PSL must satisfy before REI commits.
fn check_rei_psl(current: Psl, new: Psl) -> Result<(), Fault> {
    let reject = |raw: u32| {
        Err(Fault {
            kind: FaultKind::ReservedOperand,
            param1: raw,
            param2: 0,
        })
    };
    let raw = new.raw();
    if new.has_mbz_bits() {
        return reject(raw);
    }
    // Privilege may only decrease.
    if (new.current_mode() as u8) < (current.current_mode() as u8) {
        return reject(raw);
    }
    if (new.previous_mode() as u8) < (new.current_mode() as u8) {
        return reject(raw);
    }
    if new.ipl() > current.ipl() {
        return reject(raw);
    }
    if new.ipl() > 0 && new.current_mode() != AccessMode::Kernel {
        return reject(raw);
    }
    if new.is_set(PSL_IS)
        && !(current.is_set(PSL_IS)
            && new.current_mode() == AccessMode::Kernel
            && new.ipl() > 0)
    {
        return reject(raw);
    }
    // Compatibility mode is a user-mode, native-stack execution state.
    if new.is_set(PSL_CM)
        && (new.current_mode() != AccessMode::User
            || new.is_set(PSL_IS)
            || new.is_set(PSL_FPD))
    {
        return reject(raw);
    }
    Ok(())
}

/// REI: pops {PC, PSL}, validates the PSL consistency rules, and resumes the
/// interrupted context. A rule violation leaves SP, PSL, and PC untouched.
///
/// A committed transition swaps the live stack pointer, converts a restored
/// T bit into trace-pending, and, when the new mode makes a queued AST
/// deliverable (ASTLVL at or below the new current mode), requests the
/// IPL 2 software interrupt.
///
/// # Errors
///
/// Faults reserved-operand on any consistency violation and propagates
/// translation faults from the two stack reads.
pub fn rei(cpu: &mut Cpu, bus: &mut dyn PhysicalBus) -> Result<(), Fault> {
    let mode = cpu.current_mode();
    let sp = cpu.regs.sp();
    let new_pc = virt::read_long(cpu, bus, sp, mode)?;
    let mut new_psl = Psl::from_raw(virt::read_long(cpu, bus, sp.wrapping_add(4), mode)?);
    check_rei_psl(cpu.psl, new_psl)?;

    // Commit point: nothing above may have modified visible state.
    cpu.regs.set_sp(sp.wrapping_add(8));
    cpu.save_live_sp();
    if new_psl.is_set(PSL_T) {
        new_psl.set_flag(PSL_TP, true);
    }
    cpu.psl = new_psl;
    cpu.load_live_sp();
    cpu.regs.set_pc(new_pc);

    // A queued AST becomes deliverable when control drops to (or below) the
    // registered level.
    if !new_psl.is_set(PSL_IS)
        && cpu.control.astlvl <= 3
        && (new_psl.current_mode() as u32) >= cpu.control.astlvl
    {
        cpu.control.sisr |= 1 << 2;
    }

    debug!(
        "rei: -> pc {new_pc:#010x} mode {mode:?} ipl {ipl}",
        mode = new_psl.current_mode(),
        ipl = new_psl.ipl()
    );
    Ok(())
}
