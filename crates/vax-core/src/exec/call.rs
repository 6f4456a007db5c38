//! Procedure call and return: CALLG, CALLS, and RET with the architectural
//! stack-frame wire format.
//!
//! Frame layout, ascending from the new FP:
//!
//! ```text
//! FP+0   condition handler (cleared to zero on call)
//! FP+4   <31>=0  <30>=S  <29:28>=SPA  <27:16>=save mask  <15:5>=PSW  <4:0>=0
//! FP+8   saved AP
//! FP+12  saved FP
//! FP+16  saved PC
//! FP+20  saved R0..R11 ascending, one longword per set mask bit
//! ```

use crate::cpu::Cpu;
use crate::fault::{AccessIntent, Fault, FaultKind};
use crate::memory::bus::PhysicalBus;
use crate::memory::tlb::translate;
use crate::memory::virt;
use crate::state::psl::{PSL_CC_MASK, PSL_DV, PSL_FU, PSL_IV, Psl};

/// Register save mask field of the entry mask word.
const ENTRY_SAVE_MASK: u16 = 0x0FFF;
/// Must-be-zero bits of the entry mask word.
const ENTRY_MBZ: u16 = 0x3000;
/// Entry mask bit enabling integer-overflow traps in the callee.
const ENTRY_IV: u16 = 1 << 14;
/// Entry mask bit enabling decimal-overflow traps in the callee.
const ENTRY_DV: u16 = 1 << 15;

/// CALLS flag bit in the packed frame longword.
const FRAME_S: u32 = 1 << 30;
/// Shift of the stack-alignment field in the packed frame longword.
const FRAME_SPA_SHIFT: u32 = 28;
/// Shift of the save mask in the packed frame longword.
const FRAME_MASK_SHIFT: u32 = 16;
/// PSW bits captured in (and restored from) the packed frame longword.
const FRAME_PSW_MASK: u32 = 0xFFE0;
/// Restored PSW bits that must be zero.
const FRAME_PSW_MBZ: u32 = 0xFF00;

fn read_entry_mask(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    dst: u32,
) -> Result<u16, Fault> {
    let mode = cpu.current_mode();
    let mask = virt::read_word(cpu, bus, dst, mode)?;
    if mask & ENTRY_MBZ != 0 {
        return Err(Fault {
            kind: FaultKind::ReservedOperand,
            param1: u32::from(mask),
            param2: dst,
        });
    }
    Ok(mask)
}

/// Builds the call frame shared by CALLG and CALLS and transfers control.
///
/// `sp` is the stack pointer after any argument push, `s_bit` marks a CALLS
/// frame, and `new_ap` is the argument-list address for the callee. The
/// lowest frame byte is checked writable before any frame byte commits, so a
/// stack that faults leaves the visible registers unchanged (a CALLS
/// argument count already pushed stays pushed, matching hardware).
fn build_frame(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    dst: u32,
    mask: u16,
    sp: u32,
    s_bit: bool,
    new_ap: u32,
) -> Result<(), Fault> {
    let mode = cpu.current_mode();
    let spa = sp & 3;
    let aligned = sp & !3;
    let saved_count = u32::from((mask & ENTRY_SAVE_MASK).count_ones());
    let frame_size = (5 + saved_count) * 4;
    let new_fp = aligned.wrapping_sub(frame_size);

    translate(cpu, bus, new_fp, mode, AccessIntent::Write)?;

    let packed = (u32::from(s_bit) << 30) & FRAME_S
        | (spa << FRAME_SPA_SHIFT)
        | (u32::from(mask & ENTRY_SAVE_MASK) << FRAME_MASK_SHIFT)
        | (cpu.psl.psw() & FRAME_PSW_MASK);

    virt::write_long(cpu, bus, new_fp, 0, mode)?;
    virt::write_long(cpu, bus, new_fp.wrapping_add(4), packed, mode)?;
    virt::write_long(cpu, bus, new_fp.wrapping_add(8), cpu.regs.ap(), mode)?;
    virt::write_long(cpu, bus, new_fp.wrapping_add(12), cpu.regs.fp(), mode)?;
    virt::write_long(cpu, bus, new_fp.wrapping_add(16), cpu.regs.pc(), mode)?;

    let mut slot = new_fp.wrapping_add(20);
    for reg in 0..12 {
        if mask & (1 << reg) != 0 {
            virt::write_long(cpu, bus, slot, cpu.regs.get(reg), mode)?;
            slot = slot.wrapping_add(4);
        }
    }

    cpu.regs.set_sp(new_fp);
    cpu.regs.set_fp(new_fp);
    cpu.regs.set_ap(new_ap);
    cpu.regs.set_pc(dst.wrapping_add(2));

    // New PSW: condition codes cleared, overflow enables from the entry
    // mask, floating underflow disabled, trace carried over.
    let mut cc_and_traps = cpu.psl.raw() & !(PSL_CC_MASK | PSL_IV | PSL_DV | PSL_FU);
    if mask & ENTRY_IV != 0 {
        cc_and_traps |= PSL_IV;
    }
    if mask & ENTRY_DV != 0 {
        cc_and_traps |= PSL_DV;
    }
    cpu.psl = Psl::from_raw(cc_and_traps);
    Ok(())
}

/// CALLG: calls the procedure at `dst` with the argument list at `arglist`.
///
/// # Errors
///
/// Faults reserved-operand when entry-mask bits 13:12 are set and propagates
/// translation faults from the entry-mask read and frame writes.
pub fn callg(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    arglist: u32,
    dst: u32,
) -> Result<(), Fault> {
    let mask = read_entry_mask(cpu, bus, dst)?;
    let sp = cpu.regs.sp();
    build_frame(cpu, bus, dst, mask, sp, false, arglist)
}

/// CALLS: pushes `numarg` as the argument count, then calls the procedure at
/// `dst` with AP addressing the pushed count.
///
/// # Errors
///
/// Faults reserved-operand when entry-mask bits 13:12 are set and propagates
/// translation faults from the count push and frame writes.
pub fn calls(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    numarg: u32,
    dst: u32,
) -> Result<(), Fault> {
    let mask = read_entry_mask(cpu, bus, dst)?;
    let mode = cpu.current_mode();
    let sp = cpu.regs.sp().wrapping_sub(4);
    virt::write_long(cpu, bus, sp, numarg & 0xFF, mode)?;
    cpu.regs.set_sp(sp);
    build_frame(cpu, bus, dst, mask, sp, true, sp)
}

/// RET: unwinds the frame addressed by FP, restoring the saved registers and
/// PSW and, for CALLS frames, popping the stacked argument list.
///
/// # Errors
///
/// Faults reserved-operand when the restored PSW image has bits 15:8 set and
/// propagates translation faults from the frame reads. The visible registers
/// are only updated once the whole frame has been read.
pub fn ret(cpu: &mut Cpu, bus: &mut dyn PhysicalBus) -> Result<(), Fault> {
    let mode = cpu.current_mode();
    let fp = cpu.regs.fp();

    let packed = virt::read_long(cpu, bus, fp.wrapping_add(4), mode)?;
    if packed & FRAME_PSW_MBZ != 0 {
        return Err(Fault {
            kind: FaultKind::ReservedOperand,
            param1: packed,
            param2: fp.wrapping_add(4),
        });
    }
    let new_ap = virt::read_long(cpu, bus, fp.wrapping_add(8), mode)?;
    let new_fp = virt::read_long(cpu, bus, fp.wrapping_add(12), mode)?;
    let new_pc = virt::read_long(cpu, bus, fp.wrapping_add(16), mode)?;

    let mask = (packed >> FRAME_MASK_SHIFT) & u32::from(ENTRY_SAVE_MASK);
    let mut restored = [0_u32; 12];
    let mut slot = fp.wrapping_add(20);
    for (reg, value) in restored.iter_mut().enumerate() {
        if mask & (1 << reg) != 0 {
            *value = virt::read_long(cpu, bus, slot, mode)?;
            slot = slot.wrapping_add(4);
        }
    }

    let spa = (packed >> FRAME_SPA_SHIFT) & 3;
    let mut sp = slot.wrapping_add(spa);

    // CALLS frames carry a stacked argument count above the frame.
    if packed & FRAME_S != 0 {
        let count = virt::read_long(cpu, bus, sp, mode)? & 0xFF;
        sp = sp.wrapping_add(4).wrapping_add(count * 4);
    }

    for (reg, value) in restored.into_iter().enumerate() {
        if mask & (1 << reg) != 0 {
            cpu.regs.set(reg, value);
        }
    }
    cpu.regs.set_ap(new_ap);
    cpu.regs.set_fp(new_fp);
    cpu.regs.set_sp(sp);
    cpu.regs.set_pc(new_pc);

    let raw = (cpu.psl.raw() & !0xFFFF) | (packed & FRAME_PSW_MASK);
    cpu.psl = Psl::from_raw(raw);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{callg, calls, ret};
    use crate::cpu::Cpu;
    use crate::fault::FaultKind;
    use crate::memory::bus::{PhysicalBus, RamBus};
    use crate::memory::virt;
    use crate::state::psl::{AccessMode, PSL_C, PSL_IV, PSL_N, Psl};

    fn setup(entry_mask: u16) -> (Cpu, RamBus) {
        let mut cpu = Cpu::default();
        let mut bus = RamBus::new(0x4000);
        bus.write_word(0x1000, entry_mask).expect("ram");
        cpu.regs.set_sp(0x2000);
        cpu.regs.set_pc(0x500);
        (cpu, bus)
    }

    #[test]
    fn entry_mask_mbz_bits_are_reserved_operand() {
        let (mut cpu, mut bus) = setup(0x1000);
        let fault = calls(&mut cpu, &mut bus, 0, 0x1000).expect_err("mbz set");
        assert_eq!(fault.kind, FaultKind::ReservedOperand);
        // Nothing pushed, nothing moved.
        assert_eq!(cpu.regs.sp(), 0x2000);
        assert_eq!(cpu.regs.pc(), 0x500);
    }

    #[test]
    fn calls_frame_bytes_match_the_wire_format() {
        // Save R2 and R3, enable integer overflow in the callee.
        let (mut cpu, mut bus) = setup(0x400C);
        cpu.regs.set(2, 0x2222_2222);
        cpu.regs.set(3, 0x3333_3333);
        cpu.regs.set_ap(0xAAAA_AAAA);
        cpu.regs.set_fp(0xFFFF_0000);
        cpu.psl = Psl::from_raw(PSL_N | PSL_C);

        calls(&mut cpu, &mut bus, 2, 0x1000).expect("call");

        // Count pushed at 0x1FFC; frame of 7 longwords below it.
        let fp = cpu.regs.fp();
        assert_eq!(fp, 0x1FFC - 28);
        assert_eq!(cpu.regs.sp(), fp);
        assert_eq!(cpu.regs.ap(), 0x1FFC);
        assert_eq!(cpu.regs.pc(), 0x1002);
        assert_eq!(bus.read_long(0x1FFC).expect("ram"), 2);

        assert_eq!(bus.read_long(fp).expect("ram"), 0);
        // S=1, SPA=0, mask=0b1100, saved PSW<15:5> = 0 (only CCs were set).
        assert_eq!(
            bus.read_long(fp + 4).expect("ram"),
            (1 << 30) | (0b1100 << 16)
        );
        assert_eq!(bus.read_long(fp + 8).expect("ram"), 0xAAAA_AAAA);
        assert_eq!(bus.read_long(fp + 12).expect("ram"), 0xFFFF_0000);
        assert_eq!(bus.read_long(fp + 16).expect("ram"), 0x500);
        assert_eq!(bus.read_long(fp + 20).expect("ram"), 0x2222_2222);
        assert_eq!(bus.read_long(fp + 24).expect("ram"), 0x3333_3333);

        // Callee PSW: CCs cleared, IV enabled from the entry mask.
        assert_eq!(cpu.psl.condition_codes(), 0);
        assert!(cpu.psl.is_set(PSL_IV));
    }

    #[test]
    fn calls_then_ret_restores_caller_state() {
        let (mut cpu, mut bus) = setup(0x800C);
        cpu.regs.set(2, 0x2222_2222);
        cpu.regs.set(3, 0x3333_3333);
        cpu.regs.set_ap(0xAAAA_AAAA);
        cpu.regs.set_fp(0xBBBB_BBBB);
        // Misaligned stack exercises SPA restore.
        cpu.regs.set_sp(0x2003);

        calls(&mut cpu, &mut bus, 3, 0x1000).expect("call");

        // Callee clobbers everything it saved.
        cpu.regs.set(2, 0);
        cpu.regs.set(3, 0);
        cpu.regs.set_ap(0);
        ret(&mut cpu, &mut bus).expect("return");

        assert_eq!(cpu.regs.get(2), 0x2222_2222);
        assert_eq!(cpu.regs.get(3), 0x3333_3333);
        assert_eq!(cpu.regs.ap(), 0xAAAA_AAAA);
        assert_eq!(cpu.regs.fp(), 0xBBBB_BBBB);
        assert_eq!(cpu.regs.pc(), 0x500);
        // Popping the count restores the pre-call SP; the three declared
        // arguments above it are popped as well.
        assert_eq!(cpu.regs.sp(), 0x2003 + 12);
    }

    #[test]
    fn callg_leaves_sp_free_of_argument_pushes() {
        let (mut cpu, mut bus) = setup(0);
        callg(&mut cpu, &mut bus, 0x3000, 0x1000).expect("call");

        assert_eq!(cpu.regs.ap(), 0x3000);
        assert_eq!(cpu.regs.fp(), 0x2000 - 20);
        let packed = bus.read_long(cpu.regs.fp() + 4).expect("ram");
        assert_eq!(packed & (1 << 30), 0, "no S bit on CALLG frames");
    }

    #[test]
    fn ret_rejects_frames_with_psw_mbz_bits() {
        let (mut cpu, mut bus) = setup(0);
        calls(&mut cpu, &mut bus, 0, 0x1000).expect("call");
        let fp = cpu.regs.fp();
        let packed = bus.read_long(fp + 4).expect("ram");
        virt::write_long(&mut cpu, &mut bus, fp + 4, packed | 0x100, AccessMode::Kernel)
            .expect("poke frame");

        let fault = ret(&mut cpu, &mut bus).expect_err("mbz in frame psw");
        assert_eq!(fault.kind, FaultKind::ReservedOperand);
        // Registers untouched by the failed return.
        assert_eq!(cpu.regs.fp(), fp);
    }
}
