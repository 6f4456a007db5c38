//! Character-string instructions: block moves with first-part-done
//! suspension, compares, and the locate/scan family.
//!
//! A suspended move packs its progress into R0..R5 and sets PSL FPD; the
//! instruction loop services the interrupt and re-dispatches the same
//! instruction, which unpacks the registers instead of its operands.
//! Condition codes are computed from the operand lengths at initiation, so
//! they survive suspension inside the saved PSL.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use crate::cpu::Cpu;
use crate::fault::Fault;
use crate::memory::bus::PhysicalBus;
use crate::memory::virt;
use crate::state::psl::{PSL_C, PSL_FPD, PSL_N, PSL_Z};

/// Whether a resumable string instruction ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Instruction finished; FPD is clear and the result registers are set.
    Done,
    /// Instruction suspended for an interrupt; FPD is set and R0..R5 hold
    /// the packed progress state.
    Suspended,
}

/// Progress flag: copy runs descending.
const STATE_BACKWARD: u32 = 1;
/// Progress flag: the fill phase is active.
const STATE_FILLING: u32 = 1 << 1;
/// Progress flag: the pending count is trailing fill rather than unmoved
/// source bytes.
const STATE_PENDING_FILL: u32 = 1 << 2;

/// In-flight state of a block move, packed to R0..R5 across suspension.
struct MoveState {
    backward: bool,
    filling: bool,
    pending_is_fill: bool,
    /// Bytes left in the current phase.
    remaining: u32,
    /// Bytes for the phase after the copy: fill count or unmoved source.
    pending: u32,
    fill: u8,
    src: u32,
    dst: u32,
    /// Architectural end addresses, needed once a backward copy has moved
    /// its cursors off them.
    src_end: u32,
    dst_end: u32,
}

impl MoveState {
    fn pack(&self, cpu: &mut Cpu) {
        let mut flags = 0;
        if self.backward {
            flags |= STATE_BACKWARD;
        }
        if self.filling {
            flags |= STATE_FILLING;
        }
        if self.pending_is_fill {
            flags |= STATE_PENDING_FILL;
        }
        cpu.regs
            .set(0, (flags << 24) | (u32::from(self.fill) << 16) | (self.remaining & 0xFFFF));
        cpu.regs.set(1, self.src);
        cpu.regs.set(2, self.pending);
        cpu.regs.set(3, self.dst);
        cpu.regs.set(4, self.src_end);
        cpu.regs.set(5, self.dst_end);
    }

    fn unpack(cpu: &Cpu) -> Self {
        let r0 = cpu.regs.get(0);
        let flags = r0 >> 24;
        Self {
            backward: flags & STATE_BACKWARD != 0,
            filling: flags & STATE_FILLING != 0,
            pending_is_fill: flags & STATE_PENDING_FILL != 0,
            remaining: r0 & 0xFFFF,
            pending: cpu.regs.get(2),
            fill: ((r0 >> 16) & 0xFF) as u8,
            src: cpu.regs.get(1),
            dst: cpu.regs.get(3),
            src_end: cpu.regs.get(4),
            dst_end: cpu.regs.get(5),
        }
    }
}

fn length_condition_codes(cpu: &mut Cpu, srclen: u16, dstlen: u16) {
    let mut cc = 0;
    if srclen == dstlen {
        cc |= PSL_Z;
    }
    if srclen < dstlen {
        cc |= PSL_N | PSL_C;
    }
    cpu.psl.set_condition_codes(cc);
}

/// A destination above the source may overlap the unread tail, so the copy
/// direction is fixed before the first byte moves.
const fn copy_backward(src: u32, dst: u32) -> bool {
    src < dst
}

/// Runs (or resumes) the shared MOVC3/MOVC5 engine.
fn run_move(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    mut state: MoveState,
) -> Result<Completion, Fault> {
    let mode = cpu.current_mode();
    let interval = cpu.config.string_poll_interval;
    let mut since_poll = 0_u32;

    loop {
        if !state.filling && state.remaining == 0 {
            if state.pending_is_fill && state.pending > 0 {
                // Fill always runs ascending from the end of the copied
                // region, even after a backward copy.
                state.filling = true;
                state.remaining = state.pending;
                state.pending = 0;
                if state.backward {
                    state.dst = state.dst_end;
                }
            } else {
                break;
            }
        }
        if state.filling && state.remaining == 0 {
            break;
        }

        if interval != 0 && since_poll >= interval {
            since_poll = 0;
            if cpu.take_suspend_request() {
                state.pack(cpu);
                cpu.psl.set_flag(PSL_FPD, true);
                return Ok(Completion::Suspended);
            }
        }

        // Longword transfers through the middle, single bytes at the ends.
        // Descending longword chunks never read a byte an earlier (higher)
        // chunk has written, so the chunking is overlap-safe in both
        // directions.
        let step = if state.remaining >= 4 { 4 } else { 1 };
        if state.filling {
            if step == 4 {
                let pattern = u32::from(state.fill) * 0x0101_0101;
                virt::write_long(cpu, bus, state.dst, pattern, mode)?;
            } else {
                virt::write_byte(cpu, bus, state.dst, state.fill, mode)?;
            }
            state.dst = state.dst.wrapping_add(step);
        } else if state.backward {
            if step == 4 {
                let long = virt::read_long(cpu, bus, state.src.wrapping_sub(3), mode)?;
                virt::write_long(cpu, bus, state.dst.wrapping_sub(3), long, mode)?;
            } else {
                let byte = virt::read_byte(cpu, bus, state.src, mode)?;
                virt::write_byte(cpu, bus, state.dst, byte, mode)?;
            }
            state.src = state.src.wrapping_sub(step);
            state.dst = state.dst.wrapping_sub(step);
        } else {
            if step == 4 {
                let long = virt::read_long(cpu, bus, state.src, mode)?;
                virt::write_long(cpu, bus, state.dst, long, mode)?;
            } else {
                let byte = virt::read_byte(cpu, bus, state.src, mode)?;
                virt::write_byte(cpu, bus, state.dst, byte, mode)?;
            }
            state.src = state.src.wrapping_add(step);
            state.dst = state.dst.wrapping_add(step);
        }
        state.remaining -= step;
        since_poll += step;
    }

    cpu.psl.set_flag(PSL_FPD, false);
    let unmoved = if state.pending_is_fill { 0 } else { state.pending };
    cpu.regs.set(0, unmoved);
    cpu.regs
        .set(1, if state.backward { state.src_end } else { state.src });
    cpu.regs.set(2, 0);
    cpu.regs
        .set(3, if state.backward && !state.filling { state.dst_end } else { state.dst });
    cpu.regs.set(4, 0);
    cpu.regs.set(5, 0);
    Ok(Completion::Done)
}

fn initial_move_state(
    srclen: u16,
    src: u32,
    fill: u8,
    dstlen: u16,
    dst: u32,
) -> MoveState {
    let copy_len = u32::from(srclen.min(dstlen));
    let backward = copy_len > 0 && copy_backward(src, dst);
    let (pending, pending_is_fill) = if dstlen > srclen {
        (u32::from(dstlen - srclen), true)
    } else {
        (u32::from(srclen - dstlen), false)
    };
    let (start_src, start_dst) = if backward {
        (
            src.wrapping_add(copy_len).wrapping_sub(1),
            dst.wrapping_add(copy_len).wrapping_sub(1),
        )
    } else {
        (src, dst)
    };
    MoveState {
        backward,
        filling: false,
        pending_is_fill,
        remaining: copy_len,
        pending,
        fill,
        src: start_src,
        dst: start_dst,
        src_end: src.wrapping_add(copy_len),
        dst_end: dst.wrapping_add(copy_len),
    }
}

/// MOVC3: copies `srclen` bytes from `src` to `dst`, overlap-safe.
///
/// Completes with R0 = 0, R1/R3 one past the source/destination, R2/R4/R5
/// zero, and Z set.
///
/// # Errors
///
/// Propagates translation faults; a faulting move may have moved a prefix.
pub fn movc3(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    srclen: u16,
    src: u32,
    dst: u32,
) -> Result<Completion, Fault> {
    if cpu.psl.is_set(PSL_FPD) {
        return run_move(cpu, bus, MoveState::unpack(cpu));
    }
    length_condition_codes(cpu, srclen, srclen);
    run_move(cpu, bus, initial_move_state(srclen, src, 0, srclen, dst))
}

/// MOVC5: copies with truncation or fill when the lengths differ.
///
/// Completes with R0 = unmoved source bytes, R1 one past the last source
/// byte moved, R3 one past the destination, and the condition codes from the
/// srclen/dstlen comparison.
///
/// # Errors
///
/// Propagates translation faults; a faulting move may have moved a prefix.
pub fn movc5(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    srclen: u16,
    src: u32,
    fill: u8,
    dstlen: u16,
    dst: u32,
) -> Result<Completion, Fault> {
    if cpu.psl.is_set(PSL_FPD) {
        return run_move(cpu, bus, MoveState::unpack(cpu));
    }
    length_condition_codes(cpu, srclen, dstlen);
    run_move(cpu, bus, initial_move_state(srclen, src, fill, dstlen, dst))
}

fn byte_compare_codes(cpu: &mut Cpu, first: u8, second: u8) {
    let mut cc = 0;
    if first == second {
        cc |= PSL_Z;
    }
    if (first.wrapping_sub(second) as i8) < 0 {
        cc |= PSL_N;
    }
    if first < second {
        cc |= PSL_C;
    }
    cpu.psl.set_condition_codes(cc);
}

/// CMPC3: compares two equal-length byte strings.
///
/// On mismatch R0/R2 hold the remaining lengths (mismatch byte included) and
/// R1/R3 its addresses; on equality R0/R2 are zero, R1/R3 one past the
/// strings, and Z is set.
///
/// # Errors
///
/// Propagates translation faults.
pub fn cmpc3(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    len: u16,
    addr1: u32,
    addr2: u32,
) -> Result<(), Fault> {
    cmpc5(cpu, bus, len, addr1, 0, len, addr2)
}

/// CMPC5: compares two strings, extending the shorter with `fill`.
///
/// # Errors
///
/// Propagates translation faults.
pub fn cmpc5(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    len1: u16,
    addr1: u32,
    fill: u8,
    len2: u16,
    addr2: u32,
) -> Result<(), Fault> {
    let mode = cpu.current_mode();
    let total = u32::from(len1.max(len2));
    for index in 0..total {
        let first = if index < u32::from(len1) {
            virt::read_byte(cpu, bus, addr1.wrapping_add(index), mode)?
        } else {
            fill
        };
        let second = if index < u32::from(len2) {
            virt::read_byte(cpu, bus, addr2.wrapping_add(index), mode)?
        } else {
            fill
        };
        if first != second {
            let used1 = index.min(u32::from(len1));
            let used2 = index.min(u32::from(len2));
            cpu.regs.set(0, u32::from(len1) - used1);
            cpu.regs.set(1, addr1.wrapping_add(used1));
            cpu.regs.set(2, u32::from(len2) - used2);
            cpu.regs.set(3, addr2.wrapping_add(used2));
            byte_compare_codes(cpu, first, second);
            return Ok(());
        }
    }
    cpu.regs.set(0, 0);
    cpu.regs.set(1, addr1.wrapping_add(u32::from(len1)));
    cpu.regs.set(2, 0);
    cpu.regs.set(3, addr2.wrapping_add(u32::from(len2)));
    cpu.psl.set_condition_codes(PSL_Z);
    Ok(())
}

/// Shared register/condition-code protocol of the locate family: R0 holds
/// the remaining length (zero when exhausted), R1 the located address (one
/// past the string when exhausted), and Z is set only on exhaustion.
fn locate_result(cpu: &mut Cpu, len: u16, addr: u32, found_at: Option<u32>) {
    match found_at {
        Some(index) => {
            cpu.regs.set(0, u32::from(len) - index);
            cpu.regs.set(1, addr.wrapping_add(index));
            cpu.psl.set_condition_codes(0);
        }
        None => {
            cpu.regs.set(0, 0);
            cpu.regs.set(1, addr.wrapping_add(u32::from(len)));
            cpu.psl.set_condition_codes(PSL_Z);
        }
    }
}

/// LOCC: locates the first byte equal to `character`.
///
/// # Errors
///
/// Propagates translation faults.
pub fn locc(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    character: u8,
    len: u16,
    addr: u32,
) -> Result<(), Fault> {
    let mode = cpu.current_mode();
    for index in 0..u32::from(len) {
        if virt::read_byte(cpu, bus, addr.wrapping_add(index), mode)? == character {
            locate_result(cpu, len, addr, Some(index));
            return Ok(());
        }
    }
    locate_result(cpu, len, addr, None);
    Ok(())
}

/// SKPC: locates the first byte not equal to `character`.
///
/// # Errors
///
/// Propagates translation faults.
pub fn skpc(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    character: u8,
    len: u16,
    addr: u32,
) -> Result<(), Fault> {
    let mode = cpu.current_mode();
    for index in 0..u32::from(len) {
        if virt::read_byte(cpu, bus, addr.wrapping_add(index), mode)? != character {
            locate_result(cpu, len, addr, Some(index));
            return Ok(());
        }
    }
    locate_result(cpu, len, addr, None);
    Ok(())
}

/// SCANC/SPANC: locates the first byte whose 256-entry table entry ANDed
/// with `mask` is non-zero (`stop_on_set`) or zero (otherwise). R2 is
/// cleared and R3 left addressing the table.
///
/// # Errors
///
/// Propagates translation faults.
pub fn scan_table(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    len: u16,
    addr: u32,
    table: u32,
    mask: u8,
    stop_on_set: bool,
) -> Result<(), Fault> {
    let mode = cpu.current_mode();
    let mut found = None;
    for index in 0..u32::from(len) {
        let byte = virt::read_byte(cpu, bus, addr.wrapping_add(index), mode)?;
        let entry = virt::read_byte(cpu, bus, table.wrapping_add(u32::from(byte)), mode)?;
        if (entry & mask != 0) == stop_on_set {
            found = Some(index);
            break;
        }
    }
    locate_result(cpu, len, addr, found);
    cpu.regs.set(2, 0);
    cpu.regs.set(3, table);
    Ok(())
}
