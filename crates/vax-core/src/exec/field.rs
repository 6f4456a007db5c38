//! Bit-field test/modify and variable-length field extract/insert.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use crate::cpu::Cpu;
use crate::fault::{AccessIntent, Fault, FaultKind};
use crate::memory::bus::PhysicalBus;
use crate::memory::tlb::translate;
use crate::memory::virt;
use crate::state::psl::{PSL_C, PSL_N, PSL_Z};
use crate::state::registers::REG_PC;

/// Location of a bit-field base operand as produced by the operand decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldBase {
    /// Field relative to bit 0 of a general register.
    Register(usize),
    /// Field relative to bit 0 of a memory byte address.
    Memory(u32),
}

/// Tests the single bit selected by `pos` relative to `base`, optionally
/// rewriting it, and returns its prior value (branch-on-bit family).
///
/// Register positions are restricted to 0..=31; memory positions address the
/// byte at `base + pos >> 3`, bit `pos mod 8`.
///
/// # Errors
///
/// Faults reserved-operand for register positions outside 0..=31 and
/// propagates translation faults for memory operands.
pub fn branch_on_bit(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    pos: i32,
    base: FieldBase,
    new_bit: Option<bool>,
) -> Result<bool, Fault> {
    match base {
        FieldBase::Register(reg) => {
            if !(0..=31).contains(&pos) {
                return Err(Fault {
                    kind: FaultKind::ReservedOperand,
                    param1: pos as u32,
                    param2: 0,
                });
            }
            let mask = 1_u32 << pos;
            let old = cpu.regs.get(reg) & mask != 0;
            if let Some(bit) = new_bit {
                let value = cpu.regs.get(reg);
                cpu.regs.set(reg, if bit { value | mask } else { value & !mask });
            }
            Ok(old)
        }
        FieldBase::Memory(addr) => {
            let va = addr.wrapping_add((pos >> 3) as u32);
            let mask = 1_u8 << (pos & 7);
            let mode = cpu.current_mode();
            let intent = if new_bit.is_some() {
                AccessIntent::Write
            } else {
                AccessIntent::Read
            };
            let pa = translate(cpu, bus, va, mode, intent)?;
            let byte = bus.read_byte(pa)?;
            let old = byte & mask != 0;
            if let Some(bit) = new_bit {
                bus.write_byte(pa, if bit { byte | mask } else { byte & !mask })?;
            }
            Ok(old)
        }
    }
}

/// Field geometry shared by extract and insert.
struct FieldSpan {
    /// First byte address (memory) after folding the position.
    va: u32,
    /// Bit offset within the first byte, 0..=7.
    bit: u32,
    /// Number of bytes the field touches, 1..=5.
    bytes: u32,
}

fn memory_span(addr: u32, pos: i32, size: u32) -> FieldSpan {
    let va = addr.wrapping_add((pos >> 3) as u32);
    let bit = (pos & 7) as u32;
    FieldSpan {
        va,
        bit,
        bytes: (bit + size).div_ceil(8),
    }
}

fn check_size(size: u32) -> Result<(), Fault> {
    if size > 32 {
        return Err(Fault {
            kind: FaultKind::ReservedOperand,
            param1: size,
            param2: 0,
        });
    }
    Ok(())
}

fn field_mask(size: u32) -> u64 {
    if size == 0 { 0 } else { (!0_u64) >> (64 - size) }
}

/// Reads the two-register window for a spanning register field.
fn register_window(cpu: &Cpu, reg: usize, pos: i32, size: u32) -> Result<u64, Fault> {
    if !(0..=31).contains(&pos) {
        return Err(Fault {
            kind: FaultKind::ReservedOperand,
            param1: pos as u32,
            param2: 0,
        });
    }
    if reg == REG_PC {
        // A field may not be based on the PC, spanning or not.
        return Err(Fault::new(FaultKind::ReservedAddressingMode));
    }
    let low = u64::from(cpu.regs.get(reg));
    let high = if (pos as u32) + size > 32 {
        u64::from(cpu.regs.get(reg + 1))
    } else {
        0
    };
    Ok(low | (high << 32))
}

/// Extracts a 0..=32 bit field (`EXTV`/`EXTZV`), setting N and Z from the
/// result and clearing V; C is preserved.
///
/// # Errors
///
/// Faults reserved-operand for sizes above 32 or register positions outside
/// 0..=31, reserved-addressing for PC-based register fields, and propagates
/// translation faults for memory fields.
pub fn extract_field(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    pos: i32,
    size: u32,
    base: FieldBase,
    sign_extend: bool,
) -> Result<u32, Fault> {
    check_size(size)?;
    let mask = field_mask(size);
    let raw = match base {
        FieldBase::Register(reg) => {
            let window = register_window(cpu, reg, pos, size)?;
            (window >> pos) & mask
        }
        FieldBase::Memory(addr) => {
            if size == 0 {
                0
            } else {
                let span = memory_span(addr, pos, size);
                let mode = cpu.current_mode();
                let mut window = 0_u64;
                for index in 0..span.bytes {
                    let byte =
                        virt::read_byte(cpu, bus, span.va.wrapping_add(index), mode)?;
                    window |= u64::from(byte) << (index * 8);
                }
                (window >> span.bit) & mask
            }
        }
    };

    let mut value = raw as u32;
    if sign_extend && size > 0 && size < 32 && value & (1 << (size - 1)) != 0 {
        value |= !(mask as u32);
    }

    let mut cc = cpu.psl.condition_codes() & PSL_C;
    if value == 0 {
        cc |= PSL_Z;
    }
    if value & 0x8000_0000 != 0 {
        cc |= PSL_N;
    }
    cpu.psl.set_condition_codes(cc);
    Ok(value)
}

/// Inserts the low `size` bits of `src` into a field (`INSV`). Condition
/// codes are unaffected.
///
/// # Errors
///
/// Faults as [`extract_field`] does; all touched memory bytes are checked
/// writable before any byte is modified.
pub fn insert_field(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    src: u32,
    pos: i32,
    size: u32,
    base: FieldBase,
) -> Result<(), Fault> {
    check_size(size)?;
    if size == 0 {
        // Still validates the register position range.
        if let FieldBase::Register(reg) = base {
            register_window(cpu, reg, pos, 0)?;
        }
        return Ok(());
    }
    let mask = field_mask(size);

    match base {
        FieldBase::Register(reg) => {
            let window = register_window(cpu, reg, pos, size)?;
            let merged = (window & !(mask << pos)) | ((u64::from(src) & mask) << pos);
            cpu.regs.set(reg, merged as u32);
            if (pos as u32) + size > 32 {
                cpu.regs.set(reg + 1, (merged >> 32) as u32);
            }
            Ok(())
        }
        FieldBase::Memory(addr) => {
            let span = memory_span(addr, pos, size);
            let mode = cpu.current_mode();

            // Resolve every touched byte with write intent before the first
            // physical write commits.
            let mut pas = [0_u32; 5];
            for index in 0..span.bytes {
                pas[index as usize] = translate(
                    cpu,
                    bus,
                    span.va.wrapping_add(index),
                    mode,
                    AccessIntent::Write,
                )?;
            }

            let mut window = 0_u64;
            for index in 0..span.bytes {
                window |= u64::from(bus.read_byte(pas[index as usize])?) << (index * 8);
            }
            let merged =
                (window & !(mask << span.bit)) | ((u64::from(src) & mask) << span.bit);
            for index in 0..span.bytes {
                bus.write_byte(pas[index as usize], (merged >> (index * 8)) as u8)?;
            }
            Ok(())
        }
    }
}
