//! General virtual read/write of arbitrary length and alignment.
//!
//! The fast path performs one aligned physical access when the virtual
//! address is naturally aligned for the length. The slow path splits at the
//! longword or page boundary (whichever is nearer) into two aligned physical
//! accesses merged little-endian, re-translating when the second access
//! lands on a different page. No byte outside the requested range is ever
//! translated, so fault ordering matches the architectural rules.

#![allow(clippy::cast_possible_truncation)]

use crate::cpu::Cpu;
use crate::fault::{AccessIntent, Fault};
use crate::memory::bus::PhysicalBus;
use crate::memory::tlb::{PAGE_OFFSET_MASK, translate};
use crate::state::psl::AccessMode;

fn same_page(a: u32, b: u32) -> bool {
    a & !PAGE_OFFSET_MASK == b & !PAGE_OFFSET_MASK
}

/// Translates the longword boundary following `va`, reusing the first
/// translation when the boundary stays on the same page.
fn boundary_pa(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    first_pa: u32,
    mode: AccessMode,
    intent: AccessIntent,
) -> Result<u32, Fault> {
    let boundary = (va | 3).wrapping_add(1);
    if same_page(va, boundary) {
        Ok((first_pa & !PAGE_OFFSET_MASK) | (boundary & PAGE_OFFSET_MASK))
    } else {
        translate(cpu, bus, boundary, mode, intent)
    }
}

/// Reads one byte of virtual space.
///
/// # Errors
///
/// Propagates translation faults and machine checks.
pub fn read_byte(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    mode: AccessMode,
) -> Result<u8, Fault> {
    let pa = translate(cpu, bus, va, mode, AccessIntent::Read)?;
    bus.read_byte(pa)
}

/// Reads a 16-bit word of virtual space, any alignment.
///
/// # Errors
///
/// Propagates translation faults and machine checks.
pub fn read_word(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    mode: AccessMode,
) -> Result<u16, Fault> {
    let pa = translate(cpu, bus, va, mode, AccessIntent::Read)?;
    if va & 1 == 0 {
        return bus.read_word(pa);
    }
    let shift = (va & 3) * 8;
    let low = bus.read_long(pa & !3)?;
    let merged = if va & 3 == 3 {
        // Word split across a longword (and possibly page) boundary.
        let high_pa = boundary_pa(cpu, bus, va, pa, mode, AccessIntent::Read)?;
        let high = bus.read_long(high_pa)?;
        (low >> shift) | (high << 8)
    } else {
        low >> shift
    };
    Ok((merged & 0xFFFF) as u16)
}

/// Reads a 32-bit longword of virtual space, any alignment.
///
/// # Errors
///
/// Propagates translation faults and machine checks.
pub fn read_long(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    mode: AccessMode,
) -> Result<u32, Fault> {
    let pa = translate(cpu, bus, va, mode, AccessIntent::Read)?;
    if va & 3 == 0 {
        return bus.read_long(pa);
    }
    let shift = (va & 3) * 8;
    let low = bus.read_long(pa & !3)?;
    let high_pa = boundary_pa(cpu, bus, va, pa, mode, AccessIntent::Read)?;
    let high = bus.read_long(high_pa)?;
    Ok((low >> shift) | (high << (32 - shift)))
}

/// Reads a 64-bit quadword of virtual space as two longword accesses.
///
/// # Errors
///
/// Propagates translation faults and machine checks.
pub fn read_quad(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    mode: AccessMode,
) -> Result<u64, Fault> {
    let low = read_long(cpu, bus, va, mode)?;
    let high = read_long(cpu, bus, va.wrapping_add(4), mode)?;
    Ok(u64::from(low) | (u64::from(high) << 32))
}

/// Writes one byte of virtual space.
///
/// # Errors
///
/// Propagates translation faults and machine checks.
pub fn write_byte(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    value: u8,
    mode: AccessMode,
) -> Result<(), Fault> {
    let pa = translate(cpu, bus, va, mode, AccessIntent::Write)?;
    bus.write_byte(pa, value)
}

/// Writes a 16-bit word of virtual space, any alignment.
///
/// Both pages are translated before the first physical write commits.
///
/// # Errors
///
/// Propagates translation faults and machine checks.
pub fn write_word(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    value: u16,
    mode: AccessMode,
) -> Result<(), Fault> {
    let pa = translate(cpu, bus, va, mode, AccessIntent::Write)?;
    if va & 1 == 0 {
        return bus.write_word(pa, value);
    }
    let shift = (va & 3) * 8;
    if va & 3 == 3 {
        let high_pa = boundary_pa(cpu, bus, va, pa, mode, AccessIntent::Write)?;
        let low = bus.read_long(pa & !3)?;
        let merged = (low & !(0xFF << shift)) | (u32::from(value & 0xFF) << shift);
        bus.write_long(pa & !3, merged)?;
        let high = bus.read_long(high_pa)?;
        bus.write_long(high_pa, (high & !0xFF) | u32::from(value >> 8))
    } else {
        let low = bus.read_long(pa & !3)?;
        let merged = (low & !(0xFFFF << shift)) | (u32::from(value) << shift);
        bus.write_long(pa & !3, merged)
    }
}

/// Writes a 32-bit longword of virtual space, any alignment.
///
/// Both pages are translated before the first physical write commits.
///
/// # Errors
///
/// Propagates translation faults and machine checks.
pub fn write_long(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    value: u32,
    mode: AccessMode,
) -> Result<(), Fault> {
    let pa = translate(cpu, bus, va, mode, AccessIntent::Write)?;
    if va & 3 == 0 {
        return bus.write_long(pa, value);
    }
    let shift = (va & 3) * 8;
    let high_pa = boundary_pa(cpu, bus, va, pa, mode, AccessIntent::Write)?;

    let low = bus.read_long(pa & !3)?;
    let low_mask = !0u32 << shift;
    bus.write_long(pa & !3, (low & !low_mask) | (value << shift))?;

    let high = bus.read_long(high_pa)?;
    let high_mask = !0u32 >> (32 - shift);
    bus.write_long(high_pa, (high & !high_mask) | (value >> (32 - shift)))
}

/// Writes a 64-bit quadword of virtual space as two longword accesses.
///
/// # Errors
///
/// Propagates translation faults and machine checks.
pub fn write_quad(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    value: u64,
    mode: AccessMode,
) -> Result<(), Fault> {
    write_long(cpu, bus, va, (value & 0xFFFF_FFFF) as u32, mode)?;
    write_long(cpu, bus, va.wrapping_add(4), (value >> 32) as u32, mode)
}

/// Reads `length` (1, 2, 4, or 8) bytes of virtual space.
///
/// # Errors
///
/// Propagates translation faults and machine checks.
///
/// # Panics
///
/// Panics on lengths outside {1, 2, 4, 8}; callers pass operand widths fixed
/// by the instruction set.
pub fn read_virtual(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    length: u32,
    mode: AccessMode,
) -> Result<u64, Fault> {
    match length {
        1 => read_byte(cpu, bus, va, mode).map(u64::from),
        2 => read_word(cpu, bus, va, mode).map(u64::from),
        4 => read_long(cpu, bus, va, mode).map(u64::from),
        8 => read_quad(cpu, bus, va, mode),
        _ => unreachable!("operand widths are 1, 2, 4, or 8 bytes"),
    }
}

/// Writes `length` (1, 2, 4, or 8) bytes of virtual space.
///
/// # Errors
///
/// Propagates translation faults and machine checks.
///
/// # Panics
///
/// Panics on lengths outside {1, 2, 4, 8}; callers pass operand widths fixed
/// by the instruction set.
pub fn write_virtual(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    value: u64,
    length: u32,
    mode: AccessMode,
) -> Result<(), Fault> {
    match length {
        1 => write_byte(cpu, bus, va, (value & 0xFF) as u8, mode),
        2 => write_word(cpu, bus, va, (value & 0xFFFF) as u16, mode),
        4 => write_long(cpu, bus, va, (value & 0xFFFF_FFFF) as u32, mode),
        8 => write_quad(cpu, bus, va, value, mode),
        _ => unreachable!("operand widths are 1, 2, 4, or 8 bytes"),
    }
}

#[cfg(test)]
mod tests {
    use super::{read_long, read_word, write_long, write_word};
    use crate::cpu::Cpu;
    use crate::memory::bus::{PhysicalBus, RamBus};
    use crate::state::psl::AccessMode;

    fn flat_cpu() -> (Cpu, RamBus) {
        // Mapping disabled: virtual addresses are physical.
        (Cpu::default(), RamBus::new(0x4000))
    }

    #[test]
    fn aligned_accesses_round_trip() {
        let (mut cpu, mut bus) = flat_cpu();
        write_long(&mut cpu, &mut bus, 0x100, 0x1122_3344, AccessMode::Kernel).expect("aligned");
        assert_eq!(
            read_long(&mut cpu, &mut bus, 0x100, AccessMode::Kernel).expect("aligned"),
            0x1122_3344
        );
    }

    #[test]
    fn misaligned_long_round_trips_for_every_offset() {
        let (mut cpu, mut bus) = flat_cpu();
        for offset in 1_u32..4 {
            let va = 0x200 + offset;
            write_long(&mut cpu, &mut bus, va, 0xA5C3_7E01, AccessMode::Kernel).expect("write");
            assert_eq!(
                read_long(&mut cpu, &mut bus, va, AccessMode::Kernel).expect("read"),
                0xA5C3_7E01
            );
        }
    }

    #[test]
    fn misaligned_word_within_longword_round_trips() {
        let (mut cpu, mut bus) = flat_cpu();
        write_word(&mut cpu, &mut bus, 0x301, 0xBEEF, AccessMode::Kernel).expect("write");
        assert_eq!(
            read_word(&mut cpu, &mut bus, 0x301, AccessMode::Kernel).expect("read"),
            0xBEEF
        );
    }

    #[test]
    fn word_split_across_longword_boundary_round_trips() {
        let (mut cpu, mut bus) = flat_cpu();
        write_word(&mut cpu, &mut bus, 0x303, 0xCAFE, AccessMode::Kernel).expect("write");
        assert_eq!(
            read_word(&mut cpu, &mut bus, 0x303, AccessMode::Kernel).expect("read"),
            0xCAFE
        );
        assert_eq!(bus.read_byte(0x303).expect("ram"), 0xFE);
        assert_eq!(bus.read_byte(0x304).expect("ram"), 0xCA);
    }

    #[test]
    fn misaligned_write_preserves_neighbouring_bytes() {
        let (mut cpu, mut bus) = flat_cpu();
        for pa in 0x400_u32..0x410 {
            bus.write_byte(pa, 0x55).expect("ram");
        }
        write_long(&mut cpu, &mut bus, 0x403, 0x0102_0304, AccessMode::Kernel).expect("write");

        assert_eq!(bus.read_byte(0x402).expect("ram"), 0x55);
        assert_eq!(bus.read_byte(0x403).expect("ram"), 0x04);
        assert_eq!(bus.read_byte(0x406).expect("ram"), 0x01);
        assert_eq!(bus.read_byte(0x407).expect("ram"), 0x55);
    }

    #[test]
    fn page_crossing_long_round_trips() {
        let (mut cpu, mut bus) = flat_cpu();
        let va = 0x3FE; // last word of page 1, crossing into page 2
        write_long(&mut cpu, &mut bus, va, 0xDDCC_BBAA, AccessMode::Kernel).expect("write");
        assert_eq!(
            read_long(&mut cpu, &mut bus, va, AccessMode::Kernel).expect("read"),
            0xDDCC_BBAA
        );
    }
}
