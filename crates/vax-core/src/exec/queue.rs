//! Absolute-insert and interlocked queue instructions.
//!
//! All queue links are self-relative: the flink longword at a structure's
//! base and the blink longword at base + 4 both hold the displacement of the
//! target structure from the base. An empty queue is a header whose flink
//! displacement is zero. Every address an operation writes is checked
//! writable before the first link commits, so a faulting queue operation
//! leaves the queue intact.

use crate::cpu::Cpu;
use crate::fault::{AccessIntent, Fault, FaultKind};
use crate::memory::bus::PhysicalBus;
use crate::memory::tlb::translate;
use crate::memory::virt;
use crate::state::psl::{PSL_C, PSL_V, PSL_Z};

/// Secondary-interlock bit in a header flink displacement.
const QUEUE_BUSY: u32 = 1;

/// Outcome of an interlocked insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStatus {
    /// Entry linked in; the Z flag reports whether the queue was empty.
    Inserted,
    /// Header was busy; nothing written, C set.
    InterlockFailed,
}

/// Outcome of an interlocked remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveStatus {
    /// Entry unlinked; the Z flag reports whether the queue is now empty.
    Removed(u32),
    /// Queue was empty; nothing written, V set.
    Empty,
    /// Header was busy; nothing written, C set.
    InterlockFailed,
}

fn follow(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    base: u32,
    link_offset: u32,
) -> Result<u32, Fault> {
    let mode = cpu.current_mode();
    let displacement = virt::read_long(cpu, bus, base.wrapping_add(link_offset), mode)?;
    Ok(base.wrapping_add(displacement))
}

fn write_link(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    base: u32,
    link_offset: u32,
    target: u32,
) -> Result<(), Fault> {
    let mode = cpu.current_mode();
    virt::write_long(
        cpu,
        bus,
        base.wrapping_add(link_offset),
        target.wrapping_sub(base),
        mode,
    )
}

fn probe_writes(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    addresses: &[u32],
) -> Result<(), Fault> {
    let mode = cpu.current_mode();
    for &va in addresses {
        translate(cpu, bus, va, mode, AccessIntent::Write)?;
        // Link longwords may be misaligned for the absolute-insert family.
        translate(cpu, bus, va.wrapping_add(3), mode, AccessIntent::Write)?;
    }
    Ok(())
}

fn require_quad_aligned(address: u32) -> Result<(), Fault> {
    if address & 7 != 0 {
        return Err(Fault {
            kind: FaultKind::ReservedOperand,
            param1: address,
            param2: 0,
        });
    }
    Ok(())
}

/// INSQUE: links `entry` immediately after `predecessor`.
///
/// Sets Z when the queue was empty; N, V, and C are cleared.
///
/// # Errors
///
/// Propagates translation faults; the queue is unmodified on any fault.
pub fn insque(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    entry: u32,
    predecessor: u32,
) -> Result<(), Fault> {
    let successor = follow(cpu, bus, predecessor, 0)?;
    probe_writes(
        cpu,
        bus,
        &[entry, entry.wrapping_add(4), predecessor, successor.wrapping_add(4)],
    )?;

    write_link(cpu, bus, entry, 0, successor)?;
    write_link(cpu, bus, entry, 4, predecessor)?;
    write_link(cpu, bus, predecessor, 0, entry)?;
    write_link(cpu, bus, successor, 4, entry)?;

    cpu.psl
        .set_condition_codes(if successor == predecessor { PSL_Z } else { 0 });
    Ok(())
}

/// REMQUE: unlinks `entry` from its queue and returns its address.
///
/// Sets V and C when the entry was alone (nothing to remove, no memory
/// written) and Z when the queue is empty afterwards.
///
/// # Errors
///
/// Propagates translation faults; the queue is unmodified on any fault.
pub fn remque(cpu: &mut Cpu, bus: &mut dyn PhysicalBus, entry: u32) -> Result<u32, Fault> {
    let successor = follow(cpu, bus, entry, 0)?;
    let predecessor = follow(cpu, bus, entry, 4)?;

    if successor == entry {
        // Removal from an empty queue touches no memory.
        cpu.psl.set_condition_codes(PSL_V | PSL_C | PSL_Z);
        return Ok(entry);
    }

    probe_writes(cpu, bus, &[predecessor, successor.wrapping_add(4)])?;
    write_link(cpu, bus, predecessor, 0, successor)?;
    write_link(cpu, bus, successor, 4, predecessor)?;

    cpu.psl
        .set_condition_codes(if successor == predecessor { PSL_Z } else { 0 });
    Ok(entry)
}

/// INSQHI/INSQTI: interlocked insert of `entry` at the head or tail of the
/// queue at `header`.
///
/// # Errors
///
/// Faults reserved-operand when `entry` or `header` is not quadword aligned
/// or the two coincide; propagates translation faults.
pub fn insert_interlocked(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    entry: u32,
    header: u32,
    at_head: bool,
) -> Result<InsertStatus, Fault> {
    require_quad_aligned(entry)?;
    require_quad_aligned(header)?;
    if entry == header {
        return Err(Fault {
            kind: FaultKind::ReservedOperand,
            param1: entry,
            param2: header,
        });
    }

    let mode = cpu.current_mode();
    let head_displacement = virt::read_long(cpu, bus, header, mode)?;
    if head_displacement & QUEUE_BUSY != 0 {
        cpu.psl.set_condition_codes(PSL_C);
        return Ok(InsertStatus::InterlockFailed);
    }
    let was_empty = head_displacement == 0;

    // Into an empty queue, head and tail inserts degenerate identically.
    let (predecessor, successor) = if was_empty {
        (header, header)
    } else if at_head {
        (header, header.wrapping_add(head_displacement))
    } else {
        (follow(cpu, bus, header, 4)?, header)
    };

    probe_writes(
        cpu,
        bus,
        &[entry, entry.wrapping_add(4), predecessor, successor.wrapping_add(4)],
    )?;
    write_link(cpu, bus, entry, 0, successor)?;
    write_link(cpu, bus, entry, 4, predecessor)?;
    write_link(cpu, bus, predecessor, 0, entry)?;
    write_link(cpu, bus, successor, 4, entry)?;

    cpu.psl.set_condition_codes(if was_empty { PSL_Z } else { 0 });
    Ok(InsertStatus::Inserted)
}

/// REMQHI/REMQTI: interlocked removal from the head or tail of the queue at
/// `header`.
///
/// # Errors
///
/// Faults reserved-operand when `header` is not quadword aligned; propagates
/// translation faults.
pub fn remove_interlocked(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    header: u32,
    from_head: bool,
) -> Result<RemoveStatus, Fault> {
    require_quad_aligned(header)?;

    let mode = cpu.current_mode();
    let head_displacement = virt::read_long(cpu, bus, header, mode)?;
    if head_displacement & QUEUE_BUSY != 0 {
        cpu.psl.set_condition_codes(PSL_C);
        return Ok(RemoveStatus::InterlockFailed);
    }
    if head_displacement == 0 {
        cpu.psl.set_condition_codes(PSL_V | PSL_Z);
        return Ok(RemoveStatus::Empty);
    }

    let entry = if from_head {
        header.wrapping_add(head_displacement)
    } else {
        follow(cpu, bus, header, 4)?
    };
    let successor = follow(cpu, bus, entry, 0)?;
    let predecessor = follow(cpu, bus, entry, 4)?;

    probe_writes(cpu, bus, &[predecessor, successor.wrapping_add(4)])?;
    write_link(cpu, bus, predecessor, 0, successor)?;
    write_link(cpu, bus, successor, 4, predecessor)?;

    cpu.psl
        .set_condition_codes(if successor == predecessor { PSL_Z } else { 0 });
    Ok(RemoveStatus::Removed(entry))
}
