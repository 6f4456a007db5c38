//! Cycle-level CPU and memory-management core for the VAX architecture.
//!
//! The crate models the architectural state machine: registers, PSL, the
//! two-bank translation buffer, the complex-instruction executors, and the
//! SCB exception dispatcher. Operand decoding, device controllers, and the
//! fetch loop belong to the host, which drives the core through [`Cpu`] and
//! a [`PhysicalBus`] implementation.

/// Architectural CPU state model primitives.
pub mod state;
pub use state::{
    AccessMode, ControlRegisters, GENERAL_REGISTER_COUNT, Psl, REG_AP, REG_FP, REG_PC, REG_SP,
    RegisterFile, StackBank,
};

/// Fault taxonomy and fatal machine stops.
pub mod fault;
pub use fault::{
    AccessIntent, Fault, FaultClass, FaultKind, FatalStop, arith_code, mm_reason,
    privilege_violation, reserved_operand,
};

/// Memory model: physical bus, translation buffer, virtual accessor.
pub mod memory;
pub use memory::{
    PAGE_SHIFT, PAGE_SIZE, PROTECTION_TABLE, PhysicalBus, ProbeStatus, RamBus, TLB_BANK_ENTRIES,
    Tlb, TlbEntry, fill, probe, read_virtual, translate, write_virtual,
};

/// CPU context object and per-instance configuration.
pub mod cpu;
pub use cpu::{Cpu, CpuConfig, InterruptLines};

/// Complex-instruction executors.
pub mod exec;
pub use exec::{
    Completion, FieldBase, InsertStatus, RemoveStatus, branch_on_bit, callg, calls, chm, cmpc3,
    cmpc5, extract_field, insert_field, insert_interlocked, insque, ipr, locc, mfpr, movc3, movc5,
    mtpr, remove_interlocked, remque, ret, rei, scan_table, skpc,
};

/// Interrupt arbitration and SCB exception dispatch.
pub mod interrupt;
pub use interrupt::{
    DeviceVectors, DispatchError, DispatchKind, Pending, dispatch, dispatch_fault, eval_pending,
    scb, service,
};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
