//! Interrupt arbitration and SCB exception dispatch.
//!
//! The system control block (SCB) is a page of vector longwords addressed
//! physically through SCBB. Bit 1 of a vector must be zero (a set bit is a
//! fatal machine stop); bit 0 forces delivery on the interrupt stack.

use log::debug;
use thiserror::Error;

use crate::cpu::{Cpu, DEVICE_IPL_BASE};
use crate::fault::{Fault, FaultClass, FaultKind, FatalStop};
use crate::memory::bus::PhysicalBus;
use crate::memory::virt;
use crate::state::psl::{AccessMode, PSL_IS, Psl};

/// SCB offsets of the architecturally fixed vectors.
pub mod scb {
    /// Machine check abort.
    pub const MACHINE_CHECK: u16 = 0x04;
    /// Kernel-stack-not-valid abort.
    pub const KERNEL_STACK_NOT_VALID: u16 = 0x08;
    /// Reserved or privileged instruction fault.
    pub const RESERVED_INSTRUCTION: u16 = 0x10;
    /// Reserved operand fault.
    pub const RESERVED_OPERAND: u16 = 0x18;
    /// Reserved addressing-mode fault.
    pub const RESERVED_ADDRESSING: u16 = 0x1C;
    /// Access-control or length violation fault.
    pub const ACCESS_VIOLATION: u16 = 0x20;
    /// Translation-not-valid fault.
    pub const TRANSLATION_NOT_VALID: u16 = 0x24;
    /// Trace-pending fault.
    pub const TRACE_PENDING: u16 = 0x28;
    /// Compatibility-mode fault.
    pub const COMPATIBILITY: u16 = 0x30;
    /// Arithmetic trap/fault.
    pub const ARITHMETIC: u16 = 0x34;
    /// First change-mode vector; CHMK/E/S/U occupy 0x40..=0x4C.
    pub const CHANGE_MODE_BASE: u16 = 0x40;
    /// Corrected-read-data interrupt.
    pub const CORRECTED_READ: u16 = 0x54;
    /// Uncorrectable memory-error interrupt.
    pub const MEMORY_ERROR: u16 = 0x60;
    /// First software-interrupt vector; level `n` lives at `0x80 + 4 * n`.
    pub const SOFTWARE_BASE: u16 = 0x80;
    /// Interval-timer interrupt.
    pub const INTERVAL_TIMER: u16 = 0xC0;
    /// Console interrupt.
    pub const CONSOLE: u16 = 0xF8;
}

/// Failure while delivering an exception or interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The delivery itself faulted (typically the target stack push).
    #[error(transparent)]
    Fault(#[from] Fault),
    /// The machine cannot continue.
    #[error(transparent)]
    Fatal(#[from] FatalStop),
}

/// How the new PSL is composed after the frame push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// Synchronous exception: previous mode records the interrupted mode,
    /// IPL is preserved.
    Exception,
    /// Asynchronous interrupt at the given level, delivered on the
    /// interrupt stack.
    Interrupt(u32),
    /// Abort: interrupt stack and IPL 31 regardless of the vector.
    Severe,
}

/// A request that has won arbitration and is ready for service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    /// Halt pin, IPL 31, unvectored.
    HaltPin,
    /// Uncorrectable memory error, IPL 29.
    MemoryError,
    /// Corrected read data, IPL 26.
    CorrectedRead,
    /// Device request at IPL 20..=23.
    Device(u32),
    /// Interval timer, IPL 22.
    Timer,
    /// Console, IPL 20.
    Console,
    /// Software interrupt at level 1..=15.
    Software(u32),
}

impl Pending {
    /// The IPL at which this request is serviced.
    #[must_use]
    pub const fn level(self) -> u32 {
        match self {
            Self::HaltPin => 31,
            Self::MemoryError => 29,
            Self::CorrectedRead => 26,
            Self::Device(level) | Self::Software(level) => level,
            Self::Timer => 22,
            Self::Console => 20,
        }
    }
}

/// Supplies vectors for acknowledged device interrupts.
pub trait DeviceVectors {
    /// Returns the SCB offset for the device occupying `slot` at `level`.
    fn acknowledge(&mut self, level: u32, slot: u8) -> u16;
}

/// Arbitrates all pending requests against the current IPL.
///
/// Returns the highest-priority request whose level is strictly above the
/// PSL IPL field, or `None`. Nothing is cleared; [`service`] consumes the
/// winning request.
#[must_use]
pub fn eval_pending(cpu: &Cpu) -> Option<Pending> {
    let ipl = cpu.psl.ipl();
    if cpu.lines.halt_pin {
        return Some(Pending::HaltPin);
    }
    if cpu.lines.mem_err && ipl < 29 {
        return Some(Pending::MemoryError);
    }
    if cpu.lines.crd_err && ipl < 26 {
        return Some(Pending::CorrectedRead);
    }
    for level in (DEVICE_IPL_BASE..=23).rev() {
        if ipl >= level {
            break;
        }
        if cpu.lines.device_pending(level) {
            return Some(Pending::Device(level));
        }
        if level == 22 && cpu.lines.timer {
            return Some(Pending::Timer);
        }
        if level == 20 && cpu.lines.console {
            return Some(Pending::Console);
        }
    }
    for level in (1..=15).rev() {
        if ipl >= level {
            break;
        }
        if cpu.control.sisr & (1 << level) != 0 {
            return Some(Pending::Software(level));
        }
    }
    None
}

/// Consumes exactly one pending request and returns its SCB offset.
///
/// # Errors
///
/// The halt pin has no vector; servicing it is a [`FatalStop::HaltPin`].
pub fn service(
    cpu: &mut Cpu,
    devices: &mut dyn DeviceVectors,
    pending: Pending,
) -> Result<u16, FatalStop> {
    match pending {
        Pending::HaltPin => {
            cpu.lines.halt_pin = false;
            Err(FatalStop::HaltPin)
        }
        Pending::MemoryError => {
            cpu.lines.mem_err = false;
            Ok(scb::MEMORY_ERROR)
        }
        Pending::CorrectedRead => {
            cpu.lines.crd_err = false;
            Ok(scb::CORRECTED_READ)
        }
        Pending::Device(level) => {
            let index = (level - DEVICE_IPL_BASE) as usize;
            let bitmap = cpu.lines.device[index];
            let slot = bitmap.trailing_zeros() as u8;
            cpu.lines.device[index] = bitmap & (bitmap - 1);
            Ok(devices.acknowledge(level, slot))
        }
        Pending::Timer => {
            cpu.lines.timer = false;
            Ok(scb::INTERVAL_TIMER)
        }
        Pending::Console => {
            cpu.lines.console = false;
            Ok(scb::CONSOLE)
        }
        Pending::Software(level) => {
            cpu.control.sisr &= !(1 << level);
            Ok(scb::SOFTWARE_BASE + 4 * level as u16)
        }
    }
}

/// Reads an SCB vector longword, enforcing the bit-1 fatal rule.
pub(crate) fn read_vector(
    cpu: &Cpu,
    bus: &mut dyn PhysicalBus,
    offset: u16,
) -> Result<u32, DispatchError> {
    let vector = bus.read_long(cpu.control.scbb.wrapping_add(u32::from(offset)))?;
    if vector & 2 != 0 {
        return Err(DispatchError::Fatal(FatalStop::IllegalVector {
            vector,
            offset,
        }));
    }
    Ok(vector)
}

/// Vectors through the SCB: pushes `params`, the PC, and the PSL on the
/// selected stack and enters the handler in kernel mode.
///
/// The interrupt stack is selected when the CPU is already on it, when the
/// vector's bit 0 requests it, or when `kind` is severe.
///
/// # Errors
///
/// A vector longword with bit 1 set is fatal; stack pushes may fault, in
/// which case the CPU is left switched to the target stack with a partial
/// frame (the caller escalates).
pub fn dispatch(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    offset: u16,
    kind: DispatchKind,
    params: &[u32],
) -> Result<(), DispatchError> {
    let vector = read_vector(cpu, bus, offset)?;
    let severe = kind == DispatchKind::Severe;
    let interrupt_stack = cpu.psl.is_set(PSL_IS) || vector & 1 != 0 || severe;

    let old_psl = cpu.psl;
    let old_pc = cpu.regs.pc();
    cpu.save_live_sp();

    let mut new_psl = Psl::default();
    new_psl.set_current_mode(AccessMode::Kernel);
    match kind {
        DispatchKind::Exception => {
            new_psl.set_previous_mode(old_psl.current_mode());
            new_psl.set_ipl(old_psl.ipl());
        }
        DispatchKind::Interrupt(level) => {
            new_psl.set_previous_mode(AccessMode::Kernel);
            new_psl.set_ipl(level);
        }
        DispatchKind::Severe => {
            new_psl.set_previous_mode(old_psl.current_mode());
            new_psl.set_ipl(31);
        }
    }
    new_psl.set_flag(PSL_IS, interrupt_stack);
    cpu.psl = new_psl;
    cpu.load_live_sp();

    debug!(
        "dispatch: offset {offset:#04x} -> handler {handler:#010x} (is={interrupt_stack})",
        handler = vector & !3
    );

    let mut sp = cpu.regs.sp();
    sp = sp.wrapping_sub(4);
    virt::write_long(cpu, bus, sp, old_psl.raw(), AccessMode::Kernel)?;
    sp = sp.wrapping_sub(4);
    virt::write_long(cpu, bus, sp, old_pc, AccessMode::Kernel)?;
    for &param in params.iter().rev() {
        sp = sp.wrapping_sub(4);
        virt::write_long(cpu, bus, sp, param, AccessMode::Kernel)?;
    }
    cpu.regs.set_sp(sp);
    cpu.regs.set_pc(vector & !3);
    Ok(())
}

const fn fault_offset(kind: FaultKind) -> u16 {
    match kind {
        FaultKind::AccessViolation
        | FaultKind::LengthViolation
        | FaultKind::PageTableAccessViolation => scb::ACCESS_VIOLATION,
        FaultKind::TranslationNotValid | FaultKind::PageTableTranslationNotValid => {
            scb::TRANSLATION_NOT_VALID
        }
        FaultKind::ReservedOperand => scb::RESERVED_OPERAND,
        FaultKind::ReservedAddressingMode => scb::RESERVED_ADDRESSING,
        FaultKind::ReservedInstruction | FaultKind::PrivilegedInstruction => {
            scb::RESERVED_INSTRUCTION
        }
        FaultKind::ArithmeticTrap => scb::ARITHMETIC,
        FaultKind::CompatibilityFault => scb::COMPATIBILITY,
        FaultKind::MachineCheck => scb::MACHINE_CHECK,
    }
}

/// Delivers a fault raised by the MMU or executor to its guest handler.
///
/// Memory-management faults stack two parameters (reason mask, virtual
/// address), arithmetic traps one (the type code), machine checks a
/// byte-count longword followed by the parameters. A push failure while
/// delivering an ordinary fault escalates to the kernel-stack-not-valid
/// abort; any further failure, or a nested machine check, stops the machine.
///
/// # Errors
///
/// Returns the fatal stop when the escalation ladder runs out.
pub fn dispatch_fault(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    fault: &Fault,
) -> Result<(), FatalStop> {
    let offset = fault_offset(fault.kind);
    let (kind, params) = match fault.kind.class() {
        FaultClass::MachineCheck => (
            DispatchKind::Severe,
            // Byte count of the parameters that follow, then the parameters.
            vec![8, fault.param1, fault.param2],
        ),
        FaultClass::MemoryManagement => {
            (DispatchKind::Exception, vec![fault.param1, fault.param2])
        }
        FaultClass::Arithmetic => (DispatchKind::Exception, vec![fault.param1]),
        FaultClass::Reserved | FaultClass::Privilege | FaultClass::Compatibility => {
            (DispatchKind::Exception, vec![])
        }
    };

    match dispatch(cpu, bus, offset, kind, &params) {
        Ok(()) => Ok(()),
        Err(DispatchError::Fatal(stop)) => Err(stop),
        Err(DispatchError::Fault(nested)) => {
            if fault.kind.is_severe() {
                return Err(FatalStop::DoubleMachineCheck);
            }
            // Escalate onto the interrupt stack: a machine check during
            // delivery becomes a machine-check abort, anything else is the
            // kernel-stack-not-valid abort. Failure there stops the machine.
            let (abort_offset, abort_params) = if nested.kind.is_severe() {
                (
                    scb::MACHINE_CHECK,
                    vec![8, nested.param1, nested.param2],
                )
            } else {
                (scb::KERNEL_STACK_NOT_VALID, vec![])
            };
            match dispatch(cpu, bus, abort_offset, DispatchKind::Severe, &abort_params) {
                Ok(()) => Ok(()),
                Err(DispatchError::Fatal(stop)) => Err(stop),
                Err(DispatchError::Fault(_)) => Err(FatalStop::DoubleMachineCheck),
            }
        }
    }
}
