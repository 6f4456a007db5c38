//! Physical accessor contract and the RAM-backed reference implementation.

use crate::fault::{Fault, FaultKind};

/// Aligned physical accessor owned by the host.
///
/// RAM-backed addresses answer directly; register-space and I/O-space
/// addresses belong to external bus adapters, whose access failures surface
/// as machine checks rather than zero fills. All addresses passed to the
/// word/long methods are naturally aligned; the core pre-splits misaligned
/// virtual accesses before they reach this trait.
pub trait PhysicalBus {
    /// Reads one byte of physical space.
    ///
    /// # Errors
    ///
    /// Returns a [`FaultKind::MachineCheck`] fault when the address is not
    /// claimed by RAM or any bus adapter.
    fn read_byte(&mut self, pa: u32) -> Result<u8, Fault>;

    /// Reads an aligned 16-bit word of physical space.
    ///
    /// # Errors
    ///
    /// Returns a [`FaultKind::MachineCheck`] fault on unclaimed addresses.
    fn read_word(&mut self, pa: u32) -> Result<u16, Fault>;

    /// Reads an aligned 32-bit longword of physical space.
    ///
    /// # Errors
    ///
    /// Returns a [`FaultKind::MachineCheck`] fault on unclaimed addresses.
    fn read_long(&mut self, pa: u32) -> Result<u32, Fault>;

    /// Writes one byte of physical space.
    ///
    /// # Errors
    ///
    /// Returns a [`FaultKind::MachineCheck`] fault on unclaimed addresses.
    fn write_byte(&mut self, pa: u32, value: u8) -> Result<(), Fault>;

    /// Writes an aligned 16-bit word of physical space.
    ///
    /// # Errors
    ///
    /// Returns a [`FaultKind::MachineCheck`] fault on unclaimed addresses.
    fn write_word(&mut self, pa: u32, value: u16) -> Result<(), Fault>;

    /// Writes an aligned 32-bit longword of physical space.
    ///
    /// # Errors
    ///
    /// Returns a [`FaultKind::MachineCheck`] fault on unclaimed addresses.
    fn write_long(&mut self, pa: u32, value: u32) -> Result<(), Fault>;
}

/// Builds the machine-check fault raised for unclaimed physical addresses.
#[must_use]
pub const fn machine_check(pa: u32) -> Fault {
    Fault {
        kind: FaultKind::MachineCheck,
        param1: 0,
        param2: pa,
    }
}

/// Flat little-endian RAM implementation of [`PhysicalBus`].
///
/// Hosts with register/IO spaces wrap this with their own dispatch; the test
/// suites use it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamBus {
    bytes: Box<[u8]>,
}

impl RamBus {
    /// Allocates a zeroed RAM image of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size].into_boxed_slice(),
        }
    }

    /// Returns the RAM size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Borrows the raw RAM image.
    #[must_use]
    pub const fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutably borrows the raw RAM image.
    pub const fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn slice(&mut self, pa: u32, len: usize) -> Result<&mut [u8], Fault> {
        let start = pa as usize;
        let end = start.checked_add(len).ok_or_else(|| machine_check(pa))?;
        if end > self.bytes.len() {
            return Err(machine_check(pa));
        }
        Ok(&mut self.bytes[start..end])
    }
}

impl PhysicalBus for RamBus {
    fn read_byte(&mut self, pa: u32) -> Result<u8, Fault> {
        Ok(self.slice(pa, 1)?[0])
    }

    fn read_word(&mut self, pa: u32) -> Result<u16, Fault> {
        let bytes = self.slice(pa & !1, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_long(&mut self, pa: u32) -> Result<u32, Fault> {
        let bytes = self.slice(pa & !3, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn write_byte(&mut self, pa: u32, value: u8) -> Result<(), Fault> {
        self.slice(pa, 1)?[0] = value;
        Ok(())
    }

    fn write_word(&mut self, pa: u32, value: u16) -> Result<(), Fault> {
        self.slice(pa & !1, 2)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn write_long(&mut self, pa: u32, value: u32) -> Result<(), Fault> {
        self.slice(pa & !3, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{PhysicalBus, RamBus};
    use crate::fault::FaultKind;

    #[test]
    fn ram_round_trips_little_endian_values() {
        let mut bus = RamBus::new(0x1000);

        bus.write_long(0x100, 0xDEAD_BEEF).expect("in range");
        assert_eq!(bus.read_long(0x100).expect("in range"), 0xDEAD_BEEF);
        assert_eq!(bus.read_byte(0x100).expect("in range"), 0xEF);
        assert_eq!(bus.read_word(0x102).expect("in range"), 0xDEAD);
    }

    #[test]
    fn word_and_long_accesses_force_natural_alignment() {
        let mut bus = RamBus::new(0x100);
        bus.write_long(0x10, 0x4433_2211).expect("in range");

        // The bus contract only receives aligned addresses; low bits are
        // ignored rather than trusted.
        assert_eq!(bus.read_long(0x13).expect("in range"), 0x4433_2211);
        assert_eq!(bus.read_word(0x11).expect("in range"), 0x2211);
    }

    #[test]
    fn out_of_range_access_is_a_machine_check() {
        let mut bus = RamBus::new(0x100);
        let fault = bus.read_long(0x200).expect_err("beyond ram");
        assert_eq!(fault.kind, FaultKind::MachineCheck);
        assert_eq!(fault.param2, 0x200);

        let fault = bus.write_byte(u32::MAX, 1).expect_err("beyond ram");
        assert_eq!(fault.kind, FaultKind::MachineCheck);
    }
}
