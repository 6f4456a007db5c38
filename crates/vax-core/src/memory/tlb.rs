//! Translation buffer, page-table walker, and access-probe logic.

use log::trace;

use crate::cpu::Cpu;
use crate::fault::{AccessIntent, Fault, FaultKind, mm_reason};
use crate::memory::bus::PhysicalBus;
use crate::state::psl::AccessMode;

/// Page size in bytes.
pub const PAGE_SIZE: u32 = 512;
/// Shift from byte address to virtual page number.
pub const PAGE_SHIFT: u32 = 9;
/// Byte-within-page mask.
pub const PAGE_OFFSET_MASK: u32 = PAGE_SIZE - 1;
/// Entries per direct-mapped translation-buffer bank.
pub const TLB_BANK_ENTRIES: usize = 64;

/// Top address bit selecting system space.
pub const VA_SYSTEM: u32 = 1 << 31;
/// Second address bit selecting process region 1.
pub const VA_P1: u32 = 1 << 30;
/// Virtual page number within a region (bits 29..=9).
const VA_REGION_VPN_MASK: u32 = 0x3FFF_FFFF;

/// PTE valid bit.
pub const PTE_VALID: u32 = 1 << 31;
/// PTE modified bit.
pub const PTE_MODIFIED: u32 = 1 << 26;
/// Shift of the 4-bit protection code within a PTE.
pub const PTE_PROT_SHIFT: u32 = 27;
/// Mask of the 21-bit page frame number within a PTE.
pub const PTE_PFN_MASK: u32 = 0x001F_FFFF;

/// Per-mode {read, write} permission masks for the 16 protection codes.
///
/// Bit `m` of a mask grants the access to mode `m` (kernel = bit 0). Codes 0
/// and 1 grant nothing; code 4 grants everything; the remainder widen read
/// access outward while holding write access at an inner mode.
pub const PROTECTION_TABLE: [(u8, u8); 16] = [
    (0b0000, 0b0000), // no access
    (0b0000, 0b0000), // reserved
    (0b0001, 0b0001), // kernel write
    (0b0001, 0b0000), // kernel read
    (0b1111, 0b1111), // all write
    (0b0011, 0b0011), // executive write
    (0b0011, 0b0001), // executive read, kernel write
    (0b0011, 0b0000), // executive read
    (0b0111, 0b0111), // supervisor write
    (0b0111, 0b0011), // supervisor read, executive write
    (0b0111, 0b0001), // supervisor read, kernel write
    (0b0111, 0b0000), // supervisor read
    (0b1111, 0b0111), // user read, supervisor write
    (0b1111, 0b0011), // user read, executive write
    (0b1111, 0b0001), // user read, kernel write
    (0b1111, 0b0000), // user read
];

/// One direct-mapped translation-buffer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TlbEntry {
    /// Full virtual page number tag (region bits included).
    pub tag: u32,
    /// Per-mode read permission mask.
    pub read_mask: u8,
    /// Per-mode write permission mask.
    pub write_mask: u8,
    /// Set once the underlying PTE modified bit has been written back.
    pub modified: bool,
    /// Physical page base (frame number shifted into a byte address).
    pub frame: u32,
    /// Entry holds a live translation.
    pub valid: bool,
}

impl TlbEntry {
    /// Returns `true` when the entry permits `intent` from `mode`.
    ///
    /// A write additionally requires the modified bit to have been accounted,
    /// so first-write references always take the fill path.
    #[must_use]
    pub const fn permits(&self, mode: AccessMode, intent: AccessIntent) -> bool {
        match intent {
            AccessIntent::Read => self.read_mask & mode.mask_bit() != 0,
            AccessIntent::Write => self.write_mask & mode.mask_bit() != 0 && self.modified,
        }
    }
}

/// Direct-mapped translation-buffer banks for process and system space.
///
/// Entries never migrate between banks; a fill always evicts whatever
/// occupies the target index.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Tlb {
    process: [TlbEntry; TLB_BANK_ENTRIES],
    system: [TlbEntry; TLB_BANK_ENTRIES],
}

impl Default for Tlb {
    fn default() -> Self {
        Self {
            process: [TlbEntry::default(); TLB_BANK_ENTRIES],
            system: [TlbEntry::default(); TLB_BANK_ENTRIES],
        }
    }
}

impl Tlb {
    fn bank(&self, va: u32) -> &[TlbEntry; TLB_BANK_ENTRIES] {
        if va & VA_SYSTEM != 0 {
            &self.system
        } else {
            &self.process
        }
    }

    fn bank_mut(&mut self, va: u32) -> &mut [TlbEntry; TLB_BANK_ENTRIES] {
        if va & VA_SYSTEM != 0 {
            &mut self.system
        } else {
            &mut self.process
        }
    }

    /// Returns the cached entry for `va` when its tag matches.
    #[must_use]
    pub fn entry(&self, va: u32) -> Option<&TlbEntry> {
        let vpn = va >> PAGE_SHIFT;
        let entry = &self.bank(va)[vpn as usize % TLB_BANK_ENTRIES];
        (entry.valid && entry.tag == vpn).then_some(entry)
    }

    /// Inserts an entry at its direct-mapped slot, evicting any occupant.
    pub fn insert(&mut self, entry: TlbEntry) {
        let va = entry.tag << PAGE_SHIFT;
        self.bank_mut(va)[entry.tag as usize % TLB_BANK_ENTRIES] = entry;
    }

    /// Clears both banks.
    pub fn invalidate_all(&mut self) {
        self.process = [TlbEntry::default(); TLB_BANK_ENTRIES];
        self.system = [TlbEntry::default(); TLB_BANK_ENTRIES];
        trace!("tlb: invalidate all");
    }

    /// Clears the system bank and, because process page tables live in
    /// system space, the process bank with it.
    pub fn invalidate_system(&mut self) {
        self.invalidate_all();
    }

    /// Clears only the process bank.
    pub fn invalidate_process(&mut self) {
        self.process = [TlbEntry::default(); TLB_BANK_ENTRIES];
        trace!("tlb: invalidate process bank");
    }

    /// Clears the single entry whose tag matches `va`, if cached.
    pub fn invalidate_single(&mut self, va: u32) {
        let vpn = va >> PAGE_SHIFT;
        let entry = &mut self.bank_mut(va)[vpn as usize % TLB_BANK_ENTRIES];
        if entry.valid && entry.tag == vpn {
            *entry = TlbEntry::default();
            trace!("tlb: invalidate va {va:#010x}");
        }
    }

    /// Returns `true` when a live translation for `va` is cached (TBCHK).
    #[must_use]
    pub fn tag_present(&self, va: u32) -> bool {
        self.entry(va).is_some()
    }
}

/// Non-faulting status codes returned by explicit access probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ProbeStatus {
    /// The access would succeed.
    Ok,
    /// The PTE protection field denies the access.
    AccessViolation,
    /// The page index exceeds the region length register.
    LengthViolation,
    /// The PTE valid bit is clear.
    TranslationNotValid,
    /// The page-table reference itself was denied.
    PageTableAccessViolation,
    /// The page-table reference itself was invalid.
    PageTableTranslationNotValid,
}

/// Translates `va` to a physical address, filling the TLB on a miss.
///
/// When mapping is disabled the virtual address is the physical address.
///
/// # Errors
///
/// Propagates the §7 memory-management faults and machine checks raised by
/// the physical bus during the page-table walk.
pub fn translate(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    mode: AccessMode,
    intent: AccessIntent,
) -> Result<u32, Fault> {
    if cpu.control.mapen == 0 {
        return Ok(va);
    }
    if let Some(entry) = cpu.tlb.entry(va) {
        if entry.permits(mode, intent) {
            return Ok(entry.frame | (va & PAGE_OFFSET_MASK));
        }
    }
    let entry = fill(cpu, bus, va, mode, intent)?;
    Ok(entry.frame | (va & PAGE_OFFSET_MASK))
}

/// Walks the page tables for `va` and inserts the resulting TLB entry.
///
/// Process-space PTE addresses are themselves system virtual addresses and
/// are resolved through the system bank with exactly one level of recursion;
/// system page tables are never paged.
///
/// # Errors
///
/// Returns length-violation, access-violation, translation-not-valid, or the
/// page-table variants thereof; bus failures surface as machine checks.
pub fn fill(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    mode: AccessMode,
    intent: AccessIntent,
) -> Result<TlbEntry, Fault> {
    let pte_pa = if va & VA_SYSTEM != 0 {
        system_pte_address(cpu, va, intent, false)?
    } else {
        let pte_va = process_pte_address(cpu, va, intent)?;
        // One recursion level: resolve the PTE's own system address.
        let cached = cpu
            .tlb
            .entry(pte_va)
            .filter(|entry| entry.permits(AccessMode::Kernel, AccessIntent::Read))
            .copied();
        let entry = match cached {
            Some(entry) => entry,
            None => fill_system_for_page_table(cpu, bus, pte_va, va, intent)?,
        };
        entry.frame | (pte_va & PAGE_OFFSET_MASK)
    };

    let pte = bus.read_long(pte_pa)?;
    let entry = entry_from_pte(bus, va, pte, pte_pa, mode, intent, false)?;
    cpu.tlb.insert(entry);
    trace!(
        "tlb: fill va {va:#010x} -> frame {frame:#010x} (pte {pte:#010x})",
        frame = entry.frame
    );
    Ok(entry)
}

/// Probes `va` for `intent` from `mode`, reporting a status instead of
/// faulting. Used by explicit access-check instructions; memory-management
/// conditions are caught locally and never propagate.
///
/// # Errors
///
/// Only machine checks from the physical bus escape a probe.
pub fn probe(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    va: u32,
    mode: AccessMode,
    intent: AccessIntent,
) -> Result<ProbeStatus, Fault> {
    if cpu.control.mapen == 0 {
        return Ok(ProbeStatus::Ok);
    }
    if let Some(entry) = cpu.tlb.entry(va) {
        if entry.permits(mode, intent) {
            return Ok(ProbeStatus::Ok);
        }
    }
    match fill(cpu, bus, va, mode, intent) {
        Ok(_) => Ok(ProbeStatus::Ok),
        Err(fault) => match fault.kind {
            FaultKind::AccessViolation => Ok(ProbeStatus::AccessViolation),
            FaultKind::LengthViolation => Ok(ProbeStatus::LengthViolation),
            FaultKind::TranslationNotValid => Ok(ProbeStatus::TranslationNotValid),
            FaultKind::PageTableAccessViolation => Ok(ProbeStatus::PageTableAccessViolation),
            FaultKind::PageTableTranslationNotValid => {
                Ok(ProbeStatus::PageTableTranslationNotValid)
            }
            _ => Err(fault),
        },
    }
}

fn system_pte_address(
    cpu: &Cpu,
    va: u32,
    intent: AccessIntent,
    for_page_table: bool,
) -> Result<u32, Fault> {
    let reason = intent.reason_bit() | if for_page_table { mm_reason::PTE_REF } else { 0 };
    if va & VA_P1 != 0 {
        // VA<31:30> = 11 is architecturally reserved.
        return Err(Fault::memory(
            FaultKind::LengthViolation,
            reason | mm_reason::LENGTH,
            va,
        ));
    }
    let vpn = (va & VA_REGION_VPN_MASK) >> PAGE_SHIFT;
    if (vpn << 2) >= (cpu.control.slr << 2) {
        return Err(Fault::memory(
            FaultKind::LengthViolation,
            reason | mm_reason::LENGTH,
            va,
        ));
    }
    Ok(cpu.control.sbr.wrapping_add(vpn << 2))
}

fn process_pte_address(cpu: &Cpu, va: u32, intent: AccessIntent) -> Result<u32, Fault> {
    let vpn = (va & VA_REGION_VPN_MASK) >> PAGE_SHIFT;
    if va & VA_P1 != 0 {
        // P1 grows downward: pages below the length register are unmapped.
        if (vpn << 2) < (cpu.control.p1lr << 2) {
            return Err(Fault::memory(
                FaultKind::LengthViolation,
                intent.reason_bit() | mm_reason::LENGTH,
                va,
            ));
        }
        Ok(cpu.control.p1br.wrapping_add(vpn << 2))
    } else {
        if (vpn << 2) >= (cpu.control.p0lr << 2) {
            return Err(Fault::memory(
                FaultKind::LengthViolation,
                intent.reason_bit() | mm_reason::LENGTH,
                va,
            ));
        }
        Ok(cpu.control.p0br.wrapping_add(vpn << 2))
    }
}

/// Fills a system-bank entry on behalf of a process page-table reference.
/// Faults are reported against the original data reference with the
/// page-table reason bit set.
fn fill_system_for_page_table(
    cpu: &mut Cpu,
    bus: &mut dyn PhysicalBus,
    pte_va: u32,
    data_va: u32,
    intent: AccessIntent,
) -> Result<TlbEntry, Fault> {
    let pte_pa = system_pte_address(cpu, pte_va, intent, true)?;
    let pte = bus.read_long(pte_pa)?;
    let entry = entry_from_pte(
        bus,
        pte_va,
        pte,
        pte_pa,
        AccessMode::Kernel,
        AccessIntent::Read,
        true,
    )
    .map_err(|fault| remap_page_table_fault(fault, data_va, intent))?;
    cpu.tlb.insert(entry);
    Ok(entry)
}

const fn remap_page_table_fault(fault: Fault, data_va: u32, intent: AccessIntent) -> Fault {
    let kind = match fault.kind {
        FaultKind::AccessViolation => FaultKind::PageTableAccessViolation,
        FaultKind::TranslationNotValid => FaultKind::PageTableTranslationNotValid,
        other => other,
    };
    Fault::memory(
        kind,
        intent.reason_bit() | mm_reason::PTE_REF,
        data_va,
    )
}

/// Builds a TLB entry from a raw PTE, enforcing protection before validity
/// (access violations take priority over translation-not-valid) and
/// accounting the modified bit exactly once for write references.
#[allow(clippy::too_many_arguments)]
fn entry_from_pte(
    bus: &mut dyn PhysicalBus,
    va: u32,
    pte: u32,
    pte_pa: u32,
    mode: AccessMode,
    intent: AccessIntent,
    for_page_table: bool,
) -> Result<TlbEntry, Fault> {
    let reason = intent.reason_bit() | if for_page_table { mm_reason::PTE_REF } else { 0 };
    let prot = (pte >> PTE_PROT_SHIFT) as usize & 0xF;
    let (read_mask, write_mask) = PROTECTION_TABLE[prot];
    let allowed = match intent {
        AccessIntent::Read => read_mask & mode.mask_bit() != 0,
        AccessIntent::Write => write_mask & mode.mask_bit() != 0,
    };
    if !allowed {
        return Err(Fault::memory(FaultKind::AccessViolation, reason, va));
    }
    if pte & PTE_VALID == 0 {
        return Err(Fault::memory(FaultKind::TranslationNotValid, reason, va));
    }

    let mut modified = pte & PTE_MODIFIED != 0;
    if intent == AccessIntent::Write && !modified {
        // Idempotent: a second write finds the bit already set and skips
        // the write-back.
        bus.write_long(pte_pa, pte | PTE_MODIFIED)?;
        modified = true;
    }

    Ok(TlbEntry {
        tag: va >> PAGE_SHIFT,
        read_mask,
        write_mask,
        modified,
        frame: (pte & PTE_PFN_MASK) << PAGE_SHIFT,
        valid: true,
    })
}

#[cfg(test)]
mod tests {
    use super::{PROTECTION_TABLE, PAGE_SHIFT, PTE_MODIFIED, PTE_VALID, Tlb, TlbEntry};
    use crate::fault::AccessIntent;
    use crate::state::psl::AccessMode;

    fn entry_for(vpn: u32) -> TlbEntry {
        TlbEntry {
            tag: vpn,
            read_mask: 0b1111,
            write_mask: 0b0001,
            modified: true,
            frame: 5 << PAGE_SHIFT,
            valid: true,
        }
    }

    #[test]
    fn direct_mapped_insert_evicts_same_index_only() {
        let mut tlb = Tlb::default();
        tlb.insert(entry_for(0));
        tlb.insert(entry_for(1));
        assert!(tlb.entry(0).is_some());
        assert!(tlb.entry(1 << PAGE_SHIFT).is_some());

        // vpn 64 collides with vpn 0 in a 64-entry bank.
        tlb.insert(entry_for(64));
        assert!(tlb.entry(0).is_none());
        assert!(tlb.entry(64 << PAGE_SHIFT).is_some());
    }

    #[test]
    fn banks_are_independent() {
        let mut tlb = Tlb::default();
        tlb.insert(entry_for(0));
        tlb.insert(entry_for(0x8000_0000 >> PAGE_SHIFT));

        tlb.invalidate_process();
        assert!(tlb.entry(0).is_none());
        assert!(tlb.entry(0x8000_0000).is_some());

        tlb.invalidate_system();
        assert!(tlb.entry(0x8000_0000).is_none());
    }

    #[test]
    fn single_invalidation_requires_tag_match() {
        let mut tlb = Tlb::default();
        tlb.insert(entry_for(64));

        // Same index, different tag: entry survives.
        tlb.invalidate_single(0);
        assert!(tlb.tag_present(64 << PAGE_SHIFT));

        tlb.invalidate_single(64 << PAGE_SHIFT);
        assert!(!tlb.tag_present(64 << PAGE_SHIFT));
    }

    #[test]
    fn write_permission_requires_modified_accounting() {
        let mut entry = entry_for(0);
        entry.modified = false;
        assert!(entry.permits(AccessMode::Kernel, AccessIntent::Read));
        assert!(!entry.permits(AccessMode::Kernel, AccessIntent::Write));

        entry.modified = true;
        assert!(entry.permits(AccessMode::Kernel, AccessIntent::Write));
        assert!(!entry.permits(AccessMode::User, AccessIntent::Write));
    }

    #[test]
    fn protection_table_read_rights_contain_write_rights() {
        for (read_mask, write_mask) in PROTECTION_TABLE {
            assert_eq!(read_mask & write_mask, write_mask);
        }
        // Kernel-write code grants nothing to user mode.
        let (read_mask, write_mask) = PROTECTION_TABLE[2];
        assert_eq!(read_mask, 0b0001);
        assert_eq!(write_mask, 0b0001);
        // All-write code grants everything.
        assert_eq!(PROTECTION_TABLE[4], (0b1111, 0b1111));
    }

    #[test]
    fn pte_bit_positions_match_architecture() {
        assert_eq!(PTE_VALID, 0x8000_0000);
        assert_eq!(PTE_MODIFIED, 0x0400_0000);
    }
}
