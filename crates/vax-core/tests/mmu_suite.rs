//! Memory-management suite: translation through real page tables, TLB
//! behavior, fault parameters, and the virtual accessor.

#![allow(clippy::pedantic, clippy::nursery, clippy::cast_possible_truncation)]

use proptest::prelude::*;
use log as _;
use rstest::rstest;
use thiserror as _;

use vax_core::state::psl::AccessMode;
use vax_core::{
    AccessIntent, Cpu, Fault, FaultKind, PhysicalBus, ProbeStatus, RamBus, mm_reason, probe,
    read_virtual, translate, write_virtual,
};

const RAM_SIZE: usize = 0x20000;
/// Physical base of the system page table.
const SPT_PA: u32 = 0x1_0000;
/// System virtual address of the P0 page table (maps to PA 0x3000).
const P0_TABLE_SVA: u32 = 0x8000_3000;
const P0_TABLE_PA: u32 = 0x3000;

const PTE_VALID: u32 = 1 << 31;
const PTE_MODIFIED: u32 = 1 << 26;

const fn pte(frame: u32, code: u32, modified: bool) -> u32 {
    let mut value = PTE_VALID | (code << 27) | frame;
    if modified {
        value |= PTE_MODIFIED;
    }
    value
}

/// Mapping on, with the system region mirroring the first 128 physical
/// pages (so the P0 table is reachable) and a small P0 region whose pages
/// the tests point wherever they need.
fn setup_mapped() -> (Cpu, RamBus) {
    let mut cpu = Cpu::default();
    let mut bus = RamBus::new(RAM_SIZE);

    cpu.control.sbr = SPT_PA;
    cpu.control.slr = 128;
    for page in 0..128 {
        // Protection code 4: every mode may read and write.
        bus.write_long(SPT_PA + page * 4, pte(page, 4, true))
            .expect("ram");
    }

    cpu.control.p0br = P0_TABLE_SVA;
    cpu.control.p0lr = 16;
    for page in 0..16 {
        bus.write_long(P0_TABLE_PA + page * 4, pte(0x40 + page, 4, false))
            .expect("ram");
    }

    cpu.control.mapen = 1;
    (cpu, bus)
}

/// Physical bus wrapper that records longword writes, used to observe the
/// modified-bit write-back.
struct RecordingBus {
    inner: RamBus,
    long_writes: Vec<u32>,
}

impl RecordingBus {
    fn new(inner: RamBus) -> Self {
        Self {
            inner,
            long_writes: Vec::new(),
        }
    }
}

impl PhysicalBus for RecordingBus {
    fn read_byte(&mut self, pa: u32) -> Result<u8, Fault> {
        self.inner.read_byte(pa)
    }

    fn read_word(&mut self, pa: u32) -> Result<u16, Fault> {
        self.inner.read_word(pa)
    }

    fn read_long(&mut self, pa: u32) -> Result<u32, Fault> {
        self.inner.read_long(pa)
    }

    fn write_byte(&mut self, pa: u32, value: u8) -> Result<(), Fault> {
        self.inner.write_byte(pa, value)
    }

    fn write_word(&mut self, pa: u32, value: u16) -> Result<(), Fault> {
        self.inner.write_word(pa, value)
    }

    fn write_long(&mut self, pa: u32, value: u32) -> Result<(), Fault> {
        self.long_writes.push(pa);
        self.inner.write_long(pa, value)
    }
}

#[test]
fn translation_walks_the_two_level_tables() {
    let (mut cpu, mut bus) = setup_mapped();

    // P0 page 3 maps to frame 0x43.
    let pa = translate(&mut cpu, &mut bus, 3 * 512 + 0x21, AccessMode::User, AccessIntent::Read)
        .expect("translate");
    assert_eq!(pa, 0x43 * 512 + 0x21);

    // System page 5 maps to frame 5.
    let pa = translate(
        &mut cpu,
        &mut bus,
        0x8000_0000 + 5 * 512 + 4,
        AccessMode::User,
        AccessIntent::Read,
    )
    .expect("translate");
    assert_eq!(pa, 5 * 512 + 4);
}

#[test]
fn cached_translations_survive_pte_changes_until_invalidated() {
    let (mut cpu, mut bus) = setup_mapped();
    let va = 2 * 512;

    let first = translate(&mut cpu, &mut bus, va, AccessMode::Kernel, AccessIntent::Read)
        .expect("translate");
    assert_eq!(first, 0x42 * 512);

    // Repoint the PTE; the stale translation is still served.
    bus.write_long(P0_TABLE_PA + 2 * 4, pte(0x50, 4, false))
        .expect("ram");
    let stale = translate(&mut cpu, &mut bus, va, AccessMode::Kernel, AccessIntent::Read)
        .expect("translate");
    assert_eq!(stale, first);

    cpu.tlb.invalidate_all();
    let fresh = translate(&mut cpu, &mut bus, va, AccessMode::Kernel, AccessIntent::Read)
        .expect("translate");
    assert_eq!(fresh, 0x50 * 512);
}

#[rstest]
// Code 0: nothing for anyone.
#[case(0, AccessMode::Kernel, AccessIntent::Read, false)]
// Code 2: kernel read and write, nothing outward.
#[case(2, AccessMode::Kernel, AccessIntent::Write, true)]
#[case(2, AccessMode::Executive, AccessIntent::Read, false)]
// Code 3: kernel read-only.
#[case(3, AccessMode::Kernel, AccessIntent::Read, true)]
#[case(3, AccessMode::Kernel, AccessIntent::Write, false)]
// Code 4: everything for everyone.
#[case(4, AccessMode::User, AccessIntent::Write, true)]
// Code 14: user read, kernel write.
#[case(14, AccessMode::User, AccessIntent::Read, true)]
#[case(14, AccessMode::User, AccessIntent::Write, false)]
#[case(14, AccessMode::Supervisor, AccessIntent::Write, false)]
// Code 15: user read-only.
#[case(15, AccessMode::User, AccessIntent::Read, true)]
#[case(15, AccessMode::User, AccessIntent::Write, false)]
fn protection_codes_grant_deterministic_access(
    #[case] code: u32,
    #[case] mode: AccessMode,
    #[case] intent: AccessIntent,
    #[case] allowed: bool,
) {
    let (mut cpu, mut bus) = setup_mapped();
    bus.write_long(P0_TABLE_PA, pte(0x40, code, true)).expect("ram");

    let outcome = translate(&mut cpu, &mut bus, 0x10, mode, intent);
    if allowed {
        assert!(outcome.is_ok(), "code {code} should grant {intent:?} to {mode:?}");
    } else {
        let fault = outcome.expect_err("denied");
        assert_eq!(fault.kind, FaultKind::AccessViolation);
        assert_eq!(fault.param2, 0x10);
    }
}

#[test]
fn modified_bit_is_written_back_exactly_once() {
    let (mut cpu, bus) = setup_mapped();
    let mut bus = RecordingBus::new(bus);
    let pte_pa = P0_TABLE_PA + 7 * 4;
    let va = 7 * 512;

    // Read reference: no write-back.
    translate(&mut cpu, &mut bus, va, AccessMode::Kernel, AccessIntent::Read).expect("read fill");
    assert!(!bus.long_writes.contains(&pte_pa));

    // First write reference sets the modified bit in memory.
    translate(&mut cpu, &mut bus, va, AccessMode::Kernel, AccessIntent::Write)
        .expect("write fill");
    assert_eq!(bus.long_writes.iter().filter(|&&pa| pa == pte_pa).count(), 1);
    assert_ne!(bus.inner.read_long(pte_pa).expect("ram") & PTE_MODIFIED, 0);

    // Further writes hit the TLB; even a refill skips the write-back.
    translate(&mut cpu, &mut bus, va + 4, AccessMode::Kernel, AccessIntent::Write)
        .expect("cached write");
    cpu.tlb.invalidate_all();
    translate(&mut cpu, &mut bus, va, AccessMode::Kernel, AccessIntent::Write).expect("refill");
    assert_eq!(bus.long_writes.iter().filter(|&&pa| pa == pte_pa).count(), 1);
}

#[test]
fn colliding_tags_do_not_alias_between_fills() {
    let (mut cpu, mut bus) = setup_mapped();
    // System vpns 1 and 65 share a direct-mapped slot in a 64-entry bank.
    let low = 0x8000_0000 + 512;
    let high = 0x8000_0000 + 65 * 512;

    let pa_low = translate(&mut cpu, &mut bus, low, AccessMode::Kernel, AccessIntent::Read)
        .expect("fill low");
    let pa_high = translate(&mut cpu, &mut bus, high, AccessMode::Kernel, AccessIntent::Read)
        .expect("fill high evicts low");
    let pa_low_again = translate(&mut cpu, &mut bus, low, AccessMode::Kernel, AccessIntent::Read)
        .expect("refill low");

    assert_eq!(pa_low, 512);
    assert_eq!(pa_high, 65 * 512);
    assert_eq!(pa_low_again, pa_low);
}

#[test]
fn length_violations_report_region_and_intent() {
    let (mut cpu, mut bus) = setup_mapped();

    // P0 page 16 is one past P0LR.
    let fault = translate(&mut cpu, &mut bus, 16 * 512, AccessMode::Kernel, AccessIntent::Read)
        .expect_err("beyond p0lr");
    assert_eq!(fault.kind, FaultKind::LengthViolation);
    assert_eq!(fault.param1, mm_reason::LENGTH);
    assert_eq!(fault.param2, 16 * 512);

    // Write intent adds the write reason bit.
    let fault = translate(&mut cpu, &mut bus, 16 * 512, AccessMode::Kernel, AccessIntent::Write)
        .expect_err("beyond p0lr");
    assert_eq!(fault.param1, mm_reason::LENGTH | mm_reason::WRITE);

    // P1 grows downward: pages below P1LR are unmapped.
    cpu.control.p1lr = 0x1F_FFFF;
    let fault = translate(&mut cpu, &mut bus, 0x4000_0000, AccessMode::Kernel, AccessIntent::Read)
        .expect_err("below p1lr");
    assert_eq!(fault.kind, FaultKind::LengthViolation);

    // VA<31:30> = 11 is architecturally reserved.
    let fault = translate(&mut cpu, &mut bus, 0xC000_0000, AccessMode::Kernel, AccessIntent::Read)
        .expect_err("reserved region");
    assert_eq!(fault.kind, FaultKind::LengthViolation);
}

#[test]
fn page_table_faults_carry_the_pte_reference_bit() {
    let (mut cpu, mut bus) = setup_mapped();
    // Invalidate the system page holding the P0 table.
    let table_vpn = (P0_TABLE_SVA & 0x3FFF_FFFF) >> 9;
    bus.write_long(SPT_PA + table_vpn * 4, 0).expect("ram");
    cpu.tlb.invalidate_all();

    let fault = translate(&mut cpu, &mut bus, 0x10, AccessMode::Kernel, AccessIntent::Write)
        .expect_err("unreachable page table");
    // Protection code 0 denies the kernel read of the PTE.
    assert_eq!(fault.kind, FaultKind::PageTableAccessViolation);
    assert_eq!(fault.param1, mm_reason::PTE_REF | mm_reason::WRITE);
    assert_eq!(fault.param2, 0x10, "reported against the data reference");
}

#[test]
fn invalid_leaf_pte_is_translation_not_valid() {
    let (mut cpu, mut bus) = setup_mapped();
    bus.write_long(P0_TABLE_PA + 4 * 4, pte(0x44, 4, false) & !PTE_VALID)
        .expect("ram");

    let fault = translate(&mut cpu, &mut bus, 4 * 512, AccessMode::Kernel, AccessIntent::Read)
        .expect_err("invalid pte");
    assert_eq!(fault.kind, FaultKind::TranslationNotValid);
    assert_eq!(fault.param1, 0);
    assert_eq!(fault.param2, 4 * 512);
}

#[rstest]
#[case(4, AccessIntent::Write, ProbeStatus::Ok)]
#[case(3, AccessIntent::Write, ProbeStatus::AccessViolation)]
fn probe_reports_status_without_faulting(
    #[case] code: u32,
    #[case] intent: AccessIntent,
    #[case] expected: ProbeStatus,
) {
    let (mut cpu, mut bus) = setup_mapped();
    bus.write_long(P0_TABLE_PA, pte(0x40, code, true)).expect("ram");

    let status = probe(&mut cpu, &mut bus, 0x10, AccessMode::Kernel, intent).expect("probe");
    assert_eq!(status, expected);
}

#[test]
fn probe_distinguishes_length_and_validity() {
    let (mut cpu, mut bus) = setup_mapped();

    let status = probe(&mut cpu, &mut bus, 16 * 512, AccessMode::Kernel, AccessIntent::Read)
        .expect("probe");
    assert_eq!(status, ProbeStatus::LengthViolation);

    bus.write_long(P0_TABLE_PA, 0x40).expect("ram");
    let status = probe(&mut cpu, &mut bus, 0x10, AccessMode::User, AccessIntent::Read)
        .expect("probe");
    // Protection code 0 denies before validity is considered.
    assert_eq!(status, ProbeStatus::AccessViolation);
}

#[test]
fn misaligned_accesses_translate_every_page_they_touch() {
    let (mut cpu, mut bus) = setup_mapped();
    // Longword straddling P0 pages 3 and 4 (frames 0x43 and 0x44).
    let va = 4 * 512 - 2;

    write_virtual(&mut cpu, &mut bus, va, 0xAABB_CCDD, 4, AccessMode::Kernel).expect("write");
    let value = read_virtual(&mut cpu, &mut bus, va, 4, AccessMode::Kernel).expect("read");
    assert_eq!(value, 0xAABB_CCDD);

    // The bytes landed in the two discontiguous frames.
    assert_eq!(bus.read_word(0x43 * 512 + 510).expect("ram"), 0xCCDD);
    assert_eq!(bus.read_word(0x44 * 512).expect("ram"), 0xAABB);
}

proptest! {
    /// With mapping off, every width and alignment round-trips and leaves
    /// neighbouring bytes alone.
    #[test]
    fn virtual_accessor_round_trips(
        offset in 0_u32..16,
        width_pick in 0_usize..4,
        value in any::<u64>(),
    ) {
        let widths = [1_u32, 2, 4, 8];
        let width = widths[width_pick];
        let mask = if width == 8 { u64::MAX } else { (1 << (width * 8)) - 1 };
        let va = 0x1000 + offset;

        let mut cpu = Cpu::default();
        let mut bus = RamBus::new(0x4000);
        for pa in 0xFF0..0x1030 {
            bus.write_byte(pa, 0x5A).expect("ram");
        }

        write_virtual(&mut cpu, &mut bus, va, value, width, AccessMode::Kernel).expect("write");
        let read = read_virtual(&mut cpu, &mut bus, va, width, AccessMode::Kernel).expect("read");
        prop_assert_eq!(read, value & mask);

        prop_assert_eq!(bus.read_byte(va - 1).expect("ram"), 0x5A);
        prop_assert_eq!(bus.read_byte(va + width).expect("ram"), 0x5A);
    }
}
