//! Memory model: physical bus contract, translation buffer, and the
//! general-alignment virtual accessor.

/// Physical accessor trait and RAM reference implementation.
pub mod bus;
/// Translation buffer, page-table walker, and probe logic.
pub mod tlb;
/// Virtual read/write of arbitrary length and alignment.
pub mod virt;

pub use bus::{PhysicalBus, RamBus};
pub use tlb::{
    PAGE_OFFSET_MASK, PAGE_SHIFT, PAGE_SIZE, PROTECTION_TABLE, PTE_MODIFIED, PTE_PFN_MASK,
    PTE_PROT_SHIFT, PTE_VALID, ProbeStatus, TLB_BANK_ENTRIES, Tlb, TlbEntry, VA_P1, VA_SYSTEM,
    fill, probe, translate,
};
pub use virt::{read_virtual, write_virtual};
