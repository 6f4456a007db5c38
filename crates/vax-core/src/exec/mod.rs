//! Complex-instruction executors operating on decoded operands.

/// Procedure call and return (CALLG/CALLS/RET).
pub mod call;
/// Bit-field test, extract, and insert.
pub mod field;
/// Mode transitions (CHMx family and REI).
pub mod mode;
/// Internal processor registers (MTPR/MFPR).
pub mod privreg;
/// Absolute-insert and interlocked queues.
pub mod queue;
/// Character strings with first-part-done suspension.
pub mod string;

pub use call::{callg, calls, ret};
pub use field::{FieldBase, branch_on_bit, extract_field, insert_field};
pub use mode::{chm, rei};
pub use privreg::{SID_VALUE, ipr, mfpr, mtpr};
pub use queue::{InsertStatus, RemoveStatus, insert_interlocked, insque, remove_interlocked, remque};
pub use string::{Completion, cmpc3, cmpc5, locc, movc3, movc5, scan_table, skpc};
