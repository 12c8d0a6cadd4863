//! `ledgerkit-posting` — the engine that turns business events into balanced
//! journal entries.
//!
//! Single write path: all journal, balance, document, and idempotency writes
//! go through [`PostingEngine`] inside one transaction scope. Events are
//! emitted only after commit.

pub mod command;
pub mod engine;
pub mod error;

pub use command::{
    AllocationCommand, AllocationSource, AllocationTarget, CreditNoteIssued, ExpenseRecorded,
    InvoiceIssued, PaymentReceived, PostingCommand, TaxAccounts,
};
pub use engine::{
    ALLOCATION_APPLIED, AccountAudit, AllocationOutcome, ENTRY_POSTED, ENTRY_REVERSED,
    PostingEngine, PostingOutcome, ReversalOutcome,
};
pub use error::PostingError;
