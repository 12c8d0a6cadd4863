//! `ledgerkit-ledger` — append-only double-entry journal model.
//!
//! Accounts, journal entries and lines, the entry state machine, and the
//! sub-ledger documents (invoices, payments, credit notes) whose denormalized
//! balances the allocation policy operates on.

pub mod account;
pub mod document;
pub mod entry;

pub use account::{Account, AccountKind};
pub use document::{CreditNote, Expense, Invoice, Payment};
pub use entry::{DocRef, EntryStatus, JournalEntry, JournalLine};
