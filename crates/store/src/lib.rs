//! `ledgerkit-store` — transaction boundary manager and storage backends.
//!
//! The transaction boundary is the unit of isolation for every financial
//! mutation: callers open a scope with [`run_in_tx`], or join an existing one
//! with [`run_in_existing_or_new_tx`], and all writes inside the scope commit
//! or roll back together. Two backends implement the same [`LedgerTx`]
//! contract: an in-memory store (tests/dev) and SQLite via `rusqlite`.

pub mod duplicate;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod tx;

pub use duplicate::{DuplicateDetector, ViolationInfo, classify_duplicate};
pub use error::{StoreError, UniqueConstraint};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use tx::{IdempotencyRecord, LedgerStore, LedgerTx, run_in_existing_or_new_tx, run_in_tx};
