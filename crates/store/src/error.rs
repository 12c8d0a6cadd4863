//! Storage error model.

use thiserror::Error;

/// Which uniqueness constraint a duplicate violation hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueConstraint {
    /// `(tenant_id, idempotency_key)` — a replayed business operation.
    IdempotencyKey,
    /// `(tenant_id, entry_no)` — concurrent entry-number collision.
    EntryNumber,
    /// `(tenant_id, code)` on accounts.
    AccountCode,
    /// A uniqueness violation we could not attribute to a known constraint.
    Other,
}

impl core::fmt::Display for UniqueConstraint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            UniqueConstraint::IdempotencyKey => "idempotency key",
            UniqueConstraint::EntryNumber => "entry number",
            UniqueConstraint::AccountCode => "account code",
            UniqueConstraint::Other => "unique constraint",
        };
        f.write_str(name)
    }
}

/// Infrastructure-level storage error.
///
/// Domain failures (validation, invariants) never originate here; this enum
/// covers constraint violations, missing rows, transaction-contract misuse,
/// and backend faults.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("duplicate {constraint}")]
    Duplicate { constraint: UniqueConstraint },

    /// A referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The transaction-boundary contract was misused (e.g. re-entrant
    /// `begin` on a store handle whose transaction is still open).
    #[error("transaction contract violated: {0}")]
    TxContract(String),

    /// Backend fault: connectivity, corruption, or any error that is not a
    /// recognized constraint violation.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_duplicate_of(&self, constraint: UniqueConstraint) -> bool {
        matches!(self, StoreError::Duplicate { constraint: c } if *c == constraint)
    }
}
