//! Posting engine error model.

use thiserror::Error;

use ledgerkit_core::{AccountId, DomainError, IdempotencyKey, Money, MoneyError};
use ledgerkit_store::StoreError;

#[derive(Debug, Error)]
pub enum PostingError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Money(#[from] MoneyError),

    /// Posting against an account that has been deactivated.
    #[error("account {0} is inactive")]
    InactiveAccount(AccountId),

    /// Allocation amount exceeds what the source or target can absorb.
    #[error("allocation of {requested} exceeds available {available}")]
    OverAllocation { requested: Money, available: Money },

    /// An idempotency record exists but the work it points at cannot be
    /// loaded. Indicates a corrupted store, not a caller mistake.
    #[error("idempotent replay for key '{0}' has no stored entry")]
    ReplayMismatch(IdempotencyKey),
}
