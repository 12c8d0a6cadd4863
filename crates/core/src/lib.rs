//! `ledgerkit-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, exact money arithmetic, the domain error model,
//! explicit request context, and the single-flight memo gate.

pub mod context;
pub mod error;
pub mod gate;
pub mod id;
pub mod money;

pub use context::RequestContext;
pub use error::{DomainError, DomainResult};
pub use gate::SingleFlightFlag;
pub use id::{
    AccountId, CreditNoteId, CustomerId, EntryId, ExpenseId, IdempotencyKey, InvoiceId, PaymentId,
    TenantId, UserId, VendorId,
};
pub use money::{Money, MoneyError, TaxBreakup};
