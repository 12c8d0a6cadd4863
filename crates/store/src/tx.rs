//! Transaction boundary manager.
//!
//! A [`LedgerStore`] opens atomic transaction scopes; a [`LedgerTx`] is the
//! handle for every read and write inside one scope. The callback passed to
//! [`run_in_tx`] is a plain synchronous `FnOnce` over a borrowed handle — the
//! handle cannot be moved into a spawned task or held across an await point,
//! so a transaction's effect is fully determined within the synchronous call
//! stack that opened it.
//!
//! Composition: a higher-level workflow that wants "post invoice" and
//! "allocate payment" in one atomic unit opens the scope itself and threads
//! the handle through [`run_in_existing_or_new_tx`]; the inner operations do
//! not need to know whether they are top-level.
//!
//! Failure semantics: any error from the callback rolls back every write made
//! through the handle. Partial writes are never visible outside a successful
//! commit. A handle dropped without commit rolls back.

use std::sync::Mutex;
use std::thread::{self, ThreadId};

use chrono::{DateTime, Utc};

use ledgerkit_core::{
    AccountId, CreditNoteId, CustomerId, EntryId, ExpenseId, IdempotencyKey, InvoiceId, Money,
    PaymentId, TenantId, VendorId,
};
use ledgerkit_ledger::{Account, CreditNote, Expense, Invoice, JournalEntry, Payment};

use crate::error::StoreError;

/// Stored proof that an idempotent operation has already been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    /// Journal entry the operation produced, if it posted one.
    pub entry_id: Option<EntryId>,
}

/// All reads and writes available inside one transaction scope.
///
/// Implementations must make every write atomic with the scope: visible after
/// `commit`, gone after `rollback` or drop. Balance columns are mutated only
/// through these methods, only by the posting engine.
pub trait LedgerTx {
    // --- accounts ---

    /// Insert a new account. `(tenant_id, code)` is unique.
    fn insert_account(&mut self, account: &Account) -> Result<(), StoreError>;

    fn account(&mut self, tenant_id: TenantId, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Fold one journal line into the account's cached balance:
    /// debit adds, credit subtracts.
    fn apply_line_to_account(
        &mut self,
        tenant_id: TenantId,
        id: AccountId,
        debit: Money,
        credit: Money,
    ) -> Result<(), StoreError>;

    /// `(Σ debit, Σ credit)` over every persisted line against the account.
    /// Used to check the cached-balance invariant.
    fn line_totals(&mut self, tenant_id: TenantId, id: AccountId)
    -> Result<(Money, Money), StoreError>;

    // --- journal entries ---

    /// Next sequential entry number for the tenant (`max + 1` within this
    /// scope). Monotonic per tenant; the `(tenant_id, entry_no)` uniqueness
    /// constraint is the arbiter under concurrency, so gaps survive rollback
    /// correctly and duplicates cannot.
    fn next_entry_number(&mut self, tenant_id: TenantId) -> Result<u64, StoreError>;

    fn insert_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError>;

    fn entry(&mut self, tenant_id: TenantId, id: EntryId) -> Result<Option<JournalEntry>, StoreError>;

    /// `posted -> reversed` on the stored row, recording the paired entry.
    fn mark_entry_reversed(
        &mut self,
        tenant_id: TenantId,
        id: EntryId,
        reversed_by: EntryId,
    ) -> Result<(), StoreError>;

    // --- idempotency records ---

    /// Record that the operation identified by `key` has been applied.
    /// `(tenant_id, key)` is unique; a violation surfaces as
    /// [`StoreError::Duplicate`] with the idempotency constraint.
    ///
    /// `entry_id` is the journal entry the operation produced; `None` for
    /// operations that move document balances without posting (allocations).
    fn insert_idempotency(
        &mut self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
        entry_id: Option<EntryId>,
    ) -> Result<(), StoreError>;

    fn idempotency_record(
        &mut self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    // --- sub-ledger documents ---

    fn upsert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;
    fn invoice(&mut self, tenant_id: TenantId, id: InvoiceId) -> Result<Option<Invoice>, StoreError>;
    fn set_invoice_balance(
        &mut self,
        tenant_id: TenantId,
        id: InvoiceId,
        balance_due: Money,
    ) -> Result<(), StoreError>;

    fn upsert_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;
    fn payment(&mut self, tenant_id: TenantId, id: PaymentId) -> Result<Option<Payment>, StoreError>;
    fn set_payment_unallocated(
        &mut self,
        tenant_id: TenantId,
        id: PaymentId,
        unallocated: Money,
    ) -> Result<(), StoreError>;

    fn upsert_expense(&mut self, expense: &Expense) -> Result<(), StoreError>;
    fn expense(&mut self, tenant_id: TenantId, id: ExpenseId) -> Result<Option<Expense>, StoreError>;

    fn upsert_credit_note(&mut self, note: &CreditNote) -> Result<(), StoreError>;
    fn credit_note(
        &mut self,
        tenant_id: TenantId,
        id: CreditNoteId,
    ) -> Result<Option<CreditNote>, StoreError>;
    fn set_credit_note_balance(
        &mut self,
        tenant_id: TenantId,
        id: CreditNoteId,
        balance: Money,
    ) -> Result<(), StoreError>;

    // --- counterpart balances ---

    /// Customer receivable running balance (zero if never touched).
    fn customer_balance(&mut self, tenant_id: TenantId, id: CustomerId) -> Result<Money, StoreError>;
    fn adjust_customer_balance(
        &mut self,
        tenant_id: TenantId,
        id: CustomerId,
        delta: Money,
    ) -> Result<(), StoreError>;

    /// Vendor payable running balance (zero if never touched).
    fn vendor_balance(&mut self, tenant_id: TenantId, id: VendorId) -> Result<Money, StoreError>;
    fn adjust_vendor_balance(
        &mut self,
        tenant_id: TenantId,
        id: VendorId,
        delta: Money,
    ) -> Result<(), StoreError>;

    // --- scope lifecycle ---

    /// Make every write in this scope durable.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every write in this scope. Dropping an uncommitted handle has
    /// the same effect.
    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

impl std::fmt::Debug for dyn LedgerTx + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LedgerTx")
    }
}

/// Opens transaction scopes.
///
/// Concurrent scopes from different threads serialize at the storage layer
/// (callers block, they do not fail). A re-entrant `begin` from the thread
/// that already holds this store's open transaction is a contract violation
/// and fails fast with [`StoreError::TxContract`] — nested domain operations
/// must join the existing handle via [`run_in_existing_or_new_tx`] instead.
pub trait LedgerStore: Send + Sync {
    fn begin(&self) -> Result<Box<dyn LedgerTx + '_>, StoreError>;
}

/// Open a new atomic scope, run `f`, commit on `Ok`, roll back on `Err`.
pub fn run_in_tx<T, E, F>(store: &dyn LedgerStore, f: F) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(&mut dyn LedgerTx) -> Result<T, E>,
{
    let mut tx = store.begin().map_err(E::from)?;
    match f(tx.as_mut()) {
        Ok(value) => {
            tx.commit().map_err(E::from)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::warn!(error = %rollback_err, "rollback failed after transaction error");
            }
            Err(err)
        }
    }
}

/// Join `existing` if the caller already opened a scope, otherwise delegate
/// to [`run_in_tx`]. When joining, commit/rollback stay with the outer owner
/// of the scope.
pub fn run_in_existing_or_new_tx<T, E, F>(
    store: &dyn LedgerStore,
    existing: Option<&mut dyn LedgerTx>,
    f: F,
) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(&mut dyn LedgerTx) -> Result<T, E>,
{
    match existing {
        Some(tx) => f(tx),
        None => run_in_tx(store, f),
    }
}

/// Tracks which thread currently holds a store's open transaction, so that
/// re-entrant `begin` fails fast instead of deadlocking.
#[derive(Debug, Default)]
pub(crate) struct ReentrancyGuard {
    owner: Mutex<Option<ThreadId>>,
}

impl ReentrancyGuard {
    pub(crate) fn check(&self) -> Result<(), StoreError> {
        let owner = self.owner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *owner == Some(thread::current().id()) {
            return Err(StoreError::TxContract(
                "a transaction is already open on this store from the current call stack; \
                 pass the existing handle via run_in_existing_or_new_tx"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn acquire(&self) {
        let mut owner = self.owner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *owner = Some(thread::current().id());
    }

    pub(crate) fn release(&self) {
        let mut owner = self.owner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *owner = None;
    }
}

/// Parse a stored RFC 3339 timestamp.
pub(crate) fn parse_stored_datetime(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::backend(format!("corrupt stored timestamp '{raw}': {e}")))
}
