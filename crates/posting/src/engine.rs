//! The posting engine: the single write path into the journal.
//!
//! Every mutation runs inside one transaction scope: journal entry, line
//! effects on cached account balances, sub-ledger document updates, the
//! counterpart running balance, and the idempotency record commit or roll
//! back together. Domain events are collected during the scope and emitted
//! only after a successful commit.

use std::sync::Arc;

use chrono::Utc;

use ledgerkit_core::{
    AccountId, EntryId, IdempotencyKey, InvoiceId, Money, MoneyError, RequestContext, TenantId,
};
use ledgerkit_events::{DomainEvent, EventEmitter};
use ledgerkit_ledger::{DocRef, EntryStatus, JournalEntry};
use ledgerkit_store::{
    LedgerStore, LedgerTx, StoreError, UniqueConstraint, run_in_existing_or_new_tx, run_in_tx,
};
use serde_json::json;

use crate::command::{AllocationCommand, AllocationSource, PostingCommand};
use crate::error::PostingError;

/// Emitted after a journal entry commits.
pub const ENTRY_POSTED: &str = "ledger.entry.posted";
/// Emitted after a reversal entry commits.
pub const ENTRY_REVERSED: &str = "ledger.entry.reversed";
/// Emitted after an allocation commits.
pub const ALLOCATION_APPLIED: &str = "ledger.allocation.applied";

/// Entry-number collisions under concurrency are resolved by retrying the
/// whole scope with a freshly read sequence.
const MAX_SEQUENCE_RETRIES: u32 = 3;

/// Result of posting a command.
#[derive(Debug, Clone)]
pub struct PostingOutcome {
    pub entry: JournalEntry,
    /// True when the command had already been applied and the stored entry
    /// was returned instead of posting again.
    pub replayed: bool,
}

/// Result of reversing an entry.
#[derive(Debug, Clone)]
pub struct ReversalOutcome {
    pub reversal: JournalEntry,
    pub replayed: bool,
}

/// Result of an allocation.
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    /// Outstanding balance of each target invoice after the allocation,
    /// in command order.
    pub invoice_balances: Vec<(InvoiceId, Money)>,
    /// What remains of the funding payment or credit note.
    pub source_remaining: Money,
    pub replayed: bool,
}

/// Cached-balance audit for one account.
#[derive(Debug, Clone, Copy)]
pub struct AccountAudit {
    pub account_id: AccountId,
    /// Balance column as stored.
    pub cached: Money,
    /// Σ(debit − credit) recomputed over every persisted line.
    pub derived: Money,
}

impl AccountAudit {
    pub fn consistent(&self) -> bool {
        self.cached == self.derived
    }
}

pub struct PostingEngine {
    store: Arc<dyn LedgerStore>,
    events: Arc<EventEmitter>,
}

impl PostingEngine {
    pub fn new(store: Arc<dyn LedgerStore>, events: Arc<EventEmitter>) -> Self {
        Self { store, events }
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.events
    }

    /// Post `command` as one balanced journal entry in its own transaction
    /// scope, emitting events after commit.
    pub fn post(
        &self,
        ctx: &RequestContext,
        command: &PostingCommand,
    ) -> Result<PostingOutcome, PostingError> {
        let span = tracing::info_span!(
            "ledger_post",
            request_id = %ctx.request_id,
            tenant_id = %command.tenant_id(),
            key = %command.idempotency_key(),
        );
        let _guard = span.enter();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut pending = Vec::new();
            match run_in_tx(self.store.as_ref(), |tx| {
                self.post_in(ctx, tx, command, &mut pending)
            }) {
                Ok(outcome) => {
                    self.dispatch(&pending);
                    return Ok(outcome);
                }
                Err(PostingError::Store(err))
                    if err.is_duplicate_of(UniqueConstraint::IdempotencyKey) =>
                {
                    // A concurrent scope committed the same command between
                    // our lookup and our insert; fetch what it posted.
                    tracing::info!("command already applied concurrently, replaying");
                    return self.replayed_posting(command);
                }
                Err(PostingError::Store(err))
                    if err.is_duplicate_of(UniqueConstraint::EntryNumber)
                        && attempt < MAX_SEQUENCE_RETRIES =>
                {
                    tracing::warn!(attempt, "entry number collision, retrying scope");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// [`Self::post`] against a caller-owned transaction handle, for
    /// composing several operations into one atomic scope. Events are pushed
    /// to `pending`; the caller emits them after its own commit.
    pub fn post_in(
        &self,
        ctx: &RequestContext,
        tx: &mut dyn LedgerTx,
        command: &PostingCommand,
        pending: &mut Vec<DomainEvent>,
    ) -> Result<PostingOutcome, PostingError> {
        let tenant = command.tenant_id();
        let key = command.idempotency_key();

        if let Some(record) = tx.idempotency_record(tenant, &key)? {
            let entry_id = record.entry_id.ok_or_else(|| PostingError::ReplayMismatch(key.clone()))?;
            let entry = tx
                .entry(tenant, entry_id)?
                .ok_or(PostingError::ReplayMismatch(key))?;
            return Ok(PostingOutcome {
                entry,
                replayed: true,
            });
        }

        let lines = command.lines()?;
        for line in &lines {
            self.require_active_account(tx, tenant, line.account_id())?;
        }

        let entry_no = tx.next_entry_number(tenant)?;
        let entry = JournalEntry::try_new(
            EntryId::new(),
            tenant,
            entry_no,
            Utc::now(),
            command.reference(),
            command.narration(),
            lines,
        )?;

        tx.insert_entry(&entry)?;
        for line in entry.lines() {
            tx.apply_line_to_account(
                tenant,
                line.account_id(),
                line.debit_amount(),
                line.credit_amount(),
            )?;
        }
        self.apply_document_effects(tx, command)?;
        tx.insert_idempotency(tenant, &key, Some(entry.id()))?;

        pending.push(DomainEvent::new(
            ENTRY_POSTED,
            tenant,
            entry.id().into(),
            json!({
                "entry_no": entry.entry_no(),
                "reference_kind": entry.reference().kind(),
                "reference_id": entry.reference().id(),
                "amount_cents": entry.total_debit().cents(),
                "request_id": ctx.request_id,
            }),
        ));

        Ok(PostingOutcome {
            entry,
            replayed: false,
        })
    }

    /// Reverse a posted entry with a paired compensating entry. The original
    /// is never edited; its lines are re-posted with sides swapped and the
    /// original transitions to `Reversed`.
    pub fn reverse(
        &self,
        ctx: &RequestContext,
        tenant: TenantId,
        entry_id: EntryId,
    ) -> Result<ReversalOutcome, PostingError> {
        let span = tracing::info_span!(
            "ledger_reverse",
            request_id = %ctx.request_id,
            tenant_id = %tenant,
            entry_id = %entry_id,
        );
        let _guard = span.enter();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut pending = Vec::new();
            match run_in_tx(self.store.as_ref(), |tx| {
                self.reverse_in(ctx, tx, tenant, entry_id, &mut pending)
            }) {
                Ok(outcome) => {
                    self.dispatch(&pending);
                    return Ok(outcome);
                }
                Err(PostingError::Store(err))
                    if err.is_duplicate_of(UniqueConstraint::IdempotencyKey) =>
                {
                    tracing::info!("entry already reversed concurrently, replaying");
                    return self.replayed_reversal(tenant, entry_id);
                }
                Err(PostingError::Store(err))
                    if err.is_duplicate_of(UniqueConstraint::EntryNumber)
                        && attempt < MAX_SEQUENCE_RETRIES =>
                {
                    tracing::warn!(attempt, "entry number collision, retrying scope");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// [`Self::reverse`] against a caller-owned transaction handle.
    pub fn reverse_in(
        &self,
        _ctx: &RequestContext,
        tx: &mut dyn LedgerTx,
        tenant: TenantId,
        entry_id: EntryId,
        pending: &mut Vec<DomainEvent>,
    ) -> Result<ReversalOutcome, PostingError> {
        let key = IdempotencyKey::derived("reversal", entry_id);

        if let Some(record) = tx.idempotency_record(tenant, &key)? {
            let reversal_id =
                record.entry_id.ok_or_else(|| PostingError::ReplayMismatch(key.clone()))?;
            let reversal = tx
                .entry(tenant, reversal_id)?
                .ok_or(PostingError::ReplayMismatch(key))?;
            return Ok(ReversalOutcome {
                reversal,
                replayed: true,
            });
        }

        let original = tx
            .entry(tenant, entry_id)?
            .ok_or_else(|| StoreError::NotFound(format!("journal entry {entry_id}")))?;
        if original.status() == EntryStatus::Reversed {
            return Err(
                ledgerkit_core::DomainError::conflict(format!("entry {entry_id} is already reversed"))
                    .into(),
            );
        }
        if matches!(original.reference(), DocRef::Entry(_)) {
            return Err(ledgerkit_core::DomainError::conflict(
                "a reversal entry cannot itself be reversed",
            )
            .into());
        }

        self.undo_document_effects(tx, tenant, &original)?;

        let entry_no = tx.next_entry_number(tenant)?;
        let reversal = JournalEntry::try_new(
            EntryId::new(),
            tenant,
            entry_no,
            Utc::now(),
            DocRef::Entry(entry_id),
            format!("Reversal of entry #{}", original.entry_no()),
            original.swapped_lines(),
        )?;

        tx.insert_entry(&reversal)?;
        for line in reversal.lines() {
            tx.apply_line_to_account(
                tenant,
                line.account_id(),
                line.debit_amount(),
                line.credit_amount(),
            )?;
        }
        tx.mark_entry_reversed(tenant, entry_id, reversal.id())?;
        tx.insert_idempotency(tenant, &key, Some(reversal.id()))?;

        pending.push(DomainEvent::new(
            ENTRY_REVERSED,
            tenant,
            entry_id.into(),
            json!({
                "reversal_entry_id": reversal.id(),
                "reversal_entry_no": reversal.entry_no(),
                "amount_cents": reversal.total_debit().cents(),
            }),
        ));

        Ok(ReversalOutcome {
            reversal,
            replayed: false,
        })
    }

    /// Apply a payment or credit note against one or more invoices,
    /// atomically.
    pub fn allocate(
        &self,
        ctx: &RequestContext,
        command: &AllocationCommand,
    ) -> Result<AllocationOutcome, PostingError> {
        let span = tracing::info_span!(
            "ledger_allocate",
            request_id = %ctx.request_id,
            tenant_id = %command.tenant_id,
            source = command.source.kind(),
            targets = command.targets.len(),
        );
        let _guard = span.enter();

        let mut pending = Vec::new();
        match run_in_tx(self.store.as_ref(), |tx| {
            self.allocate_in(ctx, tx, command, &mut pending)
        }) {
            Ok(outcome) => {
                self.dispatch(&pending);
                Ok(outcome)
            }
            Err(PostingError::Store(err))
                if err.is_duplicate_of(UniqueConstraint::IdempotencyKey) =>
            {
                tracing::info!("allocation already applied concurrently, replaying");
                self.replayed_allocation(command)
            }
            Err(err) => Err(err),
        }
    }

    /// [`Self::allocate`] against a caller-owned transaction handle.
    pub fn allocate_in(
        &self,
        _ctx: &RequestContext,
        tx: &mut dyn LedgerTx,
        command: &AllocationCommand,
        pending: &mut Vec<DomainEvent>,
    ) -> Result<AllocationOutcome, PostingError> {
        let tenant = command.tenant_id;

        if tx.idempotency_record(tenant, &command.key)?.is_some() {
            return self.allocation_state(tx, command, true);
        }

        if command.targets.is_empty() {
            return Err(
                ledgerkit_core::DomainError::validation("allocation needs at least one target")
                    .into(),
            );
        }
        let mut total = Money::ZERO;
        for target in &command.targets {
            if target.amount.is_zero() || target.amount.is_negative() {
                return Err(ledgerkit_core::DomainError::validation(
                    "allocation amounts must be positive",
                )
                .into());
            }
            total = total.add(target.amount)?;
        }

        let (source_customer, available) = match command.source {
            AllocationSource::Payment(id) => {
                let payment = tx
                    .payment(tenant, id)?
                    .ok_or_else(|| StoreError::NotFound(format!("payment {id}")))?;
                (payment.customer_id, payment.unallocated)
            }
            AllocationSource::CreditNote(id) => {
                let note = tx
                    .credit_note(tenant, id)?
                    .ok_or_else(|| StoreError::NotFound(format!("credit note {id}")))?;
                (note.customer_id, note.balance)
            }
        };
        if total > available {
            return Err(PostingError::OverAllocation {
                requested: total,
                available,
            });
        }

        let mut invoice_balances = Vec::with_capacity(command.targets.len());
        for target in &command.targets {
            let invoice = tx
                .invoice(tenant, target.invoice_id)?
                .ok_or_else(|| StoreError::NotFound(format!("invoice {}", target.invoice_id)))?;
            if invoice.customer_id != source_customer {
                return Err(ledgerkit_core::DomainError::validation(
                    "allocation source and invoice belong to different customers",
                )
                .into());
            }
            if target.amount > invoice.balance_due {
                return Err(PostingError::OverAllocation {
                    requested: target.amount,
                    available: invoice.balance_due,
                });
            }
            let balance = invoice.balance_due.subtract(target.amount)?;
            tx.set_invoice_balance(tenant, target.invoice_id, balance)?;
            invoice_balances.push((target.invoice_id, balance));
        }

        let source_remaining = available.subtract(total)?;
        match command.source {
            AllocationSource::Payment(id) => {
                tx.set_payment_unallocated(tenant, id, source_remaining)?;
            }
            AllocationSource::CreditNote(id) => {
                tx.set_credit_note_balance(tenant, id, source_remaining)?;
            }
        }
        tx.insert_idempotency(tenant, &command.key, None)?;

        pending.push(DomainEvent::new(
            ALLOCATION_APPLIED,
            tenant,
            command.source.id(),
            json!({
                "source_kind": command.source.kind(),
                "amount_cents": total.cents(),
                "source_remaining_cents": source_remaining.cents(),
                "targets": command
                    .targets
                    .iter()
                    .map(|t| json!({
                        "invoice_id": t.invoice_id,
                        "amount_cents": t.amount.cents(),
                    }))
                    .collect::<Vec<_>>(),
            }),
        ));

        Ok(AllocationOutcome {
            invoice_balances,
            source_remaining,
            replayed: false,
        })
    }

    /// Recompute an account balance from its persisted lines and compare it
    /// with the cached column. Read-only.
    pub fn verify_account(
        &self,
        ctx: &RequestContext,
        tenant: TenantId,
        account_id: AccountId,
    ) -> Result<AccountAudit, PostingError> {
        let span = tracing::info_span!(
            "ledger_verify_account",
            request_id = %ctx.request_id,
            tenant_id = %tenant,
            account_id = %account_id,
        );
        let _guard = span.enter();

        let audit = run_in_tx(self.store.as_ref(), |tx| {
            let account = tx
                .account(tenant, account_id)?
                .ok_or_else(|| StoreError::NotFound(format!("account {account_id}")))?;
            let (debits, credits) = tx.line_totals(tenant, account_id)?;
            Ok::<_, PostingError>(AccountAudit {
                account_id,
                cached: account.balance,
                derived: debits.subtract(credits)?,
            })
        })?;

        if !audit.consistent() {
            tracing::error!(
                cached = %audit.cached,
                derived = %audit.derived,
                "cached account balance disagrees with journal lines"
            );
        }
        Ok(audit)
    }

    /// Run `f` against an existing handle or a fresh scope, then emit the
    /// events `f` collected once the scope has committed. This is the outer
    /// entry point for multi-operation workflows built from the `_in`
    /// variants.
    pub fn with_scope<T, F>(&self, f: F) -> Result<T, PostingError>
    where
        F: FnOnce(&mut dyn LedgerTx, &mut Vec<DomainEvent>) -> Result<T, PostingError>,
    {
        let mut pending = Vec::new();
        let value = run_in_existing_or_new_tx(self.store.as_ref(), None, |tx| f(tx, &mut pending))?;
        self.dispatch(&pending);
        Ok(value)
    }

    fn dispatch(&self, pending: &[DomainEvent]) {
        for event in pending {
            self.events.emit(event);
        }
    }

    fn require_active_account(
        &self,
        tx: &mut dyn LedgerTx,
        tenant: TenantId,
        account_id: AccountId,
    ) -> Result<(), PostingError> {
        let account = tx
            .account(tenant, account_id)?
            .ok_or_else(|| StoreError::NotFound(format!("account {account_id}")))?;
        if !account.active {
            return Err(PostingError::InactiveAccount(account_id));
        }
        Ok(())
    }

    fn apply_document_effects(
        &self,
        tx: &mut dyn LedgerTx,
        command: &PostingCommand,
    ) -> Result<(), PostingError> {
        match command {
            PostingCommand::Invoice(cmd) => {
                tx.upsert_invoice(&cmd.invoice)?;
                tx.adjust_customer_balance(
                    cmd.invoice.tenant_id,
                    cmd.invoice.customer_id,
                    cmd.invoice.total,
                )?;
            }
            PostingCommand::Payment(cmd) => {
                tx.upsert_payment(&cmd.payment)?;
                tx.adjust_customer_balance(
                    cmd.payment.tenant_id,
                    cmd.payment.customer_id,
                    negated(cmd.payment.amount)?,
                )?;
            }
            PostingCommand::CreditNote(cmd) => {
                tx.upsert_credit_note(&cmd.note)?;
                tx.adjust_customer_balance(
                    cmd.note.tenant_id,
                    cmd.note.customer_id,
                    negated(cmd.note.amount)?,
                )?;
            }
            PostingCommand::Expense(cmd) => {
                tx.upsert_expense(&cmd.expense)?;
                if let Some(vendor_id) = cmd.expense.vendor_id {
                    tx.adjust_vendor_balance(cmd.expense.tenant_id, vendor_id, cmd.expense.amount)?;
                }
            }
        }
        Ok(())
    }

    /// Undo the sub-ledger side of a posted entry. A document that has
    /// already funded allocations cannot be reversed; the allocations must
    /// be unwound first.
    fn undo_document_effects(
        &self,
        tx: &mut dyn LedgerTx,
        tenant: TenantId,
        original: &JournalEntry,
    ) -> Result<(), PostingError> {
        match original.reference() {
            DocRef::Invoice(id) => {
                let invoice = tx
                    .invoice(tenant, id)?
                    .ok_or_else(|| StoreError::NotFound(format!("invoice {id}")))?;
                if invoice.balance_due != invoice.total {
                    return Err(ledgerkit_core::DomainError::conflict(
                        "invoice has allocations and cannot be reversed",
                    )
                    .into());
                }
                tx.set_invoice_balance(tenant, id, Money::ZERO)?;
                tx.adjust_customer_balance(tenant, invoice.customer_id, negated(invoice.total)?)?;
            }
            DocRef::Payment(id) => {
                let payment = tx
                    .payment(tenant, id)?
                    .ok_or_else(|| StoreError::NotFound(format!("payment {id}")))?;
                if payment.unallocated != payment.amount {
                    return Err(ledgerkit_core::DomainError::conflict(
                        "payment has allocations and cannot be reversed",
                    )
                    .into());
                }
                tx.set_payment_unallocated(tenant, id, Money::ZERO)?;
                tx.adjust_customer_balance(tenant, payment.customer_id, payment.amount)?;
            }
            DocRef::CreditNote(id) => {
                let note = tx
                    .credit_note(tenant, id)?
                    .ok_or_else(|| StoreError::NotFound(format!("credit note {id}")))?;
                if note.balance != note.amount {
                    return Err(ledgerkit_core::DomainError::conflict(
                        "credit note has allocations and cannot be reversed",
                    )
                    .into());
                }
                tx.set_credit_note_balance(tenant, id, Money::ZERO)?;
                tx.adjust_customer_balance(tenant, note.customer_id, note.amount)?;
            }
            DocRef::Expense(id) => {
                let expense = tx
                    .expense(tenant, id)?
                    .ok_or_else(|| StoreError::NotFound(format!("expense {id}")))?;
                if let Some(vendor_id) = expense.vendor_id {
                    tx.adjust_vendor_balance(tenant, vendor_id, negated(expense.amount)?)?;
                }
            }
            // Rejected before this point.
            DocRef::Entry(_) => {}
        }
        Ok(())
    }

    fn replayed_posting(&self, command: &PostingCommand) -> Result<PostingOutcome, PostingError> {
        let tenant = command.tenant_id();
        let key = command.idempotency_key();
        run_in_tx(self.store.as_ref(), |tx| {
            let record = tx
                .idempotency_record(tenant, &key)?
                .ok_or_else(|| PostingError::ReplayMismatch(key.clone()))?;
            let entry_id = record.entry_id.ok_or_else(|| PostingError::ReplayMismatch(key.clone()))?;
            let entry = tx
                .entry(tenant, entry_id)?
                .ok_or_else(|| PostingError::ReplayMismatch(key.clone()))?;
            Ok(PostingOutcome {
                entry,
                replayed: true,
            })
        })
    }

    fn replayed_reversal(
        &self,
        tenant: TenantId,
        entry_id: EntryId,
    ) -> Result<ReversalOutcome, PostingError> {
        let key = IdempotencyKey::derived("reversal", entry_id);
        run_in_tx(self.store.as_ref(), |tx| {
            let record = tx
                .idempotency_record(tenant, &key)?
                .ok_or_else(|| PostingError::ReplayMismatch(key.clone()))?;
            let reversal_id =
                record.entry_id.ok_or_else(|| PostingError::ReplayMismatch(key.clone()))?;
            let reversal = tx
                .entry(tenant, reversal_id)?
                .ok_or_else(|| PostingError::ReplayMismatch(key.clone()))?;
            Ok(ReversalOutcome {
                reversal,
                replayed: true,
            })
        })
    }

    fn replayed_allocation(
        &self,
        command: &AllocationCommand,
    ) -> Result<AllocationOutcome, PostingError> {
        run_in_tx(self.store.as_ref(), |tx| self.allocation_state(tx, command, true))
    }

    /// Current balances of the documents an allocation touches, reported as
    /// the outcome of a replayed allocation.
    fn allocation_state(
        &self,
        tx: &mut dyn LedgerTx,
        command: &AllocationCommand,
        replayed: bool,
    ) -> Result<AllocationOutcome, PostingError> {
        let tenant = command.tenant_id;
        let mut invoice_balances = Vec::with_capacity(command.targets.len());
        for target in &command.targets {
            let invoice = tx
                .invoice(tenant, target.invoice_id)?
                .ok_or_else(|| StoreError::NotFound(format!("invoice {}", target.invoice_id)))?;
            invoice_balances.push((target.invoice_id, invoice.balance_due));
        }
        let source_remaining = match command.source {
            AllocationSource::Payment(id) => {
                tx.payment(tenant, id)?
                    .ok_or_else(|| StoreError::NotFound(format!("payment {id}")))?
                    .unallocated
            }
            AllocationSource::CreditNote(id) => {
                tx.credit_note(tenant, id)?
                    .ok_or_else(|| StoreError::NotFound(format!("credit note {id}")))?
                    .balance
            }
        };
        Ok(AllocationOutcome {
            invoice_balances,
            source_remaining,
            replayed,
        })
    }
}

impl core::fmt::Debug for PostingEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostingEngine").finish_non_exhaustive()
    }
}

fn negated(amount: Money) -> Result<Money, MoneyError> {
    Money::ZERO.subtract(amount)
}
