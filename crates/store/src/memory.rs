//! In-memory backend.
//!
//! Intended for tests/dev. Transactions take a snapshot of the whole state,
//! mutate the snapshot, and swap it back on commit; an error or drop discards
//! the snapshot. Concurrent transactions serialize on the state mutex, which
//! stands in for the storage engine's locking layer.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use ledgerkit_core::{
    AccountId, CreditNoteId, CustomerId, EntryId, ExpenseId, IdempotencyKey, InvoiceId, Money,
    PaymentId, TenantId, VendorId,
};
use ledgerkit_ledger::{Account, CreditNote, Expense, Invoice, JournalEntry, Payment};

use crate::duplicate::{ViolationInfo, classify_duplicate};
use crate::error::StoreError;
use crate::tx::{IdempotencyRecord, LedgerStore, LedgerTx, ReentrancyGuard};

#[derive(Debug, Default, Clone)]
struct MemState {
    accounts: HashMap<(TenantId, AccountId), Account>,
    entries: HashMap<(TenantId, EntryId), JournalEntry>,
    idempotency: HashMap<(TenantId, String), Option<EntryId>>,
    invoices: HashMap<(TenantId, InvoiceId), Invoice>,
    payments: HashMap<(TenantId, PaymentId), Payment>,
    credit_notes: HashMap<(TenantId, CreditNoteId), CreditNote>,
    expenses: HashMap<(TenantId, ExpenseId), Expense>,
    customer_balances: HashMap<(TenantId, CustomerId), Money>,
    vendor_balances: HashMap<(TenantId, VendorId), Money>,
}

/// In-memory ledger store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemState>,
    tx_owner: ReentrancyGuard,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn begin(&self) -> Result<Box<dyn LedgerTx + '_>, StoreError> {
        self.tx_owner.check()?;
        let guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let working = guard.clone();
        self.tx_owner.acquire();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            owner: &self.tx_owner,
        }))
    }
}

struct MemoryTx<'a> {
    guard: MutexGuard<'a, MemState>,
    working: MemState,
    owner: &'a ReentrancyGuard,
}

impl Drop for MemoryTx<'_> {
    fn drop(&mut self) {
        self.owner.release();
    }
}

/// Route a named-constraint violation through the shared detector chain, so
/// this backend's error shape is classified the same way SQL backends are.
fn unique_violation(constraint_name: &str) -> StoreError {
    let info = ViolationInfo {
        vendor_code: None,
        constraint: Some(constraint_name.to_string()),
        message: format!("unique constraint {constraint_name} violated"),
    };
    match classify_duplicate(&info) {
        Some(constraint) => StoreError::Duplicate { constraint },
        None => StoreError::Backend(info.message),
    }
}

fn money_err(e: ledgerkit_core::MoneyError) -> StoreError {
    StoreError::backend(format!("balance arithmetic failed: {e}"))
}

impl LedgerTx for MemoryTx<'_> {
    fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        let key = (account.tenant_id, account.id);
        if self.working.accounts.contains_key(&key) {
            return Err(unique_violation("pk_accounts"));
        }
        let code_taken = self
            .working
            .accounts
            .values()
            .any(|a| a.tenant_id == account.tenant_id && a.code == account.code);
        if code_taken {
            return Err(unique_violation("uq_accounts_tenant_code"));
        }
        self.working.accounts.insert(key, account.clone());
        Ok(())
    }

    fn account(&mut self, tenant_id: TenantId, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.working.accounts.get(&(tenant_id, id)).cloned())
    }

    fn apply_line_to_account(
        &mut self,
        tenant_id: TenantId,
        id: AccountId,
        debit: Money,
        credit: Money,
    ) -> Result<(), StoreError> {
        let account = self
            .working
            .accounts
            .get_mut(&(tenant_id, id))
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
        account.balance = account.balance.add(debit).map_err(money_err)?
            .subtract(credit)
            .map_err(money_err)?;
        Ok(())
    }

    fn line_totals(
        &mut self,
        tenant_id: TenantId,
        id: AccountId,
    ) -> Result<(Money, Money), StoreError> {
        let mut debits: i128 = 0;
        let mut credits: i128 = 0;
        for entry in self.working.entries.values() {
            if entry.tenant_id() != tenant_id {
                continue;
            }
            for line in entry.lines() {
                if line.account_id() == id {
                    debits += line.debit_amount().cents() as i128;
                    credits += line.credit_amount().cents() as i128;
                }
            }
        }
        Ok((Money::from_cents(debits as i64), Money::from_cents(credits as i64)))
    }

    fn next_entry_number(&mut self, tenant_id: TenantId) -> Result<u64, StoreError> {
        let max = self
            .working
            .entries
            .values()
            .filter(|e| e.tenant_id() == tenant_id)
            .map(JournalEntry::entry_no)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    fn insert_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        let key = (entry.tenant_id(), entry.id());
        if self.working.entries.contains_key(&key) {
            return Err(unique_violation("pk_journal_entries"));
        }
        let number_taken = self
            .working
            .entries
            .values()
            .any(|e| e.tenant_id() == entry.tenant_id() && e.entry_no() == entry.entry_no());
        if number_taken {
            return Err(unique_violation("uq_journal_entries_tenant_entry_no"));
        }
        self.working.entries.insert(key, entry.clone());
        Ok(())
    }

    fn entry(&mut self, tenant_id: TenantId, id: EntryId) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self.working.entries.get(&(tenant_id, id)).cloned())
    }

    fn mark_entry_reversed(
        &mut self,
        tenant_id: TenantId,
        id: EntryId,
        reversed_by: EntryId,
    ) -> Result<(), StoreError> {
        let entry = self
            .working
            .entries
            .get_mut(&(tenant_id, id))
            .ok_or_else(|| StoreError::NotFound(format!("journal entry {id}")))?;
        entry
            .mark_reversed(reversed_by)
            .map_err(|e| StoreError::backend(e.to_string()))
    }

    fn insert_idempotency(
        &mut self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
        entry_id: Option<EntryId>,
    ) -> Result<(), StoreError> {
        let record_key = (tenant_id, key.as_str().to_string());
        if self.working.idempotency.contains_key(&record_key) {
            return Err(unique_violation("uq_idempotency_tenant_key"));
        }
        self.working.idempotency.insert(record_key, entry_id);
        Ok(())
    }

    fn idempotency_record(
        &mut self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self
            .working
            .idempotency
            .get(&(tenant_id, key.as_str().to_string()))
            .map(|entry_id| IdempotencyRecord {
                key: key.clone(),
                entry_id: *entry_id,
            }))
    }

    fn upsert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.working
            .invoices
            .insert((invoice.tenant_id, invoice.id), invoice.clone());
        Ok(())
    }

    fn invoice(&mut self, tenant_id: TenantId, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        Ok(self.working.invoices.get(&(tenant_id, id)).cloned())
    }

    fn set_invoice_balance(
        &mut self,
        tenant_id: TenantId,
        id: InvoiceId,
        balance_due: Money,
    ) -> Result<(), StoreError> {
        let invoice = self
            .working
            .invoices
            .get_mut(&(tenant_id, id))
            .ok_or_else(|| StoreError::NotFound(format!("invoice {id}")))?;
        invoice.balance_due = balance_due;
        Ok(())
    }

    fn upsert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.working
            .payments
            .insert((payment.tenant_id, payment.id), payment.clone());
        Ok(())
    }

    fn payment(&mut self, tenant_id: TenantId, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.working.payments.get(&(tenant_id, id)).cloned())
    }

    fn set_payment_unallocated(
        &mut self,
        tenant_id: TenantId,
        id: PaymentId,
        unallocated: Money,
    ) -> Result<(), StoreError> {
        let payment = self
            .working
            .payments
            .get_mut(&(tenant_id, id))
            .ok_or_else(|| StoreError::NotFound(format!("payment {id}")))?;
        payment.unallocated = unallocated;
        Ok(())
    }

    fn upsert_expense(&mut self, expense: &Expense) -> Result<(), StoreError> {
        self.working
            .expenses
            .insert((expense.tenant_id, expense.id), expense.clone());
        Ok(())
    }

    fn expense(&mut self, tenant_id: TenantId, id: ExpenseId) -> Result<Option<Expense>, StoreError> {
        Ok(self.working.expenses.get(&(tenant_id, id)).cloned())
    }

    fn upsert_credit_note(&mut self, note: &CreditNote) -> Result<(), StoreError> {
        self.working
            .credit_notes
            .insert((note.tenant_id, note.id), note.clone());
        Ok(())
    }

    fn credit_note(
        &mut self,
        tenant_id: TenantId,
        id: CreditNoteId,
    ) -> Result<Option<CreditNote>, StoreError> {
        Ok(self.working.credit_notes.get(&(tenant_id, id)).cloned())
    }

    fn set_credit_note_balance(
        &mut self,
        tenant_id: TenantId,
        id: CreditNoteId,
        balance: Money,
    ) -> Result<(), StoreError> {
        let note = self
            .working
            .credit_notes
            .get_mut(&(tenant_id, id))
            .ok_or_else(|| StoreError::NotFound(format!("credit note {id}")))?;
        note.balance = balance;
        Ok(())
    }

    fn customer_balance(&mut self, tenant_id: TenantId, id: CustomerId) -> Result<Money, StoreError> {
        Ok(self
            .working
            .customer_balances
            .get(&(tenant_id, id))
            .copied()
            .unwrap_or(Money::ZERO))
    }

    fn adjust_customer_balance(
        &mut self,
        tenant_id: TenantId,
        id: CustomerId,
        delta: Money,
    ) -> Result<(), StoreError> {
        let balance = self
            .working
            .customer_balances
            .entry((tenant_id, id))
            .or_insert(Money::ZERO);
        *balance = balance.add(delta).map_err(money_err)?;
        Ok(())
    }

    fn vendor_balance(&mut self, tenant_id: TenantId, id: VendorId) -> Result<Money, StoreError> {
        Ok(self
            .working
            .vendor_balances
            .get(&(tenant_id, id))
            .copied()
            .unwrap_or(Money::ZERO))
    }

    fn adjust_vendor_balance(
        &mut self,
        tenant_id: TenantId,
        id: VendorId,
        delta: Money,
    ) -> Result<(), StoreError> {
        let balance = self
            .working
            .vendor_balances
            .entry((tenant_id, id))
            .or_insert(Money::ZERO);
        *balance = balance.add(delta).map_err(money_err)?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.working);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Working snapshot is simply discarded.
        Ok(())
    }
}
