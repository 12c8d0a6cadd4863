//! SQLite backend via `rusqlite`.
//!
//! Storage is fully synchronous, so a transaction never outlives the call
//! stack that opened it. The connection sits behind a mutex: concurrent
//! scopes from other threads block until the holder commits or rolls back,
//! while a re-entrant `begin` from the holding thread fails fast.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use ledgerkit_core::{
    AccountId, CreditNoteId, CustomerId, EntryId, ExpenseId, IdempotencyKey, InvoiceId, Money,
    PaymentId, TenantId, VendorId,
};
use ledgerkit_ledger::{
    Account, AccountKind, CreditNote, DocRef, EntryStatus, Expense, Invoice, JournalEntry,
    JournalLine, Payment,
};

use crate::duplicate::{ViolationInfo, classify_duplicate};
use crate::error::StoreError;
use crate::tx::{IdempotencyRecord, LedgerStore, LedgerTx, ReentrancyGuard, parse_stored_datetime};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    tenant_id     TEXT NOT NULL,
    id            TEXT NOT NULL,
    code          TEXT NOT NULL,
    name          TEXT NOT NULL,
    kind          TEXT NOT NULL,
    balance_cents INTEGER NOT NULL,
    active        INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id)
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_accounts_tenant_code
    ON accounts (tenant_id, code);

CREATE TABLE IF NOT EXISTS journal_entries (
    tenant_id   TEXT NOT NULL,
    id          TEXT NOT NULL,
    entry_no    INTEGER NOT NULL,
    entry_date  TEXT NOT NULL,
    ref_kind    TEXT NOT NULL,
    ref_id      TEXT NOT NULL,
    narration   TEXT NOT NULL,
    status      TEXT NOT NULL,
    reversed_by TEXT,
    PRIMARY KEY (tenant_id, id)
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_journal_entries_tenant_entry_no
    ON journal_entries (tenant_id, entry_no);

CREATE TABLE IF NOT EXISTS journal_lines (
    tenant_id    TEXT NOT NULL,
    entry_id     TEXT NOT NULL,
    line_no      INTEGER NOT NULL,
    account_id   TEXT NOT NULL,
    debit_cents  INTEGER NOT NULL,
    credit_cents INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, entry_id, line_no)
);
CREATE INDEX IF NOT EXISTS ix_journal_lines_tenant_account
    ON journal_lines (tenant_id, account_id);

CREATE TABLE IF NOT EXISTS idempotency_records (
    tenant_id  TEXT NOT NULL,
    idem_key   TEXT NOT NULL,
    entry_id   TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, idem_key)
);

CREATE TABLE IF NOT EXISTS invoices (
    tenant_id     TEXT NOT NULL,
    id            TEXT NOT NULL,
    customer_id   TEXT NOT NULL,
    total_cents   INTEGER NOT NULL,
    balance_cents INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id)
);

CREATE TABLE IF NOT EXISTS payments (
    tenant_id         TEXT NOT NULL,
    id                TEXT NOT NULL,
    customer_id       TEXT NOT NULL,
    amount_cents      INTEGER NOT NULL,
    unallocated_cents INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id)
);

CREATE TABLE IF NOT EXISTS expenses (
    tenant_id    TEXT NOT NULL,
    id           TEXT NOT NULL,
    vendor_id    TEXT,
    amount_cents INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id)
);

CREATE TABLE IF NOT EXISTS credit_notes (
    tenant_id     TEXT NOT NULL,
    id            TEXT NOT NULL,
    customer_id   TEXT NOT NULL,
    amount_cents  INTEGER NOT NULL,
    balance_cents INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, id)
);

CREATE TABLE IF NOT EXISTS party_balances (
    tenant_id     TEXT NOT NULL,
    party_kind    TEXT NOT NULL,
    party_id      TEXT NOT NULL,
    balance_cents INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, party_kind, party_id)
);
";

/// SQLite-backed ledger store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    tx_owner: ReentrancyGuard,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path).map_err(map_sqlite_err)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory().map_err(map_sqlite_err)?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(map_sqlite_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            tx_owner: ReentrancyGuard::default(),
        })
    }
}

impl LedgerStore for SqliteStore {
    fn begin(&self) -> Result<Box<dyn LedgerTx + '_>, StoreError> {
        self.tx_owner.check()?;
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.execute_batch("BEGIN IMMEDIATE").map_err(map_sqlite_err)?;
        self.tx_owner.acquire();
        Ok(Box::new(SqliteTx {
            conn,
            owner: &self.tx_owner,
            finished: false,
        }))
    }
}

/// Map a driver error, routing constraint violations through the shared
/// detector chain.
fn map_sqlite_err(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, message) = &err {
        let info = ViolationInfo {
            vendor_code: Some(code.extended_code.to_string()),
            constraint: None,
            message: message.clone().unwrap_or_default(),
        };
        if let Some(constraint) = classify_duplicate(&info) {
            return StoreError::Duplicate { constraint };
        }
    }
    StoreError::Backend(err.to_string())
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::backend(format!("corrupt stored id '{raw}': {e}")))
}

struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    owner: &'a ReentrancyGuard,
    finished: bool,
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
        self.owner.release();
    }
}

impl LedgerTx for SqliteTx<'_> {
    fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO accounts (tenant_id, id, code, name, kind, balance_cents, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    account.tenant_id.to_string(),
                    account.id.to_string(),
                    account.code,
                    account.name,
                    account.kind.as_str(),
                    account.balance.cents(),
                    account.active,
                ],
            )
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    fn account(&mut self, tenant_id: TenantId, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT code, name, kind, balance_cents, active
                 FROM accounts WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(map_sqlite_err)?;

        let Some((code, name, kind, balance_cents, active)) = row else {
            return Ok(None);
        };
        Ok(Some(Account {
            id,
            tenant_id,
            code,
            name,
            kind: AccountKind::parse(&kind).map_err(|e| StoreError::backend(e.to_string()))?,
            balance: Money::from_cents(balance_cents),
            active,
        }))
    }

    fn apply_line_to_account(
        &mut self,
        tenant_id: TenantId,
        id: AccountId,
        debit: Money,
        credit: Money,
    ) -> Result<(), StoreError> {
        let current = self
            .conn
            .query_row(
                "SELECT balance_cents FROM accounts WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(map_sqlite_err)?
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;

        let updated = Money::from_cents(current)
            .add(debit)
            .and_then(|b| b.subtract(credit))
            .map_err(|e| StoreError::backend(format!("balance arithmetic failed: {e}")))?;

        self.conn
            .execute(
                "UPDATE accounts SET balance_cents = ?3 WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), id.to_string(), updated.cents()],
            )
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    fn line_totals(
        &mut self,
        tenant_id: TenantId,
        id: AccountId,
    ) -> Result<(Money, Money), StoreError> {
        let (debits, credits) = self
            .conn
            .query_row(
                "SELECT COALESCE(SUM(debit_cents), 0), COALESCE(SUM(credit_cents), 0)
                 FROM journal_lines WHERE tenant_id = ?1 AND account_id = ?2",
                params![tenant_id.to_string(), id.to_string()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .map_err(map_sqlite_err)?;
        Ok((Money::from_cents(debits), Money::from_cents(credits)))
    }

    fn next_entry_number(&mut self, tenant_id: TenantId) -> Result<u64, StoreError> {
        let next = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(entry_no), 0) + 1 FROM journal_entries WHERE tenant_id = ?1",
                params![tenant_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .map_err(map_sqlite_err)?;
        Ok(next as u64)
    }

    fn insert_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO journal_entries
                     (tenant_id, id, entry_no, entry_date, ref_kind, ref_id, narration, status, reversed_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.tenant_id().to_string(),
                    entry.id().to_string(),
                    entry.entry_no() as i64,
                    entry.entry_date().to_rfc3339(),
                    entry.reference().kind(),
                    entry.reference().id().to_string(),
                    entry.narration(),
                    entry.status().as_str(),
                    entry.reversed_by().map(|id| id.to_string()),
                ],
            )
            .map_err(map_sqlite_err)?;

        for (line_no, line) in entry.lines().iter().enumerate() {
            self.conn
                .execute(
                    "INSERT INTO journal_lines
                         (tenant_id, entry_id, line_no, account_id, debit_cents, credit_cents)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        entry.tenant_id().to_string(),
                        entry.id().to_string(),
                        line_no as i64,
                        line.account_id().to_string(),
                        line.debit_amount().cents(),
                        line.credit_amount().cents(),
                    ],
                )
                .map_err(map_sqlite_err)?;
        }
        Ok(())
    }

    fn entry(&mut self, tenant_id: TenantId, id: EntryId) -> Result<Option<JournalEntry>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT entry_no, entry_date, ref_kind, ref_id, narration, status, reversed_by
                 FROM journal_entries WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(map_sqlite_err)?;

        let Some((entry_no, entry_date, ref_kind, ref_id, narration, status, reversed_by)) = row
        else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT account_id, debit_cents, credit_cents
                 FROM journal_lines WHERE tenant_id = ?1 AND entry_id = ?2 ORDER BY line_no",
            )
            .map_err(map_sqlite_err)?;
        let raw_lines = stmt
            .query_map(params![tenant_id.to_string(), id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(map_sqlite_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite_err)?;

        let mut lines = Vec::with_capacity(raw_lines.len());
        for (account_id, debit, credit) in raw_lines {
            let line = JournalLine::from_amounts(
                AccountId::from_uuid(parse_uuid(&account_id)?),
                Money::from_cents(debit),
                Money::from_cents(credit),
            )
            .map_err(|e| StoreError::backend(format!("corrupt stored line: {e}")))?;
            lines.push(line);
        }

        let reference = DocRef::from_kind_id(&ref_kind, parse_uuid(&ref_id)?)
            .map_err(|e| StoreError::backend(e.to_string()))?;
        let reversed_by = reversed_by
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(EntryId::from_uuid);

        let entry = JournalEntry::from_stored(
            id,
            tenant_id,
            entry_no as u64,
            parse_stored_datetime(&entry_date)?,
            reference,
            narration,
            EntryStatus::parse(&status).map_err(|e| StoreError::backend(e.to_string()))?,
            reversed_by,
            lines,
        )
        .map_err(|e| StoreError::backend(format!("corrupt stored entry: {e}")))?;
        Ok(Some(entry))
    }

    fn mark_entry_reversed(
        &mut self,
        tenant_id: TenantId,
        id: EntryId,
        reversed_by: EntryId,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE journal_entries SET status = 'reversed', reversed_by = ?3
                 WHERE tenant_id = ?1 AND id = ?2 AND status = 'posted'",
                params![tenant_id.to_string(), id.to_string(), reversed_by.to_string()],
            )
            .map_err(map_sqlite_err)?;
        if changed == 1 {
            return Ok(());
        }

        // Distinguish "missing" from "already reversed".
        match self.entry(tenant_id, id)? {
            None => Err(StoreError::NotFound(format!("journal entry {id}"))),
            Some(_) => Err(StoreError::backend(format!("entry {id} is already reversed"))),
        }
    }

    fn insert_idempotency(
        &mut self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
        entry_id: Option<EntryId>,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO idempotency_records (tenant_id, idem_key, entry_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    tenant_id.to_string(),
                    key.as_str(),
                    entry_id.map(|id| id.to_string()),
                    chrono::Utc::now().to_rfc3339(),
                ],
            )
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    fn idempotency_record(
        &mut self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "SELECT entry_id FROM idempotency_records WHERE tenant_id = ?1 AND idem_key = ?2",
                params![tenant_id.to_string(), key.as_str()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map_err(map_sqlite_err)?;

        let Some(entry_id) = raw else {
            return Ok(None);
        };
        let entry_id = entry_id
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(EntryId::from_uuid);
        Ok(Some(IdempotencyRecord {
            key: key.clone(),
            entry_id,
        }))
    }

    fn upsert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO invoices (tenant_id, id, customer_id, total_cents, balance_cents)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (tenant_id, id) DO UPDATE SET
                     customer_id = excluded.customer_id,
                     total_cents = excluded.total_cents,
                     balance_cents = excluded.balance_cents",
                params![
                    invoice.tenant_id.to_string(),
                    invoice.id.to_string(),
                    invoice.customer_id.to_string(),
                    invoice.total.cents(),
                    invoice.balance_due.cents(),
                ],
            )
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    fn invoice(&mut self, tenant_id: TenantId, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT customer_id, total_cents, balance_cents
                 FROM invoices WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(map_sqlite_err)?;

        let Some((customer_id, total, balance)) = row else {
            return Ok(None);
        };
        Ok(Some(Invoice {
            id,
            tenant_id,
            customer_id: CustomerId::from_uuid(parse_uuid(&customer_id)?),
            total: Money::from_cents(total),
            balance_due: Money::from_cents(balance),
        }))
    }

    fn set_invoice_balance(
        &mut self,
        tenant_id: TenantId,
        id: InvoiceId,
        balance_due: Money,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE invoices SET balance_cents = ?3 WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), id.to_string(), balance_due.cents()],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("invoice {id}")));
        }
        Ok(())
    }

    fn upsert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO payments (tenant_id, id, customer_id, amount_cents, unallocated_cents)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (tenant_id, id) DO UPDATE SET
                     customer_id = excluded.customer_id,
                     amount_cents = excluded.amount_cents,
                     unallocated_cents = excluded.unallocated_cents",
                params![
                    payment.tenant_id.to_string(),
                    payment.id.to_string(),
                    payment.customer_id.to_string(),
                    payment.amount.cents(),
                    payment.unallocated.cents(),
                ],
            )
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    fn payment(&mut self, tenant_id: TenantId, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT customer_id, amount_cents, unallocated_cents
                 FROM payments WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(map_sqlite_err)?;

        let Some((customer_id, amount, unallocated)) = row else {
            return Ok(None);
        };
        Ok(Some(Payment {
            id,
            tenant_id,
            customer_id: CustomerId::from_uuid(parse_uuid(&customer_id)?),
            amount: Money::from_cents(amount),
            unallocated: Money::from_cents(unallocated),
        }))
    }

    fn set_payment_unallocated(
        &mut self,
        tenant_id: TenantId,
        id: PaymentId,
        unallocated: Money,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE payments SET unallocated_cents = ?3 WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), id.to_string(), unallocated.cents()],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("payment {id}")));
        }
        Ok(())
    }

    fn upsert_expense(&mut self, expense: &Expense) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO expenses (tenant_id, id, vendor_id, amount_cents)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (tenant_id, id) DO UPDATE SET
                     vendor_id = excluded.vendor_id,
                     amount_cents = excluded.amount_cents",
                params![
                    expense.tenant_id.to_string(),
                    expense.id.to_string(),
                    expense.vendor_id.map(|id| id.to_string()),
                    expense.amount.cents(),
                ],
            )
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    fn expense(&mut self, tenant_id: TenantId, id: ExpenseId) -> Result<Option<Expense>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT vendor_id, amount_cents FROM expenses WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), id.to_string()],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .map_err(map_sqlite_err)?;

        let Some((vendor_id, amount)) = row else {
            return Ok(None);
        };
        let vendor_id = vendor_id
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(VendorId::from_uuid);
        Ok(Some(Expense {
            id,
            tenant_id,
            vendor_id,
            amount: Money::from_cents(amount),
        }))
    }

    fn upsert_credit_note(&mut self, note: &CreditNote) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO credit_notes (tenant_id, id, customer_id, amount_cents, balance_cents)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (tenant_id, id) DO UPDATE SET
                     customer_id = excluded.customer_id,
                     amount_cents = excluded.amount_cents,
                     balance_cents = excluded.balance_cents",
                params![
                    note.tenant_id.to_string(),
                    note.id.to_string(),
                    note.customer_id.to_string(),
                    note.amount.cents(),
                    note.balance.cents(),
                ],
            )
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    fn credit_note(
        &mut self,
        tenant_id: TenantId,
        id: CreditNoteId,
    ) -> Result<Option<CreditNote>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT customer_id, amount_cents, balance_cents
                 FROM credit_notes WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(map_sqlite_err)?;

        let Some((customer_id, amount, balance)) = row else {
            return Ok(None);
        };
        Ok(Some(CreditNote {
            id,
            tenant_id,
            customer_id: CustomerId::from_uuid(parse_uuid(&customer_id)?),
            amount: Money::from_cents(amount),
            balance: Money::from_cents(balance),
        }))
    }

    fn set_credit_note_balance(
        &mut self,
        tenant_id: TenantId,
        id: CreditNoteId,
        balance: Money,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE credit_notes SET balance_cents = ?3 WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), id.to_string(), balance.cents()],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("credit note {id}")));
        }
        Ok(())
    }

    fn customer_balance(&mut self, tenant_id: TenantId, id: CustomerId) -> Result<Money, StoreError> {
        self.party_balance(tenant_id, "customer", (*id.as_uuid()).to_string())
    }

    fn adjust_customer_balance(
        &mut self,
        tenant_id: TenantId,
        id: CustomerId,
        delta: Money,
    ) -> Result<(), StoreError> {
        self.adjust_party_balance(tenant_id, "customer", (*id.as_uuid()).to_string(), delta)
    }

    fn vendor_balance(&mut self, tenant_id: TenantId, id: VendorId) -> Result<Money, StoreError> {
        self.party_balance(tenant_id, "vendor", (*id.as_uuid()).to_string())
    }

    fn adjust_vendor_balance(
        &mut self,
        tenant_id: TenantId,
        id: VendorId,
        delta: Money,
    ) -> Result<(), StoreError> {
        self.adjust_party_balance(tenant_id, "vendor", (*id.as_uuid()).to_string(), delta)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT").map_err(map_sqlite_err)?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.execute_batch("ROLLBACK").map_err(map_sqlite_err)?;
        self.finished = true;
        Ok(())
    }
}

impl SqliteTx<'_> {
    fn party_balance(
        &self,
        tenant_id: TenantId,
        kind: &str,
        party_id: String,
    ) -> Result<Money, StoreError> {
        let cents = self
            .conn
            .query_row(
                "SELECT balance_cents FROM party_balances
                 WHERE tenant_id = ?1 AND party_kind = ?2 AND party_id = ?3",
                params![tenant_id.to_string(), kind, party_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(map_sqlite_err)?
            .unwrap_or(0);
        Ok(Money::from_cents(cents))
    }

    fn adjust_party_balance(
        &mut self,
        tenant_id: TenantId,
        kind: &str,
        party_id: String,
        delta: Money,
    ) -> Result<(), StoreError> {
        let current = self.party_balance(tenant_id, kind, party_id.clone())?;
        let updated = current
            .add(delta)
            .map_err(|e| StoreError::backend(format!("balance arithmetic failed: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO party_balances (tenant_id, party_kind, party_id, balance_cents)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (tenant_id, party_kind, party_id) DO UPDATE SET
                     balance_cents = excluded.balance_cents",
                params![tenant_id.to_string(), kind, party_id, updated.cents()],
            )
            .map_err(map_sqlite_err)?;
        Ok(())
    }
}
