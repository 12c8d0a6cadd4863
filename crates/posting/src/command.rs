//! Posting commands: what business event happened, which documents and
//! accounts it touches.
//!
//! A command is pure data. The engine derives the journal lines, the entry
//! reference, and the idempotency key from it, so a retried command is
//! byte-for-byte replayable.

use ledgerkit_core::{
    AccountId, CreditNoteId, IdempotencyKey, InvoiceId, Money, PaymentId, TaxBreakup, TenantId,
};
use ledgerkit_ledger::{CreditNote, DocRef, Expense, Invoice, JournalLine, Payment};

use crate::error::PostingError;

/// GST output-tax liability accounts, one per component.
#[derive(Debug, Clone, Copy)]
pub struct TaxAccounts {
    pub cgst: AccountId,
    pub sgst: AccountId,
    pub igst: AccountId,
}

/// An invoice was issued: debit receivable for the gross total, credit
/// revenue for the net amount and each tax account for its component.
#[derive(Debug, Clone)]
pub struct InvoiceIssued {
    pub invoice: Invoice,
    /// Per-component tax amounts, already rounded. `invoice.total` is gross
    /// (net revenue plus `tax.total()`).
    pub tax: TaxBreakup,
    pub receivable: AccountId,
    pub revenue: AccountId,
    pub tax_accounts: TaxAccounts,
}

/// A customer payment was received: debit cash, credit receivable.
#[derive(Debug, Clone)]
pub struct PaymentReceived {
    pub payment: Payment,
    pub cash: AccountId,
    pub receivable: AccountId,
}

/// A credit note was granted: debit sales returns, credit receivable.
#[derive(Debug, Clone)]
pub struct CreditNoteIssued {
    pub note: CreditNote,
    pub sales_returns: AccountId,
    pub receivable: AccountId,
}

/// An expense was recorded: debit the expense account, credit the account
/// it was settled from (cash, or payable when a vendor is owed).
#[derive(Debug, Clone)]
pub struct ExpenseRecorded {
    pub expense: Expense,
    pub expense_account: AccountId,
    pub settled_from: AccountId,
}

/// A business event the engine can post as one balanced journal entry.
#[derive(Debug, Clone)]
pub enum PostingCommand {
    Invoice(InvoiceIssued),
    Payment(PaymentReceived),
    CreditNote(CreditNoteIssued),
    Expense(ExpenseRecorded),
}

impl PostingCommand {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            PostingCommand::Invoice(cmd) => cmd.invoice.tenant_id,
            PostingCommand::Payment(cmd) => cmd.payment.tenant_id,
            PostingCommand::CreditNote(cmd) => cmd.note.tenant_id,
            PostingCommand::Expense(cmd) => cmd.expense.tenant_id,
        }
    }

    /// The document this command posts, recorded on the journal entry.
    pub fn reference(&self) -> DocRef {
        match self {
            PostingCommand::Invoice(cmd) => DocRef::Invoice(cmd.invoice.id),
            PostingCommand::Payment(cmd) => DocRef::Payment(cmd.payment.id),
            PostingCommand::CreditNote(cmd) => DocRef::CreditNote(cmd.note.id),
            PostingCommand::Expense(cmd) => DocRef::Expense(cmd.expense.id),
        }
    }

    /// Key derived from the document identity, so a retried command replays
    /// instead of double-posting.
    pub fn idempotency_key(&self) -> IdempotencyKey {
        match self {
            PostingCommand::Invoice(cmd) => IdempotencyKey::derived("invoice", cmd.invoice.id),
            PostingCommand::Payment(cmd) => IdempotencyKey::derived("payment", cmd.payment.id),
            PostingCommand::CreditNote(cmd) => IdempotencyKey::derived("credit_note", cmd.note.id),
            PostingCommand::Expense(cmd) => IdempotencyKey::derived("expense", cmd.expense.id),
        }
    }

    pub fn narration(&self) -> String {
        match self {
            PostingCommand::Invoice(cmd) => format!("Invoice {}", cmd.invoice.id),
            PostingCommand::Payment(cmd) => format!("Payment {}", cmd.payment.id),
            PostingCommand::CreditNote(cmd) => format!("Credit note {}", cmd.note.id),
            PostingCommand::Expense(cmd) => format!("Expense {}", cmd.expense.id),
        }
    }

    /// Build the balanced line set for this command.
    ///
    /// Zero-amount tax components produce no line; a line never carries a
    /// zero amount.
    pub fn lines(&self) -> Result<Vec<JournalLine>, PostingError> {
        match self {
            PostingCommand::Invoice(cmd) => {
                let tax_total = cmd.tax.total()?;
                let net = cmd.invoice.total.subtract(tax_total)?;
                if net.is_negative() {
                    return Err(ledgerkit_core::DomainError::validation(
                        "tax exceeds invoice total",
                    )
                    .into());
                }

                let mut lines = vec![JournalLine::debit(cmd.receivable, cmd.invoice.total)?];
                if !net.is_zero() {
                    lines.push(JournalLine::credit(cmd.revenue, net)?);
                }
                for (account, amount) in [
                    (cmd.tax_accounts.cgst, cmd.tax.cgst),
                    (cmd.tax_accounts.sgst, cmd.tax.sgst),
                    (cmd.tax_accounts.igst, cmd.tax.igst),
                ] {
                    if !amount.is_zero() {
                        lines.push(JournalLine::credit(account, amount)?);
                    }
                }
                Ok(lines)
            }
            PostingCommand::Payment(cmd) => Ok(vec![
                JournalLine::debit(cmd.cash, cmd.payment.amount)?,
                JournalLine::credit(cmd.receivable, cmd.payment.amount)?,
            ]),
            PostingCommand::CreditNote(cmd) => Ok(vec![
                JournalLine::debit(cmd.sales_returns, cmd.note.amount)?,
                JournalLine::credit(cmd.receivable, cmd.note.amount)?,
            ]),
            PostingCommand::Expense(cmd) => Ok(vec![
                JournalLine::debit(cmd.expense_account, cmd.expense.amount)?,
                JournalLine::credit(cmd.settled_from, cmd.expense.amount)?,
            ]),
        }
    }
}

/// What funds an allocation against an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationSource {
    Payment(PaymentId),
    CreditNote(CreditNoteId),
}

impl AllocationSource {
    pub fn kind(&self) -> &'static str {
        match self {
            AllocationSource::Payment(_) => "payment",
            AllocationSource::CreditNote(_) => "credit_note",
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        match self {
            AllocationSource::Payment(id) => (*id).into(),
            AllocationSource::CreditNote(id) => (*id).into(),
        }
    }
}

/// One invoice receiving part of an allocation.
#[derive(Debug, Clone, Copy)]
pub struct AllocationTarget {
    pub invoice_id: InvoiceId,
    pub amount: Money,
}

/// Apply a payment or credit note against one or more invoices' outstanding
/// balances, atomically. Moves document balances only; the receivable was
/// already credited when the source document posted.
#[derive(Debug, Clone)]
pub struct AllocationCommand {
    pub tenant_id: TenantId,
    pub source: AllocationSource,
    pub targets: Vec<AllocationTarget>,
    /// Caller-supplied: partial allocations from the same source to the same
    /// invoice are distinct operations, so the key cannot be derived.
    pub key: IdempotencyKey,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerkit_core::{CustomerId, ExpenseId, TenantId};

    fn tax_accounts() -> TaxAccounts {
        TaxAccounts {
            cgst: AccountId::new(),
            sgst: AccountId::new(),
            igst: AccountId::new(),
        }
    }

    #[test]
    fn invoice_lines_balance_and_skip_zero_tax_components() {
        let tenant = TenantId::new();
        let invoice = Invoice::issued(
            InvoiceId::new(),
            tenant,
            CustomerId::new(),
            Money::from_cents(11_800),
        )
        .unwrap();
        let tax = TaxBreakup {
            cgst: Money::from_cents(900),
            sgst: Money::from_cents(900),
            igst: Money::ZERO,
        };
        let cmd = PostingCommand::Invoice(InvoiceIssued {
            invoice,
            tax,
            receivable: AccountId::new(),
            revenue: AccountId::new(),
            tax_accounts: tax_accounts(),
        });

        let lines = cmd.lines().unwrap();
        // Receivable + revenue + two tax components; IGST is zero, no line.
        assert_eq!(lines.len(), 4);

        let debits: i64 = lines.iter().map(|l| l.debit_amount().cents()).sum();
        let credits: i64 = lines.iter().map(|l| l.credit_amount().cents()).sum();
        assert_eq!(debits, credits);
        assert_eq!(debits, 11_800);
    }

    #[test]
    fn tax_exceeding_total_is_rejected() {
        let invoice = Invoice::issued(
            InvoiceId::new(),
            TenantId::new(),
            CustomerId::new(),
            Money::from_cents(100),
        )
        .unwrap();
        let cmd = PostingCommand::Invoice(InvoiceIssued {
            invoice,
            tax: TaxBreakup {
                cgst: Money::from_cents(200),
                sgst: Money::ZERO,
                igst: Money::ZERO,
            },
            receivable: AccountId::new(),
            revenue: AccountId::new(),
            tax_accounts: tax_accounts(),
        });
        assert!(cmd.lines().is_err());
    }

    #[test]
    fn derived_keys_are_stable_per_document() {
        let expense = Expense {
            id: ExpenseId::new(),
            tenant_id: TenantId::new(),
            vendor_id: None,
            amount: Money::from_cents(500),
        };
        let cmd = PostingCommand::Expense(ExpenseRecorded {
            expense: expense.clone(),
            expense_account: AccountId::new(),
            settled_from: AccountId::new(),
        });
        let again = PostingCommand::Expense(ExpenseRecorded {
            expense,
            expense_account: AccountId::new(),
            settled_from: AccountId::new(),
        });
        assert_eq!(cmd.idempotency_key(), again.idempotency_key());
    }
}
