//! Sub-ledger documents carrying the denormalized balances that the
//! allocation policy operates on.
//!
//! These records are maintained by the posting engine inside the same
//! transaction as the journal writes. `balance_due` / `unallocated` /
//! `balance` decrease only through allocation or reversal.

use serde::{Deserialize, Serialize};

use ledgerkit_core::{
    CreditNoteId, CustomerId, DomainError, ExpenseId, InvoiceId, Money, PaymentId, TenantId,
    VendorId,
};

/// An issued invoice and its outstanding balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub total: Money,
    /// Outstanding unpaid amount; decreases via allocation.
    pub balance_due: Money,
}

impl Invoice {
    pub fn issued(
        id: InvoiceId,
        tenant_id: TenantId,
        customer_id: CustomerId,
        total: Money,
    ) -> Result<Self, DomainError> {
        if total.is_negative() {
            return Err(DomainError::validation("invoice total must be non-negative"));
        }
        Ok(Self {
            id,
            tenant_id,
            customer_id,
            total,
            balance_due: total,
        })
    }
}

/// An inbound payment and its not-yet-allocated remainder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub amount: Money,
    /// Remainder available for future allocation against invoices.
    pub unallocated: Money,
}

impl Payment {
    pub fn received(
        id: PaymentId,
        tenant_id: TenantId,
        customer_id: CustomerId,
        amount: Money,
    ) -> Result<Self, DomainError> {
        if amount.is_negative() {
            return Err(DomainError::validation("payment amount must be non-negative"));
        }
        Ok(Self {
            id,
            tenant_id,
            customer_id,
            amount,
            unallocated: amount,
        })
    }
}

/// A credit note applied to a customer; its balance funds future allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNote {
    pub id: CreditNoteId,
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub balance: Money,
}

impl CreditNote {
    pub fn applied(
        id: CreditNoteId,
        tenant_id: TenantId,
        customer_id: CustomerId,
        amount: Money,
    ) -> Result<Self, DomainError> {
        if amount.is_negative() {
            return Err(DomainError::validation("credit note amount must be non-negative"));
        }
        Ok(Self {
            id,
            tenant_id,
            customer_id,
            amount,
            balance: amount,
        })
    }
}

/// A recorded expense, optionally payable to a vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub tenant_id: TenantId,
    pub vendor_id: Option<VendorId>,
    pub amount: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_invoice_starts_fully_outstanding() {
        let total = Money::from_cents(30_000);
        let invoice =
            Invoice::issued(InvoiceId::new(), TenantId::new(), CustomerId::new(), total).unwrap();
        assert_eq!(invoice.balance_due, total);
    }

    #[test]
    fn received_payment_starts_fully_unallocated() {
        let amount = Money::from_cents(50_000);
        let payment =
            Payment::received(PaymentId::new(), TenantId::new(), CustomerId::new(), amount)
                .unwrap();
        assert_eq!(payment.unallocated, amount);
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let bad = Money::from_cents(-1);
        assert!(Invoice::issued(InvoiceId::new(), TenantId::new(), CustomerId::new(), bad).is_err());
        assert!(Payment::received(PaymentId::new(), TenantId::new(), CustomerId::new(), bad).is_err());
        assert!(
            CreditNote::applied(CreditNoteId::new(), TenantId::new(), CustomerId::new(), bad)
                .is_err()
        );
    }
}
