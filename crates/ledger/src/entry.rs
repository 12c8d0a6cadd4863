use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ledgerkit_core::{
    AccountId, CreditNoteId, DomainError, EntryId, ExpenseId, InvoiceId, Money, PaymentId, TenantId,
};

/// Reference from a journal entry to the business document that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DocRef {
    Invoice(InvoiceId),
    Payment(PaymentId),
    CreditNote(CreditNoteId),
    Expense(ExpenseId),
    /// A reversal entry references the entry it compensates.
    Entry(EntryId),
}

impl DocRef {
    pub fn kind(&self) -> &'static str {
        match self {
            DocRef::Invoice(_) => "invoice",
            DocRef::Payment(_) => "payment",
            DocRef::CreditNote(_) => "credit_note",
            DocRef::Expense(_) => "expense",
            DocRef::Entry(_) => "entry",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            DocRef::Invoice(id) => (*id).into(),
            DocRef::Payment(id) => (*id).into(),
            DocRef::CreditNote(id) => (*id).into(),
            DocRef::Expense(id) => (*id).into(),
            DocRef::Entry(id) => (*id).into(),
        }
    }

    /// Rebuild from the `(kind, id)` pair a relational store persists.
    pub fn from_kind_id(kind: &str, id: Uuid) -> Result<Self, DomainError> {
        match kind {
            "invoice" => Ok(DocRef::Invoice(id.into())),
            "payment" => Ok(DocRef::Payment(id.into())),
            "credit_note" => Ok(DocRef::CreditNote(id.into())),
            "expense" => Ok(DocRef::Expense(id.into())),
            "entry" => Ok(DocRef::Entry(id.into())),
            other => Err(DomainError::validation(format!("unknown reference kind '{other}'"))),
        }
    }
}

/// Journal entry lifecycle: `Posted -> Reversed`, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Posted,
    Reversed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Posted => "posted",
            EntryStatus::Reversed => "reversed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "posted" => Ok(EntryStatus::Posted),
            "reversed" => Ok(EntryStatus::Reversed),
            other => Err(DomainError::validation(format!("unknown entry status '{other}'"))),
        }
    }
}

/// One side of a journal entry (immutable).
///
/// Exactly one of `debit`/`credit` is non-zero, both are non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    account_id: AccountId,
    debit: Money,
    credit: Money,
}

impl JournalLine {
    pub fn debit(account_id: AccountId, amount: Money) -> Result<Self, DomainError> {
        Self::from_amounts(account_id, amount, Money::ZERO)
    }

    pub fn credit(account_id: AccountId, amount: Money) -> Result<Self, DomainError> {
        Self::from_amounts(account_id, Money::ZERO, amount)
    }

    /// Construct from raw amounts (storage rehydration); re-validates.
    pub fn from_amounts(
        account_id: AccountId,
        debit: Money,
        credit: Money,
    ) -> Result<Self, DomainError> {
        if debit.is_negative() || credit.is_negative() {
            return Err(DomainError::validation("line amounts must be non-negative"));
        }
        if debit.is_zero() == credit.is_zero() {
            return Err(DomainError::invariant(
                "a line carries a debit amount or a credit amount, never both",
            ));
        }
        Ok(Self {
            account_id,
            debit,
            credit,
        })
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn debit_amount(&self) -> Money {
        self.debit
    }

    pub fn credit_amount(&self) -> Money {
        self.credit
    }

    /// The same line with debit and credit swapped (reversal).
    pub fn swapped(&self) -> Self {
        Self {
            account_id: self.account_id,
            debit: self.credit,
            credit: self.debit,
        }
    }
}

/// An immutable, balanced journal entry.
///
/// Created once, atomically, by the posting engine. The only subsequent
/// mutation is `mark_reversed`, which records the paired reversing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    id: EntryId,
    tenant_id: TenantId,
    /// Unique per tenant, sequentially assigned. Gaps are acceptable after
    /// rollback; duplicates are not.
    entry_no: u64,
    entry_date: DateTime<Utc>,
    reference: DocRef,
    narration: String,
    status: EntryStatus,
    reversed_by: Option<EntryId>,
    lines: Vec<JournalLine>,
}

impl JournalEntry {
    /// Build a posted entry, enforcing the double-entry invariant.
    ///
    /// Σ(debit) must equal Σ(credit) to the cent; violating this is a fatal
    /// construction error, never silently truncated.
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        id: EntryId,
        tenant_id: TenantId,
        entry_no: u64,
        entry_date: DateTime<Utc>,
        reference: DocRef,
        narration: impl Into<String>,
        lines: Vec<JournalLine>,
    ) -> Result<Self, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::validation("journal entry must have lines"));
        }

        let mut debit_total: i128 = 0;
        let mut credit_total: i128 = 0;
        for line in &lines {
            debit_total += line.debit.cents() as i128;
            credit_total += line.credit.cents() as i128;
        }
        if debit_total != credit_total {
            return Err(DomainError::invariant(format!(
                "debits must equal credits: {debit_total} != {credit_total}"
            )));
        }

        Ok(Self {
            id,
            tenant_id,
            entry_no,
            entry_date,
            reference,
            narration: narration.into(),
            status: EntryStatus::Posted,
            reversed_by: None,
            lines,
        })
    }

    /// Rehydrate from storage; re-runs the construction invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn from_stored(
        id: EntryId,
        tenant_id: TenantId,
        entry_no: u64,
        entry_date: DateTime<Utc>,
        reference: DocRef,
        narration: String,
        status: EntryStatus,
        reversed_by: Option<EntryId>,
        lines: Vec<JournalLine>,
    ) -> Result<Self, DomainError> {
        let mut entry =
            Self::try_new(id, tenant_id, entry_no, entry_date, reference, narration, lines)?;
        entry.status = status;
        entry.reversed_by = reversed_by;
        Ok(entry)
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn entry_no(&self) -> u64 {
        self.entry_no
    }

    pub fn entry_date(&self) -> DateTime<Utc> {
        self.entry_date
    }

    pub fn reference(&self) -> DocRef {
        self.reference
    }

    pub fn narration(&self) -> &str {
        &self.narration
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn reversed_by(&self) -> Option<EntryId> {
        self.reversed_by
    }

    pub fn lines(&self) -> &[JournalLine] {
        &self.lines
    }

    /// Σ(debit) across all lines (== Σ(credit) by construction).
    pub fn total_debit(&self) -> Money {
        let cents: i128 = self.lines.iter().map(|l| l.debit.cents() as i128).sum();
        Money::from_cents(cents as i64)
    }

    /// Every line with debit and credit swapped, for the paired reversal entry.
    pub fn swapped_lines(&self) -> Vec<JournalLine> {
        self.lines.iter().map(JournalLine::swapped).collect()
    }

    /// `Posted -> Reversed` transition. A reversed entry cannot be reversed
    /// again.
    pub fn mark_reversed(&mut self, reversed_by: EntryId) -> Result<(), DomainError> {
        if self.status == EntryStatus::Reversed {
            return Err(DomainError::conflict(format!(
                "entry {} is already reversed",
                self.id
            )));
        }
        self.status = EntryStatus::Reversed;
        self.reversed_by = Some(reversed_by);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn account() -> AccountId {
        AccountId::new()
    }

    fn balanced_entry(amount: i64) -> JournalEntry {
        let lines = vec![
            JournalLine::debit(account(), Money::from_cents(amount)).unwrap(),
            JournalLine::credit(account(), Money::from_cents(amount)).unwrap(),
        ];
        JournalEntry::try_new(
            EntryId::new(),
            TenantId::new(),
            1,
            Utc::now(),
            DocRef::Invoice(InvoiceId::new()),
            "Test entry",
            lines,
        )
        .unwrap()
    }

    #[test]
    fn line_rejects_negative_amounts() {
        let err = JournalLine::debit(account(), Money::from_cents(-1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn line_rejects_both_sides_set_or_empty() {
        assert!(JournalLine::from_amounts(account(), Money::from_cents(10), Money::from_cents(10)).is_err());
        assert!(JournalLine::from_amounts(account(), Money::ZERO, Money::ZERO).is_err());
    }

    #[test]
    fn unbalanced_entry_is_a_fatal_construction_error() {
        let lines = vec![
            JournalLine::debit(account(), Money::from_cents(100)).unwrap(),
            JournalLine::credit(account(), Money::from_cents(99)).unwrap(),
        ];
        let err = JournalEntry::try_new(
            EntryId::new(),
            TenantId::new(),
            1,
            Utc::now(),
            DocRef::Invoice(InvoiceId::new()),
            "off by a cent",
            lines,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn empty_entry_is_rejected() {
        let err = JournalEntry::try_new(
            EntryId::new(),
            TenantId::new(),
            1,
            Utc::now(),
            DocRef::Invoice(InvoiceId::new()),
            "no lines",
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn reversal_transition_is_terminal() {
        let mut entry = balanced_entry(500);
        let reversal = EntryId::new();

        entry.mark_reversed(reversal).unwrap();
        assert_eq!(entry.status(), EntryStatus::Reversed);
        assert_eq!(entry.reversed_by(), Some(reversal));

        let err = entry.mark_reversed(EntryId::new()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn swapped_lines_flip_every_side() {
        let entry = balanced_entry(250);
        let swapped = entry.swapped_lines();
        for (orig, swap) in entry.lines().iter().zip(&swapped) {
            assert_eq!(orig.account_id(), swap.account_id());
            assert_eq!(orig.debit_amount(), swap.credit_amount());
            assert_eq!(orig.credit_amount(), swap.debit_amount());
        }
    }

    #[test]
    fn doc_ref_round_trips_through_kind_and_id() {
        let reference = DocRef::Payment(PaymentId::new());
        let rebuilt = DocRef::from_kind_id(reference.kind(), reference.id()).unwrap();
        assert_eq!(reference, rebuilt);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any generated set of matched debit/credit amounts
        /// constructs an entry whose totals agree to the cent.
        #[test]
        fn balanced_line_sets_always_construct(
            amounts in prop::collection::vec(1i64..1_000_000i64, 1..10)
        ) {
            let mut lines = Vec::new();
            for amount in &amounts {
                lines.push(JournalLine::debit(account(), Money::from_cents(*amount)).unwrap());
                lines.push(JournalLine::credit(account(), Money::from_cents(*amount)).unwrap());
            }

            let entry = JournalEntry::try_new(
                EntryId::new(),
                TenantId::new(),
                1,
                Utc::now(),
                DocRef::Expense(ExpenseId::new()),
                "generated",
                lines,
            ).unwrap();

            let total: i64 = amounts.iter().sum();
            prop_assert_eq!(entry.total_debit(), Money::from_cents(total));
        }

        /// Property: perturbing one credit line by a nonzero delta is rejected.
        #[test]
        fn perturbed_entries_never_construct(
            amount in 101i64..1_000_000i64,
            delta in 1i64..100i64,
        ) {
            let lines = vec![
                JournalLine::debit(account(), Money::from_cents(amount)).unwrap(),
                JournalLine::credit(account(), Money::from_cents(amount - delta)).unwrap(),
            ];
            let result = JournalEntry::try_new(
                EntryId::new(),
                TenantId::new(),
                1,
                Utc::now(),
                DocRef::Invoice(InvoiceId::new()),
                "generated",
                lines,
            );
            prop_assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
        }
    }
}
