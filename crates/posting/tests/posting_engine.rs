//! End-to-end posting engine behavior over the in-memory store, plus one
//! run against SQLite to confirm the engine is backend-agnostic.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ledgerkit_core::{
    AccountId, CustomerId, ExpenseId, IdempotencyKey, InvoiceId, Money, PaymentId, RequestContext,
    TaxBreakup, TenantId,
};
use ledgerkit_events::EventEmitter;
use ledgerkit_ledger::{
    Account, AccountKind, CreditNote, EntryStatus, Expense, Invoice, Payment,
};
use ledgerkit_posting::{
    ALLOCATION_APPLIED, AllocationCommand, AllocationSource, AllocationTarget, CreditNoteIssued,
    ENTRY_POSTED, ENTRY_REVERSED, ExpenseRecorded, InvoiceIssued, PaymentReceived, PostingCommand,
    PostingEngine, PostingError, TaxAccounts,
};
use ledgerkit_store::{LedgerStore, MemoryStore, SqliteStore, StoreError, run_in_tx};

struct Chart {
    cash: AccountId,
    receivable: AccountId,
    revenue: AccountId,
    sales_returns: AccountId,
    tax: TaxAccounts,
    office_expense: AccountId,
}

struct Fixture {
    engine: PostingEngine,
    store: Arc<dyn LedgerStore>,
    tenant: TenantId,
    ctx: RequestContext,
    chart: Chart,
}

fn seed_account(
    store: &dyn LedgerStore,
    tenant: TenantId,
    code: &str,
    name: &str,
    kind: AccountKind,
) -> AccountId {
    let account = Account::new(tenant, code, name, kind).unwrap();
    let id = account.id;
    run_in_tx::<_, StoreError, _>(store, |tx| tx.insert_account(&account)).unwrap();
    id
}

fn fixture_on(store: Arc<dyn LedgerStore>) -> Fixture {
    let tenant = TenantId::new();
    let chart = Chart {
        cash: seed_account(store.as_ref(), tenant, "1000", "Cash", AccountKind::Asset),
        receivable: seed_account(
            store.as_ref(),
            tenant,
            "1200",
            "Accounts Receivable",
            AccountKind::Asset,
        ),
        revenue: seed_account(store.as_ref(), tenant, "4000", "Sales", AccountKind::Income),
        sales_returns: seed_account(
            store.as_ref(),
            tenant,
            "4100",
            "Sales Returns",
            AccountKind::Income,
        ),
        tax: TaxAccounts {
            cgst: seed_account(store.as_ref(), tenant, "2310", "CGST Payable", AccountKind::Liability),
            sgst: seed_account(store.as_ref(), tenant, "2320", "SGST Payable", AccountKind::Liability),
            igst: seed_account(store.as_ref(), tenant, "2330", "IGST Payable", AccountKind::Liability),
        },
        office_expense: seed_account(
            store.as_ref(),
            tenant,
            "5100",
            "Office Expenses",
            AccountKind::Expense,
        ),
    };
    let engine = PostingEngine::new(Arc::clone(&store), Arc::new(EventEmitter::new()));
    Fixture {
        engine,
        store,
        tenant,
        ctx: RequestContext::system(tenant),
        chart,
    }
}

fn fixture() -> Fixture {
    fixture_on(Arc::new(MemoryStore::new()))
}

fn invoice_command(fx: &Fixture, customer: CustomerId, gross: i64, tax: TaxBreakup) -> PostingCommand {
    let invoice = Invoice::issued(
        InvoiceId::new(),
        fx.tenant,
        customer,
        Money::from_cents(gross),
    )
    .unwrap();
    PostingCommand::Invoice(InvoiceIssued {
        invoice,
        tax,
        receivable: fx.chart.receivable,
        revenue: fx.chart.revenue,
        tax_accounts: fx.chart.tax,
    })
}

fn payment_command(fx: &Fixture, customer: CustomerId, cents: i64) -> PostingCommand {
    let payment =
        Payment::received(PaymentId::new(), fx.tenant, customer, Money::from_cents(cents)).unwrap();
    PostingCommand::Payment(PaymentReceived {
        payment,
        cash: fx.chart.cash,
        receivable: fx.chart.receivable,
    })
}

fn allocation(
    fx: &Fixture,
    source: AllocationSource,
    targets: &[(InvoiceId, i64)],
    key: &str,
) -> AllocationCommand {
    AllocationCommand {
        tenant_id: fx.tenant,
        source,
        targets: targets
            .iter()
            .map(|&(invoice_id, cents)| AllocationTarget {
                invoice_id,
                amount: Money::from_cents(cents),
            })
            .collect(),
        key: IdempotencyKey::new(key).unwrap(),
    }
}

fn account_balance(fx: &Fixture, id: AccountId) -> Money {
    run_in_tx::<_, StoreError, _>(fx.store.as_ref(), |tx| {
        Ok(tx.account(fx.tenant, id)?.unwrap().balance)
    })
    .unwrap()
}

fn customer_balance(fx: &Fixture, id: CustomerId) -> Money {
    run_in_tx::<_, StoreError, _>(fx.store.as_ref(), |tx| tx.customer_balance(fx.tenant, id))
        .unwrap()
}

#[test]
fn posting_an_invoice_moves_every_ledger_surface_at_once() {
    let fx = fixture();
    let customer = CustomerId::new();
    let tax = TaxBreakup {
        cgst: Money::from_cents(900),
        sgst: Money::from_cents(900),
        igst: Money::ZERO,
    };
    let command = invoice_command(&fx, customer, 11_800, tax);

    let outcome = fx.engine.post(&fx.ctx, &command).unwrap();
    assert!(!outcome.replayed);
    assert_eq!(outcome.entry.entry_no(), 1);
    assert_eq!(outcome.entry.total_debit(), Money::from_cents(11_800));

    // Cached balances: debit raises AR, credits push revenue and tax negative.
    assert_eq!(account_balance(&fx, fx.chart.receivable), Money::from_cents(11_800));
    assert_eq!(account_balance(&fx, fx.chart.revenue), Money::from_cents(-10_000));
    assert_eq!(account_balance(&fx, fx.chart.tax.cgst), Money::from_cents(-900));
    assert_eq!(account_balance(&fx, fx.chart.tax.sgst), Money::from_cents(-900));
    assert_eq!(account_balance(&fx, fx.chart.tax.igst), Money::ZERO);

    // Counterpart running balance.
    assert_eq!(customer_balance(&fx, customer), Money::from_cents(11_800));

    // Cached balance agrees with the recomputed one.
    let audit = fx.engine.verify_account(&fx.ctx, fx.tenant, fx.chart.receivable).unwrap();
    assert!(audit.consistent());
}

#[test]
fn replaying_a_command_returns_the_stored_entry_without_posting_again() {
    let fx = fixture();
    let customer = CustomerId::new();
    let command = invoice_command(&fx, customer, 5_000, TaxBreakup::ZERO);

    let first = fx.engine.post(&fx.ctx, &command).unwrap();
    let second = fx.engine.post(&fx.ctx, &command).unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.entry.id(), second.entry.id());

    // No doubled effects anywhere.
    assert_eq!(account_balance(&fx, fx.chart.receivable), Money::from_cents(5_000));
    assert_eq!(customer_balance(&fx, customer), Money::from_cents(5_000));
}

#[test]
fn replay_does_not_emit_a_second_event() {
    let fx = fixture();
    let posted = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&posted);
    fx.engine.emitter().on_event(ENTRY_POSTED, move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    let command = invoice_command(&fx, CustomerId::new(), 1_000, TaxBreakup::ZERO);
    fx.engine.post(&fx.ctx, &command).unwrap();
    fx.engine.post(&fx.ctx, &command).unwrap();

    assert_eq!(posted.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_posting_emits_nothing_and_frees_the_idempotency_key() {
    let fx = fixture();
    let posted = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&posted);
    fx.engine.emitter().on_event(ENTRY_POSTED, move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    // Unknown cash account makes the payment command fail after the
    // receivable check would pass.
    let customer = CustomerId::new();
    let payment =
        Payment::received(PaymentId::new(), fx.tenant, customer, Money::from_cents(500)).unwrap();
    let broken = PostingCommand::Payment(PaymentReceived {
        payment: payment.clone(),
        cash: AccountId::new(),
        receivable: fx.chart.receivable,
    });
    assert!(fx.engine.post(&fx.ctx, &broken).is_err());
    assert_eq!(posted.load(Ordering::SeqCst), 0);
    assert_eq!(customer_balance(&fx, customer), Money::ZERO);

    // The same document posts fine once corrected: the failed attempt did
    // not burn its idempotency key.
    let fixed = PostingCommand::Payment(PaymentReceived {
        payment,
        cash: fx.chart.cash,
        receivable: fx.chart.receivable,
    });
    let outcome = fx.engine.post(&fx.ctx, &fixed).unwrap();
    assert!(!outcome.replayed);
    assert_eq!(posted.load(Ordering::SeqCst), 1);
}

#[test]
fn posting_to_an_inactive_account_is_rejected() {
    let fx = fixture();
    let dormant = Account {
        active: false,
        ..Account::new(fx.tenant, "1999", "Dormant", AccountKind::Asset).unwrap()
    };
    run_in_tx::<_, StoreError, _>(fx.store.as_ref(), |tx| tx.insert_account(&dormant)).unwrap();

    let customer = CustomerId::new();
    let payment =
        Payment::received(PaymentId::new(), fx.tenant, customer, Money::from_cents(500)).unwrap();
    let command = PostingCommand::Payment(PaymentReceived {
        payment,
        cash: dormant.id,
        receivable: fx.chart.receivable,
    });

    let err = fx.engine.post(&fx.ctx, &command).unwrap_err();
    assert!(matches!(err, PostingError::InactiveAccount(id) if id == dormant.id));
}

#[test]
fn a_payment_spreads_across_invoices_in_one_allocation() {
    let fx = fixture();
    let customer = CustomerId::new();

    // 500.00 against two invoices of 300.00 each, split 300.00 / 200.00.
    let inv_a = invoice_command(&fx, customer, 30_000, TaxBreakup::ZERO);
    let inv_b = invoice_command(&fx, customer, 30_000, TaxBreakup::ZERO);
    let pay = payment_command(&fx, customer, 50_000);
    fx.engine.post(&fx.ctx, &inv_a).unwrap();
    fx.engine.post(&fx.ctx, &inv_b).unwrap();
    fx.engine.post(&fx.ctx, &pay).unwrap();

    let (invoice_a, invoice_b, payment_id) = match (&inv_a, &inv_b, &pay) {
        (
            PostingCommand::Invoice(a),
            PostingCommand::Invoice(b),
            PostingCommand::Payment(p),
        ) => (a.invoice.id, b.invoice.id, p.payment.id),
        _ => unreachable!(),
    };

    let applied = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&applied);
    fx.engine.emitter().on_event(ALLOCATION_APPLIED, move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = fx
        .engine
        .allocate(
            &fx.ctx,
            &allocation(
                &fx,
                AllocationSource::Payment(payment_id),
                &[(invoice_a, 30_000), (invoice_b, 20_000)],
                "alloc-1",
            ),
        )
        .unwrap();
    assert_eq!(
        outcome.invoice_balances,
        vec![
            (invoice_a, Money::ZERO),
            (invoice_b, Money::from_cents(10_000)),
        ],
    );
    assert_eq!(outcome.source_remaining, Money::ZERO);
    // One batch, one event.
    assert_eq!(applied.load(Ordering::SeqCst), 1);

    // The payment is spent; one more cent is an over-allocation.
    let err = fx
        .engine
        .allocate(
            &fx.ctx,
            &allocation(&fx, AllocationSource::Payment(payment_id), &[(invoice_b, 1)], "alloc-2"),
        )
        .unwrap_err();
    assert!(matches!(err, PostingError::OverAllocation { .. }));
    assert_eq!(applied.load(Ordering::SeqCst), 1);
}

#[test]
fn an_over_allocated_target_fails_the_whole_batch() {
    let fx = fixture();
    let customer = CustomerId::new();
    let inv_a = invoice_command(&fx, customer, 10_000, TaxBreakup::ZERO);
    let inv_b = invoice_command(&fx, customer, 2_000, TaxBreakup::ZERO);
    let pay = payment_command(&fx, customer, 20_000);
    fx.engine.post(&fx.ctx, &inv_a).unwrap();
    fx.engine.post(&fx.ctx, &inv_b).unwrap();
    fx.engine.post(&fx.ctx, &pay).unwrap();

    let (invoice_a, invoice_b, payment_id) = match (&inv_a, &inv_b, &pay) {
        (
            PostingCommand::Invoice(a),
            PostingCommand::Invoice(b),
            PostingCommand::Payment(p),
        ) => (a.invoice.id, b.invoice.id, p.payment.id),
        _ => unreachable!(),
    };

    // Second target exceeds its balance due; first target must roll back.
    let err = fx
        .engine
        .allocate(
            &fx.ctx,
            &allocation(
                &fx,
                AllocationSource::Payment(payment_id),
                &[(invoice_a, 10_000), (invoice_b, 5_000)],
                "overshoot",
            ),
        )
        .unwrap_err();
    assert!(matches!(err, PostingError::OverAllocation { .. }));

    let balance = run_in_tx::<_, StoreError, _>(fx.store.as_ref(), |tx| {
        Ok(tx.invoice(fx.tenant, invoice_a)?.unwrap().balance_due)
    })
    .unwrap();
    assert_eq!(balance, Money::from_cents(10_000));
}

#[test]
fn replayed_allocation_reports_current_state_without_moving_balances() {
    let fx = fixture();
    let customer = CustomerId::new();
    let inv = invoice_command(&fx, customer, 10_000, TaxBreakup::ZERO);
    let pay = payment_command(&fx, customer, 10_000);
    fx.engine.post(&fx.ctx, &inv).unwrap();
    fx.engine.post(&fx.ctx, &pay).unwrap();

    let (invoice_id, payment_id) = match (&inv, &pay) {
        (PostingCommand::Invoice(a), PostingCommand::Payment(p)) => (a.invoice.id, p.payment.id),
        _ => unreachable!(),
    };

    let command = allocation(
        &fx,
        AllocationSource::Payment(payment_id),
        &[(invoice_id, 4_000)],
        "alloc-retry",
    );

    let first = fx.engine.allocate(&fx.ctx, &command).unwrap();
    let second = fx.engine.allocate(&fx.ctx, &command).unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.invoice_balances, vec![(invoice_id, Money::from_cents(6_000))]);
    assert_eq!(second.source_remaining, Money::from_cents(6_000));
}

#[test]
fn credit_notes_fund_allocations_like_payments() {
    let fx = fixture();
    let customer = CustomerId::new();
    let inv = invoice_command(&fx, customer, 8_000, TaxBreakup::ZERO);
    fx.engine.post(&fx.ctx, &inv).unwrap();

    let note = CreditNote::applied(
        ledgerkit_core::CreditNoteId::new(),
        fx.tenant,
        customer,
        Money::from_cents(3_000),
    )
    .unwrap();
    let note_id = note.id;
    fx.engine
        .post(
            &fx.ctx,
            &PostingCommand::CreditNote(CreditNoteIssued {
                note,
                sales_returns: fx.chart.sales_returns,
                receivable: fx.chart.receivable,
            }),
        )
        .unwrap();

    let invoice_id = match &inv {
        PostingCommand::Invoice(a) => a.invoice.id,
        _ => unreachable!(),
    };
    let outcome = fx
        .engine
        .allocate(
            &fx.ctx,
            &allocation(
                &fx,
                AllocationSource::CreditNote(note_id),
                &[(invoice_id, 3_000)],
                "note-alloc",
            ),
        )
        .unwrap();
    assert_eq!(outcome.invoice_balances, vec![(invoice_id, Money::from_cents(5_000))]);
    assert_eq!(outcome.source_remaining, Money::ZERO);

    // Issue + note netted: receivable carries the open remainder.
    assert_eq!(customer_balance(&fx, customer), Money::from_cents(5_000));
}

#[test]
fn reversal_posts_a_paired_entry_and_restores_balances() {
    let fx = fixture();
    let customer = CustomerId::new();
    let command = invoice_command(&fx, customer, 11_800, TaxBreakup {
        cgst: Money::from_cents(900),
        sgst: Money::from_cents(900),
        igst: Money::ZERO,
    });
    let posted = fx.engine.post(&fx.ctx, &command).unwrap();

    let reversed = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&reversed);
    fx.engine.emitter().on_event(ENTRY_REVERSED, move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = fx.engine.reverse(&fx.ctx, fx.tenant, posted.entry.id()).unwrap();
    assert!(!outcome.replayed);
    assert_eq!(outcome.reversal.entry_no(), 2);
    assert_eq!(reversed.load(Ordering::SeqCst), 1);

    // Every surface back to zero.
    assert_eq!(account_balance(&fx, fx.chart.receivable), Money::ZERO);
    assert_eq!(account_balance(&fx, fx.chart.revenue), Money::ZERO);
    assert_eq!(account_balance(&fx, fx.chart.tax.cgst), Money::ZERO);
    assert_eq!(customer_balance(&fx, customer), Money::ZERO);

    // Original transitioned, pair recorded.
    let original = run_in_tx::<_, StoreError, _>(fx.store.as_ref(), |tx| {
        Ok(tx.entry(fx.tenant, posted.entry.id())?.unwrap())
    })
    .unwrap();
    assert_eq!(original.status(), EntryStatus::Reversed);
    assert_eq!(original.reversed_by(), Some(outcome.reversal.id()));

    // A second reversal request replays rather than double-posting.
    let again = fx.engine.reverse(&fx.ctx, fx.tenant, posted.entry.id()).unwrap();
    assert!(again.replayed);
    assert_eq!(again.reversal.id(), outcome.reversal.id());
    assert_eq!(reversed.load(Ordering::SeqCst), 1);
}

#[test]
fn a_reversal_entry_cannot_be_reversed() {
    let fx = fixture();
    let command = invoice_command(&fx, CustomerId::new(), 2_000, TaxBreakup::ZERO);
    let posted = fx.engine.post(&fx.ctx, &command).unwrap();
    let reversal = fx.engine.reverse(&fx.ctx, fx.tenant, posted.entry.id()).unwrap();

    let err = fx
        .engine
        .reverse(&fx.ctx, fx.tenant, reversal.reversal.id())
        .unwrap_err();
    assert!(matches!(err, PostingError::Domain(_)));
}

#[test]
fn a_partially_allocated_payment_cannot_be_reversed() {
    let fx = fixture();
    let customer = CustomerId::new();
    let inv = invoice_command(&fx, customer, 10_000, TaxBreakup::ZERO);
    let pay = payment_command(&fx, customer, 10_000);
    fx.engine.post(&fx.ctx, &inv).unwrap();
    let payment_posted = fx.engine.post(&fx.ctx, &pay).unwrap();

    let (invoice_id, payment_id) = match (&inv, &pay) {
        (PostingCommand::Invoice(a), PostingCommand::Payment(p)) => (a.invoice.id, p.payment.id),
        _ => unreachable!(),
    };
    fx.engine
        .allocate(
            &fx.ctx,
            &allocation(
                &fx,
                AllocationSource::Payment(payment_id),
                &[(invoice_id, 2_500)],
                "partial",
            ),
        )
        .unwrap();

    let err = fx
        .engine
        .reverse(&fx.ctx, fx.tenant, payment_posted.entry.id())
        .unwrap_err();
    assert!(matches!(err, PostingError::Domain(_)));
}

#[test]
fn expense_posting_tracks_the_vendor_payable() {
    let fx = fixture();
    let vendor = ledgerkit_core::VendorId::new();
    let payable = seed_account(
        fx.store.as_ref(),
        fx.tenant,
        "2100",
        "Accounts Payable",
        AccountKind::Liability,
    );

    let expense = Expense {
        id: ExpenseId::new(),
        tenant_id: fx.tenant,
        vendor_id: Some(vendor),
        amount: Money::from_cents(7_500),
    };
    let command = PostingCommand::Expense(ExpenseRecorded {
        expense,
        expense_account: fx.chart.office_expense,
        settled_from: payable,
    });
    let posted = fx.engine.post(&fx.ctx, &command).unwrap();

    let owed = run_in_tx::<_, StoreError, _>(fx.store.as_ref(), |tx| {
        tx.vendor_balance(fx.tenant, vendor)
    })
    .unwrap();
    assert_eq!(owed, Money::from_cents(7_500));

    fx.engine.reverse(&fx.ctx, fx.tenant, posted.entry.id()).unwrap();
    let owed = run_in_tx::<_, StoreError, _>(fx.store.as_ref(), |tx| {
        tx.vendor_balance(fx.tenant, vendor)
    })
    .unwrap();
    assert_eq!(owed, Money::ZERO);
}

#[test]
fn composed_workflow_commits_atomically_and_emits_after_commit() {
    let fx = fixture();
    let customer = CustomerId::new();
    let inv = invoice_command(&fx, customer, 6_000, TaxBreakup::ZERO);
    let pay = payment_command(&fx, customer, 6_000);
    let (invoice_id, payment_id) = match (&inv, &pay) {
        (PostingCommand::Invoice(a), PostingCommand::Payment(p)) => (a.invoice.id, p.payment.id),
        _ => unreachable!(),
    };

    let events_seen = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&events_seen);
    fx.engine.emitter().on_event(ENTRY_POSTED, move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    // Invoice, payment, and full settlement as one scope.
    let outcome = fx
        .engine
        .with_scope(|tx, pending| {
            fx.engine.post_in(&fx.ctx, tx, &inv, pending)?;
            fx.engine.post_in(&fx.ctx, tx, &pay, pending)?;
            fx.engine.allocate_in(
                &fx.ctx,
                tx,
                &allocation(
                    &fx,
                    AllocationSource::Payment(payment_id),
                    &[(invoice_id, 6_000)],
                    "settle",
                ),
                pending,
            )
        })
        .unwrap();

    assert_eq!(outcome.invoice_balances, vec![(invoice_id, Money::ZERO)]);
    assert_eq!(events_seen.load(Ordering::SeqCst), 2);
    assert_eq!(customer_balance(&fx, customer), Money::ZERO);
    assert_eq!(account_balance(&fx, fx.chart.cash), Money::from_cents(6_000));
}

#[test]
fn composed_workflow_failure_rolls_back_every_step() {
    let fx = fixture();
    let customer = CustomerId::new();
    let inv = invoice_command(&fx, customer, 6_000, TaxBreakup::ZERO);
    let invoice_id = match &inv {
        PostingCommand::Invoice(a) => a.invoice.id,
        _ => unreachable!(),
    };

    // Second step allocates from a payment that does not exist.
    let result = fx.engine.with_scope(|tx, pending| {
        fx.engine.post_in(&fx.ctx, tx, &inv, pending)?;
        fx.engine.allocate_in(
            &fx.ctx,
            tx,
            &allocation(
                &fx,
                AllocationSource::Payment(PaymentId::new()),
                &[(invoice_id, 6_000)],
                "ghost",
            ),
            pending,
        )
    });
    assert!(result.is_err());

    // The invoice posting from step one is gone with the scope.
    assert_eq!(account_balance(&fx, fx.chart.receivable), Money::ZERO);
    assert_eq!(customer_balance(&fx, customer), Money::ZERO);
    let stored = run_in_tx::<_, StoreError, _>(fx.store.as_ref(), |tx| {
        tx.invoice(fx.tenant, invoice_id)
    })
    .unwrap();
    assert!(stored.is_none());
}

#[test]
fn entry_numbers_stay_unique_under_concurrent_posting() {
    let fx = Arc::new(fixture());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let fx = Arc::clone(&fx);
        handles.push(std::thread::spawn(move || {
            let command = payment_command(&fx, CustomerId::new(), 1_000);
            fx.engine.post(&fx.ctx, &command).unwrap().entry.entry_no()
        }));
    }

    let mut numbers: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    numbers.sort_unstable();
    numbers.dedup();
    assert_eq!(numbers.len(), 8);
}

#[test]
fn the_engine_behaves_identically_on_sqlite() {
    let fx = fixture_on(Arc::new(SqliteStore::in_memory().unwrap()));
    let customer = CustomerId::new();
    let inv = invoice_command(&fx, customer, 10_000, TaxBreakup::ZERO);
    let pay = payment_command(&fx, customer, 10_000);
    let (invoice_id, payment_id) = match (&inv, &pay) {
        (PostingCommand::Invoice(a), PostingCommand::Payment(p)) => (a.invoice.id, p.payment.id),
        _ => unreachable!(),
    };

    fx.engine.post(&fx.ctx, &inv).unwrap();
    let replay = fx.engine.post(&fx.ctx, &inv).unwrap();
    assert!(replay.replayed);

    fx.engine.post(&fx.ctx, &pay).unwrap();
    let settled = fx
        .engine
        .allocate(
            &fx.ctx,
            &allocation(
                &fx,
                AllocationSource::Payment(payment_id),
                &[(invoice_id, 10_000)],
                "sqlite-settle",
            ),
        )
        .unwrap();
    assert_eq!(settled.invoice_balances, vec![(invoice_id, Money::ZERO)]);

    let audit = fx.engine.verify_account(&fx.ctx, fx.tenant, fx.chart.receivable).unwrap();
    assert!(audit.consistent());
    assert_eq!(audit.derived, Money::ZERO);
}
