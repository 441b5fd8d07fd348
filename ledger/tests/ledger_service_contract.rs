//! End-to-end scenarios over [`accounting_ledger::Ledger`], exercised
//! through the public crate surface rather than internal test modules, the
//! way an embedding application would drive it.

use std::collections::BTreeMap;
use std::sync::Arc;

use accounting_audit_log::AuditLog;
use accounting_audit_log::StorageAuditLog;
use accounting_ledger::AccountType;
use accounting_ledger::EntryState;
use accounting_ledger::JournalEntryLine;
use accounting_ledger::Ledger;
use accounting_ledger::StorageLedger;
use accounting_money::Currency;
use accounting_money::Money;
use accounting_storage::InMemoryStorage;
use accounting_storage::Storage;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

fn setup() -> StorageLedger {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let audit: Arc<dyn AuditLog> = Arc::new(StorageAuditLog::new(Arc::clone(&storage)));
    StorageLedger::new(storage, audit)
}

fn money(amount: rust_decimal::Decimal, currency: Currency) -> Money {
    Money::new(amount, currency).unwrap()
}

fn deposit_lines(amount: rust_decimal::Decimal, currency: Currency) -> Vec<JournalEntryLine> {
    vec![
        JournalEntryLine::new("cash", "cash in", money(amount, currency), Money::zero(currency)).unwrap(),
        JournalEntryLine::new(
            "customer_deposits",
            "deposit liability",
            Money::zero(currency),
            money(amount, currency),
        )
        .unwrap(),
    ]
}

#[tokio::test]
async fn balanced_deposit_creates_and_posts() {
    let ledger = setup();
    let entry = ledger
        .create_journal_entry("DEP001", "Customer deposit", deposit_lines(dec!(1000), Currency::Usd))
        .await
        .unwrap();
    assert_eq!(entry.state, EntryState::Pending);

    let posted = ledger.post_journal_entry(&entry.id).await.unwrap();
    assert_eq!(posted.state, EntryState::Posted);

    let cash = ledger
        .calculate_account_balance("cash", AccountType::Asset, Currency::Usd)
        .await
        .unwrap();
    assert_eq!(cash, money(dec!(1000), Currency::Usd));
}

#[tokio::test]
async fn unbalanced_entry_is_rejected() {
    let ledger = setup();
    let lines = vec![
        JournalEntryLine::new("cash", "", money(dec!(100), Currency::Usd), Money::zero(Currency::Usd))
            .unwrap(),
        JournalEntryLine::new(
            "revenue",
            "",
            Money::zero(Currency::Usd),
            money(dec!(40), Currency::Usd),
        )
        .unwrap(),
    ];
    assert!(ledger.create_journal_entry("BAD001", "bad", lines).await.is_err());
}

#[tokio::test]
async fn reversal_nets_to_zero_and_links_both_entries() {
    let ledger = setup();
    let entry = ledger
        .create_journal_entry("DEP001", "Customer deposit", deposit_lines(dec!(1000), Currency::Usd))
        .await
        .unwrap();
    ledger.post_journal_entry(&entry.id).await.unwrap();

    let reversal = ledger.reverse_journal_entry(&entry.id, "entered in error").await.unwrap();

    let original = ledger.get_journal_entry(&entry.id).await.unwrap().unwrap();
    assert_eq!(original.state, EntryState::Reversed);
    assert_eq!(original.reversed_by, Some(reversal.id.clone()));
    assert_eq!(reversal.reverses, Some(original.id));
    assert_eq!(reversal.state, EntryState::Posted);

    let cash = ledger
        .calculate_account_balance("cash", AccountType::Asset, Currency::Usd)
        .await
        .unwrap();
    let deposits = ledger
        .calculate_account_balance("customer_deposits", AccountType::Liability, Currency::Usd)
        .await
        .unwrap();
    assert!(cash.is_zero());
    assert!(deposits.is_zero());
}

#[tokio::test]
async fn multi_currency_entries_stay_independent() {
    let ledger = setup();
    let usd = ledger
        .create_journal_entry("USD001", "usd deposit", deposit_lines(dec!(300), Currency::Usd))
        .await
        .unwrap();
    let eur = ledger
        .create_journal_entry("EUR001", "eur deposit", deposit_lines(dec!(200), Currency::Eur))
        .await
        .unwrap();
    ledger.post_journal_entry(&usd.id).await.unwrap();
    ledger.post_journal_entry(&eur.id).await.unwrap();

    let usd_cash = ledger
        .calculate_account_balance("cash", AccountType::Asset, Currency::Usd)
        .await
        .unwrap();
    let eur_cash = ledger
        .calculate_account_balance("cash", AccountType::Asset, Currency::Eur)
        .await
        .unwrap();
    assert_eq!(usd_cash, money(dec!(300), Currency::Usd));
    assert_eq!(eur_cash, money(dec!(200), Currency::Eur));
}

#[tokio::test]
async fn trial_balance_covers_every_account_touched() {
    let ledger = setup();
    let rent = vec![
        JournalEntryLine::new("rent_expense", "", money(dec!(2000), Currency::Usd), Money::zero(Currency::Usd))
            .unwrap(),
        JournalEntryLine::new("cash", "", Money::zero(Currency::Usd), money(dec!(2000), Currency::Usd)).unwrap(),
    ];
    let entry = ledger.create_journal_entry("RENT001", "Monthly rent", rent).await.unwrap();
    ledger.post_journal_entry(&entry.id).await.unwrap();

    let mut account_types = BTreeMap::new();
    account_types.insert("cash".to_string(), AccountType::Asset);
    account_types.insert("rent_expense".to_string(), AccountType::Expense);

    let trial_balance = ledger.get_trial_balance(&account_types, Currency::Usd).await.unwrap();
    assert_eq!(trial_balance["rent_expense"], money(dec!(2000), Currency::Usd));
    assert_eq!(trial_balance["cash"], money(dec!(-2000), Currency::Usd));
}

#[tokio::test]
async fn audit_trail_survives_tampering_detection() {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let audit = Arc::new(StorageAuditLog::new(Arc::clone(&storage)));
    let ledger = StorageLedger::new(Arc::clone(&storage), Arc::clone(&audit) as Arc<dyn AuditLog>);

    let entry = ledger
        .create_journal_entry("DEP001", "Customer deposit", deposit_lines(dec!(500), Currency::Usd))
        .await
        .unwrap();
    ledger.post_journal_entry(&entry.id).await.unwrap();

    let report = audit.verify_integrity().await.unwrap();
    assert!(report.valid);
    assert_eq!(report.total_events, 2);
}
