//! [`StorageLedger`]: the sole [`Ledger`] implementation, backed by any
//! [`Storage`] (in-memory, Postgres, or tenant-scoped) plus an [`AuditLog`]
//! sharing that same storage handle.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use accounting_audit_log::AuditEventType;
use accounting_audit_log::AuditLog;
use accounting_money::Currency;
use accounting_money::Money;
use accounting_storage::Storage;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::AccountType;
use crate::EntryState;
use crate::JournalEntry;
use crate::JournalEntryLine;
use crate::Ledger;
use crate::LedgerError;
use crate::LedgerResult;

const JOURNAL_ENTRIES_TABLE: &str = "journal_entries";

/// [`accounting_storage::atomic`] is typed around `StorageResult`, which
/// can't carry [`LedgerError::Validation`]/`NotFound` without losing their
/// variant. This mirrors its begin/commit/rollback shape directly against
/// `LedgerResult` instead of forcing every ledger error through a storage
/// error and back.
async fn atomic_ledger<F, Fut, T>(storage: &dyn Storage, f: F) -> LedgerResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    storage.begin_transaction().await?;
    match f().await {
        Ok(value) => {
            storage.commit().await?;
            Ok(value)
        }
        Err(err) => {
            let _ = storage.rollback().await;
            Err(err)
        }
    }
}

pub struct StorageLedger {
    storage: Arc<dyn Storage>,
    audit: Arc<dyn AuditLog>,
}

impl StorageLedger {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, audit: Arc<dyn AuditLog>) -> Self {
        Self { storage, audit }
    }

    async fn load_entry(&self, id: &str) -> LedgerResult<JournalEntry> {
        let doc = self
            .storage
            .load(JOURNAL_ENTRIES_TABLE, id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        JournalEntry::from_document(&doc)
    }

    async fn save_entry(&self, entry: &JournalEntry) -> LedgerResult<()> {
        self.storage
            .save(JOURNAL_ENTRIES_TABLE, &entry.id, entry.to_document())
            .await?;
        Ok(())
    }

    /// Transitions a pending entry to posted, in place. Shared by
    /// `post_journal_entry` and the reversal algorithm, which posts its own
    /// freshly created reversal entry the same way.
    fn apply_post(entry: &mut JournalEntry) -> LedgerResult<()> {
        if entry.state != EntryState::Pending {
            return Err(LedgerError::Validation(format!(
                "cannot post journal entry in {} state",
                entry.state.as_str()
            )));
        }
        JournalEntry::validate_balance(&entry.lines)?;
        let now = Utc::now();
        entry.state = EntryState::Posted;
        entry.posted_at = Some(now);
        entry.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl Ledger for StorageLedger {
    async fn create_journal_entry(
        &self,
        reference: &str,
        description: &str,
        lines: Vec<JournalEntryLine>,
    ) -> LedgerResult<JournalEntry> {
        if reference.trim().is_empty() {
            return Err(LedgerError::Validation(
                "journal entry reference cannot be empty".into(),
            ));
        }
        JournalEntry::validate_balance(&lines)?;

        let now = Utc::now();
        let entry = JournalEntry {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            reference: reference.to_string(),
            description: description.to_string(),
            lines,
            state: EntryState::Pending,
            posted_at: None,
            reverses: None,
            reversed_by: None,
        };

        atomic_ledger(&*self.storage, || async {
            self.save_entry(&entry).await?;
            self.audit
                .log_event(
                    AuditEventType::JournalEntryCreated,
                    "journal_entry",
                    &entry.id,
                    metadata(&entry),
                    None,
                    None,
                )
                .await?;
            Ok(())
        })
        .await?;

        Ok(entry)
    }

    async fn post_journal_entry(&self, id: &str) -> LedgerResult<JournalEntry> {
        atomic_ledger(&*self.storage, || async {
            let mut entry = self.load_entry(id).await?;
            StorageLedger::apply_post(&mut entry)?;
            self.save_entry(&entry).await?;
            self.audit
                .log_event(
                    AuditEventType::JournalEntryPosted,
                    "journal_entry",
                    &entry.id,
                    metadata(&entry),
                    None,
                    None,
                )
                .await?;
            Ok(entry)
        })
        .await
    }

    async fn reverse_journal_entry(&self, original_id: &str, reason: &str) -> LedgerResult<JournalEntry> {
        atomic_ledger(&*self.storage, || async {
            let mut original = self.load_entry(original_id).await?;
            if original.state != EntryState::Posted {
                return Err(LedgerError::Validation(format!(
                    "cannot reverse journal entry in {} state",
                    original.state.as_str()
                )));
            }

            let reversal_lines: Vec<JournalEntryLine> =
                original.lines.iter().map(JournalEntryLine::reversed).collect();
            JournalEntry::validate_balance(&reversal_lines)?;

            let now = Utc::now();
            let mut reversal = JournalEntry {
                id: Uuid::new_v4().to_string(),
                created_at: now,
                updated_at: now,
                reference: format!("REV-{}", original.reference),
                description: reason.to_string(),
                lines: reversal_lines,
                state: EntryState::Pending,
                posted_at: None,
                reverses: Some(original.id.clone()),
                reversed_by: None,
            };

            self.save_entry(&reversal).await?;
            self.audit
                .log_event(
                    AuditEventType::JournalEntryCreated,
                    "journal_entry",
                    &reversal.id,
                    metadata(&reversal),
                    None,
                    None,
                )
                .await?;

            StorageLedger::apply_post(&mut reversal)?;
            self.save_entry(&reversal).await?;
            self.audit
                .log_event(
                    AuditEventType::JournalEntryPosted,
                    "journal_entry",
                    &reversal.id,
                    metadata(&reversal),
                    None,
                    None,
                )
                .await?;

            original.state = EntryState::Reversed;
            original.reversed_by = Some(reversal.id.clone());
            original.updated_at = now;
            self.save_entry(&original).await?;
            self.audit
                .log_event(
                    AuditEventType::JournalEntryReversed,
                    "journal_entry",
                    &original.id,
                    metadata(&original),
                    None,
                    None,
                )
                .await?;

            Ok(reversal)
        })
        .await
    }

    async fn get_journal_entry(&self, id: &str) -> LedgerResult<Option<JournalEntry>> {
        match self.storage.load(JOURNAL_ENTRIES_TABLE, id).await? {
            Some(doc) => Ok(Some(JournalEntry::from_document(&doc)?)),
            None => Ok(None),
        }
    }

    async fn get_entries_for_account(
        &self,
        account_id: &str,
        state_filter: Option<EntryState>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<JournalEntry>> {
        let docs = self.storage.load_all(JOURNAL_ENTRIES_TABLE).await?;
        let mut entries = Vec::new();
        for doc in docs {
            let entry = JournalEntry::from_document(&doc)?;
            if !entry.touches_account(account_id) {
                continue;
            }
            if let Some(state) = state_filter
                && entry.state != state
            {
                continue;
            }
            if start.is_some_and(|s| entry.created_at < s) || end.is_some_and(|e| entry.created_at > e) {
                continue;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn calculate_account_balance(
        &self,
        account_id: &str,
        account_type: AccountType,
        currency: Currency,
    ) -> LedgerResult<Money> {
        let entries = self
            .get_entries_for_account(account_id, Some(EntryState::Posted), None, None)
            .await?;

        let mut debits = Money::zero(currency);
        let mut credits = Money::zero(currency);
        for entry in &entries {
            for line in entry.lines.iter().filter(|l| l.account_id == account_id) {
                if line.currency() != currency {
                    continue;
                }
                if line.is_debit() {
                    debits = debits.add(&line.debit_amount)?;
                } else {
                    credits = credits.add(&line.credit_amount)?;
                }
            }
        }

        let balance = if account_type.is_normal_debit() {
            debits.sub(&credits)?
        } else {
            credits.sub(&debits)?
        };
        Ok(balance)
    }

    async fn get_trial_balance(
        &self,
        account_type_map: &BTreeMap<String, AccountType>,
        currency: Currency,
    ) -> LedgerResult<BTreeMap<String, Money>> {
        let mut balances = BTreeMap::new();
        for (account_id, account_type) in account_type_map {
            let balance = self
                .calculate_account_balance(account_id, *account_type, currency)
                .await?;
            balances.insert(account_id.clone(), balance);
        }
        Ok(balances)
    }
}

fn metadata(entry: &JournalEntry) -> serde_json::Map<String, serde_json::Value> {
    serde_json::json!({
        "reference": entry.reference,
        "state": entry.state.as_str(),
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}
