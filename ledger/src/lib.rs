#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Double-entry journal entries: creation under the balanced-posting
//! invariant, posting, reversal, and balance computation.
//!
//! Every operation that mutates a [`JournalEntry`] runs inside a single
//! storage transaction spanning both the entry's own row and the
//! [`accounting_audit_log::AuditLog`] event it emits, so a failure at either
//! step leaves neither behind.

mod memory;

pub use memory::StorageLedger;

use std::collections::BTreeMap;
use std::collections::HashMap;

use accounting_audit_log::AuditLogError;
use accounting_money::Currency;
use accounting_money::Money;
use accounting_money::MoneyError;
use accounting_storage::Document;
use accounting_storage::StorageError;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

pub type EntryId = String;
pub type AccountId = String;
pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("journal entry not found: {0}")]
    NotFound(String),
    #[error("money error: {0}")]
    Money(#[from] MoneyError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("audit log error: {0}")]
    Audit(#[from] AuditLogError),
}

/// An account's normal balance side, fixed by its type. Balance computation
/// reads debits as increases on [`AccountType::Asset`]/[`AccountType::Expense`]
/// and credits as increases on the other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    #[must_use]
    pub fn is_normal_debit(self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Posted,
    Reversed,
}

impl EntryState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Posted => "posted",
            EntryState::Reversed => "reversed",
        }
    }

    pub fn parse(value: &str) -> LedgerResult<Self> {
        match value {
            "pending" => Ok(EntryState::Pending),
            "posted" => Ok(EntryState::Posted),
            "reversed" => Ok(EntryState::Reversed),
            other => Err(LedgerError::Validation(format!(
                "unknown journal entry state: {other}"
            ))),
        }
    }
}

/// One side of a balanced posting. Exactly one of `debit_amount`/
/// `credit_amount` is non-zero; both share a currency.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntryLine {
    pub account_id: AccountId,
    pub description: String,
    pub debit_amount: Money,
    pub credit_amount: Money,
}

impl JournalEntryLine {
    pub fn new(
        account_id: impl Into<AccountId>,
        description: impl Into<String>,
        debit_amount: Money,
        credit_amount: Money,
    ) -> LedgerResult<Self> {
        if debit_amount.currency() != credit_amount.currency() {
            return Err(LedgerError::Validation(
                "debit and credit amounts on a line must share a currency".into(),
            ));
        }
        let is_debit = !debit_amount.is_zero();
        let is_credit = !credit_amount.is_zero();
        if is_debit == is_credit {
            return Err(LedgerError::Validation(
                "a line must have exactly one of a debit or credit amount".into(),
            ));
        }
        if debit_amount.is_negative() || credit_amount.is_negative() {
            return Err(LedgerError::Validation(
                "debit and credit amounts must not be negative".into(),
            ));
        }
        Ok(JournalEntryLine {
            account_id: account_id.into(),
            description: description.into(),
            debit_amount,
            credit_amount,
        })
    }

    #[must_use]
    pub fn is_debit(&self) -> bool {
        !self.debit_amount.is_zero()
    }

    #[must_use]
    pub fn is_credit(&self) -> bool {
        !self.credit_amount.is_zero()
    }

    #[must_use]
    pub fn currency(&self) -> Currency {
        self.debit_amount.currency()
    }

    /// The swapped counterpart used when building a reversal: debit becomes
    /// credit and vice versa, on the same account.
    #[must_use]
    fn reversed(&self) -> JournalEntryLine {
        JournalEntryLine {
            account_id: self.account_id.clone(),
            description: self.description.clone(),
            debit_amount: self.credit_amount,
            credit_amount: self.debit_amount,
        }
    }

    fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "account_id": self.account_id,
            "description": self.description,
            "debit_amount": self.debit_amount,
            "credit_amount": self.credit_amount,
        })
    }

    fn from_value(value: &serde_json::Value) -> LedgerResult<Self> {
        let account_id = value
            .get("account_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LedgerError::Validation("line missing account_id".into()))?
            .to_string();
        let description = value
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let debit_amount: Money = serde_json::from_value(
            value
                .get("debit_amount")
                .cloned()
                .ok_or_else(|| LedgerError::Validation("line missing debit_amount".into()))?,
        )
        .map_err(|e| LedgerError::Validation(e.to_string()))?;
        let credit_amount: Money = serde_json::from_value(
            value
                .get("credit_amount")
                .cloned()
                .ok_or_else(|| LedgerError::Validation("line missing credit_amount".into()))?,
        )
        .map_err(|e| LedgerError::Validation(e.to_string()))?;
        Ok(JournalEntryLine {
            account_id,
            description,
            debit_amount,
            credit_amount,
        })
    }
}

/// A double-entry journal entry: an ordered, non-empty set of lines that
/// must balance independently per currency.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub id: EntryId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reference: String,
    pub description: String,
    pub lines: Vec<JournalEntryLine>,
    pub state: EntryState,
    pub posted_at: Option<DateTime<Utc>>,
    pub reverses: Option<EntryId>,
    pub reversed_by: Option<EntryId>,
}

impl JournalEntry {
    /// Sums debits and credits per currency and checks every currency nets
    /// to zero. An entry with no lines, or with a currency whose debits and
    /// credits don't match, is rejected.
    pub fn validate_balance(lines: &[JournalEntryLine]) -> LedgerResult<()> {
        if lines.is_empty() {
            return Err(LedgerError::Validation(
                "a journal entry must have at least one line".into(),
            ));
        }
        let mut totals: HashMap<Currency, (Money, Money)> = HashMap::new();
        for line in lines {
            let currency = line.currency();
            let entry = totals
                .entry(currency)
                .or_insert_with(|| (Money::zero(currency), Money::zero(currency)));
            entry.0 = entry.0.add(&line.debit_amount)?;
            entry.1 = entry.1.add(&line.credit_amount)?;
        }
        for (currency, (debits, credits)) in &totals {
            if debits != credits {
                return Err(LedgerError::Validation(format!(
                    "journal entry does not balance in {currency}: debits {debits} vs credits {credits}"
                )));
            }
        }
        Ok(())
    }

    fn to_document(&self) -> Document {
        let mut doc = serde_json::Map::new();
        doc.insert("id".into(), self.id.clone().into());
        doc.insert("created_at".into(), self.created_at.to_rfc3339().into());
        doc.insert("updated_at".into(), self.updated_at.to_rfc3339().into());
        doc.insert("reference".into(), self.reference.clone().into());
        doc.insert("description".into(), self.description.clone().into());
        doc.insert("state".into(), self.state.as_str().into());
        doc.insert(
            "posted_at".into(),
            self.posted_at.map(|t| t.to_rfc3339()).into(),
        );
        doc.insert("reverses".into(), self.reverses.clone().into());
        doc.insert("reversed_by".into(), self.reversed_by.clone().into());
        doc.insert(
            "lines".into(),
            serde_json::Value::Array(self.lines.iter().map(JournalEntryLine::to_value).collect()),
        );
        doc
    }

    fn from_document(doc: &Document) -> LedgerResult<Self> {
        let get_str = |key: &str| -> LedgerResult<String> {
            doc.get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| LedgerError::Validation(format!("missing field {key}")))
        };
        let parse_time = |text: &str| -> LedgerResult<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| LedgerError::Validation(e.to_string()))
        };

        let created_at = parse_time(&get_str("created_at")?)?;
        let updated_at = parse_time(&get_str("updated_at")?)?;
        let posted_at = match doc.get("posted_at").and_then(|v| v.as_str()) {
            Some(text) => Some(parse_time(text)?),
            None => None,
        };
        let lines = doc
            .get("lines")
            .and_then(|v| v.as_array())
            .ok_or_else(|| LedgerError::Validation("missing field lines".into()))?
            .iter()
            .map(JournalEntryLine::from_value)
            .collect::<LedgerResult<Vec<_>>>()?;

        Ok(JournalEntry {
            id: get_str("id")?,
            created_at,
            updated_at,
            reference: get_str("reference")?,
            description: doc
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            lines,
            state: EntryState::parse(&get_str("state")?)?,
            posted_at,
            reverses: doc.get("reverses").and_then(|v| v.as_str()).map(str::to_string),
            reversed_by: doc.get("reversed_by").and_then(|v| v.as_str()).map(str::to_string),
        })
    }

    /// Whether this entry has at least one line on `account_id`.
    #[must_use]
    pub fn touches_account(&self, account_id: &str) -> bool {
        self.lines.iter().any(|line| line.account_id == account_id)
    }
}

/// Create, post, and reverse journal entries; compute balances.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn create_journal_entry(
        &self,
        reference: &str,
        description: &str,
        lines: Vec<JournalEntryLine>,
    ) -> LedgerResult<JournalEntry>;

    async fn post_journal_entry(&self, id: &str) -> LedgerResult<JournalEntry>;

    async fn reverse_journal_entry(&self, original_id: &str, reason: &str) -> LedgerResult<JournalEntry>;

    async fn get_journal_entry(&self, id: &str) -> LedgerResult<Option<JournalEntry>>;

    async fn get_entries_for_account(
        &self,
        account_id: &str,
        state_filter: Option<EntryState>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<JournalEntry>>;

    async fn calculate_account_balance(
        &self,
        account_id: &str,
        account_type: AccountType,
        currency: Currency,
    ) -> LedgerResult<Money>;

    async fn get_trial_balance(
        &self,
        account_type_map: &BTreeMap<AccountId, AccountType>,
        currency: Currency,
    ) -> LedgerResult<BTreeMap<AccountId, Money>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn money(amount: rust_decimal::Decimal, currency: Currency) -> Money {
        Money::new(amount, currency).unwrap()
    }

    fn line(
        account: &str,
        debit: rust_decimal::Decimal,
        credit: rust_decimal::Decimal,
        currency: Currency,
    ) -> JournalEntryLine {
        JournalEntryLine::new(account, "", money(debit, currency), money(credit, currency)).unwrap()
    }

    #[test]
    fn line_requires_exactly_one_side() {
        let err = JournalEntryLine::new(
            "cash",
            "",
            money(dec!(10), Currency::Usd),
            money(dec!(10), Currency::Usd),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let err = JournalEntryLine::new(
            "cash",
            "",
            money(dec!(0), Currency::Usd),
            money(dec!(0), Currency::Usd),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn line_requires_matching_currency() {
        let err = JournalEntryLine::new(
            "cash",
            "",
            money(dec!(10), Currency::Usd),
            money(dec!(0), Currency::Eur),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn balanced_entry_validates() {
        let lines = vec![
            line("cash", dec!(100), dec!(0), Currency::Usd),
            line("revenue", dec!(0), dec!(100), Currency::Usd),
        ];
        assert!(JournalEntry::validate_balance(&lines).is_ok());
    }

    #[test]
    fn unbalanced_entry_is_rejected() {
        let lines = vec![
            line("cash", dec!(100), dec!(0), Currency::Usd),
            line("revenue", dec!(0), dec!(75), Currency::Usd),
        ];
        assert!(matches!(
            JournalEntry::validate_balance(&lines),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn multi_currency_entry_balances_independently() {
        let lines = vec![
            line("cash-usd", dec!(100), dec!(0), Currency::Usd),
            line("revenue-usd", dec!(0), dec!(100), Currency::Usd),
            line("cash-eur", dec!(50), dec!(0), Currency::Eur),
            line("revenue-eur", dec!(0), dec!(50), Currency::Eur),
        ];
        assert!(JournalEntry::validate_balance(&lines).is_ok());
    }

    #[test]
    fn mixed_currency_single_pair_is_rejected() {
        let lines = vec![
            line("cash-usd", dec!(100), dec!(0), Currency::Usd),
            line("cash-eur", dec!(0), dec!(100), Currency::Eur),
        ];
        assert!(matches!(
            JournalEntry::validate_balance(&lines),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn empty_lines_is_rejected() {
        assert!(matches!(
            JournalEntry::validate_balance(&[]),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn reversed_line_swaps_sides_and_keeps_account() {
        let original = line("cash", dec!(100), dec!(0), Currency::Usd);
        let reversed = original.reversed();
        assert_eq!(reversed.account_id, "cash");
        assert!(reversed.is_credit());
        assert_eq!(reversed.credit_amount, money(dec!(100), Currency::Usd));
    }

    #[test]
    fn document_round_trips_through_serialization() {
        let now = Utc::now();
        let entry = JournalEntry {
            id: "je-1".into(),
            created_at: now,
            updated_at: now,
            reference: "DEP001".into(),
            description: "Customer deposit".into(),
            lines: vec![
                line("cash", dec!(1000), dec!(0), Currency::Usd),
                line("deposits", dec!(0), dec!(1000), Currency::Usd),
            ],
            state: EntryState::Posted,
            posted_at: Some(now),
            reverses: None,
            reversed_by: None,
        };

        let doc = entry.to_document();
        let back = JournalEntry::from_document(&doc).unwrap();
        assert_eq!(back, entry);
    }
}
