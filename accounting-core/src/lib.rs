#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Composition root wiring [`Storage`](accounting_storage::Storage),
//! [`TenantAwareStorage`], [`AuditLog`](accounting_audit_log::AuditLog) and
//! [`Ledger`](accounting_ledger::Ledger) behind one entry point, so a host
//! process depends on [`AccountingCore`] instead of assembling the stack
//! itself.

use std::sync::Arc;

use accounting_audit_log::AuditLog;
use accounting_audit_log::AuditLogError;
use accounting_audit_log::StorageAuditLog;
use accounting_ledger::Ledger;
use accounting_ledger::LedgerError;
use accounting_ledger::StorageLedger;
use accounting_storage::InMemoryStorage;
use accounting_storage::Storage;
use accounting_storage::StorageError;
use accounting_tenancy::TenancyResult;
use accounting_tenancy::Tenant;
use accounting_tenancy::TenantAwareStorage;
use accounting_tenancy::TenantError;
use accounting_tenancy::TenantId;
use accounting_tenancy::TenantRegistry;
use thiserror::Error;
use tracing::warn;

pub use accounting_audit_log::AuditEventType;
pub use accounting_ledger::AccountId;
pub use accounting_ledger::AccountType;
pub use accounting_ledger::EntryId;
pub use accounting_ledger::EntryState;
pub use accounting_ledger::JournalEntry;
pub use accounting_ledger::JournalEntryLine;
pub use accounting_tenancy::SubscriptionTier;
pub use accounting_tenancy::TenantBranding;
pub use accounting_tenancy::TenantQuotas;

pub type CoreResult<T> = Result<T, CoreError>;

/// The union of every layer's error type, so a host that only imports this
/// crate never needs to depend on `accounting-ledger`/`accounting-tenancy`/
/// `accounting-audit-log` just to match on an error variant.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Tenancy(#[from] TenantError),
    #[error(transparent)]
    Audit(#[from] AuditLogError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Wires the platform's storage, tenancy, audit, and ledger crates behind a
/// single handle. Ledger and audit operations run over the tenant-aware
/// decorator so every journal entry and audit event they touch is scoped to
/// the ambient tenant; the tenant registry itself reads the raw storage,
/// since tenants are not tenant-scoped data.
#[derive(Clone)]
pub struct AccountingCore {
    storage: Arc<dyn Storage>,
    audit: Arc<dyn AuditLog>,
    ledger: Arc<dyn Ledger>,
    tenants: Arc<TenantRegistry>,
}

impl AccountingCore {
    /// Builds the stack over an already-constructed [`Storage`] backend.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let tenant_storage: Arc<dyn Storage> = Arc::new(TenantAwareStorage::new(Arc::clone(&storage)));
        let audit: Arc<dyn AuditLog> = Arc::new(StorageAuditLog::new(Arc::clone(&tenant_storage)));
        let ledger: Arc<dyn Ledger> = Arc::new(StorageLedger::new(Arc::clone(&tenant_storage), Arc::clone(&audit)));
        let tenants = Arc::new(TenantRegistry::new(Arc::clone(&storage)));
        Self {
            storage,
            audit,
            ledger,
            tenants,
        }
    }

    /// Builds the stack from the process environment, per `STORAGE_TYPE`.
    /// Reads a `.env` file if present. `sqlite` is accepted but mapped onto
    /// the in-memory backend with a startup warning (see DESIGN.md).
    pub async fn from_env() -> CoreResult<Self> {
        dotenvy::dotenv().ok();

        let storage_type = std::env::var("STORAGE_TYPE").unwrap_or_else(|_| "memory".to_string());
        let storage: Arc<dyn Storage> = match storage_type.as_str() {
            "postgresql" => {
                let database_url = std::env::var("DATABASE_URL")
                    .map_err(|_| CoreError::Config("DATABASE_URL is required when STORAGE_TYPE=postgresql".into()))?;
                let pool = accounting_storage::postgres::init_pool(&database_url)
                    .await
                    .map_err(|err| CoreError::Config(format!("failed to connect to postgres: {err}")))?;
                Arc::new(accounting_storage::PostgresStorage::new(pool))
            }
            "sqlite" => {
                warn!("STORAGE_TYPE=sqlite has no dedicated backend yet; falling back to the in-memory store");
                Arc::new(InMemoryStorage::new())
            }
            "memory" => Arc::new(InMemoryStorage::new()),
            other => {
                return Err(CoreError::Config(format!(
                    "unrecognized STORAGE_TYPE: {other} (expected memory, sqlite, or postgresql)"
                )))
            }
        };

        Ok(Self::new(storage))
    }

    /// Installs a `tracing` subscriber honoring `RUST_LOG`, defaulting to
    /// `info` when unset. Call once at process startup.
    pub fn init_tracing() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
            .init();
    }

    #[must_use]
    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    #[must_use]
    pub fn audit(&self) -> Arc<dyn AuditLog> {
        Arc::clone(&self.audit)
    }

    #[must_use]
    pub fn ledger(&self) -> Arc<dyn Ledger> {
        Arc::clone(&self.ledger)
    }

    #[must_use]
    pub fn tenants(&self) -> Arc<TenantRegistry> {
        Arc::clone(&self.tenants)
    }

    // -- Ledger passthroughs (accounting_ledger::Ledger) --------------------

    pub async fn create_journal_entry(
        &self,
        reference: &str,
        description: &str,
        lines: Vec<JournalEntryLine>,
    ) -> CoreResult<JournalEntry> {
        Ok(self.ledger.create_journal_entry(reference, description, lines).await?)
    }

    pub async fn post_journal_entry(&self, id: &str) -> CoreResult<JournalEntry> {
        Ok(self.ledger.post_journal_entry(id).await?)
    }

    pub async fn reverse_journal_entry(&self, original_id: &str, reason: &str) -> CoreResult<JournalEntry> {
        Ok(self.ledger.reverse_journal_entry(original_id, reason).await?)
    }

    pub async fn get_journal_entry(&self, id: &str) -> CoreResult<Option<JournalEntry>> {
        Ok(self.ledger.get_journal_entry(id).await?)
    }

    pub async fn calculate_account_balance(
        &self,
        account_id: &str,
        account_type: AccountType,
        currency: accounting_money::Currency,
    ) -> CoreResult<accounting_money::Money> {
        Ok(self.ledger.calculate_account_balance(account_id, account_type, currency).await?)
    }

    // -- Tenancy passthroughs (accounting_tenancy::TenantRegistry) ----------

    pub async fn create_tenant(
        &self,
        code: &str,
        display_name: &str,
        tier: SubscriptionTier,
        quotas: TenantQuotas,
    ) -> TenancyResult<Tenant> {
        self.tenants.create_tenant(code, display_name, tier, quotas).await
    }

    pub async fn get_tenant(&self, id: &str) -> TenancyResult<Option<Tenant>> {
        self.tenants.get_tenant(id).await
    }

    pub async fn deactivate_tenant(&self, id: &str) -> TenancyResult<Tenant> {
        self.tenants.deactivate_tenant(id).await
    }

    pub async fn reactivate_tenant(&self, id: &str) -> TenancyResult<Tenant> {
        self.tenants.reactivate_tenant(id).await
    }

    /// The precedence described in §6 of the platform's external-interface
    /// contract: header, then subdomain, then bearer claim.
    pub async fn resolve_tenant(
        &self,
        header_tenant_id: Option<&str>,
        subdomain: Option<&str>,
        token_tenant_claim: Option<&str>,
    ) -> TenancyResult<Option<TenantId>> {
        accounting_tenancy::resolve_tenant(&self.tenants, header_tenant_id, subdomain, token_tenant_claim).await
    }
}

#[cfg(test)]
mod tests {
    use accounting_money::Currency;
    use accounting_money::Money;
    use accounting_tenancy::TenantBranding;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    fn core() -> AccountingCore {
        AccountingCore::new(Arc::new(InMemoryStorage::new()))
    }

    fn quotas() -> TenantQuotas {
        TenantQuotas {
            max_users: 10,
            max_accounts: 100,
        }
    }

    #[tokio::test]
    async fn wires_ledger_audit_and_tenancy_behind_one_handle() {
        let core = core();
        let tenant = core
            .create_tenant("acme", "Acme Corp", SubscriptionTier::Starter, quotas())
            .await
            .unwrap();
        assert!(tenant.is_active);

        let lines = vec![
            JournalEntryLine::new(
                "cash",
                "cash in",
                Money::new(dec!(500), Currency::Usd).unwrap(),
                Money::zero(Currency::Usd),
            )
            .unwrap(),
            JournalEntryLine::new(
                "revenue",
                "service revenue",
                Money::zero(Currency::Usd),
                Money::new(dec!(500), Currency::Usd).unwrap(),
            )
            .unwrap(),
        ];

        let entry = accounting_tenancy::with_tenant(tenant.id.clone(), || async {
            let entry = core.create_journal_entry("INV001", "Consulting invoice", lines).await.unwrap();
            core.post_journal_entry(&entry.id).await.unwrap()
        })
        .await;
        assert_eq!(entry.state, EntryState::Posted);

        let balance = accounting_tenancy::with_tenant(tenant.id.clone(), || async {
            core.calculate_account_balance("cash", AccountType::Asset, Currency::Usd)
                .await
                .unwrap()
        })
        .await;
        assert_eq!(balance, Money::new(dec!(500), Currency::Usd).unwrap());

        let events = core.audit().get_events_for_entity("journal_entry", &entry.id, None).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn resolve_tenant_prefers_header_over_subdomain() {
        let core = core();
        core.create_tenant("acme", "Acme Corp", SubscriptionTier::Starter, quotas())
            .await
            .unwrap();

        let resolved = core.resolve_tenant(Some("explicit-id"), Some("acme"), None).await.unwrap();
        assert_eq!(resolved, Some("explicit-id".to_string()));
    }

    #[test]
    fn default_branding_round_trips_through_quotas() {
        let branding = TenantBranding::default();
        assert!(branding.logo_url.is_none());
    }
}
