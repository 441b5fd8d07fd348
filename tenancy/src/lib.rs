#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Tenant isolation: the ambient [`TenantContext`](context) propagated
//! through call chains, the [`TenantAwareStorage`] decorator that enforces
//! it, and the [`TenantRegistry`] for the `Tenant` entities themselves.

mod aware_storage;
pub mod context;

pub use aware_storage::TenantAwareStorage;
pub use context::get_current_tenant;
pub use context::set_current_tenant;
pub use context::with_super_admin;
pub use context::with_tenant;
pub use context::TenantScope;

use std::sync::Arc;

use accounting_storage::Document;
use accounting_storage::Storage;
use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

pub type TenantId = String;
pub type TenancyResult<T> = Result<T, TenantError>;

const TENANTS_TABLE: &str = "tenants";

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("tenant not found: {0}")]
    NotFound(String),
    #[error("tenant already exists: {0}")]
    Conflict(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(#[from] accounting_storage::StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTier {
    Starter,
    Growth,
    Enterprise,
}

impl SubscriptionTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::Starter => "starter",
            SubscriptionTier::Growth => "growth",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }

    pub fn parse(value: &str) -> TenancyResult<Self> {
        match value {
            "starter" => Ok(SubscriptionTier::Starter),
            "growth" => Ok(SubscriptionTier::Growth),
            "enterprise" => Ok(SubscriptionTier::Enterprise),
            other => Err(TenantError::Validation(format!(
                "unknown subscription tier: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantQuotas {
    pub max_users: u32,
    pub max_accounts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantBranding {
    pub logo_url: Option<String>,
    pub primary_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: TenantId,
    pub code: String,
    pub display_name: String,
    pub is_active: bool,
    pub tier: SubscriptionTier,
    pub quotas: TenantQuotas,
    pub branding: TenantBranding,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    fn to_document(&self) -> Document {
        let mut doc = serde_json::Map::new();
        doc.insert("id".into(), self.id.clone().into());
        doc.insert("code".into(), self.code.clone().into());
        doc.insert("display_name".into(), self.display_name.clone().into());
        doc.insert("is_active".into(), self.is_active.into());
        doc.insert("tier".into(), self.tier.as_str().into());
        doc.insert("max_users".into(), self.quotas.max_users.into());
        doc.insert("max_accounts".into(), self.quotas.max_accounts.into());
        doc.insert(
            "branding_logo_url".into(),
            self.branding.logo_url.clone().into(),
        );
        doc.insert(
            "branding_primary_color".into(),
            self.branding.primary_color.clone().into(),
        );
        doc.insert("created_at".into(), self.created_at.to_rfc3339().into());
        doc.insert("updated_at".into(), self.updated_at.to_rfc3339().into());
        doc
    }

    fn from_document(doc: &Document) -> TenancyResult<Self> {
        let get_str = |key: &str| -> TenancyResult<String> {
            doc.get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| TenantError::Validation(format!("missing field {key}")))
        };
        let created_at = DateTime::parse_from_rfc3339(&get_str("created_at")?)
            .map_err(|e| TenantError::Validation(e.to_string()))?
            .with_timezone(&Utc);
        let updated_at = DateTime::parse_from_rfc3339(&get_str("updated_at")?)
            .map_err(|e| TenantError::Validation(e.to_string()))?
            .with_timezone(&Utc);

        Ok(Tenant {
            id: get_str("id")?,
            code: get_str("code")?,
            display_name: get_str("display_name")?,
            is_active: doc.get("is_active").and_then(|v| v.as_bool()).unwrap_or(false),
            tier: SubscriptionTier::parse(&get_str("tier")?)?,
            quotas: TenantQuotas {
                max_users: doc
                    .get("max_users")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
                max_accounts: doc
                    .get("max_accounts")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
            },
            branding: TenantBranding {
                logo_url: doc
                    .get("branding_logo_url")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                primary_color: doc
                    .get("branding_primary_color")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            },
            created_at,
            updated_at,
        })
    }
}

/// CRUD over the `Tenant` entity, backed directly by the raw (non-tenant
/// filtered) storage -- the registry itself is not tenant-scoped data.
pub struct TenantRegistry {
    storage: Arc<dyn Storage>,
}

impl TenantRegistry {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn create_tenant(
        &self,
        code: &str,
        display_name: &str,
        tier: SubscriptionTier,
        quotas: TenantQuotas,
    ) -> TenancyResult<Tenant> {
        let code = code.trim();
        if code.is_empty() {
            return Err(TenantError::Validation("tenant code cannot be empty".into()));
        }
        if display_name.trim().is_empty() {
            return Err(TenantError::Validation(
                "tenant display name cannot be empty".into(),
            ));
        }
        if self.get_tenant_by_code(code).await?.is_some() {
            return Err(TenantError::Conflict(format!(
                "tenant code already in use: {code}"
            )));
        }

        let now = Utc::now();
        let tenant = Tenant {
            id: Uuid::new_v4().to_string(),
            code: code.to_string(),
            display_name: display_name.trim().to_string(),
            is_active: true,
            tier,
            quotas,
            branding: TenantBranding::default(),
            created_at: now,
            updated_at: now,
        };

        self.storage
            .save(TENANTS_TABLE, &tenant.id, tenant.to_document())
            .await?;
        Ok(tenant)
    }

    pub async fn get_tenant(&self, id: &str) -> TenancyResult<Option<Tenant>> {
        match self.storage.load(TENANTS_TABLE, id).await? {
            Some(doc) => Ok(Some(Tenant::from_document(&doc)?)),
            None => Ok(None),
        }
    }

    pub async fn get_tenant_by_code(&self, code: &str) -> TenancyResult<Option<Tenant>> {
        let all = self.storage.load_all(TENANTS_TABLE).await?;
        for doc in all {
            let tenant = Tenant::from_document(&doc)?;
            if tenant.code.eq_ignore_ascii_case(code) {
                return Ok(Some(tenant));
            }
        }
        Ok(None)
    }

    pub async fn list_tenants(&self) -> TenancyResult<Vec<Tenant>> {
        self.storage
            .load_all(TENANTS_TABLE)
            .await?
            .iter()
            .map(Tenant::from_document)
            .collect()
    }

    pub async fn deactivate_tenant(&self, id: &str) -> TenancyResult<Tenant> {
        self.set_active(id, false).await
    }

    pub async fn reactivate_tenant(&self, id: &str) -> TenancyResult<Tenant> {
        self.set_active(id, true).await
    }

    async fn set_active(&self, id: &str, is_active: bool) -> TenancyResult<Tenant> {
        let mut tenant = self
            .get_tenant(id)
            .await?
            .ok_or_else(|| TenantError::NotFound(id.to_string()))?;
        tenant.is_active = is_active;
        tenant.updated_at = Utc::now();
        self.storage
            .save(TENANTS_TABLE, &tenant.id, tenant.to_document())
            .await?;
        Ok(tenant)
    }
}

/// Tenant resolution precedence for host processes: an explicit header,
/// then a subdomain match against a tenant's `code`, then a bearer-token
/// claim. Unresolved falls through to super-admin mode (`None`).
pub async fn resolve_tenant(
    registry: &TenantRegistry,
    header_tenant_id: Option<&str>,
    subdomain: Option<&str>,
    token_tenant_claim: Option<&str>,
) -> TenancyResult<Option<TenantId>> {
    if let Some(id) = header_tenant_id {
        return Ok(Some(id.to_string()));
    }
    if let Some(subdomain) = subdomain
        && let Some(tenant) = registry.get_tenant_by_code(subdomain).await?
    {
        return Ok(Some(tenant.id));
    }
    if let Some(claim) = token_tenant_claim {
        return Ok(Some(claim.to_string()));
    }
    Ok(None)
}
