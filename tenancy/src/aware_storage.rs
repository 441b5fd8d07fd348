//! [`TenantAwareStorage`]: a decorator around a raw [`Storage`] that tags
//! writes with the ambient tenant and filters reads/deletes to it.

use std::sync::Arc;

use accounting_storage::Document;
use accounting_storage::Storage;
use accounting_storage::StorageError;
use accounting_storage::StorageResult;
use async_trait::async_trait;

use crate::context::get_current_tenant;
use crate::TenantId;

const TENANT_FIELD: &str = "_tenant_id";

fn tag_of(data: &Document) -> Option<TenantId> {
    data.get(TENANT_FIELD)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Whether `data` is visible under the ambient tenant `current`: untagged
/// records are visible only in super-admin mode; tagged records are visible
/// only to the tenant that owns them (or to super-admin, which sees all).
fn visible(data: &Document, current: &Option<TenantId>) -> bool {
    match (current, tag_of(data)) {
        (None, _) => true,
        (Some(ours), Some(tag)) => *ours == tag,
        (Some(_), None) => false,
    }
}

pub struct TenantAwareStorage {
    inner: Arc<dyn Storage>,
}

impl TenantAwareStorage {
    #[must_use]
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Storage for TenantAwareStorage {
    async fn save(&self, table: &str, id: &str, mut data: Document) -> StorageResult<()> {
        let current = get_current_tenant();

        // Stickiness: a tenant tag, once written, cannot be overwritten by a
        // different ambient tenant (and super-admin data can't be silently
        // claimed by a tenant either). Surfaced as NotFound, not a distinct
        // violation, so a write under the wrong tenant can't be used to
        // probe whether a record exists under someone else's scope.
        if let Some(existing) = self.inner.load(table, id).await? {
            let existing_tag = tag_of(&existing);
            if existing_tag != current {
                return Err(StorageError::NotFound {
                    table: table.to_string(),
                    id: id.to_string(),
                });
            }
        }

        if let Some(tenant_id) = &current {
            data.insert(
                TENANT_FIELD.to_string(),
                serde_json::Value::String(tenant_id.clone()),
            );
        }
        self.inner.save(table, id, data).await
    }

    async fn load(&self, table: &str, id: &str) -> StorageResult<Option<Document>> {
        let current = get_current_tenant();
        let loaded = self.inner.load(table, id).await?;
        Ok(loaded.filter(|data| visible(data, &current)))
    }

    async fn load_all(&self, table: &str) -> StorageResult<Vec<Document>> {
        let current = get_current_tenant();
        let all = self.inner.load_all(table).await?;
        Ok(all
            .into_iter()
            .filter(|data| visible(data, &current))
            .collect())
    }

    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        let current = get_current_tenant();
        match self.inner.load(table, id).await? {
            Some(data) if visible(&data, &current) => self.inner.delete(table, id).await,
            _ => Ok(false),
        }
    }

    async fn exists(&self, table: &str, id: &str) -> StorageResult<bool> {
        Ok(self.load(table, id).await?.is_some())
    }

    async fn find(&self, table: &str, filter: &Document) -> StorageResult<Vec<Document>> {
        let current = get_current_tenant();
        let matches = self.inner.find(table, filter).await?;
        Ok(matches
            .into_iter()
            .filter(|data| visible(data, &current))
            .collect())
    }

    async fn count(&self, table: &str) -> StorageResult<usize> {
        Ok(self.load_all(table).await?.len())
    }

    async fn clear_table(&self, table: &str) -> StorageResult<()> {
        if get_current_tenant().is_some() {
            return Err(StorageError::TenantViolation(
                "clear_table is not permitted under a tenant scope".into(),
            ));
        }
        self.inner.clear_table(table).await
    }

    async fn begin_transaction(&self) -> StorageResult<()> {
        self.inner.begin_transaction().await
    }

    async fn commit(&self) -> StorageResult<()> {
        self.inner.commit().await
    }

    async fn rollback(&self) -> StorageResult<()> {
        self.inner.rollback().await
    }
}
