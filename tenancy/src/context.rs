//! Ambient tenant propagation.
//!
//! The primary mechanism is a `tokio::task_local!` value carried by the
//! logical continuation, per the platform's standing guidance to avoid
//! global mutable state and follow task boundaries rather than threads.
//! A thread-local fallback covers synchronous call sites (outside any
//! `with_tenant`/`with_super_admin` future) so `get_current_tenant`/
//! `set_current_tenant` still do something sensible for thread-per-request
//! hosts that never enter the async scope.

use std::cell::RefCell;
use std::future::Future;

use crate::TenantId;

tokio::task_local! {
    static TASK_TENANT: RefCell<Option<TenantId>>;
}

thread_local! {
    static THREAD_TENANT: RefCell<Option<TenantId>> = const { RefCell::new(None) };
}

/// The ambient tenant for this logical call chain, or `None` in
/// super-admin mode.
#[must_use]
pub fn get_current_tenant() -> Option<TenantId> {
    TASK_TENANT
        .try_with(|cell| cell.borrow().clone())
        .unwrap_or_else(|_| THREAD_TENANT.with(|cell| cell.borrow().clone()))
}

/// Sets the ambient tenant in place, without a paired restore. Prefer
/// [`with_tenant`] or [`TenantScope`] so the previous value is restored on
/// every exit path; this exists for hosts that manage their own request
/// lifecycle and call it once at the start and end of a request.
pub fn set_current_tenant(tenant_id: Option<TenantId>) {
    let in_task_scope = TASK_TENANT
        .try_with(|cell| *cell.borrow_mut() = tenant_id.clone())
        .is_ok();
    if !in_task_scope {
        THREAD_TENANT.with(|cell| *cell.borrow_mut() = tenant_id);
    }
}

/// Runs `f` with `tenant_id` as the ambient tenant for the duration of the
/// returned future. Nesting is supported: an inner `with_tenant`/
/// `with_super_admin` call is visible only within its own future, and the
/// outer tenant reappears once it completes.
pub async fn with_tenant<F, Fut, R>(tenant_id: impl Into<TenantId>, f: F) -> R
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = R>,
{
    TASK_TENANT
        .scope(RefCell::new(Some(tenant_id.into())), f())
        .await
}

/// Runs `f` in super-admin mode (no ambient tenant) for the duration of the
/// returned future, regardless of any tenant already in scope.
pub async fn with_super_admin<F, Fut, R>(f: F) -> R
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = R>,
{
    TASK_TENANT.scope(RefCell::new(None), f()).await
}

/// RAII scope for synchronous call chains: sets the ambient tenant on
/// construction and restores the previous value when dropped, including on
/// panic unwind.
pub struct TenantScope {
    previous: Option<TenantId>,
}

impl TenantScope {
    #[must_use]
    pub fn enter(tenant_id: impl Into<TenantId>) -> Self {
        let previous = get_current_tenant();
        set_current_tenant(Some(tenant_id.into()));
        TenantScope { previous }
    }

    #[must_use]
    pub fn enter_super_admin() -> Self {
        let previous = get_current_tenant();
        set_current_tenant(None);
        TenantScope { previous }
    }
}

impl Drop for TenantScope {
    fn drop(&mut self) {
        set_current_tenant(self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_scope_restores_previous_value_on_drop() {
        assert_eq!(get_current_tenant(), None);
        {
            let _outer = TenantScope::enter("tenant-a");
            assert_eq!(get_current_tenant(), Some("tenant-a".to_string()));
            {
                let _inner = TenantScope::enter("tenant-b");
                assert_eq!(get_current_tenant(), Some("tenant-b".to_string()));
            }
            assert_eq!(get_current_tenant(), Some("tenant-a".to_string()));
        }
        assert_eq!(get_current_tenant(), None);
    }

    #[tokio::test]
    async fn async_scope_nests_and_restores() {
        let outcome = with_tenant("tenant-a", || async {
            let inner = with_tenant("tenant-b", || async { get_current_tenant() }).await;
            (get_current_tenant(), inner)
        })
        .await;

        assert_eq!(outcome.0, Some("tenant-a".to_string()));
        assert_eq!(outcome.1, Some("tenant-b".to_string()));
    }

    #[tokio::test]
    async fn super_admin_scope_clears_tenant() {
        let result = with_tenant("tenant-a", || async {
            with_super_admin(|| async { get_current_tenant() }).await
        })
        .await;
        assert_eq!(result, None);
    }
}
