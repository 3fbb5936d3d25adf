use super::ResourceHandle;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The resource transaction currently bound in an execution context.
///
/// # Purpose
/// Every status that participates in the same resource transaction shares one holder.
/// The holder carries the global rollback-only marker: a participant that cannot complete
/// sets it, and the owner's commit discovers it.
///
/// # Characteristics
/// - **Shared**: clones refer to the same state
/// - **Rollback-only until savepoint rollback**: once set, only rolling a nested
///   status back to its savepoint clears it
#[derive(Clone)]
pub struct ResourceHolder {
    inner: Arc<ResourceHolderInner>,
}

struct ResourceHolderInner {
    handle: ResourceHandle,
    rollback_only: AtomicBool,
    transaction_active: AtomicBool,
}

impl ResourceHolder {
    pub fn new(handle: ResourceHandle) -> Self {
        ResourceHolder {
            inner: Arc::new(ResourceHolderInner {
                handle,
                rollback_only: AtomicBool::new(false),
                transaction_active: AtomicBool::new(false),
            }),
        }
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.inner.handle
    }

    pub fn set_rollback_only(&self) {
        self.inner.rollback_only.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reset_rollback_only(&self) {
        self.inner.rollback_only.store(false, Ordering::SeqCst);
    }

    pub fn is_rollback_only(&self) -> bool {
        self.inner.rollback_only.load(Ordering::SeqCst)
    }

    pub(crate) fn set_transaction_active(&self, active: bool) {
        self.inner.transaction_active.store(active, Ordering::SeqCst);
    }

    pub fn is_transaction_active(&self) -> bool {
        self.inner.transaction_active.load(Ordering::SeqCst)
    }

    /// Whether both holders refer to the same bound transaction.
    pub fn same_as(&self, other: &ResourceHolder) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for ResourceHolder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHolder")
            .field("handle", &self.inner.handle)
            .field("rollback_only", &self.is_rollback_only())
            .field("transaction_active", &self.is_transaction_active())
            .finish()
    }
}
