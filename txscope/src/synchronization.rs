//! Transaction synchronization callbacks and their per-scope registry.

use crate::errors::TxResult;
use itertools::Itertools;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Completion status handed to [`TransactionSynchronization::after_completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynchronizationStatus {
    Committed,
    RolledBack,
    /// Outcome unknown, e.g. after a heuristic or system failure.
    Unknown,
}

impl SynchronizationStatus {
    pub fn value(&self) -> i32 {
        match self {
            SynchronizationStatus::Committed => 0,
            SynchronizationStatus::RolledBack => 1,
            SynchronizationStatus::Unknown => 2,
        }
    }
}

impl Display for SynchronizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SynchronizationStatus::Committed => write!(f, "committed"),
            SynchronizationStatus::RolledBack => write!(f, "rolled back"),
            SynchronizationStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Callback notified at defined points of a transaction's lifecycle.
///
/// Every method defaults to a no-op. Errors returned from `before_commit` abort the commit
/// and reach the caller; errors from `before_completion` and `after_completion` are logged
/// and swallowed so they never mask the primary commit or rollback result.
///
/// Synchronizations run in ascending [`order`](Self::order); those without an order run
/// last, in registration order.
pub trait TransactionSynchronization: Send + Sync {
    /// Sort key for callback invocation. `None` sorts after every explicit order.
    fn order(&self) -> Option<i32> {
        None
    }

    /// Called when the owning transaction is suspended; unbind resources here.
    fn suspend(&self) -> TxResult<()> {
        Ok(())
    }

    /// Called when the owning transaction is resumed; rebind resources here.
    fn resume(&self) -> TxResult<()> {
        Ok(())
    }

    /// Flushes pending state to the underlying resource.
    fn flush(&self) -> TxResult<()> {
        Ok(())
    }

    /// Called before commit, ahead of `before_completion`.
    fn before_commit(&self, _read_only: bool) -> TxResult<()> {
        Ok(())
    }

    /// Called before commit or rollback.
    fn before_completion(&self) -> TxResult<()> {
        Ok(())
    }

    /// Called after a successful commit.
    fn after_commit(&self) -> TxResult<()> {
        Ok(())
    }

    /// Called after commit or rollback, once the resource transaction is finalized.
    fn after_completion(&self, _status: SynchronizationStatus) -> TxResult<()> {
        Ok(())
    }
}

/// Shared handle to a registered synchronization.
pub type SharedSynchronization = Arc<dyn TransactionSynchronization>;

/// Ordered collection of synchronizations for one synchronization scope.
///
/// A synchronization registered twice is only kept once.
#[derive(Clone, Default)]
pub struct SynchronizationRegistry {
    entries: Vec<SharedSynchronization>,
}

impl SynchronizationRegistry {
    pub fn new() -> Self {
        SynchronizationRegistry {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, synchronization: SharedSynchronization) {
        if self
            .entries
            .iter()
            .any(|existing| same_synchronization(existing, &synchronization))
        {
            return;
        }
        self.entries.push(synchronization);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the registered synchronizations in invocation order.
    pub fn ordered(&self) -> Vec<SharedSynchronization> {
        self.entries
            .iter()
            .cloned()
            .sorted_by_key(|it| it.order().unwrap_or(i32::MAX))
            .collect()
    }
}

impl Debug for SynchronizationRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizationRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}

fn same_synchronization(a: &SharedSynchronization, b: &SharedSynchronization) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Invokes `before_commit` on each synchronization, stopping at the first error.
pub(crate) fn trigger_before_commit(
    synchronizations: &[SharedSynchronization],
    read_only: bool,
) -> TxResult<()> {
    for synchronization in synchronizations {
        synchronization.before_commit(read_only)?;
    }
    Ok(())
}

/// Invokes `before_completion` on each synchronization, logging failures.
pub(crate) fn trigger_before_completion(synchronizations: &[SharedSynchronization]) {
    for synchronization in synchronizations {
        if let Err(e) = synchronization.before_completion() {
            log::error!("TransactionSynchronization.before_completion failed: {}", e);
        }
    }
}

/// Invokes `after_commit` on each synchronization, stopping at the first error.
pub(crate) fn trigger_after_commit(synchronizations: &[SharedSynchronization]) -> TxResult<()> {
    for synchronization in synchronizations {
        synchronization.after_commit()?;
    }
    Ok(())
}

/// Invokes `after_completion` on each synchronization, logging failures.
pub(crate) fn invoke_after_completion(
    synchronizations: &[SharedSynchronization],
    status: SynchronizationStatus,
) {
    for synchronization in synchronizations {
        if let Err(e) = synchronization.after_completion(status) {
            log::error!("TransactionSynchronization.after_completion failed: {}", e);
        }
    }
}

/// Flushes each synchronization, stopping at the first error.
pub(crate) fn trigger_flush(synchronizations: &[SharedSynchronization]) -> TxResult<()> {
    for synchronization in synchronizations {
        synchronization.flush()?;
    }
    Ok(())
}
