//! In-memory transactional key/value resource.
//!
//! Writes made inside a transaction are recorded in a per-transaction journal and only
//! applied to the shared map on commit. Savepoints are journal marks, so rolling back to a
//! savepoint truncates the journal. Writes made outside a transaction are applied
//! immediately.

use super::{ResourceDriver, ResourceDriverProvider, ResourceHandle, Savepoint};
use crate::context::TransactionContext;
use crate::definition::Isolation;
use crate::errors::{ErrorKind, TxError, TxResult};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Put { key: String, value: String },
    Remove { key: String },
}

struct MemoryTransaction {
    journal: Vec<Change>,
    savepoints: Vec<(String, usize)>,
    isolation: Isolation,
    read_only: bool,
    timeout_seconds: i32,
    deadline: Option<Instant>,
}

impl MemoryTransaction {
    fn check_deadline(&self, handle: &ResourceHandle) -> TxResult<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                log::warn!("In-memory transaction {} exceeded its {}s timeout", handle, self.timeout_seconds);
                return Err(TxError::new(
                    &format!(
                        "Transaction {} timed out: deadline of {}s exceeded",
                        handle, self.timeout_seconds
                    ),
                    ErrorKind::TransactionTimedOut,
                ));
            }
        }
        Ok(())
    }

    fn lookup(&self, key: &str) -> Option<Option<String>> {
        self.journal.iter().rev().find_map(|change| match change {
            Change::Put { key: k, value } if k == key => Some(Some(value.clone())),
            Change::Remove { key: k } if k == key => Some(None),
            _ => None,
        })
    }
}

/// A transactional, in-memory, ordered key/value store.
///
/// # Purpose
/// `InMemoryResource` is a complete [`ResourceDriverProvider`] used for embedding, demos
/// and tests. Application code reads and writes through the
/// [`TransactionContext`], so work automatically lands in whatever transaction the
/// manager has bound for this resource.
///
/// # Characteristics
/// - **Read-your-writes**: lookups inside a transaction see its own pending changes
/// - **Auto-commit**: writes outside a transaction are applied immediately
/// - **Read-only**: writes inside a read-only transaction fail with `ReadOnlyViolation`
/// - **Timeouts**: a positive timeout becomes a deadline checked on write and commit
/// - **Savepoints**: supported unless created with [`without_savepoints`](Self::without_savepoints)
///
/// # Examples
///
/// ```rust
/// use txscope::context::TransactionContext;
/// use txscope::manager::TransactionManager;
/// use txscope::resource::InMemoryResource;
///
/// let resource = InMemoryResource::new("accounts");
/// let manager = TransactionManager::builder(resource.driver()).build().unwrap();
/// let mut ctx = TransactionContext::new();
///
/// let mut status = manager.get_transaction(&mut ctx, None).unwrap();
/// resource.put(&ctx, "alice", "100").unwrap();
/// assert_eq!(resource.committed("alice"), None);
/// manager.commit(&mut ctx, &mut status).unwrap();
/// assert_eq!(resource.committed("alice"), Some("100".to_string()));
/// ```
#[derive(Clone)]
pub struct InMemoryResource {
    inner: Arc<InMemoryResourceInner>,
}

struct InMemoryResourceInner {
    key: String,
    savepoints_enabled: bool,
    data: RwLock<BTreeMap<String, String>>,
    transactions: DashMap<ResourceHandle, MemoryTransaction>,
    savepoint_counter: AtomicU64,
}

impl InMemoryResource {
    /// Creates an empty resource bound under `key`, with savepoint support.
    pub fn new(key: &str) -> Self {
        Self::create(key, true)
    }

    /// Creates an empty resource bound under `key` that cannot create savepoints.
    pub fn without_savepoints(key: &str) -> Self {
        Self::create(key, false)
    }

    fn create(key: &str, savepoints_enabled: bool) -> Self {
        InMemoryResource {
            inner: Arc::new(InMemoryResourceInner {
                key: key.to_string(),
                savepoints_enabled,
                data: RwLock::new(BTreeMap::new()),
                transactions: DashMap::new(),
                savepoint_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a driver handle backed by this resource.
    pub fn driver(&self) -> ResourceDriver {
        ResourceDriver::new(self.clone())
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Writes `value` under `key`, inside the bound transaction if there is one.
    pub fn put(&self, ctx: &TransactionContext, key: &str, value: &str) -> TxResult<()> {
        self.write(
            ctx,
            Change::Put {
                key: key.to_string(),
                value: value.to_string(),
            },
        )
    }

    /// Removes `key`, inside the bound transaction if there is one.
    pub fn remove(&self, ctx: &TransactionContext, key: &str) -> TxResult<()> {
        self.write(ctx, Change::Remove { key: key.to_string() })
    }

    /// Reads `key` as seen from the execution context.
    pub fn get(&self, ctx: &TransactionContext, key: &str) -> TxResult<Option<String>> {
        if let Some(handle) = ctx.resource_handle(&self.inner.key) {
            let tx = self.transaction(&handle)?;
            if let Some(pending) = tx.lookup(key) {
                return Ok(pending);
            }
        }
        Ok(self.committed(key))
    }

    /// Reads the committed value of `key`, ignoring any pending transaction.
    pub fn committed(&self, key: &str) -> Option<String> {
        self.inner.data.read().get(key).cloned()
    }

    /// Number of committed entries.
    pub fn committed_len(&self) -> usize {
        self.inner.data.read().len()
    }

    /// Number of transactions begun but not yet committed or rolled back.
    pub fn active_transactions(&self) -> usize {
        self.inner.transactions.len()
    }

    /// Isolation level requested when `handle` was begun.
    pub fn isolation_of(&self, handle: &ResourceHandle) -> Option<Isolation> {
        self.inner.transactions.get(handle).map(|tx| tx.isolation)
    }

    fn write(&self, ctx: &TransactionContext, change: Change) -> TxResult<()> {
        match ctx.resource_handle(&self.inner.key) {
            Some(handle) => {
                let mut tx = self.transaction_mut(&handle)?;
                if tx.read_only {
                    log::error!("Write attempted in read-only transaction {}", handle);
                    return Err(TxError::new(
                        &format!("Transaction {} is read-only", handle),
                        ErrorKind::ReadOnlyViolation,
                    ));
                }
                tx.check_deadline(&handle)?;
                tx.journal.push(change);
                Ok(())
            }
            None => {
                apply(&mut self.inner.data.write(), change);
                Ok(())
            }
        }
    }

    fn transaction(
        &self,
        handle: &ResourceHandle,
    ) -> TxResult<dashmap::mapref::one::Ref<'_, ResourceHandle, MemoryTransaction>> {
        self.inner
            .transactions
            .get(handle)
            .ok_or_else(|| unknown_transaction(handle))
    }

    fn transaction_mut(
        &self,
        handle: &ResourceHandle,
    ) -> TxResult<dashmap::mapref::one::RefMut<'_, ResourceHandle, MemoryTransaction>> {
        self.inner
            .transactions
            .get_mut(handle)
            .ok_or_else(|| unknown_transaction(handle))
    }
}

fn apply(data: &mut BTreeMap<String, String>, change: Change) {
    match change {
        Change::Put { key, value } => {
            data.insert(key, value);
        }
        Change::Remove { key } => {
            data.remove(&key);
        }
    }
}

fn unknown_transaction(handle: &ResourceHandle) -> TxError {
    TxError::new(
        &format!("No active in-memory transaction for handle {}", handle),
        ErrorKind::ResourceFailure,
    )
}

impl ResourceDriverProvider for InMemoryResource {
    fn resource_key(&self) -> String {
        self.inner.key.clone()
    }

    fn begin(
        &self,
        isolation: Isolation,
        timeout_seconds: i32,
        read_only: bool,
    ) -> TxResult<ResourceHandle> {
        let handle = ResourceHandle::generate();
        let deadline = if timeout_seconds > 0 {
            Some(Instant::now() + Duration::from_secs(timeout_seconds as u64))
        } else {
            None
        };
        self.inner.transactions.insert(
            handle.clone(),
            MemoryTransaction {
                journal: Vec::new(),
                savepoints: Vec::new(),
                isolation,
                read_only,
                timeout_seconds,
                deadline,
            },
        );
        log::debug!(
            "Began in-memory transaction {} on '{}' (isolation {}, timeout {}, read-only {})",
            handle,
            self.inner.key,
            isolation,
            timeout_seconds,
            read_only
        );
        Ok(handle)
    }

    fn commit(&self, handle: &ResourceHandle) -> TxResult<()> {
        let (_, tx) = self
            .inner
            .transactions
            .remove(handle)
            .ok_or_else(|| unknown_transaction(handle))?;
        tx.check_deadline(handle)?;

        let mut data = self.inner.data.write();
        let count = tx.journal.len();
        for change in tx.journal {
            apply(&mut data, change);
        }
        log::debug!("Committed in-memory transaction {} ({} changes)", handle, count);
        Ok(())
    }

    fn rollback(&self, handle: &ResourceHandle) -> TxResult<()> {
        let (_, tx) = self
            .inner
            .transactions
            .remove(handle)
            .ok_or_else(|| unknown_transaction(handle))?;
        log::debug!(
            "Rolled back in-memory transaction {} ({} changes discarded)",
            handle,
            tx.journal.len()
        );
        Ok(())
    }

    fn supports_savepoints(&self) -> bool {
        self.inner.savepoints_enabled
    }

    fn create_savepoint(&self, handle: &ResourceHandle) -> TxResult<Savepoint> {
        if !self.inner.savepoints_enabled {
            return Err(TxError::new(
                &format!("Resource '{}' does not support savepoints", self.inner.key),
                ErrorKind::NestedTransactionNotSupported,
            ));
        }
        let mut tx = self.transaction_mut(handle)?;
        let id = self.inner.savepoint_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("SAVEPOINT_{}", id);
        let mark = tx.journal.len();
        tx.savepoints.push((name.clone(), mark));
        log::trace!("Created savepoint {} at journal mark {} in {}", name, mark, handle);
        Ok(Savepoint::new(&name))
    }

    fn rollback_to_savepoint(&self, handle: &ResourceHandle, savepoint: &Savepoint) -> TxResult<()> {
        let mut tx = self.transaction_mut(handle)?;
        let position = tx
            .savepoints
            .iter()
            .position(|(name, _)| name == savepoint.name())
            .ok_or_else(|| unknown_savepoint(handle, savepoint))?;
        let mark = tx.savepoints[position].1;
        tx.journal.truncate(mark);
        tx.savepoints.truncate(position + 1);
        log::trace!("Rolled back {} to savepoint {}", handle, savepoint);
        Ok(())
    }

    fn release_savepoint(&self, handle: &ResourceHandle, savepoint: &Savepoint) -> TxResult<()> {
        let mut tx = self.transaction_mut(handle)?;
        let position = tx
            .savepoints
            .iter()
            .position(|(name, _)| name == savepoint.name())
            .ok_or_else(|| unknown_savepoint(handle, savepoint))?;
        tx.savepoints.truncate(position);
        Ok(())
    }

    fn release(&self, handle: &ResourceHandle) -> TxResult<()> {
        // commit and rollback already dropped the journal; this only catches leftovers
        if self.inner.transactions.remove(handle).is_some() {
            log::warn!("Released in-memory transaction {} that was never completed", handle);
        }
        Ok(())
    }
}

fn unknown_savepoint(handle: &ResourceHandle, savepoint: &Savepoint) -> TxError {
    TxError::new(
        &format!("Savepoint {} does not exist in transaction {}", savepoint, handle),
        ErrorKind::ResourceFailure,
    )
}

impl Debug for InMemoryResource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryResource")
            .field("key", &self.inner.key)
            .field("committed_len", &self.committed_len())
            .field("active_transactions", &self.active_transactions())
            .finish()
    }
}
