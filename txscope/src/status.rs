use crate::context::TransactionContext;
use crate::errors::{ErrorKind, TxError, TxResult};
use crate::resource::{ResourceDriver, ResourceHandle, ResourceHolder, Savepoint};
use crate::suspension::SuspendedResourcesHolder;
use crate::synchronization::trigger_flush;
use std::fmt::{Debug, Formatter};
use uuid::Uuid;

/// Record of one transaction attempt, returned by
/// [`TransactionManager::get_transaction`](crate::manager::TransactionManager::get_transaction).
///
/// # Purpose
/// The status tells the caller what kind of transaction it got (a new one, a joined one, a
/// savepoint, or none at all) and is handed back to the manager to commit or roll back.
///
/// # Characteristics
/// - **Exclusive**: owned by the caller that requested it, never shared
/// - **Local rollback-only**: [`set_rollback_only`](Self::set_rollback_only) only marks this
///   status; the shared transaction is marked when the status completes
/// - **Terminal completion**: once completed, commit and rollback are rejected
pub struct TransactionStatus {
    id: String,
    transaction: Option<ResourceHolder>,
    driver: ResourceDriver,
    name: Option<String>,
    new_transaction: bool,
    new_synchronization: bool,
    read_only: bool,
    rollback_only: bool,
    completed: bool,
    savepoint: Option<Savepoint>,
    suspended_resources: Option<SuspendedResourcesHolder>,
}

impl TransactionStatus {
    pub(crate) fn new(
        transaction: Option<ResourceHolder>,
        driver: ResourceDriver,
        name: Option<String>,
        new_transaction: bool,
        new_synchronization: bool,
        read_only: bool,
        suspended_resources: Option<SuspendedResourcesHolder>,
    ) -> Self {
        TransactionStatus {
            id: Uuid::new_v4().to_string(),
            transaction,
            driver,
            name,
            new_transaction,
            new_synchronization,
            read_only,
            rollback_only: false,
            completed: false,
            savepoint: None,
            suspended_resources,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the definition this status was created for.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn transaction(&self) -> Option<&ResourceHolder> {
        self.transaction.as_ref()
    }

    pub fn handle(&self) -> Option<&ResourceHandle> {
        self.transaction.as_ref().map(|holder| holder.handle())
    }

    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Whether this status began the underlying resource transaction and therefore owns
    /// its commit or rollback.
    pub fn is_new_transaction(&self) -> bool {
        self.has_transaction() && self.new_transaction
    }

    /// Whether this status opened the synchronization scope it runs in.
    pub fn is_new_synchronization(&self) -> bool {
        self.new_synchronization
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether this status holds a savepoint, i.e. runs as a nested transaction.
    pub fn has_savepoint(&self) -> bool {
        self.savepoint.is_some()
    }

    /// Marks this status rollback-only. The transaction will be rolled back instead of
    /// committed when this status completes.
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Whether this status or the shared transaction is marked rollback-only.
    pub fn is_rollback_only(&self) -> bool {
        self.is_local_rollback_only() || self.is_global_rollback_only()
    }

    pub fn is_local_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Whether the shared transaction was marked rollback-only by a participant or by the
    /// resource itself.
    pub fn is_global_rollback_only(&self) -> bool {
        match &self.transaction {
            Some(holder) => holder.is_rollback_only() || self.driver.is_rollback_only(holder.handle()),
            None => false,
        }
    }

    /// Flushes registered synchronizations and the underlying resource.
    pub fn flush(&self, ctx: &TransactionContext) -> TxResult<()> {
        if ctx.is_synchronization_active() {
            trigger_flush(&ctx.synchronization_snapshot())?;
        }
        if let Some(handle) = self.handle() {
            self.driver.flush(handle)?;
        }
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn set_completed(&mut self) {
        self.completed = true;
    }

    pub fn has_suspended_resources(&self) -> bool {
        self.suspended_resources.is_some()
    }

    pub fn suspended_resources(&self) -> Option<&SuspendedResourcesHolder> {
        self.suspended_resources.as_ref()
    }

    pub(crate) fn take_suspended_resources(&mut self) -> Option<SuspendedResourcesHolder> {
        self.suspended_resources.take()
    }

    /// Creates a savepoint in the underlying transaction.
    ///
    /// # Errors
    ///
    /// Returns `NestedTransactionNotSupported` if there is no transaction or the resource
    /// cannot create savepoints.
    pub fn create_savepoint(&self) -> TxResult<Savepoint> {
        let handle = self.savepoint_handle()?;
        self.driver.create_savepoint(handle)
    }

    /// Rolls the underlying transaction back to `savepoint`.
    pub fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> TxResult<()> {
        let handle = self.savepoint_handle()?;
        self.driver.rollback_to_savepoint(handle, savepoint)
    }

    /// Releases `savepoint`, keeping the work done since it was created.
    pub fn release_savepoint(&self, savepoint: &Savepoint) -> TxResult<()> {
        let handle = self.savepoint_handle()?;
        self.driver.release_savepoint(handle, savepoint)
    }

    pub(crate) fn create_and_hold_savepoint(&mut self) -> TxResult<()> {
        let savepoint = self.create_savepoint()?;
        log::debug!("Created savepoint {} for nested transaction {}", savepoint, self.id);
        self.savepoint = Some(savepoint);
        Ok(())
    }

    pub(crate) fn rollback_to_held_savepoint(&mut self) -> TxResult<()> {
        let savepoint = self.held_savepoint()?;
        self.rollback_to_savepoint(&savepoint)?;
        if let Some(holder) = &self.transaction {
            holder.reset_rollback_only();
        }
        self.release_savepoint(&savepoint)?;
        self.savepoint = None;
        Ok(())
    }

    pub(crate) fn release_held_savepoint(&mut self) -> TxResult<()> {
        let savepoint = self.held_savepoint()?;
        self.release_savepoint(&savepoint)?;
        self.savepoint = None;
        Ok(())
    }

    fn held_savepoint(&self) -> TxResult<Savepoint> {
        self.savepoint.clone().ok_or_else(|| {
            TxError::new(
                "Cannot roll back to savepoint - no savepoint associated with current transaction",
                ErrorKind::IllegalTransactionState,
            )
        })
    }

    fn savepoint_handle(&self) -> TxResult<&ResourceHandle> {
        match self.handle() {
            Some(handle) if self.driver.supports_savepoints() => Ok(handle),
            Some(handle) => Err(TxError::new(
                &format!(
                    "Transaction object [{}] of resource '{}' does not support savepoints",
                    handle,
                    self.driver.resource_key()
                ),
                ErrorKind::NestedTransactionNotSupported,
            )),
            None => Err(TxError::new(
                "Transaction status does not carry a transaction object and cannot create savepoints",
                ErrorKind::NestedTransactionNotSupported,
            )),
        }
    }
}

impl Debug for TransactionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStatus")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("transaction", &self.transaction)
            .field("new_transaction", &self.new_transaction)
            .field("new_synchronization", &self.new_synchronization)
            .field("read_only", &self.read_only)
            .field("rollback_only", &self.rollback_only)
            .field("completed", &self.completed)
            .field("savepoint", &self.savepoint)
            .field("suspended_resources", &self.suspended_resources)
            .finish()
    }
}
